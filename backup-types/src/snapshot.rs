// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot identity and lifecycle models

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a provider-managed snapshot set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotSetId(pub Uuid);

impl SnapshotSetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used where a full UUID is too long (e.g. LV names)
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SnapshotSetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

/// Identity of one snapshot inside a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

/// Properties reported by the provider once a snapshot set has been committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProperties {
    pub set_id: SnapshotSetId,
    pub snapshot_id: SnapshotId,

    /// Volume the snapshot was taken of (e.g. "/dev/vg0/root")
    pub source_volume: String,

    /// Opaque device reference, only meaningful to the provider and raw I/O
    /// (e.g. "/dev/vg0/root-snap-1a2b3c4d" or "\\?\GLOBALROOT\Device\HarddiskVolumeShadowCopy7")
    pub device_reference: String,
}

/// Lifecycle of a snapshot set as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    /// `begin_set` returned, nothing added yet
    SetStarted,
    /// At least one source volume has been added
    SourceAdded,
    /// `prepare` completed
    Prepared,
    /// `commit_snapshot_set` completed; the device reference is usable
    Committed,
    /// The provider was told the backup finished
    Completed,
    /// The set has been released; nothing may touch it any more
    Released,
}

impl SnapshotState {
    /// Whether the snapshot device can be read from in this state
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Committed | Self::Completed)
    }
}
