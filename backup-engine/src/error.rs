// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::PathBuf;

use backup_contracts::ProviderStatus;
use backup_types::{JobStep, MountSlot, StrategyKind};
use thiserror::Error;

/// Fatal errors of a backup job; exactly one of these ends a failed job
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("elevated privileges are required: {0}")]
    Privilege(String),

    #[error("invalid job configuration: {0}")]
    Configuration(String),

    #[error("destination {path:?} is not usable: {reason}")]
    Destination { path: PathBuf, reason: String },

    #[error(
        "a snapshot of {volume} is already recorded in {record:?}; run `recover` if no backup is running"
    )]
    ConcurrentJob { volume: String, record: PathBuf },

    #[error("recovery ledger error for {path:?}: {reason}")]
    Ledger { path: PathBuf, reason: String },

    #[error("snapshot {step} failed: {status}")]
    SnapshotLifecycle { step: JobStep, status: ProviderStatus },

    #[error(transparent)]
    Mounting(#[from] MountingError),

    #[error("{strategy} copy failed: {source}")]
    Copy {
        strategy: StrategyKind,
        #[source]
        source: CopyError,
    },
}

impl BackupError {
    pub fn lifecycle(step: JobStep, status: ProviderStatus) -> Self {
        Self::SnapshotLifecycle { step, status }
    }

    pub fn copy(strategy: StrategyKind, source: CopyError) -> Self {
        Self::Copy { strategy, source }
    }

    /// Pipeline step this error fails the job at
    pub fn step(&self) -> JobStep {
        match self {
            Self::Privilege(_)
            | Self::Configuration(_)
            | Self::Destination { .. }
            | Self::ConcurrentJob { .. }
            | Self::Ledger { .. } => JobStep::Precondition,
            Self::SnapshotLifecycle { step, .. } => *step,
            Self::Mounting(_) => JobStep::Mount,
            Self::Copy { .. } => JobStep::Copy,
        }
    }
}

#[derive(Debug, Error)]
pub enum MountingError {
    #[error("no free mount slot under {root:?}")]
    NoFreeSlot { root: PathBuf },

    #[error("failed to list mounted paths: {0}")]
    Scan(#[source] io::Error),

    #[error("failed to map {device} at {slot}: {source}")]
    Map {
        device: String,
        slot: MountSlot,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("failed to open snapshot device {device}: {source}")]
    OpenDevice {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("length query on {device} failed: {source}")]
    LengthQuery {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create image {path:?}: {source}")]
    ImageCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("block read failed at offset {offset}: {source}")]
    BlockRead {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("block copy chunk size must be positive")]
    ZeroChunkSize,

    #[error("device ended at offset {offset}, expected {expected} bytes")]
    ShortRead { offset: u64, expected: u64 },

    #[error("image write failed at offset {offset}: {source}")]
    ImageWrite {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("image holds {actual} bytes, device length is {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("failed to create destination {path:?}: {source}")]
    DestinationRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no bulk-copy tool is configured")]
    NoTool,

    #[error("failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with fatal code {code}")]
    ExternalTool { tool: String, code: i32 },

    #[error("failed to read source tree {path:?}: {source}")]
    SourceTree {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CopyError {
    /// Offset reached by a block copy when it stopped, for diagnosis
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::BlockRead { offset, .. }
            | Self::ShortRead { offset, .. }
            | Self::ImageWrite { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Stage at which a disk metadata capture stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStage {
    OpenDrive,
    ReadBootSector,
    QueryLayout,
    WriteBootRecord,
    WriteLayout,
}

impl std::fmt::Display for MetadataStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenDrive => "open drive",
            Self::ReadBootSector => "read boot sector",
            Self::QueryLayout => "query drive layout",
            Self::WriteBootRecord => "write boot record",
            Self::WriteLayout => "write drive layout",
        };
        f.write_str(name)
    }
}

/// Never fails a job; logged and recorded as a secondary error
#[derive(Debug, Error)]
#[error("metadata capture of drive {drive_index} failed to {stage}: {source}")]
pub struct MetadataCaptureError {
    pub drive_index: u32,
    pub stage: MetadataStage,
    #[source]
    pub source: io::Error,
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_the_failed_step() {
        let lifecycle =
            BackupError::lifecycle(JobStep::Prepare, ProviderStatus::timeout("stalled"));
        assert_eq!(lifecycle.step(), JobStep::Prepare);
        assert_eq!(
            lifecycle.to_string(),
            "snapshot prepare failed: 0x800705b4: stalled"
        );

        let mounting = BackupError::from(MountingError::NoFreeSlot {
            root: PathBuf::from("/mnt"),
        });
        assert_eq!(mounting.step(), JobStep::Mount);

        let copy = BackupError::copy(
            StrategyKind::BlockImage,
            CopyError::ShortRead {
                offset: 4096,
                expected: 8192,
            },
        );
        assert_eq!(copy.step(), JobStep::Copy);
        assert!(copy.to_string().starts_with("block_image copy failed"));
    }

    #[test]
    fn block_errors_carry_their_offset() {
        let read = CopyError::BlockRead {
            offset: 3 * 1024 * 1024,
            source: io::Error::other("medium error"),
        };
        assert_eq!(read.offset(), Some(3 * 1024 * 1024));
        assert_eq!(CopyError::NoTool.offset(), None);
    }
}
