// SPDX-License-Identifier: GPL-3.0-only

//! Canonical data model for snapshot-backed backups
//!
//! These types are shared by every layer of the stack:
//!
//! - **backup-contracts**: collaborator traits speak in [`SnapshotProperties`] and ids
//! - **backup-sys**: Linux implementations return these types directly
//! - **backup-engine**: drives a [`BackupJob`] through its [`JobState`]s
//! - **backup-cli**: loads [`EngineConfig`] and prints a [`JobReport`]

pub mod config;
pub mod job;
pub mod metadata;
pub mod mount;
pub mod snapshot;

pub use config::{ConfigError, CopyTool, EngineConfig, LvmConfig, MirrorConfig, MountConfig};
pub use job::{
    BackupJob, BackupStrategy, CopyMode, JobOutcome, JobReport, JobState, JobStep, StrategyKind,
    BLOCK_IMAGE_FILE_NAME,
};
pub use metadata::{
    BOOT_RECORD_FILE_NAME, BOOT_SECTOR_CAPTURE_BYTES, DRIVE_LAYOUT_FILE_NAME, DiskMetadataRecord,
    LAYOUT_ENTRY_BYTES, LAYOUT_HEADER_BYTES, MAX_LAYOUT_PARTITIONS, layout_buffer_capacity,
};
pub use mount::{MountSlot, slot_candidates};
pub use snapshot::{SnapshotId, SnapshotProperties, SnapshotSetId, SnapshotState};
