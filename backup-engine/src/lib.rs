// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot-backed backup orchestration
//!
//! Drives a volume snapshot from creation through consumption to release,
//! turns it into a mirrored file tree or a raw block image, and captures the
//! physical drive's boot record and partition layout alongside.
//!
//! All OS interaction goes through the `backup-contracts` traits.

pub mod error;
pub mod ledger;
pub mod metadata;
pub mod mount;
pub mod orchestrator;
pub mod progress;
pub mod recovery;
pub mod snapshot;
pub mod strategy;

pub use error::{BackupError, CopyError, MetadataCaptureError, MetadataStage, MountingError, Result};
pub use ledger::{LedgerRecord, RecoveryLedger};
pub use metadata::capture_disk_metadata;
pub use mount::{MountGuard, VolumeMount};
pub use orchestrator::{BackupOrchestrator, Collaborators};
pub use recovery::{RecoveryReport, recover};
pub use snapshot::{CreateFailure, SnapshotSession, Teardown, wait_step};
pub use strategy::{BlockImageSource, MirrorFailure, MirrorReport, StrategyContext, StrategyRun};
