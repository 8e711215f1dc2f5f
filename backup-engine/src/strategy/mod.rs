// SPDX-License-Identifier: GPL-3.0-only

//! Turning a committed snapshot into backup output
//!
//! The strategy chosen on the job decides which view of the snapshot gets
//! opened: FileMirror holds a mount, BlockImage holds the raw device and its
//! offset. Each variant carries only its own state.

pub mod block_image;
pub mod file_mirror;

use std::path::PathBuf;

use backup_contracts::{BulkCopyTool, DeviceAccess, MountMapper};
use backup_types::{
    BLOCK_IMAGE_FILE_NAME, BackupJob, BackupStrategy, CopyMode, EngineConfig, JobState,
    SnapshotProperties, StrategyKind,
};
use tracing::{info, warn};

use crate::error::{BackupError, CopyError, Result};
use crate::ledger::RecoveryLedger;
use crate::mount::{MountGuard, VolumeMount};
use crate::orchestrator::advance;

pub use block_image::BlockImageSource;
pub use file_mirror::{MirrorFailure, MirrorReport, mirror_tree, mirror_with_tool};

/// Collaborators a strategy may touch while the snapshot is live
pub struct StrategyContext<'a> {
    pub config: &'a EngineConfig,
    pub mapper: &'a mut dyn MountMapper,
    pub devices: &'a dyn DeviceAccess,
    pub copy_tool: Option<&'a dyn BulkCopyTool>,
    pub ledger: Option<&'a RecoveryLedger>,
}

/// A strategy with its snapshot view opened
pub enum StrategyRun<'a, 'm> {
    FileMirror {
        mount: MountGuard<'a, 'm>,
        mode: CopyMode,
    },
    BlockImage {
        source: BlockImageSource,
    },
}

impl StrategyRun<'_, '_> {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::FileMirror { .. } => StrategyKind::FileMirror,
            Self::BlockImage { .. } => StrategyKind::BlockImage,
        }
    }
}

/// Open the snapshot view, copy, and close the view again
///
/// The job moves to `Mounted` once a mount exists and to `Copied` once the
/// copy succeeded and any mount was released.
pub fn execute(
    ctx: StrategyContext<'_>,
    properties: &SnapshotProperties,
    job: &mut BackupJob,
) -> Result<()> {
    let StrategyContext {
        config,
        mapper,
        devices,
        copy_tool,
        ledger,
    } = ctx;
    let mut mounts = VolumeMount::new(mapper, &config.mount);

    let run = match job.strategy {
        BackupStrategy::FileMirror { mode } => {
            let mount = mounts.acquire(&properties.device_reference)?;
            advance(job, JobState::Mounted)?;
            if let Some(ledger) = ledger {
                let slot = mount.slot().clone();
                if let Err(error) = ledger.update(&job.source_volume, |record| {
                    record.mount = Some(slot)
                }) {
                    warn!(%error, "failed to record mount in recovery ledger");
                    job.secondary_errors.push(error.to_string());
                }
            }
            StrategyRun::FileMirror { mount, mode }
        }
        BackupStrategy::BlockImage => {
            let source = BlockImageSource::open(devices, &properties.device_reference)
                .map_err(|error| BackupError::copy(StrategyKind::BlockImage, error))?;
            StrategyRun::BlockImage { source }
        }
    };

    let kind = run.kind();
    copy(run, config, copy_tool, job).map_err(|error| BackupError::copy(kind, error))?;
    advance(job, JobState::Copied)
}

fn copy(
    run: StrategyRun<'_, '_>,
    config: &EngineConfig,
    copy_tool: Option<&dyn BulkCopyTool>,
    job: &mut BackupJob,
) -> std::result::Result<(), CopyError> {
    match run {
        StrategyRun::FileMirror { mount, mode } => {
            let target = job.destination.join(&config.mirror.dir_name);
            info!(source = %mount.path().display(), target = %target.display(), ?mode, "mirroring snapshot tree");

            let copied = match mode {
                CopyMode::External => match copy_tool {
                    Some(tool) => {
                        let log_file = job.destination.join(tool.log_file_name());
                        mirror_with_tool(tool, mount.path(), &target, log_file.clone(), &config.mirror)
                            .map(|_| job.artifacts.push(log_file))
                    }
                    None => Err(CopyError::NoTool),
                },
                CopyMode::Direct => mirror_tree(mount.path(), &target).map(|report| {
                    job.bytes_copied = report.bytes_copied;
                    for failure in report.failures {
                        job.secondary_errors.push(format!(
                            "{}: {}",
                            failure.path.display(),
                            failure.reason
                        ));
                    }
                }),
            };

            let slot = mount.slot().clone();
            if let Err(error) = mount.release() {
                warn!(%slot, %error, "failed to unmap snapshot");
                job.secondary_errors
                    .push(format!("failed to unmap {slot}: {error}"));
            }

            copied?;
            job.artifacts.push(target);
            Ok(())
        }
        StrategyRun::BlockImage { source } => {
            let image: PathBuf = job.destination.join(BLOCK_IMAGE_FILE_NAME);
            source.copy_to(
                &image,
                config.chunk_size,
                config.progress_every_chunks,
                &mut job.bytes_copied,
            )?;
            job.artifacts.push(image);
            Ok(())
        }
    }
}
