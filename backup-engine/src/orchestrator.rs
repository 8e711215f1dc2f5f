// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end job pipeline
//!
//! precondition -> initialize -> snapshot -> strategy -> release -> metadata.
//! Any fatal error stops forward progress, releases what was acquired in
//! reverse order and ends the job in `Failed{step}`.

use std::fs;

use backup_contracts::{BulkCopyTool, DeviceAccess, MountMapper, PrivilegeCheck, SnapshotProvider};
use backup_types::{
    BackupJob, BackupStrategy, CopyMode, DiskMetadataRecord, EngineConfig, JobOutcome, JobState,
    JobStep, SnapshotProperties,
};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{BackupError, Result};
use crate::ledger::{LedgerRecord, RecoveryLedger};
use crate::metadata::capture_disk_metadata;
use crate::snapshot::SnapshotSession;
use crate::strategy::{self, StrategyContext};

/// Everything outside the engine a job talks to
pub struct Collaborators {
    pub privilege: Box<dyn PrivilegeCheck>,
    pub provider: Box<dyn SnapshotProvider>,
    pub mapper: Box<dyn MountMapper>,
    pub devices: Box<dyn DeviceAccess>,
    pub copy_tool: Option<Box<dyn BulkCopyTool>>,
}

/// Runs one job at a time; holds at most one snapshot and one mount
pub struct BackupOrchestrator {
    config: EngineConfig,
    privilege: Box<dyn PrivilegeCheck>,
    provider: Box<dyn SnapshotProvider>,
    mapper: Box<dyn MountMapper>,
    devices: Box<dyn DeviceAccess>,
    copy_tool: Option<Box<dyn BulkCopyTool>>,
    ledger: Option<RecoveryLedger>,
}

impl BackupOrchestrator {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            privilege,
            provider,
            mapper,
            devices,
            copy_tool,
        } = collaborators;

        Self {
            config,
            privilege,
            provider,
            mapper,
            devices,
            copy_tool,
            ledger: None,
        }
    }

    /// Track live snapshots and mounts on disk so `recover` can clean them up
    pub fn with_ledger(mut self, ledger: RecoveryLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive `job` from `Idle` to a terminal state
    ///
    /// The returned error is the job's first fatal error; compensation and
    /// metadata failures only land in `job.secondary_errors`. A job that has
    /// already run is rejected untouched; re-running means a fresh job.
    pub fn run(&mut self, job: &mut BackupJob) -> Result<()> {
        if job.state != JobState::Idle {
            return Err(BackupError::Configuration(format!(
                "job for {} is {:?}, only an idle job can be run",
                job.source_volume, job.state
            )));
        }

        job.started_at = Some(Utc::now());
        info!(
            source = %job.source_volume,
            destination = %job.destination.display(),
            strategy = %job.strategy.kind(),
            "backup job started"
        );

        let result = self.drive(job).and_then(|()| {
            if let Some(index) = job.metadata_drive {
                self.capture_metadata(index, job);
            }
            advance(job, JobState::Complete)
        });
        match &result {
            Ok(()) => {
                job.outcome = Some(JobOutcome::Complete);
                info!(
                    source = %job.source_volume,
                    bytes = job.bytes_copied,
                    secondary_errors = job.secondary_errors.len(),
                    "backup job complete"
                );
            }
            Err(failure) => {
                let step = failure.step();
                if !job.transition(JobState::Failed { step }) {
                    warn!(state = ?job.state, %step, "job already terminal, failure not recorded as a state");
                }
                job.outcome = Some(JobOutcome::Failed {
                    step,
                    error: failure.to_string(),
                });
                error!(source = %job.source_volume, %step, error = %failure, "backup job failed");
            }
        }

        job.finished_at = Some(Utc::now());
        result
    }

    fn drive(&mut self, job: &mut BackupJob) -> Result<()> {
        self.check_preconditions(job)?;

        if let Err(status) = self.provider.initialize() {
            release_claim(self.ledger.as_ref(), job);
            return Err(BackupError::lifecycle(JobStep::Initialize, status));
        }
        advance(job, JobState::Initialized)?;

        let timeout = self.config.provider_wait_timeout();
        let ledger = self.ledger.as_ref();
        let volume = job.source_volume.clone();
        let session = match SnapshotSession::create(
            self.provider.as_mut(),
            &job.source_volume,
            timeout,
            &mut job.secondary_errors,
            |planned| record_snapshot(ledger, &volume, planned),
        ) {
            Ok(session) => session,
            Err(failure) => {
                // A record naming a snapshot that may still exist stays for `recover`.
                if failure.released {
                    release_claim(self.ledger.as_ref(), job);
                }
                return Err(failure.error);
            }
        };
        advance(job, JobState::Snapshotted)?;

        if let Err(error) =
            record_snapshot(self.ledger.as_ref(), &job.source_volume, session.properties())
        {
            warn!(%error, "failed to record snapshot in recovery ledger");
            job.secondary_errors.push(error.to_string());
        }

        let ctx = StrategyContext {
            config: &self.config,
            mapper: self.mapper.as_mut(),
            devices: self.devices.as_ref(),
            copy_tool: self.copy_tool.as_deref(),
            ledger: self.ledger.as_ref(),
        };
        if let Err(error) = strategy::execute(ctx, session.properties(), job) {
            if session.abort(&mut job.secondary_errors) {
                release_claim(self.ledger.as_ref(), job);
            }
            return Err(error);
        }

        let teardown = session.finish(&mut job.secondary_errors);
        if teardown.released {
            release_claim(self.ledger.as_ref(), job);
        }
        if let Some(error) = teardown.error {
            return Err(error);
        }
        advance(job, JobState::Released)
    }

    /// Checks that must pass before anything is created
    ///
    /// The last one claims the source volume in the recovery ledger.
    fn check_preconditions(&self, job: &BackupJob) -> Result<()> {
        if !self.privilege.is_elevated() {
            return Err(BackupError::Privilege(
                "snapshot creation and raw device access need root".to_string(),
            ));
        }

        self.config
            .validate()
            .map_err(|error| BackupError::Configuration(error.to_string()))?;

        if job.source_volume.trim().is_empty() {
            return Err(BackupError::Configuration("source volume is empty".to_string()));
        }

        if job.strategy == (BackupStrategy::FileMirror { mode: CopyMode::External })
            && self.copy_tool.is_none()
        {
            return Err(BackupError::Configuration(
                "external mirror mode needs a bulk-copy tool".to_string(),
            ));
        }

        fs::create_dir_all(&job.destination).map_err(|error| BackupError::Destination {
            path: job.destination.clone(),
            reason: error.to_string(),
        })?;

        if let Some(ledger) = &self.ledger {
            ledger.claim(&LedgerRecord::claim(&job.source_volume))?;
        }

        Ok(())
    }

    fn capture_metadata(&self, drive_index: u32, job: &mut BackupJob) {
        match capture_disk_metadata(self.devices.as_ref(), drive_index, &job.destination) {
            Ok(record) => {
                info!(device = %record.device.display(), "disk metadata stored with backup");
                job.artifacts
                    .push(DiskMetadataRecord::boot_record_path(&job.destination));
                job.artifacts
                    .push(DiskMetadataRecord::drive_layout_path(&job.destination));
            }
            Err(capture_error) => {
                warn!(error = %capture_error, "disk metadata capture failed");
                job.secondary_errors.push(capture_error.to_string());
            }
        }
    }
}

/// Move `job` to `next`, refusing anything the state machine does not allow
pub(crate) fn advance(job: &mut BackupJob, next: JobState) -> Result<()> {
    if job.transition(next) {
        Ok(())
    } else {
        Err(BackupError::Configuration(format!(
            "job for {} cannot move from {:?} to {next:?}",
            job.source_volume, job.state
        )))
    }
}

fn record_snapshot(
    ledger: Option<&RecoveryLedger>,
    source_volume: &str,
    properties: &SnapshotProperties,
) -> Result<()> {
    if let Some(ledger) = ledger {
        let properties = properties.clone();
        ledger.update(source_volume, |record| record.snapshot = Some(properties))?;
    }
    Ok(())
}

fn release_claim(ledger: Option<&RecoveryLedger>, job: &mut BackupJob) {
    if let Some(ledger) = ledger
        && let Err(error) = ledger.remove(&job.source_volume)
    {
        warn!(%error, "failed to remove recovery ledger record");
        job.secondary_errors.push(error.to_string());
    }
}
