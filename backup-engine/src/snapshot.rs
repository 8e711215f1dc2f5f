// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot set lifecycle
//!
//! A [`SnapshotSession`] exists only once the set has been committed and its
//! properties queried. Every exit path releases the set exactly once: through
//! [`SnapshotSession::finish`] on success, [`SnapshotSession::abort`] on
//! failure, or the drop backstop when neither ran.

use std::thread;
use std::time::{Duration, Instant};

use backup_contracts::{AsyncOperation, ProviderStatus, SnapshotProvider};
use backup_types::{JobStep, SnapshotId, SnapshotProperties, SnapshotSetId, SnapshotState};
use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Block until an asynchronous provider step finishes
///
/// Without a deadline this is the provider's own `wait`. With one, the
/// operation is polled and cancelled once the deadline passes.
pub fn wait_step(
    operation: &mut dyn AsyncOperation,
    step: JobStep,
    timeout: Option<Duration>,
) -> Result<()> {
    let Some(timeout) = timeout else {
        return operation
            .wait()
            .map_err(|status| BackupError::lifecycle(step, status));
    };

    let deadline = Instant::now() + timeout;
    loop {
        match operation.try_complete() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(status) => return Err(BackupError::lifecycle(step, status)),
        }

        let now = Instant::now();
        if now >= deadline {
            operation.cancel();
            return Err(BackupError::lifecycle(
                step,
                ProviderStatus::timeout(format!("{step} did not finish within {timeout:?}")),
            ));
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// A begun set that has not been committed and queried yet
struct OpenSet<'p> {
    provider: &'p mut dyn SnapshotProvider,
    id: SnapshotSetId,
    state: SnapshotState,
    timeout: Option<Duration>,
    release_attempted: bool,
}

impl<'p> OpenSet<'p> {
    fn begin(provider: &'p mut dyn SnapshotProvider, timeout: Option<Duration>) -> Result<Self> {
        let id = provider
            .begin_set()
            .map_err(|status| BackupError::lifecycle(JobStep::BeginSet, status))?;
        info!(set = %id, provider = provider.name(), "snapshot set started");

        Ok(Self {
            provider,
            id,
            state: SnapshotState::SetStarted,
            timeout,
            release_attempted: false,
        })
    }

    fn add_source(&mut self, volume: &str) -> Result<SnapshotId> {
        let snapshot = self
            .provider
            .add_source(&self.id, volume)
            .map_err(|status| BackupError::lifecycle(JobStep::AddSource, status))?;
        self.state = SnapshotState::SourceAdded;
        debug!(set = %self.id, %snapshot, volume, "source added");
        Ok(snapshot)
    }

    fn prepare(&mut self) -> Result<()> {
        let mut operation = self
            .provider
            .prepare(&self.id)
            .map_err(|status| BackupError::lifecycle(JobStep::Prepare, status))?;
        wait_step(operation.as_mut(), JobStep::Prepare, self.timeout)?;
        self.state = SnapshotState::Prepared;
        debug!(set = %self.id, "snapshot set prepared");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut operation = self
            .provider
            .commit_snapshot_set(&self.id)
            .map_err(|status| BackupError::lifecycle(JobStep::CommitSnapshotSet, status))?;
        wait_step(operation.as_mut(), JobStep::CommitSnapshotSet, self.timeout)?;
        self.state = SnapshotState::Committed;
        info!(set = %self.id, "snapshot set committed");
        Ok(())
    }

    fn backup_complete(&mut self) -> Result<()> {
        let mut operation = self
            .provider
            .backup_complete(&self.id)
            .map_err(|status| BackupError::lifecycle(JobStep::BackupComplete, status))?;
        wait_step(operation.as_mut(), JobStep::BackupComplete, self.timeout)?;
        self.state = SnapshotState::Completed;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.release_attempted {
            return Ok(());
        }
        self.release_attempted = true;

        self.provider
            .release(&self.id)
            .map_err(|status| BackupError::lifecycle(JobStep::Release, status))?;
        self.state = SnapshotState::Released;
        info!(set = %self.id, "snapshot set released");
        Ok(())
    }
}

impl Drop for OpenSet<'_> {
    fn drop(&mut self) {
        if self.release_attempted {
            return;
        }
        warn!(set = %self.id, state = ?self.state, "snapshot set dropped without release, releasing");
        if let Err(error) = self.release() {
            warn!(set = %self.id, %error, "release on drop failed");
        }
    }
}

/// How a session ended
#[derive(Debug)]
pub struct Teardown {
    /// `release` returned success
    pub released: bool,
    pub error: Option<BackupError>,
}

/// Why no session came into existence
#[derive(Debug)]
pub struct CreateFailure {
    pub error: BackupError,
    /// Nothing the provider created for the set is left behind
    pub released: bool,
}

/// A committed snapshot whose device reference is readable
pub struct SnapshotSession<'p> {
    set: OpenSet<'p>,
    properties: SnapshotProperties,
}

impl<'p> SnapshotSession<'p> {
    /// Begin, add `volume`, prepare, commit and query the snapshot
    ///
    /// `on_planned` sees the snapshot's properties before `prepare`, while
    /// nothing exists yet; an error from it only lands in `secondary`. When
    /// a step after `begin_set` fails the partial set is released before
    /// returning; release failures land in `secondary` as well.
    pub fn create(
        provider: &'p mut dyn SnapshotProvider,
        volume: &str,
        timeout: Option<Duration>,
        secondary: &mut Vec<String>,
        on_planned: impl FnOnce(&SnapshotProperties) -> Result<()>,
    ) -> std::result::Result<Self, CreateFailure> {
        let mut set = OpenSet::begin(provider, timeout).map_err(|error| CreateFailure {
            error,
            released: true,
        })?;

        let properties = match Self::snapshot_volume(&mut set, volume, secondary, on_planned) {
            Ok(properties) => properties,
            Err(error) => {
                warn!(set = %set.id, step = %error.step(), %error, "snapshot creation failed, releasing set");
                let released = match set.release() {
                    Ok(()) => true,
                    Err(release_error) => {
                        warn!(set = %set.id, error = %release_error, "compensating release failed");
                        secondary.push(release_error.to_string());
                        false
                    }
                };
                return Err(CreateFailure { error, released });
            }
        };

        info!(
            set = %properties.set_id,
            device = %properties.device_reference,
            "snapshot ready"
        );
        Ok(Self { set, properties })
    }

    fn snapshot_volume(
        set: &mut OpenSet<'_>,
        volume: &str,
        secondary: &mut Vec<String>,
        on_planned: impl FnOnce(&SnapshotProperties) -> Result<()>,
    ) -> Result<SnapshotProperties> {
        let snapshot = set.add_source(volume)?;
        let planned = set
            .provider
            .planned_properties(&snapshot)
            .map_err(|status| BackupError::lifecycle(JobStep::AddSource, status))?;
        if let Err(error) = on_planned(&planned) {
            warn!(set = %set.id, %error, "planned snapshot was not recorded");
            secondary.push(error.to_string());
        }

        set.prepare()?;
        set.commit()?;
        set.provider
            .query_properties(&snapshot)
            .map_err(|status| BackupError::lifecycle(JobStep::QueryProperties, status))
    }

    pub fn set_id(&self) -> SnapshotSetId {
        self.set.id
    }

    pub fn state(&self) -> SnapshotState {
        self.set.state
    }

    /// Anything borrowing these properties must be gone before the session
    /// can be finished or aborted
    pub fn properties(&self) -> &SnapshotProperties {
        &self.properties
    }

    /// Success path: tell the provider the backup finished, then release
    ///
    /// Release is attempted even when `backup_complete` fails; the first
    /// failure is the returned error and a later one goes to `secondary`.
    pub fn finish(mut self, secondary: &mut Vec<String>) -> Teardown {
        let completed = self.set.backup_complete();
        if let Err(error) = &completed {
            warn!(set = %self.set.id, %error, "backup completion notification failed");
        }
        let released = self.set.release();

        match (completed, released) {
            (Ok(()), Ok(())) => Teardown {
                released: true,
                error: None,
            },
            (Err(error), Ok(())) => Teardown {
                released: true,
                error: Some(error),
            },
            (Ok(()), Err(error)) => Teardown {
                released: false,
                error: Some(error),
            },
            (Err(error), Err(release_error)) => {
                secondary.push(release_error.to_string());
                Teardown {
                    released: false,
                    error: Some(error),
                }
            }
        }
    }

    /// Failure path: best-effort release; returns whether it succeeded
    pub fn abort(mut self, secondary: &mut Vec<String>) -> bool {
        match self.set.release() {
            Ok(()) => true,
            Err(error) => {
                warn!(set = %self.set.id, %error, "compensating release failed");
                secondary.push(error.to_string());
                false
            }
        }
    }
}
