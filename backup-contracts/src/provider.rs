// SPDX-License-Identifier: GPL-3.0-only

use backup_types::{SnapshotId, SnapshotProperties, SnapshotSetId};

use crate::ProviderStatus;

/// Waitable token returned by the asynchronous provider calls
///
/// The engine always waits on a token before issuing the next lifecycle call.
pub trait AsyncOperation: Send {
    /// Poll without blocking; `Ok(true)` once the operation finished successfully
    fn try_complete(&mut self) -> Result<bool, ProviderStatus>;

    /// Block until the operation finishes
    fn wait(&mut self) -> Result<(), ProviderStatus>;

    /// Abandon the operation after a deadline expired
    fn cancel(&mut self) {}
}

/// Token for work the provider finished synchronously
#[derive(Debug, Clone)]
pub struct CompletedOperation(Result<(), ProviderStatus>);

impl CompletedOperation {
    pub fn ok() -> Self {
        Self(Ok(()))
    }

    pub fn failed(status: ProviderStatus) -> Self {
        Self(Err(status))
    }

    pub fn boxed(self) -> Box<dyn AsyncOperation> {
        Box::new(self)
    }
}

impl AsyncOperation for CompletedOperation {
    fn try_complete(&mut self) -> Result<bool, ProviderStatus> {
        self.0.clone().map(|_| true)
    }

    fn wait(&mut self) -> Result<(), ProviderStatus> {
        self.0.clone()
    }
}

/// The operating system's snapshot service
///
/// Calls are issued in lifecycle order:
/// `initialize → begin_set → add_source → planned_properties → prepare → commit_snapshot_set →
/// query_properties → backup_complete → release`.
/// `release` must be called exactly once for every set `begin_set` returned,
/// on success and failure paths alike.
pub trait SnapshotProvider: Send {
    fn name(&self) -> &str;

    /// Bring the provider into backup context
    fn initialize(&mut self) -> Result<(), ProviderStatus>;

    fn begin_set(&mut self) -> Result<SnapshotSetId, ProviderStatus>;

    fn add_source(
        &mut self,
        set: &SnapshotSetId,
        volume: &str,
    ) -> Result<SnapshotId, ProviderStatus>;

    /// Properties `snapshot` will have once its set is committed
    ///
    /// Answerable right after `add_source`, before anything is created, so a
    /// caller can record what a later `release_orphan` has to destroy.
    fn planned_properties(&self, snapshot: &SnapshotId) -> Result<SnapshotProperties, ProviderStatus>;

    fn prepare(&mut self, set: &SnapshotSetId) -> Result<Box<dyn AsyncOperation>, ProviderStatus>;

    /// Take the point-in-time snapshot of every source in the set
    fn commit_snapshot_set(
        &mut self,
        set: &SnapshotSetId,
    ) -> Result<Box<dyn AsyncOperation>, ProviderStatus>;

    fn query_properties(&self, snapshot: &SnapshotId) -> Result<SnapshotProperties, ProviderStatus>;

    /// Tell the provider the consumer finished reading the set
    fn backup_complete(
        &mut self,
        set: &SnapshotSetId,
    ) -> Result<Box<dyn AsyncOperation>, ProviderStatus>;

    /// Destroy the set and everything the provider created for it
    fn release(&mut self, set: &SnapshotSetId) -> Result<(), ProviderStatus>;

    /// Destroy a snapshot left behind by a previous process
    fn release_orphan(&mut self, properties: &SnapshotProperties) -> Result<(), ProviderStatus>;
}
