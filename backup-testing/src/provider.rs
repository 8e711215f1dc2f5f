// SPDX-License-Identifier: GPL-3.0-only

//! Scriptable snapshot provider

use std::collections::HashMap;

use backup_contracts::{AsyncOperation, ProviderStatus, SnapshotProvider};
use backup_types::{JobStep, SnapshotId, SnapshotProperties, SnapshotSetId, SnapshotState};

use crate::Shared;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Initialize,
    BeginSet,
    AddSource(String),
    Prepare,
    Commit,
    QueryProperties,
    BackupComplete,
    Release(SnapshotSetId),
    ReleaseOrphan(String),
}

#[derive(Debug, Default)]
struct ProviderState {
    calls: Vec<ProviderCall>,
    sets: HashMap<SnapshotSetId, SnapshotState>,
    snapshots: HashMap<SnapshotId, SnapshotProperties>,
    call_failures: Vec<(JobStep, ProviderStatus)>,
    wait_failures: Vec<(JobStep, ProviderStatus)>,
    stalled: Vec<JobStep>,
    cancelled: Vec<JobStep>,
}

impl ProviderState {
    fn call_failure(&self, step: JobStep) -> Option<ProviderStatus> {
        self.call_failures
            .iter()
            .find(|(failing, _)| *failing == step)
            .map(|(_, status)| status.clone())
    }

    fn wait_failure(&self, step: JobStep) -> Option<ProviderStatus> {
        self.wait_failures
            .iter()
            .find(|(failing, _)| *failing == step)
            .map(|(_, status)| status.clone())
    }

    fn expect_state(
        &self,
        set: &SnapshotSetId,
        expected: SnapshotState,
    ) -> Result<(), ProviderStatus> {
        match self.sets.get(set) {
            Some(state) if *state == expected => Ok(()),
            Some(state) => Err(ProviderStatus::bad_state(format!(
                "set {set} is {state:?}, expected {expected:?}"
            ))),
            None => Err(ProviderStatus::not_found(format!("unknown set {set}"))),
        }
    }
}

/// Snapshot provider that records every call and fails on demand
#[derive(Debug)]
pub struct FakeProvider {
    state: Shared<ProviderState>,
    device_reference: String,
}

impl FakeProvider {
    /// Committed snapshots report `device_reference`
    pub fn new(device_reference: impl Into<String>) -> Self {
        Self {
            state: Shared::new(ProviderState::default()),
            device_reference: device_reference.into(),
        }
    }

    pub fn handle(&self) -> ProviderHandle {
        ProviderHandle(self.state.clone())
    }

    /// The call for `step` itself returns `status`
    pub fn fail_call(self, step: JobStep, status: ProviderStatus) -> Self {
        self.state.lock().call_failures.push((step, status));
        self
    }

    /// The call for `step` succeeds but waiting on it returns `status`
    pub fn fail_wait(self, step: JobStep, status: ProviderStatus) -> Self {
        self.state.lock().wait_failures.push((step, status));
        self
    }

    /// The operation for `step` never completes
    pub fn stall(self, step: JobStep) -> Self {
        self.state.lock().stalled.push(step);
        self
    }

    fn begin_call(&self, call: ProviderCall, step: JobStep) -> Result<(), ProviderStatus> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.call_failure(step) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn operation(
        &self,
        step: JobStep,
        set: SnapshotSetId,
        on_success: SnapshotState,
    ) -> Box<dyn AsyncOperation> {
        let state = self.state.lock();
        Box::new(FakeOperation {
            state: self.state.clone(),
            step,
            set,
            on_success,
            stalled: state.stalled.contains(&step),
            failure: state.wait_failure(step),
        })
    }
}

impl SnapshotProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn initialize(&mut self) -> Result<(), ProviderStatus> {
        self.begin_call(ProviderCall::Initialize, JobStep::Initialize)
    }

    fn begin_set(&mut self) -> Result<SnapshotSetId, ProviderStatus> {
        self.begin_call(ProviderCall::BeginSet, JobStep::BeginSet)?;
        let id = SnapshotSetId::new();
        self.state.lock().sets.insert(id, SnapshotState::SetStarted);
        Ok(id)
    }

    fn add_source(
        &mut self,
        set: &SnapshotSetId,
        volume: &str,
    ) -> Result<SnapshotId, ProviderStatus> {
        self.begin_call(ProviderCall::AddSource(volume.to_string()), JobStep::AddSource)?;
        let mut state = self.state.lock();
        state.expect_state(set, SnapshotState::SetStarted)?;

        let snapshot_id = SnapshotId::new();
        state.snapshots.insert(
            snapshot_id,
            SnapshotProperties {
                set_id: *set,
                snapshot_id,
                source_volume: volume.to_string(),
                device_reference: self.device_reference.clone(),
            },
        );
        state.sets.insert(*set, SnapshotState::SourceAdded);
        Ok(snapshot_id)
    }

    fn planned_properties(&self, snapshot: &SnapshotId) -> Result<SnapshotProperties, ProviderStatus> {
        self.state
            .lock()
            .snapshots
            .get(snapshot)
            .cloned()
            .ok_or_else(|| ProviderStatus::not_found(format!("unknown snapshot {snapshot}")))
    }

    fn prepare(&mut self, set: &SnapshotSetId) -> Result<Box<dyn AsyncOperation>, ProviderStatus> {
        self.begin_call(ProviderCall::Prepare, JobStep::Prepare)?;
        self.state
            .lock()
            .expect_state(set, SnapshotState::SourceAdded)?;
        Ok(self.operation(JobStep::Prepare, *set, SnapshotState::Prepared))
    }

    fn commit_snapshot_set(
        &mut self,
        set: &SnapshotSetId,
    ) -> Result<Box<dyn AsyncOperation>, ProviderStatus> {
        self.begin_call(ProviderCall::Commit, JobStep::CommitSnapshotSet)?;
        self.state.lock().expect_state(set, SnapshotState::Prepared)?;
        Ok(self.operation(JobStep::CommitSnapshotSet, *set, SnapshotState::Committed))
    }

    fn query_properties(&self, snapshot: &SnapshotId) -> Result<SnapshotProperties, ProviderStatus> {
        self.begin_call(ProviderCall::QueryProperties, JobStep::QueryProperties)?;
        let state = self.state.lock();
        let properties = state
            .snapshots
            .get(snapshot)
            .cloned()
            .ok_or_else(|| ProviderStatus::not_found(format!("unknown snapshot {snapshot}")))?;
        state.expect_state(&properties.set_id, SnapshotState::Committed)?;
        Ok(properties)
    }

    fn backup_complete(
        &mut self,
        set: &SnapshotSetId,
    ) -> Result<Box<dyn AsyncOperation>, ProviderStatus> {
        self.begin_call(ProviderCall::BackupComplete, JobStep::BackupComplete)?;
        self.state.lock().expect_state(set, SnapshotState::Committed)?;
        Ok(self.operation(JobStep::BackupComplete, *set, SnapshotState::Completed))
    }

    fn release(&mut self, set: &SnapshotSetId) -> Result<(), ProviderStatus> {
        self.begin_call(ProviderCall::Release(*set), JobStep::Release)?;
        let mut state = self.state.lock();
        if state.sets.remove(set).is_none() {
            return Err(ProviderStatus::not_found(format!("unknown set {set}")));
        }
        state.snapshots.retain(|_, properties| properties.set_id != *set);
        Ok(())
    }

    fn release_orphan(&mut self, properties: &SnapshotProperties) -> Result<(), ProviderStatus> {
        self.begin_call(
            ProviderCall::ReleaseOrphan(properties.device_reference.clone()),
            JobStep::Release,
        )
    }
}

struct FakeOperation {
    state: Shared<ProviderState>,
    step: JobStep,
    set: SnapshotSetId,
    on_success: SnapshotState,
    stalled: bool,
    failure: Option<ProviderStatus>,
}

impl FakeOperation {
    fn settle(&mut self) -> Result<(), ProviderStatus> {
        if let Some(status) = &self.failure {
            return Err(status.clone());
        }
        self.state.lock().sets.insert(self.set, self.on_success);
        Ok(())
    }
}

impl AsyncOperation for FakeOperation {
    fn try_complete(&mut self) -> Result<bool, ProviderStatus> {
        if self.stalled {
            return Ok(false);
        }
        self.settle().map(|()| true)
    }

    fn wait(&mut self) -> Result<(), ProviderStatus> {
        if self.stalled {
            return Err(ProviderStatus::unexpected(format!(
                "{} stalled and was waited on without a deadline",
                self.step
            )));
        }
        self.settle()
    }

    fn cancel(&mut self) {
        self.state.lock().cancelled.push(self.step);
    }
}

/// Inspection side of a [`FakeProvider`]
#[derive(Debug, Clone)]
pub struct ProviderHandle(Shared<ProviderState>);

impl ProviderHandle {
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.0.lock().calls.clone()
    }

    pub fn release_calls(&self) -> usize {
        self.0
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, ProviderCall::Release(_)))
            .count()
    }

    /// Sets begun and not successfully released
    pub fn live_sets(&self) -> usize {
        self.0.lock().sets.len()
    }

    pub fn cancelled(&self) -> Vec<JobStep> {
        self.0.lock().cancelled.clone()
    }

    pub fn orphans_released(&self) -> Vec<String> {
        self.0
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::ReleaseOrphan(device) => Some(device.clone()),
                _ => None,
            })
            .collect()
    }
}
