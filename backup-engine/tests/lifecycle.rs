// SPDX-License-Identifier: GPL-3.0-only

mod common;

use backup_contracts::ProviderStatus;
use backup_engine::{BackupError, BackupOrchestrator, Collaborators};
use backup_testing::{FakeDevices, FakeMapper, FakePrivilege, FakeProvider, ProviderCall};
use backup_types::{BackupStrategy, JobOutcome, JobState, JobStep};
use common::{DEVICE, Lab, VOLUME, failed_step, pattern};

fn block_devices() -> FakeDevices {
    FakeDevices::new().with_snapshot(DEVICE, pattern(4096))
}

#[test]
fn unprivileged_run_touches_nothing() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = BackupOrchestrator::new(
        lab.config.clone(),
        Collaborators {
            privilege: Box::new(FakePrivilege::unprivileged()),
            provider: Box::new(provider),
            mapper: Box::new(FakeMapper::new()),
            devices: Box::new(block_devices()),
            copy_tool: None,
        },
    );

    let mut job = lab.job(BackupStrategy::BlockImage);
    let error = orchestrator.run(&mut job).unwrap_err();

    assert!(matches!(error, BackupError::Privilege(_)));
    assert_eq!(
        job.state,
        JobState::Failed {
            step: JobStep::Precondition
        }
    );
    assert!(calls.calls().is_empty());
    assert!(job.started_at.is_some() && job.finished_at.is_some());
}

#[test]
fn initialize_failure_has_nothing_to_compensate() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE).fail_call(
        JobStep::Initialize,
        ProviderStatus::not_found("lvcreate not installed"),
    );
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).unwrap_err();

    assert_eq!(failed_step(&job), Some(JobStep::Initialize));
    assert_eq!(calls.calls(), vec![ProviderCall::Initialize]);
    assert!(lab.ledger().records().expect("ledger").is_empty());
}

#[test]
fn begin_set_failure_releases_nothing() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE)
        .fail_call(JobStep::BeginSet, ProviderStatus::unexpected("provider busy"));
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).unwrap_err();

    assert_eq!(failed_step(&job), Some(JobStep::BeginSet));
    assert_eq!(calls.release_calls(), 0);
    assert!(lab.ledger().records().expect("ledger").is_empty());
}

#[test]
fn failed_prepare_wait_releases_partial_set() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE).fail_wait(
        JobStep::Prepare,
        ProviderStatus::bad_state("writer did not respond"),
    );
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    let error = orchestrator.run(&mut job).unwrap_err();

    match error {
        BackupError::SnapshotLifecycle { step, status } => {
            assert_eq!(step, JobStep::Prepare);
            assert_eq!(status.code, ProviderStatus::BAD_STATE);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(calls.release_calls(), 1);
    assert_eq!(calls.live_sets(), 0);
    assert!(!calls.calls().contains(&ProviderCall::Commit));
    assert!(!lab.destination().join("system_image.bin").exists());
}

#[test]
fn add_source_failure_is_reported_with_status() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE).fail_call(
        JobStep::AddSource,
        ProviderStatus::not_found(format!("{VOLUME} is not a logical volume")),
    );
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).unwrap_err();

    match &job.outcome {
        Some(JobOutcome::Failed { step, error }) => {
            assert_eq!(*step, JobStep::AddSource);
            assert!(error.contains("0x80042308"), "{error}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(calls.release_calls(), 1);
}

#[test]
fn stalled_commit_times_out_and_is_cancelled() {
    let mut lab = Lab::new();
    lab.config.provider_wait_timeout_secs = Some(1);
    let provider = FakeProvider::new(DEVICE).stall(JobStep::CommitSnapshotSet);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    let error = orchestrator.run(&mut job).unwrap_err();

    match error {
        BackupError::SnapshotLifecycle { step, status } => {
            assert_eq!(step, JobStep::CommitSnapshotSet);
            assert!(status.is_timeout());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(calls.cancelled(), vec![JobStep::CommitSnapshotSet]);
    assert_eq!(calls.release_calls(), 1);
}

#[test]
fn backup_complete_failure_still_releases() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE).fail_wait(
        JobStep::BackupComplete,
        ProviderStatus::unexpected("writers reported failure"),
    );
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).unwrap_err();

    assert_eq!(failed_step(&job), Some(JobStep::BackupComplete));
    assert!(job.history.contains(&JobState::Copied));
    assert_eq!(calls.release_calls(), 1);
    assert_eq!(calls.live_sets(), 0);
    assert!(lab.ledger().records().expect("ledger").is_empty());
}

#[test]
fn release_failure_keeps_ledger_record_for_recovery() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE)
        .fail_call(JobStep::Release, ProviderStatus::unexpected("logical volume in use"));
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).unwrap_err();

    assert_eq!(failed_step(&job), Some(JobStep::Release));
    assert_eq!(calls.release_calls(), 1);

    let records = lab.ledger().records().expect("ledger");
    assert_eq!(records.len(), 1);
    let snapshot = records[0].snapshot.as_ref().expect("snapshot recorded");
    assert_eq!(snapshot.device_reference, DEVICE);
}

#[test]
fn zero_chunk_size_fails_before_any_snapshot() {
    let mut lab = Lab::new();
    lab.config.chunk_size = 0;
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    let error = orchestrator.run(&mut job).unwrap_err();

    match error {
        BackupError::Configuration(reason) => assert!(reason.contains("chunk_size"), "{reason}"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(failed_step(&job), Some(JobStep::Precondition));
    assert!(calls.calls().is_empty());
    assert!(lab.ledger().records().expect("ledger").is_empty());
}

#[test]
fn finished_job_is_never_run_again() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE)
        .fail_call(JobStep::BeginSet, ProviderStatus::unexpected("provider busy"));
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), block_devices(), None);

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).unwrap_err();
    let history = job.history.clone();
    let outcome = job.outcome.clone();
    let calls_after_first_run = calls.calls().len();

    let error = orchestrator.run(&mut job).unwrap_err();

    assert!(matches!(error, BackupError::Configuration(_)));
    assert_eq!(
        job.state,
        JobState::Failed {
            step: JobStep::BeginSet
        }
    );
    assert_eq!(job.history, history);
    assert_eq!(job.outcome, outcome);
    assert_eq!(calls.calls().len(), calls_after_first_run);
    assert!(!lab.destination().join("system_image.bin").exists());
}

#[test]
fn report_serializes_outcome_and_trail() {
    let lab = Lab::new();
    let mut orchestrator = lab.orchestrator(
        FakeProvider::new(DEVICE),
        FakeMapper::new(),
        block_devices(),
        None,
    );

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).expect("job");

    let report = serde_json::to_value(job.report()).expect("serialize");
    assert_eq!(report["outcome"]["status"], "complete");
    assert_eq!(report["bytes_copied"], 4096);
    assert_eq!(report["states"][5]["state"], "complete");
}
