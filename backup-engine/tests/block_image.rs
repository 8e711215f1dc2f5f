// SPDX-License-Identifier: GPL-3.0-only

mod common;

use std::fs;

use backup_engine::{BackupError, CopyError};
use backup_testing::{DeviceFault, FakeDevices, FakeMapper, FakeProvider, ProviderCall};
use backup_types::{BackupStrategy, JobOutcome, JobState, JobStep};
use common::{DEVICE, Lab, failed_step, pattern};

#[test]
fn image_size_matches_device_length() {
    let lab = Lab::new();
    let data = pattern(10_000);
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(
        provider,
        FakeMapper::new(),
        FakeDevices::new().with_snapshot(DEVICE, data.clone()),
        None,
    );

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).expect("block image job");

    let image = lab.destination().join("system_image.bin");
    assert_eq!(fs::read(&image).expect("read image"), data);
    assert_eq!(job.bytes_copied, 10_000);
    assert_eq!(job.outcome, Some(JobOutcome::Complete));
    assert_eq!(
        job.history,
        vec![
            JobState::Idle,
            JobState::Initialized,
            JobState::Snapshotted,
            JobState::Copied,
            JobState::Released,
            JobState::Complete,
        ]
    );
    assert!(job.artifacts.contains(&image));

    assert_eq!(calls.release_calls(), 1);
    assert_eq!(calls.live_sets(), 0);
    let order = calls.calls();
    let complete = order
        .iter()
        .position(|call| *call == ProviderCall::BackupComplete)
        .expect("backup complete call");
    let release = order
        .iter()
        .position(|call| matches!(call, ProviderCall::Release(_)))
        .expect("release call");
    assert!(complete < release);
}

#[test]
fn zero_length_device_gives_empty_image() {
    let lab = Lab::new();
    let mut orchestrator = lab.orchestrator(
        FakeProvider::new(DEVICE),
        FakeMapper::new(),
        FakeDevices::new().with_snapshot(DEVICE, Vec::new()),
        None,
    );

    let mut job = lab.job(BackupStrategy::BlockImage);
    orchestrator.run(&mut job).expect("empty device job");

    let image = lab.destination().join("system_image.bin");
    assert_eq!(fs::metadata(&image).expect("image").len(), 0);
    assert_eq!(job.bytes_copied, 0);
    assert_eq!(job.state, JobState::Complete);
}

#[test]
fn failed_length_query_leaves_no_image_and_releases_snapshot() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(
        provider,
        FakeMapper::new(),
        FakeDevices::new().with_faulty_snapshot(DEVICE, pattern(8192), DeviceFault::Length),
        None,
    );

    let mut job = lab.job(BackupStrategy::BlockImage);
    let error = orchestrator.run(&mut job).unwrap_err();

    assert!(matches!(
        error,
        BackupError::Copy {
            source: CopyError::LengthQuery { .. },
            ..
        }
    ));
    assert_eq!(failed_step(&job), Some(JobStep::Copy));
    assert!(!lab.destination().join("system_image.bin").exists());
    assert_eq!(calls.release_calls(), 1);
    assert_eq!(calls.live_sets(), 0);
    assert!(!calls.calls().contains(&ProviderCall::BackupComplete));
}

#[test]
fn read_error_reports_offset_and_removes_partial_image() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(
        provider,
        FakeMapper::new(),
        FakeDevices::new().with_faulty_snapshot(DEVICE, pattern(16_384), DeviceFault::ReadAt(5000)),
        None,
    );

    let mut job = lab.job(BackupStrategy::BlockImage);
    let error = orchestrator.run(&mut job).unwrap_err();

    match error {
        BackupError::Copy { source, .. } => {
            assert!(matches!(source, CopyError::BlockRead { .. }));
            assert_eq!(source.offset(), Some(5000));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(job.bytes_copied, 4096);
    assert!(!lab.destination().join("system_image.bin").exists());
    assert_eq!(calls.release_calls(), 1);
}

#[test]
fn device_shorter_than_reported_is_a_short_read() {
    let lab = Lab::new();
    let mut orchestrator = lab.orchestrator(
        FakeProvider::new(DEVICE),
        FakeMapper::new(),
        FakeDevices::new().with_faulty_snapshot(
            DEVICE,
            pattern(6000),
            DeviceFault::ReportLength(8192),
        ),
        None,
    );

    let mut job = lab.job(BackupStrategy::BlockImage);
    let error = orchestrator.run(&mut job).unwrap_err();

    assert!(matches!(
        error,
        BackupError::Copy {
            source: CopyError::ShortRead {
                offset: 6000,
                expected: 8192
            },
            ..
        }
    ));
    assert!(!lab.destination().join("system_image.bin").exists());
}
