// SPDX-License-Identifier: GPL-3.0-only

mod common;

use std::fs;

use backup_engine::{BackupError, CopyError, MountingError};
use backup_testing::{FakeCopyTool, FakeDevices, FakeMapper, FakeProvider};
use backup_types::{JobOutcome, JobState, JobStep};
use common::{DEVICE, Lab, direct_mirror, external_mirror, failed_step, write_tree};

#[test]
fn direct_mirror_copies_tree_through_first_free_slot() {
    let lab = Lab::new();
    let snapshot = lab.root.join("snapshot");
    write_tree(
        &snapshot,
        &[
            ("etc/fstab", "/dev/vg0/root / ext4 defaults 0 1\n"),
            ("home/alice/notes.txt", "remember the milk\n"),
        ],
    );

    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mapper = FakeMapper::new().with_backing(DEVICE, &snapshot);
    let mounts = mapper.handle();
    let mut orchestrator = lab.orchestrator(provider, mapper, FakeDevices::new(), None);

    let mut job = lab.job(direct_mirror());
    orchestrator.run(&mut job).expect("mirror job");

    let mirrored = lab.destination().join("System_Backup");
    assert_eq!(
        fs::read_to_string(mirrored.join("home/alice/notes.txt")).expect("mirrored file"),
        "remember the milk\n"
    );
    assert_eq!(job.outcome, Some(JobOutcome::Complete));
    assert!(job.history.contains(&JobState::Mounted));

    let maps = mounts.maps();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].0, DEVICE);
    assert_eq!(maps[0].1.letter, 'd');
    assert_eq!(mounts.unmaps().len(), 1);
    assert!(mounts.active().is_empty());
    assert_eq!(calls.release_calls(), 1);
    assert!(lab.ledger().records().expect("ledger").is_empty());
}

#[test]
fn second_run_converges_onto_unchanged_source() {
    let lab = Lab::new();
    let snapshot = lab.root.join("snapshot");
    write_tree(&snapshot, &[("var/lib/state", "42"), ("boot/config", "quiet")]);

    for run in 0..2 {
        let mapper = FakeMapper::new().with_backing(DEVICE, &snapshot);
        let mut orchestrator =
            lab.orchestrator(FakeProvider::new(DEVICE), mapper, FakeDevices::new(), None);
        let mut job = lab.job(direct_mirror());
        orchestrator.run(&mut job).expect("mirror job");

        if run == 1 {
            assert_eq!(job.bytes_copied, 0, "nothing changed since the first run");
        }
    }

    let mirrored = lab.destination().join("System_Backup");
    assert_eq!(fs::read_to_string(mirrored.join("var/lib/state")).expect("read"), "42");
}

#[test]
fn occupied_slots_are_skipped() {
    let lab = Lab::new();
    let snapshot = lab.root.join("snapshot");
    write_tree(&snapshot, &[("file", "x")]);

    let mapper = FakeMapper::new()
        .with_backing(DEVICE, &snapshot)
        .occupied(lab.slot_path('d'))
        .occupied(lab.slot_path('e'));
    let mounts = mapper.handle();
    let mut orchestrator = lab.orchestrator(FakeProvider::new(DEVICE), mapper, FakeDevices::new(), None);

    let mut job = lab.job(direct_mirror());
    orchestrator.run(&mut job).expect("mirror job");
    assert_eq!(mounts.maps()[0].1.letter, 'f');
}

#[test]
fn no_free_slot_fails_before_copy_and_releases_snapshot() {
    let lab = Lab::new();
    let mut mapper = FakeMapper::new();
    for letter in 'd'..='z' {
        mapper = mapper.occupied(lab.slot_path(letter));
    }
    let mounts = mapper.handle();
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let tool = FakeCopyTool::exiting(0);
    let requests = tool.handle();
    let mut orchestrator = lab.orchestrator(provider, mapper, FakeDevices::new(), Some(tool));

    let mut job = lab.job(external_mirror());
    let error = orchestrator.run(&mut job).unwrap_err();

    assert!(matches!(
        error,
        BackupError::Mounting(MountingError::NoFreeSlot { .. })
    ));
    assert_eq!(failed_step(&job), Some(JobStep::Mount));
    assert!(mounts.maps().is_empty());
    assert!(mounts.unmaps().is_empty());
    assert!(requests.requests().is_empty());
    assert_eq!(calls.release_calls(), 1);
    assert_eq!(calls.live_sets(), 0);
}

#[test]
fn map_failure_is_a_mounting_error() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(
        provider,
        FakeMapper::new().failing_map(),
        FakeDevices::new(),
        None,
    );

    let mut job = lab.job(direct_mirror());
    let error = orchestrator.run(&mut job).unwrap_err();
    assert!(matches!(error, BackupError::Mounting(MountingError::Map { .. })));
    assert_eq!(calls.release_calls(), 1);
}

#[test]
fn external_tool_gets_mirror_profile() {
    let lab = Lab::new();
    let tool = FakeCopyTool::exiting(3);
    let requests = tool.handle();
    let mut orchestrator =
        lab.orchestrator(FakeProvider::new(DEVICE), FakeMapper::new(), FakeDevices::new(), Some(tool));

    let mut job = lab.job(external_mirror());
    orchestrator.run(&mut job).expect("informational exit code is success");

    let requests = requests.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.source, lab.slot_path('d'));
    assert_eq!(request.destination, lab.destination().join("System_Backup"));
    assert_eq!(request.log_file, lab.destination().join("fakecopy_log.txt"));
    assert_eq!((request.threads, request.retries, request.wait_secs), (8, 1, 1));
    assert!(lab.destination().join("System_Backup").is_dir());
}

#[test]
fn fatal_tool_exit_fails_job_after_unmapping() {
    let lab = Lab::new();
    let mapper = FakeMapper::new();
    let mounts = mapper.handle();
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(
        provider,
        mapper,
        FakeDevices::new(),
        Some(FakeCopyTool::exiting(16)),
    );

    let mut job = lab.job(external_mirror());
    let error = orchestrator.run(&mut job).unwrap_err();

    assert!(matches!(
        error,
        BackupError::Copy {
            source: CopyError::ExternalTool { code: 16, .. },
            ..
        }
    ));
    assert_eq!(failed_step(&job), Some(JobStep::Copy));
    assert_eq!(mounts.unmaps().len(), 1);
    assert!(mounts.active().is_empty());
    assert_eq!(calls.release_calls(), 1);
}

#[test]
fn missing_tool_binary_fails_copy() {
    let lab = Lab::new();
    let mut orchestrator = lab.orchestrator(
        FakeProvider::new(DEVICE),
        FakeMapper::new(),
        FakeDevices::new(),
        Some(FakeCopyTool::missing()),
    );

    let mut job = lab.job(external_mirror());
    let error = orchestrator.run(&mut job).unwrap_err();
    assert!(matches!(
        error,
        BackupError::Copy {
            source: CopyError::ToolLaunch { .. },
            ..
        }
    ));
}

#[test]
fn external_mode_without_tool_is_rejected_up_front() {
    let lab = Lab::new();
    let provider = FakeProvider::new(DEVICE);
    let calls = provider.handle();
    let mut orchestrator = lab.orchestrator(provider, FakeMapper::new(), FakeDevices::new(), None);

    let mut job = lab.job(external_mirror());
    let error = orchestrator.run(&mut job).unwrap_err();
    assert!(matches!(error, BackupError::Configuration(_)));
    assert!(calls.calls().is_empty());
}

#[test]
fn unmap_failure_is_secondary() {
    let lab = Lab::new();
    let snapshot = lab.root.join("snapshot");
    write_tree(&snapshot, &[("file", "x")]);
    let mapper = FakeMapper::new()
        .with_backing(DEVICE, &snapshot)
        .failing_unmap();
    let mut orchestrator = lab.orchestrator(FakeProvider::new(DEVICE), mapper, FakeDevices::new(), None);

    let mut job = lab.job(direct_mirror());
    orchestrator.run(&mut job).expect("copy itself succeeded");
    assert!(
        job.secondary_errors
            .iter()
            .any(|error| error.contains("target is busy"))
    );
}
