// SPDX-License-Identifier: GPL-3.0-only

//! Cleanup of snapshots and mounts left behind by a terminated process

use backup_contracts::{MountMapper, SnapshotProvider};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::ledger::{LedgerRecord, RecoveryLedger};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Volumes whose leftovers were released and whose record was removed
    pub recovered: Vec<String>,
    /// Records still owned by a running process
    pub skipped: Vec<String>,
    pub failures: Vec<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Unmap and release whatever each stale ledger record names
///
/// A record is only removed once everything it names was cleaned up, so a
/// failed recovery can be retried.
pub fn recover(
    ledger: &RecoveryLedger,
    provider: &mut dyn SnapshotProvider,
    mapper: &mut dyn MountMapper,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for record in ledger.records()? {
        if record.owner_alive() {
            info!(volume = %record.source_volume, pid = record.pid, "record owned by a running process, skipping");
            report.skipped.push(record.source_volume.clone());
            continue;
        }

        match recover_record(&record, provider, mapper) {
            Ok(()) => {
                ledger.remove(&record.source_volume)?;
                info!(volume = %record.source_volume, "recovered stale backup state");
                report.recovered.push(record.source_volume.clone());
            }
            Err(reason) => {
                warn!(volume = %record.source_volume, %reason, "recovery failed");
                report
                    .failures
                    .push(format!("{}: {reason}", record.source_volume));
            }
        }
    }

    Ok(report)
}

fn recover_record(
    record: &LedgerRecord,
    provider: &mut dyn SnapshotProvider,
    mapper: &mut dyn MountMapper,
) -> std::result::Result<(), String> {
    if let Some(slot) = &record.mount {
        let mounted = mapper
            .mounted_paths()
            .map_err(|error| format!("failed to list mounts: {error}"))?;
        if mounted.contains(slot.path()) {
            mapper
                .unmap(slot)
                .map_err(|error| format!("failed to unmap {slot}: {error}"))?;
            info!(%slot, "unmapped leftover snapshot mount");
        }
    }

    match &record.snapshot {
        Some(properties) => {
            provider
                .release_orphan(properties)
                .map_err(|status| format!("failed to release {}: {status}", properties.device_reference))?;
            info!(device = %properties.device_reference, "released orphaned snapshot");
        }
        // Planned properties are recorded before prepare, so a bare claim
        // means the process died before the provider created anything.
        None => info!(
            volume = %record.source_volume,
            "record names no snapshot, nothing to release"
        ),
    }

    Ok(())
}
