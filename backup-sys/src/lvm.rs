// SPDX-License-Identifier: GPL-3.0-only

//! LVM snapshots as the snapshot provider
//!
//! A snapshot set is a group of `lvcreate --snapshot` volumes, one per source
//! logical volume. The `lvcreate` child process is the asynchronous token the
//! engine waits on.

use std::collections::HashMap;
use std::process::Child;

use backup_contracts::{AsyncOperation, CompletedOperation, ProviderStatus, SnapshotProvider};
use backup_types::{SnapshotId, SnapshotProperties, SnapshotSetId, SnapshotState};
use tracing::{debug, info, warn};

use crate::cmd::{self, args};
use crate::error::SysError;

const REQUIRED_TOOLS: &[&str] = &["lvcreate", "lvremove", "lvs", "vgs"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct LvRow {
    vg_name: String,
    lv_name: String,
    lv_path: String,
}

#[derive(Debug, Clone)]
struct SourceVolume {
    snapshot_id: SnapshotId,
    volume: String,
    lv: LvRow,
    snapshot_lv: String,
}

impl SourceVolume {
    fn snapshot_path(&self) -> String {
        format!("{}/{}", self.lv.vg_name, self.snapshot_lv)
    }

    fn device_reference(&self) -> String {
        format!("/dev/{}/{}", self.lv.vg_name, self.snapshot_lv)
    }

    fn properties(&self, set_id: SnapshotSetId) -> SnapshotProperties {
        SnapshotProperties {
            set_id,
            snapshot_id: self.snapshot_id,
            source_volume: self.volume.clone(),
            device_reference: self.device_reference(),
        }
    }
}

#[derive(Debug)]
struct SetState {
    state: SnapshotState,
    sources: Vec<SourceVolume>,
}

/// Snapshot provider backed by LVM2 command-line tools
pub struct LvmSnapshotProvider {
    snapshot_size: String,
    initialized: bool,
    sets: HashMap<SnapshotSetId, SetState>,
}

impl LvmSnapshotProvider {
    /// `snapshot_size` is passed to `--extents` when it contains '%', `--size` otherwise
    pub fn new(snapshot_size: impl Into<String>) -> Self {
        Self {
            snapshot_size: snapshot_size.into(),
            initialized: false,
            sets: HashMap::new(),
        }
    }

    fn set_mut(&mut self, set: &SnapshotSetId) -> Result<&mut SetState, ProviderStatus> {
        self.sets
            .get_mut(set)
            .ok_or_else(|| ProviderStatus::not_found(format!("unknown snapshot set {set}")))
    }

    fn find_source(
        &self,
        snapshot: &SnapshotId,
    ) -> Result<(SnapshotSetId, &SetState, &SourceVolume), ProviderStatus> {
        self.sets
            .iter()
            .find_map(|(set_id, entry)| {
                entry
                    .sources
                    .iter()
                    .find(|source| source.snapshot_id == *snapshot)
                    .map(|source| (*set_id, entry, source))
            })
            .ok_or_else(|| ProviderStatus::not_found(format!("unknown snapshot {snapshot}")))
    }

    fn require_initialized(&self) -> Result<(), ProviderStatus> {
        if self.initialized {
            Ok(())
        } else {
            Err(ProviderStatus::bad_state("provider not initialized"))
        }
    }
}

impl std::fmt::Debug for LvmSnapshotProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LvmSnapshotProvider")
            .field("snapshot_size", &self.snapshot_size)
            .field("initialized", &self.initialized)
            .field("sets", &self.sets.len())
            .finish()
    }
}

impl SnapshotProvider for LvmSnapshotProvider {
    fn name(&self) -> &str {
        "lvm"
    }

    fn initialize(&mut self) -> Result<(), ProviderStatus> {
        for tool in REQUIRED_TOOLS {
            which::which(tool).map_err(|_| {
                ProviderStatus::not_found(SysError::ToolNotFound(tool.to_string()).to_string())
            })?;
        }
        self.initialized = true;
        Ok(())
    }

    fn begin_set(&mut self) -> Result<SnapshotSetId, ProviderStatus> {
        self.require_initialized()?;
        let id = SnapshotSetId::new();
        self.sets.insert(
            id,
            SetState {
                state: SnapshotState::SetStarted,
                sources: Vec::new(),
            },
        );
        debug!(set = %id, "started LVM snapshot set");
        Ok(id)
    }

    fn add_source(
        &mut self,
        set: &SnapshotSetId,
        volume: &str,
    ) -> Result<SnapshotId, ProviderStatus> {
        let short = set.short();
        let entry = self.set_mut(set)?;
        if !matches!(
            entry.state,
            SnapshotState::SetStarted | SnapshotState::SourceAdded
        ) {
            return Err(ProviderStatus::bad_state("set is no longer accepting sources"));
        }

        let lv = resolve_logical_volume(volume)?;
        if entry.sources.iter().any(|source| source.lv == lv) {
            return Err(ProviderStatus::bad_state(format!(
                "{volume} is already part of the set"
            )));
        }

        let snapshot_id = SnapshotId::new();
        let snapshot_lv = snapshot_lv_name(&lv.lv_name, &short);
        info!(volume, snapshot_lv = %snapshot_lv, "adding volume to snapshot set");
        entry.sources.push(SourceVolume {
            snapshot_id,
            volume: volume.to_string(),
            lv,
            snapshot_lv,
        });
        entry.state = SnapshotState::SourceAdded;
        Ok(snapshot_id)
    }

    fn prepare(&mut self, set: &SnapshotSetId) -> Result<Box<dyn AsyncOperation>, ProviderStatus> {
        let entry = self.set_mut(set)?;
        if entry.state != SnapshotState::SourceAdded {
            return Err(ProviderStatus::bad_state("prepare requires at least one source"));
        }

        for source in &entry.sources {
            let free = volume_group_free_bytes(&source.lv.vg_name)?;
            if free == 0 {
                return Ok(CompletedOperation::failed(ProviderStatus::new(
                    ProviderStatus::UNEXPECTED,
                    format!(
                        "volume group {} has no free extents for a snapshot",
                        source.lv.vg_name
                    ),
                ))
                .boxed());
            }
        }

        entry.state = SnapshotState::Prepared;
        Ok(CompletedOperation::ok().boxed())
    }

    fn commit_snapshot_set(
        &mut self,
        set: &SnapshotSetId,
    ) -> Result<Box<dyn AsyncOperation>, ProviderStatus> {
        let size_flag = size_flag(&self.snapshot_size);
        let size = self.snapshot_size.clone();
        let entry = self.set_mut(set)?;
        if entry.state != SnapshotState::Prepared {
            return Err(ProviderStatus::bad_state("commit requires a prepared set"));
        }

        let mut children = Vec::with_capacity(entry.sources.len());
        for source in &entry.sources {
            let command_args = args([
                "--snapshot",
                "--name",
                source.snapshot_lv.as_str(),
                size_flag,
                size.as_str(),
                source.lv.lv_path.as_str(),
            ]);
            let rendered = cmd::render("lvcreate", &command_args);
            let child = cmd::spawn("lvcreate", &command_args)
                .map_err(|error| ProviderStatus::unexpected(error.to_string()))?;
            children.push((rendered, child));
        }

        entry.state = SnapshotState::Committed;
        Ok(Box::new(CommandOperation::new(children)))
    }

    fn planned_properties(&self, snapshot: &SnapshotId) -> Result<SnapshotProperties, ProviderStatus> {
        self.find_source(snapshot)
            .map(|(set_id, _, source)| source.properties(set_id))
    }

    fn query_properties(&self, snapshot: &SnapshotId) -> Result<SnapshotProperties, ProviderStatus> {
        let (set_id, entry, source) = self.find_source(snapshot)?;
        if !entry.state.is_readable() {
            return Err(ProviderStatus::bad_state(
                "snapshot set has not been committed",
            ));
        }
        Ok(source.properties(set_id))
    }

    fn backup_complete(
        &mut self,
        set: &SnapshotSetId,
    ) -> Result<Box<dyn AsyncOperation>, ProviderStatus> {
        let entry = self.set_mut(set)?;
        if entry.state != SnapshotState::Committed {
            return Err(ProviderStatus::bad_state("backup_complete requires a committed set"));
        }
        entry.state = SnapshotState::Completed;
        Ok(CompletedOperation::ok().boxed())
    }

    fn release(&mut self, set: &SnapshotSetId) -> Result<(), ProviderStatus> {
        let Some(entry) = self.sets.remove(set) else {
            return Err(ProviderStatus::not_found(format!("unknown snapshot set {set}")));
        };

        let mut first_error = None;
        for source in &entry.sources {
            if let Err(status) = remove_snapshot_lv(&source.snapshot_path()) {
                warn!(snapshot = %source.snapshot_path(), %status, "failed to remove snapshot volume");
                first_error.get_or_insert(status);
            }
        }

        match first_error {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn release_orphan(&mut self, properties: &SnapshotProperties) -> Result<(), ProviderStatus> {
        remove_snapshot_lv(&properties.device_reference)
    }
}

/// Waits on one `lvcreate` child per source volume
struct CommandOperation {
    children: Vec<(String, Child)>,
}

impl CommandOperation {
    fn new(children: Vec<(String, Child)>) -> Self {
        Self { children }
    }
}

fn finish_child(command: &str, child: Child) -> Result<(), ProviderStatus> {
    let output = child
        .wait_with_output()
        .map_err(|error| ProviderStatus::unexpected(format!("{command}: {error}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ProviderStatus::from_exit_code(
        output.status.code(),
        format!("{command} failed: {}", stderr.trim()),
    ))
}

impl AsyncOperation for CommandOperation {
    fn try_complete(&mut self) -> Result<bool, ProviderStatus> {
        let mut index = 0;
        while index < self.children.len() {
            let finished = self.children[index]
                .1
                .try_wait()
                .map_err(|error| ProviderStatus::unexpected(error.to_string()))?
                .is_some();
            if finished {
                let (command, child) = self.children.swap_remove(index);
                finish_child(&command, child)?;
            } else {
                index += 1;
            }
        }
        Ok(self.children.is_empty())
    }

    fn wait(&mut self) -> Result<(), ProviderStatus> {
        let mut first_error = None;
        for (command, child) in self.children.drain(..) {
            if let Err(status) = finish_child(&command, child) {
                first_error.get_or_insert(status);
            }
        }

        match first_error {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn cancel(&mut self) {
        for (command, mut child) in self.children.drain(..) {
            warn!(command, "killing provider helper after deadline");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn size_flag(snapshot_size: &str) -> &'static str {
    if snapshot_size.contains('%') {
        "--extents"
    } else {
        "--size"
    }
}

fn snapshot_lv_name(lv_name: &str, set_short: &str) -> String {
    format!("{lv_name}-snap-{set_short}")
}

fn parse_tabbed_line(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|part| part.trim().to_string())
        .collect()
}

fn parse_lvs(output: &str) -> Vec<LvRow> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let cols = parse_tabbed_line(line);
            if cols.len() < 3 {
                return None;
            }
            Some(LvRow {
                vg_name: cols[0].clone(),
                lv_name: cols[1].clone(),
                lv_path: cols[2].clone(),
            })
        })
        .collect()
}

fn parse_vg_free(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
}

fn status_from_sys(error: SysError) -> ProviderStatus {
    match error {
        SysError::CommandFailed {
            command,
            code,
            stderr,
        } => ProviderStatus::from_exit_code(code, format!("{command}: {stderr}")),
        other => ProviderStatus::unexpected(other.to_string()),
    }
}

fn resolve_logical_volume(volume: &str) -> Result<LvRow, ProviderStatus> {
    let output = cmd::run(
        "lvs",
        &args([
            "--noheadings",
            "--separator",
            "\t",
            "-o",
            "vg_name,lv_name,lv_path",
            volume,
        ]),
    )
    .map_err(|error| match error {
        SysError::CommandFailed { stderr, .. } => {
            ProviderStatus::not_found(format!("{volume} is not an LVM logical volume: {stderr}"))
        }
        other => status_from_sys(other),
    })?;

    parse_lvs(&output.stdout)
        .into_iter()
        .next()
        .ok_or_else(|| ProviderStatus::not_found(format!("{volume} is not an LVM logical volume")))
}

fn volume_group_free_bytes(vg_name: &str) -> Result<u64, ProviderStatus> {
    let output = cmd::run(
        "vgs",
        &args([
            "--noheadings",
            "--units",
            "b",
            "--nosuffix",
            "-o",
            "vg_free",
            vg_name,
        ]),
    )
    .map_err(status_from_sys)?;

    parse_vg_free(&output.stdout).ok_or_else(|| {
        ProviderStatus::unexpected(format!("unparseable vgs output for {vg_name}"))
    })
}

/// `lvs` stderr for a volume (or volume group) that does not exist
fn reports_missing_volume(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("failed to find logical volume")
        || (stderr.contains("volume group") && stderr.contains("not found"))
}

/// `Ok(false)` only when `lvs` ran and said the volume is not there
fn logical_volume_exists(path: &str) -> Result<bool, ProviderStatus> {
    match cmd::run("lvs", &args(["--noheadings", "-o", "lv_name", path])) {
        Ok(_) => Ok(true),
        Err(SysError::CommandFailed {
            code: Some(_),
            stderr,
            ..
        }) if reports_missing_volume(&stderr) => Ok(false),
        Err(error) => Err(status_from_sys(error)),
    }
}

fn remove_snapshot_lv(path: &str) -> Result<(), ProviderStatus> {
    if !logical_volume_exists(path)? {
        debug!(snapshot = path, "snapshot volume already gone");
        return Ok(());
    }

    info!(snapshot = path, "removing snapshot volume");
    cmd::run("lvremove", &args(["-f", path]))
        .map(|_| ())
        .map_err(status_from_sys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lvs_rows() {
        let output = "  vg0\troot\t/dev/vg0/root\n\n  vg0\thome\t/dev/vg0/home\n";
        let rows = parse_lvs(output);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            LvRow {
                vg_name: "vg0".to_string(),
                lv_name: "root".to_string(),
                lv_path: "/dev/vg0/root".to_string(),
            }
        );
    }

    #[test]
    fn short_rows_are_skipped() {
        assert!(parse_lvs("vg0\troot\n").is_empty());
    }

    #[test]
    fn parses_vg_free_bytes() {
        assert_eq!(parse_vg_free("  4194304\n"), Some(4_194_304));
        assert_eq!(parse_vg_free("\n"), None);
    }

    #[test]
    fn picks_size_flag_from_value() {
        assert_eq!(size_flag("10%ORIGIN"), "--extents");
        assert_eq!(size_flag("2G"), "--size");
    }

    #[test]
    fn snapshot_names_carry_set_prefix() {
        assert_eq!(snapshot_lv_name("root", "1a2b3c4d"), "root-snap-1a2b3c4d");
    }

    #[test]
    fn only_missing_volume_messages_count_as_gone() {
        assert!(reports_missing_volume(
            "  Failed to find logical volume \"vg0/root-snap-1a2b3c4d\""
        ));
        assert!(reports_missing_volume("  Volume group \"vg9\" not found"));
        assert!(!reports_missing_volume(
            "  Global lock failed: check global lockspace is started"
        ));
        assert!(!reports_missing_volume("No such file or directory (os error 2)"));
    }

    #[test]
    fn unknown_snapshot_has_no_planned_properties() {
        let provider = LvmSnapshotProvider::new("1G");
        let status = provider.planned_properties(&SnapshotId::new()).unwrap_err();
        assert_eq!(status.code, ProviderStatus::NOT_FOUND);
    }

    #[test]
    fn lifecycle_calls_require_initialize() {
        let mut provider = LvmSnapshotProvider::new("1G");
        let status = provider.begin_set().unwrap_err();
        assert_eq!(status.code, ProviderStatus::BAD_STATE);
    }

    #[test]
    fn releasing_an_unknown_set_is_not_found() {
        let mut provider = LvmSnapshotProvider::new("1G");
        let status = provider.release(&SnapshotSetId::new()).unwrap_err();
        assert_eq!(status.code, ProviderStatus::NOT_FOUND);
    }
}
