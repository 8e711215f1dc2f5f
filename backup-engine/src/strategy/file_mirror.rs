// SPDX-License-Identifier: GPL-3.0-only

//! Mirror the snapshot's file tree into the destination
//!
//! Either delegated to an external bulk-copy tool or done in-process. Both
//! converge the destination onto the source: changed entries are rewritten,
//! entries missing from the source are removed, hidden entries are left alone.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File, Metadata};
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use backup_contracts::{BulkCopyTool, CopyExit, MirrorRequest};
use backup_types::MirrorConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CopyError;

fn create_destination_root(destination: &Path) -> Result<(), CopyError> {
    fs::create_dir_all(destination).map_err(|source| CopyError::DestinationRoot {
        path: destination.to_path_buf(),
        source,
    })
}

/// Run the external tool; only a fatal exit code fails the copy
pub fn mirror_with_tool(
    tool: &dyn BulkCopyTool,
    source: &Path,
    destination: &Path,
    log_file: PathBuf,
    config: &MirrorConfig,
) -> Result<CopyExit, CopyError> {
    create_destination_root(destination)?;

    let request = MirrorRequest {
        source,
        destination,
        log_file,
        threads: config.threads,
        retries: config.retries,
        wait_secs: config.wait_secs,
    };
    let code = tool
        .mirror(&request)
        .map_err(|source| CopyError::ToolLaunch {
            tool: tool.name().to_string(),
            source,
        })?;

    match tool.classify(code) {
        CopyExit::Fatal(code) => Err(CopyError::ExternalTool {
            tool: tool.name().to_string(),
            code,
        }),
        CopyExit::Informational(code) => {
            info!(tool = tool.name(), code, log = %request.log_file.display(), "mirror finished with informational exit code");
            Ok(CopyExit::Informational(code))
        }
        CopyExit::Success => {
            info!(tool = tool.name(), "mirror finished");
            Ok(CopyExit::Success)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    pub files_copied: u64,
    pub files_unchanged: u64,
    pub directories_created: u64,
    pub entries_removed: u64,
    pub bytes_copied: u64,
    pub failures: Vec<MirrorFailure>,
}

impl MirrorReport {
    fn fail(&mut self, path: &Path, error: impl ToString) {
        let reason = error.to_string();
        warn!(path = %path.display(), %reason, "mirror entry failed");
        self.failures.push(MirrorFailure {
            path: path.to_path_buf(),
            reason,
        });
    }
}

fn is_hidden(name: &OsString) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

/// In-process recursive mirror
///
/// Per-entry failures are collected in the report; only an unreadable source
/// root or an uncreatable destination root is an error.
pub fn mirror_tree(source: &Path, destination: &Path) -> Result<MirrorReport, CopyError> {
    let entries = fs::read_dir(source).map_err(|error| CopyError::SourceTree {
        path: source.to_path_buf(),
        source: error,
    })?;
    create_destination_root(destination)?;

    let mut report = MirrorReport::default();
    mirror_entries(entries, source, destination, &mut report);

    info!(
        files_copied = report.files_copied,
        files_unchanged = report.files_unchanged,
        removed = report.entries_removed,
        failures = report.failures.len(),
        "direct mirror finished"
    );
    Ok(report)
}

fn mirror_dir(source: &Path, destination: &Path, report: &mut MirrorReport) {
    let entries = match fs::read_dir(source) {
        Ok(entries) => entries,
        Err(error) => return report.fail(source, error),
    };
    mirror_entries(entries, source, destination, report);
}

fn mirror_entries(
    entries: fs::ReadDir,
    source: &Path,
    destination: &Path,
    report: &mut MirrorReport,
) {
    let mut seen = BTreeSet::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                report.fail(source, error);
                continue;
            }
        };
        let name = entry.file_name();
        if is_hidden(&name) {
            continue;
        }

        let from = entry.path();
        let to = destination.join(&name);
        seen.insert(name);

        let metadata = match fs::symlink_metadata(&from) {
            Ok(metadata) => metadata,
            Err(error) => {
                report.fail(&from, error);
                continue;
            }
        };

        let file_type = metadata.file_type();
        let result = if file_type.is_dir() {
            mirror_subdir(&from, &to, &metadata, report)
        } else if file_type.is_symlink() {
            mirror_symlink(&from, &to)
        } else if file_type.is_file() {
            mirror_file(&from, &to, &metadata, report)
        } else {
            debug!(path = %from.display(), "skipping special file");
            Ok(())
        };

        if let Err(error) = result {
            report.fail(&from, error);
        }
    }

    remove_extraneous(destination, &seen, report);
}

fn mirror_subdir(
    from: &Path,
    to: &Path,
    metadata: &Metadata,
    report: &mut MirrorReport,
) -> io::Result<()> {
    match fs::symlink_metadata(to) {
        Ok(existing) if existing.is_dir() => {}
        Ok(_) => {
            fs::remove_file(to)?;
            fs::create_dir(to)?;
            report.directories_created += 1;
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            fs::create_dir(to)?;
            report.directories_created += 1;
        }
        Err(error) => return Err(error),
    }

    mirror_dir(from, to, report);
    fs::set_permissions(to, metadata.permissions())
}

fn unchanged(source: &Metadata, destination: &Path) -> bool {
    let Ok(existing) = fs::symlink_metadata(destination) else {
        return false;
    };
    existing.is_file()
        && existing.len() == source.len()
        && matches!(
            (existing.modified(), source.modified()),
            (Ok(a), Ok(b)) if a == b
        )
}

fn mirror_file(
    from: &Path,
    to: &Path,
    metadata: &Metadata,
    report: &mut MirrorReport,
) -> io::Result<()> {
    if unchanged(metadata, to) {
        report.files_unchanged += 1;
        return Ok(());
    }

    if let Ok(existing) = fs::symlink_metadata(to) {
        if existing.is_dir() {
            fs::remove_dir_all(to)?;
        } else if existing.file_type().is_symlink() {
            fs::remove_file(to)?;
        }
    }

    let bytes = fs::copy(from, to)?;
    let copied = File::options().write(true).open(to)?;
    copied.set_modified(metadata.modified()?)?;
    fs::set_permissions(to, metadata.permissions())?;

    report.files_copied += 1;
    report.bytes_copied += bytes;
    Ok(())
}

fn mirror_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = fs::read_link(from)?;
    match fs::symlink_metadata(to) {
        Ok(existing) if existing.file_type().is_symlink() => {
            if fs::read_link(to)? == target {
                return Ok(());
            }
            fs::remove_file(to)?;
        }
        Ok(existing) if existing.is_dir() => fs::remove_dir_all(to)?,
        Ok(_) => fs::remove_file(to)?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    symlink(target, to)
}

fn remove_extraneous(destination: &Path, seen: &BTreeSet<OsString>, report: &mut MirrorReport) {
    let entries = match fs::read_dir(destination) {
        Ok(entries) => entries,
        Err(error) => return report.fail(destination, error),
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        if is_hidden(&name) || seen.contains(&name) {
            continue;
        }

        let path = entry.path();
        let removed = match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(error) => Err(error),
        };
        match removed {
            Ok(()) => {
                debug!(path = %path.display(), "removed entry absent from source");
                report.entries_removed += 1;
            }
            Err(error) => report.fail(&path, error),
        }
    }
}
