// SPDX-License-Identifier: GPL-3.0-only

mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use backup_contracts::{BulkCopyTool, PrivilegeCheck};
use backup_engine::{BackupError, BackupOrchestrator, Collaborators, RecoveryLedger};
use backup_sys::{LinuxDeviceAccess, LvmSnapshotProvider, MountCommandMapper, RootPrivilege};
use backup_types::{BackupJob, BackupStrategy, CopyMode, EngineConfig};
use clap::{Parser, Subcommand, ValueEnum};

/// Exit code for privilege and configuration failures before anything is held
const EXIT_SETUP: u8 = 2;

/// Crash-consistent volume backups through LVM snapshots
#[derive(Parser)]
#[command(name = "snapshot-backup")]
#[command(about = "Snapshot a volume and back it up as a mirrored tree or a block image", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a volume and copy it to a destination
    Run {
        /// Source volume (e.g. /dev/vg0/root)
        source: String,
        /// Destination directory
        destination: PathBuf,
        #[arg(long, value_enum, default_value_t = StrategyArg::FileMirror)]
        strategy: StrategyArg,
        /// How the file mirror is performed
        #[arg(long, value_enum, default_value_t = CopyModeArg::External)]
        copy_mode: CopyModeArg,
        /// Also capture boot record and partition layout of this physical drive
        #[arg(long)]
        metadata_drive: Option<u32>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the job report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Capture boot record and partition layout of a physical drive
    CaptureMetadata {
        drive_index: u32,
        destination: PathBuf,
    },
    /// Release snapshots and mounts left behind by an interrupted run
    Recover {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    FileMirror,
    BlockImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CopyModeArg {
    External,
    Direct,
}

fn strategy(strategy: StrategyArg, copy_mode: CopyModeArg) -> BackupStrategy {
    match strategy {
        StrategyArg::BlockImage => BackupStrategy::BlockImage,
        StrategyArg::FileMirror => BackupStrategy::FileMirror {
            mode: match copy_mode {
                CopyModeArg::External => CopyMode::External,
                CopyModeArg::Direct => CopyMode::Direct,
            },
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn require_root() -> Result<()> {
    if RootPrivilege.is_elevated() {
        Ok(())
    } else {
        Err(BackupError::Privilege("run as root".to_string()).into())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = match &cli.command {
        Commands::Run { destination, .. } | Commands::CaptureMetadata { destination, .. } => {
            Some(destination.as_path())
        }
        Commands::Recover { .. } => None,
    };
    let _log = logging::init(log_dir);

    let result = match cli.command {
        Commands::Run {
            source,
            destination,
            strategy: strategy_arg,
            copy_mode,
            metadata_drive,
            config,
            json,
        } => run(
            source,
            destination,
            strategy(strategy_arg, copy_mode),
            metadata_drive,
            config.as_deref(),
            json,
        ),
        Commands::CaptureMetadata {
            drive_index,
            destination,
        } => capture_metadata(drive_index, &destination),
        Commands::Recover { config, json } => recover(config.as_deref(), json),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("snapshot-backup: {e:#}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}

fn run(
    source: String,
    destination: PathBuf,
    strategy: BackupStrategy,
    metadata_drive: Option<u32>,
    config: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let config = load_config(config)?;

    let copy_tool: Option<Box<dyn BulkCopyTool>> = match strategy {
        BackupStrategy::FileMirror {
            mode: CopyMode::External,
        } => Some(backup_sys::bulk_copy_tool(&config.mirror).context("locating bulk-copy tool")?),
        _ => None,
    };

    let ledger = RecoveryLedger::new(config.ledger_dir.clone());
    let collaborators = Collaborators {
        privilege: Box::new(RootPrivilege),
        provider: Box::new(LvmSnapshotProvider::new(config.lvm.snapshot_size.clone())),
        mapper: Box::new(MountCommandMapper::new(config.mount.options.clone())),
        devices: Box::new(LinuxDeviceAccess::default()),
        copy_tool,
    };
    let mut orchestrator = BackupOrchestrator::new(config, collaborators).with_ledger(ledger);

    let mut job = BackupJob::new(source, destination, strategy);
    if let Some(index) = metadata_drive {
        job = job.with_metadata_drive(index);
    }

    let result = orchestrator.run(&mut job);

    if json {
        println!("{}", serde_json::to_string_pretty(&job.report())?);
    }
    for secondary in &job.secondary_errors {
        tracing::warn!(error = %secondary, "secondary error");
    }

    Ok(match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(BackupError::Privilege(_) | BackupError::Configuration(_)) => ExitCode::from(EXIT_SETUP),
        Err(_) => ExitCode::FAILURE,
    })
}

fn capture_metadata(drive_index: u32, destination: &Path) -> Result<ExitCode> {
    require_root()?;
    std::fs::create_dir_all(destination)
        .with_context(|| format!("creating {}", destination.display()))?;

    let devices = LinuxDeviceAccess::default();
    match backup_engine::capture_disk_metadata(&devices, drive_index, destination) {
        Ok(record) => {
            println!(
                "{}",
                serde_json::json!({
                    "drive_index": record.drive_index,
                    "device": record.device,
                    "boot_record_bytes": record.boot_sector.len(),
                    "layout_bytes": record.layout.len(),
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, "disk metadata capture failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn recover(config: Option<&Path>, json: bool) -> Result<ExitCode> {
    require_root()?;
    let config = load_config(config)?;

    let ledger = RecoveryLedger::new(config.ledger_dir.clone());
    let mut provider = LvmSnapshotProvider::new(config.lvm.snapshot_size.clone());
    let mut mapper = MountCommandMapper::new(config.mount.options.clone());

    let report = backup_engine::recover(&ledger, &mut provider, &mut mapper)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        tracing::info!(
            recovered = report.recovered.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "recovery finished"
        );
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
