// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for snapshot-backed backups
//!
//! This crate implements the `backup-contracts` traits on Linux:
//! - LVM snapshots as the snapshot provider
//! - `mount`/`umount` as the mount mapping facility
//! - Raw block device reads, `BLKGETSIZE64` and GPT/MBR layout reads
//! - robocopy / rsync as the bulk-copy tool
//!
//! These operations require root and should only be reached after the
//! privilege check passed.

pub mod cmd;
pub mod copy_tool;
pub mod device;
pub mod error;
pub mod layout;
pub mod lvm;
pub mod mapper;
pub mod mounts;
pub mod privilege;

pub use copy_tool::{RobocopyCli, RsyncCli, bulk_copy_tool};
pub use device::{BlockDevice, LinuxDeviceAccess};
pub use error::{Result, SysError};
pub use layout::read_drive_layout;
pub use lvm::LvmSnapshotProvider;
pub use mapper::MountCommandMapper;
pub use mounts::{parse_mount_points, read_mount_points};
pub use privilege::RootPrivilege;
