// SPDX-License-Identifier: GPL-3.0-only

//! Raw block device access
//!
//! Snapshot devices and physical drives are opened read-only; their length
//! comes from the `BLKGETSIZE64` ioctl, or the file length for image files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use backup_contracts::{DeviceAccess, PhysicalDrive, RawDevice};
use tracing::debug;

use crate::error::{Result, SysError};
use crate::layout;

nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Block device names under /sys/block that are never physical drives
const VIRTUAL_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "sr", "md", "nbd"];

/// A device (or image file) opened for raw sequential reads
#[derive(Debug)]
pub struct BlockDevice {
    file: File,
}

impl BlockDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                SysError::PermissionDenied(format!("Cannot open {} for reading", path.display()))
            } else if e.kind() == io::ErrorKind::NotFound {
                SysError::DeviceNotFound(path.display().to_string())
            } else {
                SysError::Io(e)
            }
        })?;

        Ok(Self { file })
    }

    /// Length-query control operation
    pub fn query_length(&self) -> io::Result<u64> {
        let metadata = self.file.metadata()?;
        if !metadata.file_type().is_block_device() {
            return Ok(metadata.len());
        }

        let mut size: u64 = 0;
        unsafe { blkgetsize64(self.file.as_raw_fd(), &mut size) }.map_err(io::Error::from)?;
        Ok(size)
    }
}

impl Read for BlockDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for BlockDevice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl RawDevice for BlockDevice {
    fn length(&mut self) -> io::Result<u64> {
        self.query_length()
    }
}

impl PhysicalDrive for BlockDevice {
    fn drive_layout(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        layout::read_drive_layout(&mut self.file, buffer)
    }
}

/// Device access rooted at `/sys/block` and `/dev`
#[derive(Debug, Clone)]
pub struct LinuxDeviceAccess {
    sys_block: PathBuf,
    dev_root: PathBuf,
}

impl Default for LinuxDeviceAccess {
    fn default() -> Self {
        Self {
            sys_block: PathBuf::from("/sys/block"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}

impl LinuxDeviceAccess {
    pub fn with_roots(sys_block: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_block: sys_block.into(),
            dev_root: dev_root.into(),
        }
    }

    /// Physical drives in index order (ascending kernel name)
    pub fn physical_drives(&self) -> Result<Vec<PathBuf>> {
        let mut names: Vec<String> = fs::read_dir(&self.sys_block)?
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| is_physical_drive_name(name))
            .collect();
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| self.dev_root.join(name))
            .collect())
    }

    pub fn physical_drive_path(&self, index: u32) -> Result<PathBuf> {
        let drives = self.physical_drives()?;
        drives
            .get(index as usize)
            .cloned()
            .ok_or_else(|| SysError::DeviceNotFound(format!("physical drive {index}")))
    }
}

fn is_physical_drive_name(name: &str) -> bool {
    !VIRTUAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

impl DeviceAccess for LinuxDeviceAccess {
    fn open_snapshot_device(&self, device_reference: &str) -> io::Result<Box<dyn RawDevice>> {
        debug!(device = device_reference, "opening snapshot device");
        Ok(Box::new(BlockDevice::open(device_reference)?))
    }

    fn open_physical_drive(&self, index: u32) -> io::Result<(PathBuf, Box<dyn PhysicalDrive>)> {
        let path = self.physical_drive_path(index)?;
        debug!(index, path = %path.display(), "opening physical drive");
        let device = BlockDevice::open(&path)?;
        Ok((path, Box::new(device)))
    }
}
