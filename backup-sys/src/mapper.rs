// SPDX-License-Identifier: GPL-3.0-only

//! `mount`/`umount` as the mount mapping facility

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use backup_contracts::MountMapper;
use backup_types::MountSlot;
use tracing::{debug, info};

use crate::cmd::{self, args};
use crate::mounts;

/// Maps snapshot devices onto slot directories with `mount -o <options>`
#[derive(Debug, Clone)]
pub struct MountCommandMapper {
    options: String,
}

impl MountCommandMapper {
    pub fn new(options: impl Into<String>) -> Self {
        Self {
            options: options.into(),
        }
    }
}

impl Default for MountCommandMapper {
    fn default() -> Self {
        Self::new("ro")
    }
}

impl MountMapper for MountCommandMapper {
    fn mounted_paths(&self) -> io::Result<BTreeSet<PathBuf>> {
        Ok(mounts::read_mount_points()?)
    }

    fn map(&mut self, device_reference: &str, slot: &MountSlot) -> io::Result<()> {
        fs::create_dir_all(&slot.path)?;

        let path = slot.path.display().to_string();
        info!(device = device_reference, slot = %slot, "mounting snapshot device");
        cmd::run(
            "mount",
            &args(["-o", self.options.as_str(), device_reference, path.as_str()]),
        )?;
        Ok(())
    }

    fn unmap(&mut self, slot: &MountSlot) -> io::Result<()> {
        let path = slot.path.display().to_string();
        info!(slot = %slot, "unmounting snapshot device");
        cmd::run("umount", &args([path.as_str()]))?;

        // The slot directory is ours; an unexpected leftover entry keeps it around.
        if let Err(error) = fs::remove_dir(&slot.path) {
            debug!(slot = %slot, %error, "slot directory left in place");
        }
        Ok(())
    }
}
