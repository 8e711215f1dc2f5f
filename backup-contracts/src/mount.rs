// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;

use backup_types::MountSlot;

/// The facility that maps a device reference onto an addressable path
pub trait MountMapper: Send {
    /// Every path currently in use as a mount point
    fn mounted_paths(&self) -> io::Result<BTreeSet<PathBuf>>;

    fn map(&mut self, device_reference: &str, slot: &MountSlot) -> io::Result<()>;

    fn unmap(&mut self, slot: &MountSlot) -> io::Result<()>;
}
