// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read, Seek};
use std::path::PathBuf;

/// Raw sequential view of a snapshot's block device
pub trait RawDevice: Read + Send {
    /// Device length as reported by the length-query control operation
    fn length(&mut self) -> io::Result<u64>;
}

/// A physical drive opened for raw reads
pub trait PhysicalDrive: Read + Seek + Send {
    /// Fill `buffer` with the drive layout, returning the meaningful byte count
    fn drive_layout(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// Raw device access facility
pub trait DeviceAccess: Send {
    fn open_snapshot_device(&self, device_reference: &str) -> io::Result<Box<dyn RawDevice>>;

    /// Open physical drive `index`, returning the resolved device path with it
    fn open_physical_drive(&self, index: u32) -> io::Result<(PathBuf, Box<dyn PhysicalDrive>)>;
}
