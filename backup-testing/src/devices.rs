// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot devices and physical drives held in memory

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;

use backup_contracts::{DeviceAccess, PhysicalDrive, RawDevice};

/// Failure injected into a [`MemoryDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    /// The device cannot be opened at all
    Open,
    /// The length query fails
    Length,
    /// Reads fail once the position reaches this offset
    ReadAt(u64),
    /// The device claims to be longer than its data
    ReportLength(u64),
}

#[derive(Debug, Clone)]
pub struct MemoryDevice {
    data: Cursor<Vec<u8>>,
    fault: Option<DeviceFault>,
}

impl MemoryDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Cursor::new(data),
            fault: None,
        }
    }
}

impl Read for MemoryDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(DeviceFault::ReadAt(offset)) = self.fault {
            let position = self.data.position();
            if position >= offset {
                return Err(io::Error::other(format!("I/O error at sector {}", position / 512)));
            }
            let allowed = (offset - position).min(buf.len() as u64) as usize;
            return self.data.read(&mut buf[..allowed]);
        }
        self.data.read(buf)
    }
}

impl RawDevice for MemoryDevice {
    fn length(&mut self) -> io::Result<u64> {
        match self.fault {
            Some(DeviceFault::Length) => Err(io::Error::other("BLKGETSIZE64 failed")),
            Some(DeviceFault::ReportLength(length)) => Ok(length),
            _ => Ok(self.data.get_ref().len() as u64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDrive {
    data: Cursor<Vec<u8>>,
    layout: Option<Vec<u8>>,
}

impl MemoryDrive {
    /// `layout` is what the layout query returns; `None` makes it fail
    pub fn new(data: Vec<u8>, layout: Option<Vec<u8>>) -> Self {
        Self {
            data: Cursor::new(data),
            layout,
        }
    }
}

impl Read for MemoryDrive {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for MemoryDrive {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

impl PhysicalDrive for MemoryDrive {
    fn drive_layout(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let Some(layout) = &self.layout else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "no partition table",
            ));
        };
        let size = layout.len().min(buffer.len());
        buffer[..size].copy_from_slice(&layout[..size]);
        Ok(size)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDevices {
    snapshots: HashMap<String, (Vec<u8>, Option<DeviceFault>)>,
    drives: HashMap<u32, MemoryDrive>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, device_reference: &str, data: Vec<u8>) -> Self {
        self.snapshots
            .insert(device_reference.to_string(), (data, None));
        self
    }

    pub fn with_faulty_snapshot(
        mut self,
        device_reference: &str,
        data: Vec<u8>,
        fault: DeviceFault,
    ) -> Self {
        self.snapshots
            .insert(device_reference.to_string(), (data, Some(fault)));
        self
    }

    pub fn with_drive(mut self, index: u32, drive: MemoryDrive) -> Self {
        self.drives.insert(index, drive);
        self
    }
}

impl DeviceAccess for FakeDevices {
    fn open_snapshot_device(&self, device_reference: &str) -> io::Result<Box<dyn RawDevice>> {
        match self.snapshots.get(device_reference) {
            Some((_, Some(DeviceFault::Open))) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{device_reference}: permission denied"),
            )),
            Some((data, fault)) => Ok(Box::new(MemoryDevice {
                data: Cursor::new(data.clone()),
                fault: *fault,
            })),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{device_reference}: no such device"),
            )),
        }
    }

    fn open_physical_drive(&self, index: u32) -> io::Result<(PathBuf, Box<dyn PhysicalDrive>)> {
        let drive = self.drives.get(&index).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no physical drive {index}"))
        })?;
        Ok((PathBuf::from(format!("/dev/fake{index}")), Box::new(drive)))
    }
}
