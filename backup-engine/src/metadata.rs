// SPDX-License-Identifier: GPL-3.0-only

//! Boot record and partition layout capture from the live physical drive

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use backup_contracts::DeviceAccess;
use backup_types::{BOOT_SECTOR_CAPTURE_BYTES, DiskMetadataRecord, layout_buffer_capacity};
use tracing::{info, warn};

use crate::error::{MetadataCaptureError, MetadataStage};

/// Read both artifacts, then write them into `destination`
///
/// Nothing is written unless both reads succeeded, and a failed layout write
/// takes the already-written boot record with it.
pub fn capture_disk_metadata(
    devices: &dyn DeviceAccess,
    drive_index: u32,
    destination: &Path,
) -> Result<DiskMetadataRecord, MetadataCaptureError> {
    let fail = |stage, source| MetadataCaptureError {
        drive_index,
        stage,
        source,
    };

    let (device, mut drive) = devices
        .open_physical_drive(drive_index)
        .map_err(|source| fail(MetadataStage::OpenDrive, source))?;
    info!(drive_index, device = %device.display(), "capturing disk metadata");

    let mut boot_sector = vec![0u8; BOOT_SECTOR_CAPTURE_BYTES];
    let read = drive
        .seek(SeekFrom::Start(0))
        .and_then(|_| read_window(&mut drive, &mut boot_sector))
        .map_err(|source| fail(MetadataStage::ReadBootSector, source))?;
    boot_sector.truncate(read);

    let mut layout = vec![0u8; layout_buffer_capacity()];
    let returned = drive
        .drive_layout(&mut layout)
        .map_err(|source| fail(MetadataStage::QueryLayout, source))?;
    layout.truncate(returned.min(layout.len()));

    let boot_path = DiskMetadataRecord::boot_record_path(destination);
    fs::write(&boot_path, &boot_sector)
        .map_err(|source| fail(MetadataStage::WriteBootRecord, source))?;

    let layout_path = DiskMetadataRecord::drive_layout_path(destination);
    if let Err(source) = fs::write(&layout_path, &layout) {
        if let Err(error) = fs::remove_file(&boot_path) {
            warn!(path = %boot_path.display(), %error, "failed to remove boot record after layout write failure");
        }
        return Err(fail(MetadataStage::WriteLayout, source));
    }

    info!(
        drive_index,
        boot_bytes = boot_sector.len(),
        layout_bytes = layout.len(),
        "disk metadata captured"
    );
    Ok(DiskMetadataRecord {
        drive_index,
        device,
        boot_sector,
        layout,
    })
}

/// Fill as much of `buffer` as the device has; empty is an error
fn read_window(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }

    if filled == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "drive returned no boot sector data",
        ));
    }
    Ok(filled)
}
