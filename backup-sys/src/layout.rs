// SPDX-License-Identifier: GPL-3.0-only

//! Drive layout query
//!
//! Linux has no single "get drive layout" control call, so the layout is read
//! straight off the disk: the GPT header sector followed by its partition
//! entries, or the MBR partition table when no GPT header is present.

use std::io::{self, Read, Seek, SeekFrom};

use backup_types::{LAYOUT_HEADER_BYTES, MAX_LAYOUT_PARTITIONS};

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
const SECTOR_SIZES: [u64; 2] = [512, 4096];

const MBR_TABLE_OFFSET: u64 = 446;
/// Four 16-byte entries plus the 0x55AA boot signature
const MBR_TABLE_BYTES: usize = 66;

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Fill `buffer` with the drive layout and return the meaningful byte count
///
/// GPT: header sector (512 bytes kept) + `min(entries, 128)` raw entries.
/// MBR: the 66-byte partition table including the boot signature.
pub fn read_drive_layout<R: Read + Seek>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    if buffer.len() < LAYOUT_HEADER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "layout buffer smaller than one header sector",
        ));
    }

    for sector_size in SECTOR_SIZES {
        reader.seek(SeekFrom::Start(sector_size))?;
        match reader.read_exact(&mut buffer[..LAYOUT_HEADER_BYTES]) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => continue,
            Err(error) => return Err(error),
        }

        if &buffer[..GPT_SIGNATURE.len()] != GPT_SIGNATURE {
            continue;
        }

        let entries_lba = le_u64(buffer, 72);
        let entry_count = le_u32(buffer, 80) as usize;
        let entry_size = le_u32(buffer, 84) as usize;
        if entry_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "GPT header reports zero-sized partition entries",
            ));
        }

        let room = (buffer.len() - LAYOUT_HEADER_BYTES) / entry_size;
        let count = entry_count.min(MAX_LAYOUT_PARTITIONS).min(room);
        let end = LAYOUT_HEADER_BYTES + count * entry_size;

        let entries_offset = entries_lba.checked_mul(sector_size).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("GPT partition entry LBA {entries_lba} is out of range"),
            )
        })?;
        reader.seek(SeekFrom::Start(entries_offset))?;
        reader.read_exact(&mut buffer[LAYOUT_HEADER_BYTES..end])?;
        return Ok(end);
    }

    reader.seek(SeekFrom::Start(MBR_TABLE_OFFSET))?;
    reader.read_exact(&mut buffer[..MBR_TABLE_BYTES])?;
    if buffer[MBR_TABLE_BYTES - 2..MBR_TABLE_BYTES] != [0x55, 0xAA] {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no GPT header and no MBR boot signature",
        ));
    }

    Ok(MBR_TABLE_BYTES)
}
