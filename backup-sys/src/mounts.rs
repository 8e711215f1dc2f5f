// SPDX-License-Identifier: GPL-3.0-only

//! Mount table scanning via `/proc/self/mountinfo`

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use crate::error::{Result, SysError};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Every mount point currently visible to this process
pub fn read_mount_points() -> Result<BTreeSet<PathBuf>> {
    let mount_info = fs::read_to_string(MOUNTINFO)?;
    parse_mount_points(&mount_info)
}

pub fn parse_mount_points(input: &str) -> Result<BTreeSet<PathBuf>> {
    let mut points = BTreeSet::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, _) = line
            .split_once(" - ")
            .ok_or_else(|| SysError::Parse(format!("invalid mountinfo line: {line}")))?;

        let mount_point = left
            .split_whitespace()
            .nth(4)
            .ok_or_else(|| SysError::Parse(format!("invalid mountinfo line: {line}")))?;

        points.insert(PathBuf::from(unescape_mount_field(mount_point)));
    }

    Ok(points)
}

/// Undo the kernel's octal escaping (`\040` for space and friends)
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..=index + 3]
                .iter()
                .all(|b| (b'0'..=b'7').contains(b))
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num);
            index += 4;
            continue;
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn collects_every_mount_point() {
        let sample = "36 25 8:2 / / rw,relatime - ext4 /dev/nvme0n1p2 rw\n\
                      37 25 0:5 / /proc rw,nosuid - proc proc rw\n\
                      90 36 253:4 / /run/snapshot-backup/mnt/d ro,relatime - ext4 /dev/vg0/root-snap-1a2b3c4d ro\n";

        let points = parse_mount_points(sample).expect("parse should succeed");
        assert_eq!(points.len(), 3);
        assert!(points.contains(Path::new("/run/snapshot-backup/mnt/d")));
    }

    #[test]
    fn unescapes_spaces_in_paths() {
        let sample = "90 36 8:3 / /media/usb\\040disk rw - vfat /dev/sdb1 rw\n";
        let points = parse_mount_points(sample).expect("parse should succeed");
        assert!(points.contains(Path::new("/media/usb disk")));
    }

    #[test]
    fn escape_at_end_of_field_is_decoded() {
        assert_eq!(unescape_mount_field("/mnt/a\\040"), "/mnt/a ");
        assert_eq!(unescape_mount_field("/mnt/a\\04"), "/mnt/a\\04");
    }

    #[test]
    fn rejects_lines_without_separator() {
        assert!(parse_mount_points("36 25 8:2 / / rw\n").is_err());
    }
}
