// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use tracing::debug;

const MOUNT_TABLE: &str = "/proc/self/mounts";

/// Undo the octal escaping the kernel applies to mount table paths
/// (`\040` for a space, `\011` for a tab and so on)
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            let digits = &bytes[index + 1..index + 4];
            if digits.iter().all(|digit| (b'0'..=b'7').contains(digit))
                && let Ok(text) = std::str::from_utf8(digits)
                && let Ok(value) = u8::from_str_radix(text, 8)
            {
                decoded.push(value);
                index += 4;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Mount points listed in a `/proc/mounts` style table
pub fn parse_mount_points(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _source = fields.next()?;
            fields.next().map(|target| PathBuf::from(unescape_mount_path(target)))
        })
        .collect()
}

pub fn is_mounted(mount_point: &Path) -> bool {
    let canonical = mount_point
        .canonicalize()
        .unwrap_or_else(|_| mount_point.to_path_buf());
    debug!(mount_point = %canonical.display(), "checking mount table");

    match std::fs::read_to_string(MOUNT_TABLE) {
        Ok(table) => parse_mount_points(&table).contains(&canonical),
        Err(_) => false,
    }
}
