// SPDX-License-Identifier: GPL-3.0-only

//! Formatter catalog.
//!
//! Maps a filesystem type name to the program that creates it and to the
//! name `parted` expects in `mkpart`. Optional filesystems sit behind
//! `fs-*` cargo features.

use std::path::Path;

use diskimg_types::FilesystemType;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemTool {
    /// Names accepted in partition specs
    pub names: &'static [&'static str],
    pub program: &'static str,
    /// Arguments placed before the device path
    pub args: &'static [&'static str],
    /// Type hint for `parted mkpart`, when parted knows the filesystem
    pub parted_name: Option<&'static str>,
}

impl FilesystemTool {
    pub fn command(&self, device: &Path) -> (String, Vec<String>) {
        let mut args: Vec<String> = self.args.iter().map(|arg| arg.to_string()).collect();
        args.push(device.display().to_string());
        (self.program.to_string(), args)
    }

    pub fn installed(&self) -> bool {
        which::which(self.program).is_ok()
    }
}

static CATALOG: &[FilesystemTool] = &[
    #[cfg(feature = "fs-vfat")]
    FilesystemTool {
        names: &["fat16"],
        program: "mkfs.fat",
        args: &["-F", "16"],
        parted_name: Some("fat16"),
    },
    #[cfg(feature = "fs-vfat")]
    FilesystemTool {
        names: &["fat32", "vfat"],
        program: "mkfs.fat",
        args: &["-F", "32"],
        parted_name: Some("fat32"),
    },
    #[cfg(feature = "fs-ext4")]
    FilesystemTool {
        names: &["ext2"],
        program: "mkfs.ext2",
        args: &["-F"],
        parted_name: Some("ext2"),
    },
    #[cfg(feature = "fs-ext4")]
    FilesystemTool {
        names: &["ext3"],
        program: "mkfs.ext3",
        args: &["-F"],
        parted_name: Some("ext3"),
    },
    #[cfg(feature = "fs-ext4")]
    FilesystemTool {
        names: &["ext4"],
        program: "mkfs.ext4",
        args: &["-F"],
        parted_name: Some("ext4"),
    },
    #[cfg(feature = "fs-ntfs")]
    FilesystemTool {
        names: &["ntfs"],
        program: "mkfs.ntfs",
        args: &["-F", "-Q"],
        parted_name: Some("ntfs"),
    },
    #[cfg(feature = "fs-xfs")]
    FilesystemTool {
        names: &["xfs"],
        program: "mkfs.xfs",
        args: &["-f"],
        parted_name: Some("xfs"),
    },
    #[cfg(feature = "fs-jfs")]
    FilesystemTool {
        names: &["jfs"],
        program: "mkfs.jfs",
        args: &["-q"],
        parted_name: Some("jfs"),
    },
    #[cfg(feature = "fs-btrfs")]
    FilesystemTool {
        names: &["btrfs"],
        program: "mkfs.btrfs",
        args: &["-f"],
        parted_name: Some("btrfs"),
    },
    #[cfg(feature = "fs-exfat")]
    FilesystemTool {
        names: &["exfat"],
        program: "mkfs.exfat",
        args: &[],
        parted_name: None,
    },
    FilesystemTool {
        names: &["swap", "linux-swap"],
        program: "mkswap",
        args: &[],
        parted_name: Some("linux-swap"),
    },
];

/// Formatter for `filesystem`. `none` has no formatter and yields `None`,
/// as does any name outside the catalog.
pub fn lookup(filesystem: &FilesystemType) -> Option<&'static FilesystemTool> {
    let name = filesystem.as_str();
    CATALOG.iter().find(|tool| tool.names.contains(&name))
}

/// Whether the catalog knows `filesystem` at all, installed or not
pub fn is_known(filesystem: &FilesystemType) -> bool {
    filesystem.is_none() || lookup(filesystem).is_some()
}

/// Filesystem names whose formatter is on PATH
pub fn detect_installed() -> Vec<&'static str> {
    let supported: Vec<&'static str> = CATALOG
        .iter()
        .filter(|tool| tool.installed())
        .flat_map(|tool| tool.names.iter().copied())
        .collect();
    info!("Detected filesystem support: {:?}", supported);
    supported
}
