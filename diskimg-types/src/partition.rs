// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::size::ByteSize;

/// Partition table layout written by `parted mklabel`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    #[default]
    Gpt,
    Msdos,
}

impl TableType {
    pub fn as_str(self) -> &'static str {
        match self {
            TableType::Gpt => "gpt",
            TableType::Msdos => "msdos",
        }
    }

    /// Bytes the table reserves in front of the first usable sector.
    pub fn leading_reserved_bytes(self) -> u64 {
        match self {
            // protective MBR + header + 128 entries of 128 bytes
            TableType::Gpt => 34 * crate::SECTOR_SIZE,
            TableType::Msdos => crate::SECTOR_SIZE,
        }
    }

    /// Bytes the table reserves at the end of the image (backup GPT).
    pub fn trailing_reserved_bytes(self) -> u64 {
        match self {
            TableType::Gpt => 33 * crate::SECTOR_SIZE,
            TableType::Msdos => 0,
        }
    }

    /// Largest number of partitions the generated script can create.
    pub fn max_partitions(self) -> usize {
        match self {
            TableType::Gpt => 128,
            TableType::Msdos => 4,
        }
    }

    /// Largest addressable image, if the table has one.
    pub fn max_image_bytes(self) -> Option<u64> {
        match self {
            TableType::Gpt => None,
            TableType::Msdos => Some((1u64 << 32) * crate::SECTOR_SIZE),
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpt" => Ok(TableType::Gpt),
            "msdos" | "dos" => Ok(TableType::Msdos),
            other => Err(format!("unsupported partition table type '{other}'")),
        }
    }
}

/// Where a short-form partition ends, measured from the start of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndPosition {
    Absolute(ByteSize),
    /// `100%`, the rest of the image
    Fill,
}

impl fmt::Display for EndPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndPosition::Absolute(size) => write!(f, "{size}"),
            EndPosition::Fill => f.write_str("100%"),
        }
    }
}

/// Filesystem identifier as written in a spec (`fat32`, `ext4`, `none`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilesystemType(String);

impl FilesystemType {
    pub const NONE: &'static str = "none";
    pub const SWAP: &'static str = "linux-swap";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    pub fn none() -> Self {
        Self(Self::NONE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == Self::NONE
    }

    /// `linux-swap`, or its `swap` alias
    pub fn is_swap(&self) -> bool {
        self.0 == Self::SWAP || self.0 == "swap"
    }

    /// Swap and raw regions carry no filesystem that could be mounted.
    pub fn is_mountable(&self) -> bool {
        !self.is_none() && !self.is_swap()
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What gets copied into a partition after formatting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ContentSource {
    Directory(PathBuf),
    Tar(PathBuf),
    TarGz(PathBuf),
    #[default]
    None,
}

impl ContentSource {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ContentSource::Directory(path)
            | ContentSource::Tar(path)
            | ContentSource::TarGz(path) => Some(path),
            ContentSource::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ContentSource::None)
    }
}

impl fmt::Display for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::Directory(path) => write!(f, "directory {}", path.display()),
            ContentSource::Tar(path) => write!(f, "tar {}", path.display()),
            ContentSource::TarGz(path) => write!(f, "tar.gz {}", path.display()),
            ContentSource::None => f.write_str("empty"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecForm {
    /// `partition01_8MiB_fat32`
    Short,
    /// `partition01 -- dd 256MiB -- parted mklabel msdos mkpart ...`
    Long,
}

/// One parsed partition declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Declared `<NN>`, used for ordering only
    pub index: u32,
    pub table_type: Option<TableType>,
    /// Short form only
    pub end_position: Option<EndPosition>,
    pub filesystem: FilesystemType,
    pub content: ContentSource,
    /// Long form only, passed verbatim to `parted`
    pub parted_args: Vec<String>,
    /// Long form `dd <FULLSIZE>`, first partition only
    pub dd_size: Option<ByteSize>,
    /// Identifier this partition spec was parsed from
    pub token: String,
}

impl PartitionSpec {
    pub fn form(&self) -> SpecForm {
        if self.parted_args.is_empty() {
            SpecForm::Short
        } else {
            SpecForm::Long
        }
    }
}
