// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::partition::{ContentSource, FilesystemType, TableType};
use crate::size::ByteSize;

/// A partition with absolute byte offsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPartition {
    /// 0-based position in the table
    pub index: u32,
    /// `<NN>` from the partition identifier
    pub declared_index: u32,
    /// Start byte (inclusive)
    pub start_byte: u64,
    /// End byte (exclusive)
    pub end_byte: u64,
    pub filesystem: FilesystemType,
    pub bootable: bool,
    pub content: ContentSource,
    /// Verbatim `parted` tokens for long-form partitions
    pub parted_args: Vec<String>,
    /// Ends at the end of the image (`100%`)
    pub extends_to_end: bool,
}

impl ResolvedPartition {
    /// Partition number as the table and the kernel count it (`p1`, `p2`, ...)
    pub fn number(&self) -> u32 {
        self.index + 1
    }

    pub fn size(&self) -> u64 {
        self.end_byte.saturating_sub(self.start_byte)
    }

    pub fn is_long_form(&self) -> bool {
        !self.parted_args.is_empty()
    }
}

impl fmt::Display for ResolvedPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p{} [{}, {}) {}",
            self.number(),
            ByteSize::from_bytes(self.start_byte),
            ByteSize::from_bytes(self.end_byte),
            self.filesystem
        )?;
        if self.bootable {
            f.write_str(" boot")?;
        }
        Ok(())
    }
}

/// Fully resolved partition table for one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutPlan {
    pub table_type: TableType,
    pub total_size: u64,
    pub partitions: Vec<ResolvedPartition>,
}

impl LayoutPlan {
    pub fn partition(&self, number: u32) -> Option<&ResolvedPartition> {
        self.partitions.iter().find(|partition| partition.number() == number)
    }
}

impl fmt::Display for LayoutPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} table, {}",
            self.table_type,
            ByteSize::from_bytes(self.total_size).pretty()
        )?;
        for partition in &self.partitions {
            writeln!(f, "  {partition}, {}", partition.content)?;
        }
        Ok(())
    }
}
