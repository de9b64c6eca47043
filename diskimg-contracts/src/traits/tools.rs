// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use diskimg_types::{ContentSource, FilesystemType, MountMechanism, ResolvedPartition, TableType};

use crate::ToolError;

/// Capability surface over the external partitioning, formatting and mounting tools.
///
/// Partition numbers are 1-based, as the partition table numbers them.
/// Every call blocks until the tool exits or its timeout expires.
pub trait ToolAdapter: Send + Sync {
    /// Allocate a sparse file of exactly `size_bytes`.
    fn create_image(&self, path: &Path, size_bytes: u64) -> Result<(), ToolError>;

    /// Write the partition table and every partition boundary in one pass.
    fn write_partition_table(
        &self,
        path: &Path,
        table_type: TableType,
        partitions: &[ResolvedPartition],
    ) -> Result<(), ToolError>;

    fn format_partition(
        &self,
        path: &Path,
        partition: u32,
        filesystem: &FilesystemType,
    ) -> Result<(), ToolError>;

    /// Mount one partition of `path` and return where it is mounted.
    fn mount(&self, path: &Path, partition: u32) -> Result<PathBuf, ToolError>;

    /// Release a mount point created by [`ToolAdapter::mount`].
    ///
    /// Unmounting a point that is not mounted succeeds without doing anything.
    fn unmount(&self, mount_point: &Path) -> Result<(), ToolError>;

    /// Copy a directory tree or extract an archive into a mounted partition.
    fn populate(&self, content: &ContentSource, mount_point: &Path) -> Result<(), ToolError>;

    fn supports_filesystem(&self, filesystem: &FilesystemType) -> bool;

    /// Strategy used for mounting, probed once and cached.
    fn mechanism(&self) -> Result<MountMechanism, ToolError>;

    /// Mount points this adapter created and has not released yet.
    fn active_mounts(&self) -> Vec<PathBuf>;
}
