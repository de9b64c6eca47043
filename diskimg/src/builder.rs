// SPDX-License-Identifier: GPL-3.0-only

//! Image creation: allocate, partition, format and populate.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use diskimg_contracts::{BuildError, PopulationStage, ToolAdapter, ToolError};
use diskimg_types::{ByteSize, ContentSource, FilesystemType, LayoutPlan, ResolvedPartition, TableType};
use serde::Serialize;
use tracing::{info, warn};

use crate::guard::MountGuard;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Replace an existing image file
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub number: u32,
    pub start_byte: u64,
    pub end_byte: u64,
    pub filesystem: FilesystemType,
    /// Content copied into the partition, `None` when it was left empty
    pub populated: Option<ContentSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub image: PathBuf,
    pub table_type: TableType,
    pub total_size: u64,
    pub partitions: Vec<PartitionReport>,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} table, {}",
            self.image.display(),
            self.table_type,
            ByteSize::from_bytes(self.total_size).pretty()
        )?;
        for partition in &self.partitions {
            write!(
                f,
                "  p{} {}..{} {}",
                partition.number,
                ByteSize::from_bytes(partition.start_byte),
                ByteSize::from_bytes(partition.end_byte),
                partition.filesystem
            )?;
            match &partition.populated {
                Some(content) => writeln!(f, " <- {content}")?,
                None => writeln!(f)?,
            }
        }
        Ok(())
    }
}

fn allocation(image: &Path, partial: bool, source: ToolError) -> BuildError {
    BuildError::Allocation {
        image: image.to_path_buf(),
        partial,
        source,
    }
}

fn population(image: &Path, partition: u32, stage: PopulationStage, source: ToolError) -> BuildError {
    BuildError::Population {
        image: image.to_path_buf(),
        partition,
        stage,
        source,
        cleanup: Vec::new(),
    }
}

/// Checks that need no tool run and touch nothing on disk
fn preflight(tools: &dyn ToolAdapter, plan: &LayoutPlan, image: &Path, options: BuildOptions) -> Result<(), BuildError> {
    if let Some(partition) = plan
        .partitions
        .iter()
        .find(|partition| !tools.supports_filesystem(&partition.filesystem))
    {
        return Err(allocation(
            image,
            false,
            ToolError::UnsupportedFilesystem {
                filesystem: partition.filesystem.to_string(),
            },
        ));
    }

    if image.exists() {
        if !options.overwrite {
            return Err(allocation(
                image,
                false,
                ToolError::io(
                    format!("{} already exists", image.display()),
                    io::Error::new(io::ErrorKind::AlreadyExists, "use --force to overwrite"),
                ),
            ));
        }
        warn!(image = %image.display(), "overwriting existing image");
        fs::remove_file(image).map_err(|error| {
            allocation(
                image,
                false,
                ToolError::io(format!("removing {}", image.display()), error),
            )
        })?;
    }
    Ok(())
}

/// Build `image` from `plan`.
///
/// A failure after allocation leaves the incomplete image on disk;
/// [`BuildError::partial_image`] names it. No mount survives a failure.
pub fn build(
    tools: &dyn ToolAdapter,
    plan: &LayoutPlan,
    image: &Path,
    options: BuildOptions,
) -> Result<BuildReport, BuildError> {
    preflight(tools, plan, image, options)?;

    info!(image = %image.display(), size = %ByteSize::from_bytes(plan.total_size).pretty(), "allocating image");
    tools
        .create_image(image, plan.total_size)
        .map_err(|source| allocation(image, image.exists(), source))?;

    info!(table = %plan.table_type, partitions = plan.partitions.len(), "writing partition table");
    tools
        .write_partition_table(image, plan.table_type, &plan.partitions)
        .map_err(|source| BuildError::Partitioning {
            image: image.to_path_buf(),
            source,
        })?;

    let mut partitions = Vec::with_capacity(plan.partitions.len());
    for partition in &plan.partitions {
        let populated = populate_partition(tools, image, partition)?;
        partitions.push(PartitionReport {
            number: partition.number(),
            start_byte: partition.start_byte,
            end_byte: partition.end_byte,
            filesystem: partition.filesystem.clone(),
            populated,
        });
    }

    File::open(image)
        .and_then(|file| file.sync_all())
        .map_err(|error| allocation(image, true, ToolError::io(format!("flushing {}", image.display()), error)))?;

    info!(image = %image.display(), "image complete");
    Ok(BuildReport {
        image: image.to_path_buf(),
        table_type: plan.table_type,
        total_size: plan.total_size,
        partitions,
    })
}

fn populate_partition(
    tools: &dyn ToolAdapter,
    image: &Path,
    partition: &ResolvedPartition,
) -> Result<Option<ContentSource>, BuildError> {
    let number = partition.number();
    info!(partition = number, filesystem = %partition.filesystem, "formatting");
    tools
        .format_partition(image, number, &partition.filesystem)
        .map_err(|source| population(image, number, PopulationStage::Format, source))?;

    if partition.content.is_none() {
        return Ok(None);
    }
    if !partition.filesystem.is_mountable() {
        warn!(
            partition = number,
            filesystem = %partition.filesystem,
            content = %partition.content,
            "partition cannot be mounted, content skipped"
        );
        return Ok(None);
    }

    let guard = MountGuard::mount(tools, image, number)
        .map_err(|source| population(image, number, PopulationStage::Mount, source))?;

    info!(partition = number, content = %partition.content, "populating");
    if let Err(source) = tools.populate(&partition.content, guard.mount_point()) {
        let cleanup = guard.release().err().into_iter().collect();
        return Err(BuildError::Population {
            image: image.to_path_buf(),
            partition: number,
            stage: PopulationStage::Copy,
            source,
            cleanup,
        });
    }

    guard
        .release()
        .map_err(|failure| population(image, number, PopulationStage::Unmount, failure.error))?;
    Ok(Some(partition.content.clone()))
}
