// SPDX-License-Identifier: GPL-3.0-only

//! [`ToolAdapter`] backed by the host's disk utilities.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread::sleep;

use diskimg_contracts::ToolAdapter;
use diskimg_types::{
    ContentSource, FilesystemType, MechanismPreference, MountMechanism, ResolvedPartition,
    TableType,
};
use tracing::{debug, info, warn};

use crate::cmd::Runner;
use crate::config::ToolsConfig;
use crate::error::{Result, ToolError};
use crate::{loopdev, mkfs, mounts, parted, partfs, populate};

/// Block device (loop) or passthrough directory (FUSE) exposing an image's partitions
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exposure {
    Loop(PathBuf),
    Fuse(PathBuf),
}

#[derive(Debug)]
struct ExposureEntry {
    exposure: Exposure,
    users: usize,
}

#[derive(Debug, Clone)]
struct MountRecord {
    image: PathBuf,
    partition: u32,
}

#[derive(Debug, Default)]
struct Registry {
    exposures: HashMap<PathBuf, ExposureEntry>,
    mounts: BTreeMap<PathBuf, MountRecord>,
}

pub struct HostTools {
    config: ToolsConfig,
    runner: Runner,
    mechanism: OnceLock<std::result::Result<MountMechanism, String>>,
    registry: Mutex<Registry>,
}

fn image_key(image: &Path) -> PathBuf {
    image.canonicalize().unwrap_or_else(|_| image.to_path_buf())
}

fn resolve_mechanism(preference: MechanismPreference) -> std::result::Result<MountMechanism, String> {
    let loop_ok = loopdev::available();
    let fuse_ok = partfs::available();
    debug!(?preference, loop_ok, fuse_ok, "probing mount mechanisms");
    match preference {
        MechanismPreference::Loop if loop_ok => Ok(MountMechanism::LoopDevice),
        MechanismPreference::Loop => {
            Err("loop devices need root, losetup and /dev/loop-control".to_string())
        }
        MechanismPreference::Fuse if fuse_ok => Ok(MountMechanism::FusePassthrough),
        MechanismPreference::Fuse => Err("partfs needs the partfs binary and /dev/fuse".to_string()),
        MechanismPreference::Auto if loop_ok => Ok(MountMechanism::LoopDevice),
        MechanismPreference::Auto if fuse_ok => Ok(MountMechanism::FusePassthrough),
        MechanismPreference::Auto => Err(
            "neither loop devices (root, losetup, /dev/loop-control) nor partfs with /dev/fuse are usable"
                .to_string(),
        ),
    }
}

impl HostTools {
    pub fn new(config: ToolsConfig) -> Self {
        let runner = Runner::new(config.command_timeout());
        Self {
            config,
            runner,
            mechanism: OnceLock::new(),
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Expose the partitions of `image`, sharing an existing exposure if one is live
    fn acquire_exposure(&self, image: &Path) -> Result<Exposure> {
        let mechanism = self.mechanism()?;
        let key = image_key(image);
        let mut registry = self.registry();
        if let Some(entry) = registry.exposures.get_mut(&key) {
            entry.users += 1;
            return Ok(entry.exposure.clone());
        }

        let exposure = match mechanism {
            MountMechanism::LoopDevice => Exposure::Loop(loopdev::attach(&self.runner, &key)?),
            MountMechanism::FusePassthrough => {
                Exposure::Fuse(partfs::attach(&self.runner, &self.config.partfs_root, &key)?)
            }
        };
        info!(image = %key.display(), ?exposure, "image exposed");
        registry.exposures.insert(
            key,
            ExposureEntry {
                exposure: exposure.clone(),
                users: 1,
            },
        );
        Ok(exposure)
    }

    fn release_exposure(&self, image: &Path) -> Result<()> {
        let key = image_key(image);
        let mut registry = self.registry();
        let Some(entry) = registry.exposures.get_mut(&key) else {
            return Ok(());
        };
        entry.users = entry.users.saturating_sub(1);
        if entry.users > 0 {
            return Ok(());
        }

        let exposure = entry.exposure.clone();
        let detached = match &exposure {
            Exposure::Loop(device) => loopdev::detach(&self.runner, device),
            Exposure::Fuse(dir) => partfs::detach(&self.runner, dir),
        };
        // A failed detach keeps the entry so a later release can retry it.
        if detached.is_ok() {
            registry.exposures.remove(&key);
            info!(image = %key.display(), "image released");
        }
        detached
    }

    fn partition_node(&self, exposure: &Exposure, partition: u32) -> Result<PathBuf> {
        match exposure {
            Exposure::Loop(device) => loopdev::partition_node(&self.runner, device, partition),
            Exposure::Fuse(dir) => partfs::partition_node(dir, partition),
        }
    }

    fn umount_with_retries(&self, mount_point: &Path) -> Result<()> {
        let args = vec![mount_point.display().to_string()];
        let retries = self.config.unmount_retries;
        let mut attempt = 0;
        loop {
            match self.runner.run_to_completion("umount", &args) {
                Ok(_) => return Ok(()),
                Err(error) if error.is_busy() && attempt < retries => {
                    attempt += 1;
                    warn!(
                        mount_point = %mount_point.display(),
                        attempt,
                        retries,
                        "mount point busy, retrying"
                    );
                    sleep(self.config.unmount_retry_delay());
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl ToolAdapter for HostTools {
    fn create_image(&self, path: &Path, size_bytes: u64) -> Result<()> {
        let args = vec![
            "if=/dev/null".to_string(),
            format!("of={}", path.display()),
            "bs=1".to_string(),
            "count=0".to_string(),
            format!("seek={size_bytes}"),
        ];
        let outcome = self.runner.run("dd", &args)?;

        let actual = fs::metadata(path)
            .map_err(|error| ToolError::io(format!("reading {}", path.display()), error))?
            .len();
        if actual != size_bytes {
            return Err(ToolError::Failed {
                tool: "dd".to_string(),
                command: outcome.command,
                status: "exit status: 0".to_string(),
                stderr: format!("image is {actual} bytes, expected {size_bytes}"),
            });
        }
        debug!(image = %path.display(), size_bytes, "image allocated");
        Ok(())
    }

    fn write_partition_table(
        &self,
        path: &Path,
        table_type: TableType,
        partitions: &[ResolvedPartition],
    ) -> Result<()> {
        let args = parted::arguments(path, table_type, partitions);
        let outcome = self.runner.run("parted", &args)?;
        debug!(table = %outcome.stdout.trim(), "partition table written");
        Ok(())
    }

    fn format_partition(&self, path: &Path, partition: u32, filesystem: &FilesystemType) -> Result<()> {
        if filesystem.is_none() {
            return Ok(());
        }
        let tool = mkfs::lookup(filesystem).ok_or_else(|| ToolError::UnsupportedFilesystem {
            filesystem: filesystem.to_string(),
        })?;

        let exposure = self.acquire_exposure(path)?;
        let formatted = self
            .partition_node(&exposure, partition)
            .and_then(|node| {
                let (program, args) = tool.command(&node);
                self.runner.run(&program, &args).map(|_| ())
            });
        let released = self.release_exposure(path);

        formatted?;
        released?;
        info!(image = %path.display(), partition, %filesystem, "partition formatted");
        Ok(())
    }

    fn mount(&self, path: &Path, partition: u32) -> Result<PathBuf> {
        let mount_point = self.config.mount_point(partition);
        if self.registry().mounts.contains_key(&mount_point) || mounts::is_mounted(&mount_point) {
            return Err(ToolError::Unavailable(format!(
                "{} is already a mount point",
                mount_point.display()
            )));
        }

        let exposure = self.acquire_exposure(path)?;
        let created = !mount_point.exists();
        let mounted = self.partition_node(&exposure, partition).and_then(|node| {
            fs::create_dir_all(&mount_point).map_err(|error| {
                ToolError::io(format!("creating {}", mount_point.display()), error)
            })?;
            self.runner.run(
                "mount",
                &[node.display().to_string(), mount_point.display().to_string()],
            )
        });

        if let Err(error) = mounted {
            if created {
                let _ = fs::remove_dir(&mount_point);
            }
            if let Err(release) = self.release_exposure(path) {
                warn!(image = %path.display(), %release, "failed to release image after mount error");
            }
            return Err(error);
        }

        self.registry().mounts.insert(
            mount_point.clone(),
            MountRecord {
                image: image_key(path),
                partition,
            },
        );
        info!(image = %path.display(), partition, mount_point = %mount_point.display(), "mounted");
        Ok(mount_point)
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let Some(record) = self.registry().mounts.get(mount_point).cloned() else {
            debug!(mount_point = %mount_point.display(), "not mounted by us, nothing to do");
            return Ok(());
        };

        if mounts::is_mounted(mount_point) {
            self.umount_with_retries(mount_point)?;
        }
        self.registry().mounts.remove(mount_point);
        if let Err(error) = fs::remove_dir(mount_point) {
            debug!(mount_point = %mount_point.display(), %error, "leaving mount point directory");
        }
        info!(
            mount_point = %mount_point.display(),
            partition = record.partition,
            "unmounted"
        );
        self.release_exposure(&record.image)
    }

    fn populate(&self, content: &ContentSource, mount_point: &Path) -> Result<()> {
        let Some((program, args)) = populate::command(content, mount_point) else {
            return Ok(());
        };
        self.runner.run(program, &args)?;
        info!(%content, mount_point = %mount_point.display(), "content copied");
        Ok(())
    }

    fn supports_filesystem(&self, filesystem: &FilesystemType) -> bool {
        if !mkfs::is_known(filesystem) {
            debug!(%filesystem, "no formatter in the catalog");
            return false;
        }
        filesystem.is_none() || mkfs::lookup(filesystem).is_some_and(|tool| tool.installed())
    }

    fn mechanism(&self) -> Result<MountMechanism> {
        self.mechanism
            .get_or_init(|| resolve_mechanism(self.config.mechanism))
            .clone()
            .map_err(ToolError::Unavailable)
    }

    fn active_mounts(&self) -> Vec<PathBuf> {
        self.registry().mounts.keys().cloned().collect()
    }
}

impl Drop for HostTools {
    fn drop(&mut self) {
        for mount_point in self.active_mounts().into_iter().rev() {
            warn!(mount_point = %mount_point.display(), "releasing leftover mount");
            if let Err(error) = self.unmount(&mount_point) {
                warn!(mount_point = %mount_point.display(), %error, "leftover mount not released");
            }
        }

        let leftovers: Vec<PathBuf> = self.registry().exposures.keys().cloned().collect();
        for image in leftovers {
            if let Some(entry) = self.registry().exposures.get_mut(&image) {
                entry.users = 1;
            }
            if let Err(error) = self.release_exposure(&image) {
                warn!(image = %image.display(), %error, "leftover exposure not released");
            }
        }
    }
}
