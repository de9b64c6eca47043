// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use diskimg_contracts::{TeardownFailure, ToolAdapter};
use tracing::{debug, error};

/// A mounted partition that is unmounted when the guard goes away.
///
/// [`MountGuard::release`] reports the unmount result; dropping an unreleased
/// guard unmounts too and only logs a failure.
pub struct MountGuard<'a> {
    tools: &'a dyn ToolAdapter,
    partition: u32,
    mount_point: PathBuf,
    released: bool,
}

impl<'a> MountGuard<'a> {
    /// Mount `partition` of `image` through `tools`
    pub fn mount(
        tools: &'a dyn ToolAdapter,
        image: &Path,
        partition: u32,
    ) -> Result<Self, diskimg_contracts::ToolError> {
        let mount_point = tools.mount(image, partition)?;
        Ok(Self {
            tools,
            partition,
            mount_point,
            released: false,
        })
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn release(mut self) -> Result<(), TeardownFailure> {
        self.released = true;
        self.unmount()
    }

    fn unmount(&self) -> Result<(), TeardownFailure> {
        debug!(partition = self.partition, mount_point = %self.mount_point.display(), "releasing mount");
        self.tools
            .unmount(&self.mount_point)
            .map_err(|error| TeardownFailure {
                partition: Some(self.partition),
                mount_point: self.mount_point.clone(),
                error,
            })
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(failure) = self.unmount() {
            error!(%failure, "mount left behind");
        }
    }
}
