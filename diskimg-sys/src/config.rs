// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use diskimg_types::MechanismPreference;
use serde::{Deserialize, Serialize};

/// Tunables for [`crate::HostTools`], read from the `[tools]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub command_timeout_secs: u64,
    pub unmount_retries: u32,
    pub unmount_retry_delay_ms: u64,
    /// Partitions are mounted at `<mount_root>/p<N>`
    pub mount_root: PathBuf,
    /// Where FUSE passthrough directories are created
    pub partfs_root: PathBuf,
    pub mechanism: MechanismPreference,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 300,
            unmount_retries: 5,
            unmount_retry_delay_ms: 500,
            mount_root: PathBuf::from("/mnt"),
            partfs_root: std::env::temp_dir(),
            mechanism: MechanismPreference::Auto,
        }
    }
}

impl ToolsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn unmount_retry_delay(&self) -> Duration {
        Duration::from_millis(self.unmount_retry_delay_ms)
    }

    pub fn mount_point(&self, partition: u32) -> PathBuf {
        self.mount_root.join(format!("p{partition}"))
    }
}
