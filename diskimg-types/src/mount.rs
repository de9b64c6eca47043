// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

/// How image partitions are exposed before their filesystems are mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMechanism {
    /// `losetup --partscan`, needs root
    LoopDevice,
    /// `partfs` FUSE passthrough, needs `/dev/fuse`
    FusePassthrough,
}

impl fmt::Display for MountMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountMechanism::LoopDevice => f.write_str("loop device"),
            MountMechanism::FusePassthrough => f.write_str("fuse passthrough"),
        }
    }
}

/// Which mechanism the operator asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MechanismPreference {
    /// Loop devices when available, FUSE otherwise
    #[default]
    Auto,
    Loop,
    Fuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unmounted => "unmounted",
            SessionState::Mounting => "mounting",
            SessionState::Mounted => "mounted",
            SessionState::Unmounting => "unmounting",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
