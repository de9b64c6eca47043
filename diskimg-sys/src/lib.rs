// SPDX-License-Identifier: GPL-3.0-only

//! Host implementation of the diskimg tool adapter
//!
//! Everything here shells out to the standard Linux disk utilities:
//! - `dd` allocates the sparse image
//! - `parted` writes the partition table
//! - `mkfs.*` and `mkswap` format partitions
//! - `losetup` or the `partfs` FUSE driver expose partitions as devices
//! - `mount`, `umount`, `cp` and `tar` handle mounting and population
//!
//! Loop devices need root. Without it the adapter falls back to `partfs`.

pub mod cmd;
pub mod config;
pub mod error;
pub mod host;
pub mod interrupt;
pub mod loopdev;
pub mod mkfs;
pub mod mounts;
pub mod parted;
pub mod partfs;
pub mod populate;

pub use cmd::{CommandOutcome, Runner};
pub use config::ToolsConfig;
pub use error::{Result, ToolError};
pub use host::HostTools;
pub use interrupt::InterruptGuard;
