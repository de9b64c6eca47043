// SPDX-License-Identifier: GPL-3.0-only

//! Build and mount partitioned raw disk images.
//!
//! `diskimgcreator` turns a set of partition specs into an image file:
//! [`spec`] parses them, [`layout`] resolves byte ranges and [`builder`]
//! drives the tool adapter. `diskimgmounter` uses [`session`] to mount
//! selected partitions for the duration of one command.

pub mod builder;
pub mod config;
pub mod exit;
pub mod guard;
pub mod layout;
pub mod logging;
pub mod session;
pub mod spec;

pub use builder::{BuildOptions, BuildReport, PartitionReport, build};
pub use config::{Config, ConfigError};
pub use guard::MountGuard;
pub use layout::{PlanOptions, plan};
pub use session::{MountSession, SessionOutcome, run_command, with_session};
pub use spec::{SpecEntry, parse_set, scan_directory};
