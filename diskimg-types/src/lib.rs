// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for diskimg
//!
//! These types are shared across the stack:
//!
//! - **diskimg**: parses `PartitionSpec`s, plans a `LayoutPlan` and drives builds and sessions
//! - **diskimg-contracts**: the tool adapter contract is expressed in these types
//! - **diskimg-sys**: turns a `LayoutPlan` into `parted`, `mkfs` and mount invocations

pub mod layout;
pub mod mount;
pub mod partition;
pub mod size;

pub use layout::{LayoutPlan, ResolvedPartition};
pub use mount::{MechanismPreference, MountMechanism, SessionState};
pub use partition::{ContentSource, EndPosition, FilesystemType, PartitionSpec, SpecForm, TableType};
pub use size::{ALIGNMENT_BYTES, ByteSize, GIB, KIB, MIB, SECTOR_SIZE, SizeParseError, TIB, unit_multiplier};
