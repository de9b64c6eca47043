// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used for exit codes and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedSpec,
    LayoutConflict,
    Tool,
    Allocation,
    Partitioning,
    Population,
    PartialMount,
    TeardownFailure,
}

impl ErrorKind {
    /// Process exit code. Session failures use 75..=76 so they never collide
    /// with the small codes commands usually exit with.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::MalformedSpec => 65,
            Self::LayoutConflict => 66,
            Self::Tool => 69,
            Self::Allocation => 70,
            Self::Partitioning => 71,
            Self::Population => 72,
            Self::PartialMount => 75,
            Self::TeardownFailure => 76,
        }
    }
}

/// A spec string that does not match either grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed partition spec '{input}': {reason} (offending token '{token}')")]
pub struct MalformedSpec {
    pub input: String,
    pub token: String,
    pub reason: String,
}

impl MalformedSpec {
    pub fn new(input: impl Into<String>, token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            token: token.into(),
            reason: reason.into(),
        }
    }
}

/// Specs that parse individually but cannot form one partition table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("layout conflict{}: {reason}", at_token(.token))]
pub struct LayoutConflict {
    pub token: Option<String>,
    pub reason: String,
}

fn at_token(token: &Option<String>) -> String {
    token
        .as_ref()
        .map(|token| format!(" at '{token}'"))
        .unwrap_or_default()
}

impl LayoutConflict {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            token: None,
            reason: reason.into(),
        }
    }

    pub fn at(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            reason: reason.into(),
        }
    }
}

/// Failure of an external tool or of the adapter around it
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found on PATH")]
    Missing { tool: String },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        tool: String,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {seconds}s")]
    Timeout {
        tool: String,
        command: String,
        seconds: u64,
    },

    #[error("`{command}` aborted by {signal}")]
    Interrupted {
        tool: String,
        command: String,
        signal: String,
    },

    #[error("filesystem type '{filesystem}' is not supported")]
    UnsupportedFilesystem { filesystem: String },

    #[error("no mount mechanism available: {0}")]
    Unavailable(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Name of the executable involved, when there is one
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::Missing { tool }
            | Self::Failed { tool, .. }
            | Self::Timeout { tool, .. }
            | Self::Interrupted { tool, .. } => Some(tool),
            _ => None,
        }
    }

    /// `umount` and `fusermount` report a busy target on stderr
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Failed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("target is busy") || stderr.contains("device or resource busy")
            }
            _ => false,
        }
    }
}

/// One mount point that could not be released
#[derive(Debug, Error)]
#[error("{} ({}): {error}", .mount_point.display(), partition_label(.partition))]
pub struct TeardownFailure {
    pub partition: Option<u32>,
    pub mount_point: PathBuf,
    #[source]
    pub error: ToolError,
}

fn partition_label(partition: &Option<u32>) -> String {
    match partition {
        Some(number) => format!("partition {number}"),
        None => "image".to_string(),
    }
}

fn list_numbers(numbers: &[u32]) -> String {
    if numbers.is_empty() {
        return "none".to_string();
    }
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn list_failures(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn cleanup_suffix(label: &str, failures: &[TeardownFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!("; {label}: {}", list_failures(failures))
    }
}

fn incomplete_suffix(partial: &bool) -> &'static str {
    if *partial { ", image left incomplete" } else { "" }
}

/// Step of populating a partition that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationStage {
    Format,
    Mount,
    Copy,
    Unmount,
}

impl fmt::Display for PopulationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            PopulationStage::Format => "format",
            PopulationStage::Mount => "mount",
            PopulationStage::Copy => "copy",
            PopulationStage::Unmount => "unmount",
        };
        f.write_str(stage)
    }
}

/// Creation-path failures
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("allocating {} failed{}: {source}", .image.display(), incomplete_suffix(.partial))]
    Allocation {
        image: PathBuf,
        /// An image file exists on disk but is not usable
        partial: bool,
        #[source]
        source: ToolError,
    },

    #[error("partitioning {} failed, image left incomplete: {source}", .image.display())]
    Partitioning {
        image: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error(
        "populating partition {partition} of {} failed at {stage}, image left incomplete: {source}{}",
        .image.display(),
        cleanup_suffix("cleanup also failed", .cleanup)
    )]
    Population {
        image: PathBuf,
        partition: u32,
        stage: PopulationStage,
        #[source]
        source: ToolError,
        /// Mounts that could not be released while unwinding
        cleanup: Vec<TeardownFailure>,
    },
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Allocation { .. } => ErrorKind::Allocation,
            Self::Partitioning { .. } => ErrorKind::Partitioning,
            Self::Population { .. } => ErrorKind::Population,
        }
    }

    /// Image file left on disk in an incomplete state, if any
    pub fn partial_image(&self) -> Option<&Path> {
        match self {
            Self::Allocation { image, partial, .. } => partial.then_some(image.as_path()),
            Self::Partitioning { image, .. } | Self::Population { image, .. } => Some(image),
        }
    }
}

/// Mount-path failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "mounting partition {failed} of {} failed: {error}; mounted and released: {}; not attempted: {}{}",
        .image.display(),
        list_numbers(.released),
        list_numbers(.not_attempted),
        cleanup_suffix("release failed", .cleanup)
    )]
    PartialMount {
        image: PathBuf,
        /// Partitions that were mounted and then released again
        released: Vec<u32>,
        failed: u32,
        #[source]
        error: ToolError,
        not_attempted: Vec<u32>,
        cleanup: Vec<TeardownFailure>,
    },

    #[error("releasing mounts of {} failed: {}", .image.display(), list_failures(.failures))]
    TeardownFailure {
        image: PathBuf,
        failures: Vec<TeardownFailure>,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PartialMount { .. } => ErrorKind::PartialMount,
            Self::TeardownFailure { .. } => ErrorKind::TeardownFailure,
        }
    }
}
