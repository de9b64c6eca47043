// SPDX-License-Identifier: GPL-3.0-only

pub use diskimg_contracts::ToolError;

/// Result type alias for host tool operations
pub type Result<T> = std::result::Result<T, ToolError>;
