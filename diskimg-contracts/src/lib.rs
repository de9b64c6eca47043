// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod traits;

pub use error::{
    BuildError, ErrorKind, LayoutConflict, MalformedSpec, PopulationStage, SessionError,
    TeardownFailure, ToolError,
};
pub use traits::ToolAdapter;
