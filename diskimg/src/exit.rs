// SPDX-License-Identifier: GPL-3.0-only

use diskimg_contracts::{BuildError, ErrorKind, LayoutConflict, MalformedSpec, SessionError, ToolError};

/// Exit code for errors that carry no typed kind, such as configuration or I/O
pub const GENERIC_FAILURE: i32 = 1;

pub fn kind_of(error: &anyhow::Error) -> Option<ErrorKind> {
    if error.downcast_ref::<MalformedSpec>().is_some() {
        Some(ErrorKind::MalformedSpec)
    } else if error.downcast_ref::<LayoutConflict>().is_some() {
        Some(ErrorKind::LayoutConflict)
    } else if let Some(error) = error.downcast_ref::<BuildError>() {
        Some(error.kind())
    } else if let Some(error) = error.downcast_ref::<SessionError>() {
        Some(error.kind())
    } else if error.downcast_ref::<ToolError>().is_some() {
        Some(ErrorKind::Tool)
    } else {
        None
    }
}

pub fn exit_code(error: &anyhow::Error) -> i32 {
    kind_of(error).map_or(GENERIC_FAILURE, ErrorKind::exit_code)
}
