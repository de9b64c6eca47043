// SPDX-License-Identifier: GPL-3.0-only

//! FUSE passthrough exposure via `partfs`.
//!
//! `partfs -o dev=IMAGE DIR` presents every partition of `IMAGE` as a
//! regular file `DIR/p<N>`, which `mount` then loop-mounts. This works
//! without loop device access.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::cmd::Runner;
use crate::error::{Result, ToolError};

const FUSE_DEVICE: &str = "/dev/fuse";

pub fn available() -> bool {
    which::which("partfs").is_ok() && Path::new(FUSE_DEVICE).exists()
}

/// Fresh, unique passthrough directory under `root`
pub fn passthrough_dir(root: &Path) -> PathBuf {
    root.join(format!("_tmp_partfs{}", Uuid::new_v4().simple()))
}

pub fn attach(runner: &Runner, root: &Path, image: &Path) -> Result<PathBuf> {
    let dir = passthrough_dir(root);
    fs::create_dir_all(&dir)
        .map_err(|error| ToolError::io(format!("creating {}", dir.display()), error))?;

    let args = vec![
        "-o".to_string(),
        format!("dev={}", image.display()),
        dir.display().to_string(),
    ];
    if let Err(error) = runner.run("partfs", &args) {
        let _ = fs::remove_dir(&dir);
        return Err(error);
    }
    debug!(dir = %dir.display(), image = %image.display(), "partfs attached");
    Ok(dir)
}

pub fn partition_node(dir: &Path, number: u32) -> Result<PathBuf> {
    let node = dir.join(format!("p{number}"));
    if node.exists() {
        Ok(node)
    } else {
        Err(ToolError::Unavailable(format!(
            "partfs does not expose {}",
            node.display()
        )))
    }
}

pub fn detach(runner: &Runner, dir: &Path) -> Result<()> {
    if crate::mounts::is_mounted(dir) {
        runner.run_to_completion("fusermount", &["-u".to_string(), dir.display().to_string()])?;
    }
    if dir.exists() {
        fs::remove_dir(dir)
            .map_err(|error| ToolError::io(format!("removing {}", dir.display()), error))?;
    }
    debug!(dir = %dir.display(), "partfs detached");
    Ok(())
}
