// SPDX-License-Identifier: GPL-3.0-only

//! Loop device exposure via `losetup --partscan`.

use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use nix::unistd::Uid;
use tracing::{debug, warn};

use crate::cmd::Runner;
use crate::error::{Result, ToolError};

const LOOP_CONTROL: &str = "/dev/loop-control";
const NODE_ATTEMPTS: usize = 10;
const NODE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Loop devices need root, `losetup` and the loop control node.
pub fn available() -> bool {
    Uid::effective().is_root()
        && which::which("losetup").is_ok()
        && Path::new(LOOP_CONTROL).exists()
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Attach `image` to the next free loop device and scan its partitions.
pub fn attach(runner: &Runner, image: &Path) -> Result<PathBuf> {
    let image = image.display().to_string();
    let outcome = runner.run("losetup", &args(&["--find", "--show", "--partscan", &image]))?;
    let device = outcome.stdout.trim().to_string();
    if device.is_empty() {
        return Err(ToolError::Failed {
            tool: "losetup".to_string(),
            command: outcome.command,
            status: "exit status: 0".to_string(),
            stderr: "no loop device reported".to_string(),
        });
    }

    rescan(runner, &device);
    debug!(%device, %image, "attached loop device");
    Ok(PathBuf::from(device))
}

fn rescan(runner: &Runner, device: &str) {
    let _ = runner.run("partprobe", &args(&[device]));
    let _ = runner.run("partx", &args(&["-u", device]));
}

/// `/dev/loopNpM` for partition `number`, created from lsblk's MAJ:MIN
/// when udev has not produced the node yet (common inside containers).
pub fn partition_node(runner: &Runner, device: &Path, number: u32) -> Result<PathBuf> {
    let device = device.display().to_string();
    let node = format!("{device}p{number}");
    if Path::new(&node).exists() {
        return Ok(PathBuf::from(node));
    }

    for _ in 0..NODE_ATTEMPTS {
        rescan(runner, &device);

        if let Ok(outcome) = runner.run("lsblk", &args(&["-lnpo", "NAME,MAJ:MIN", &device])) {
            for line in outcome.stdout.lines() {
                let mut parts = line.split_whitespace();
                if parts.next() != Some(node.as_str()) {
                    continue;
                }
                if Path::new(&node).exists() {
                    return Ok(PathBuf::from(node));
                }
                if let Some((major, minor)) = parts.next().and_then(parse_major_minor) {
                    runner.run(
                        "mknod",
                        &args(&["-m", "660", &node, "b", &major.to_string(), &minor.to_string()]),
                    )?;
                    return Ok(PathBuf::from(node));
                }
            }
        }

        if Path::new(&node).exists() {
            return Ok(PathBuf::from(node));
        }
        sleep(NODE_RETRY_DELAY);
    }

    Err(ToolError::Unavailable(format!(
        "partition device {node} did not appear"
    )))
}

fn parse_major_minor(value: &str) -> Option<(u32, u32)> {
    let (major, minor) = value.split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn is_attached(runner: &Runner, device: &str) -> bool {
    runner.run_to_completion("losetup", &args(&[device])).is_ok()
}

pub fn detach(runner: &Runner, device: &Path) -> Result<()> {
    let device = device.display().to_string();
    if !is_attached(runner, &device) {
        warn!(%device, "loop device already detached");
        return Ok(());
    }
    runner.run_to_completion("losetup", &args(&["-d", &device]))?;
    debug!(%device, "detached loop device");
    Ok(())
}
