// SPDX-License-Identifier: GPL-3.0-only

//! Scoped mounting of image partitions.
//!
//! Partitions are mounted in ascending order and released in reverse order
//! no matter how the scope is left: normal return, error, or panic.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::thread::sleep;
use std::time::Duration;

use diskimg_contracts::{SessionError, TeardownFailure, ToolAdapter};
use diskimg_sys::interrupt;
use diskimg_types::{MountMechanism, SessionState};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::guard::MountGuard;

/// Prefix of the variables that tell the command where each partition lives
pub const MOUNT_ENV_PREFIX: &str = "DISKIMG_P";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct MountSession<'a> {
    tools: &'a dyn ToolAdapter,
    image: PathBuf,
    requested: BTreeSet<u32>,
    mounts: Vec<MountGuard<'a>>,
    state: SessionState,
}

impl<'a> MountSession<'a> {
    pub fn new(tools: &'a dyn ToolAdapter, image: &Path, requested: &BTreeSet<u32>) -> Self {
        Self {
            tools,
            image: image.to_path_buf(),
            requested: requested.clone(),
            mounts: Vec::with_capacity(requested.len()),
            state: SessionState::Unmounted,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mechanism(&self) -> Option<MountMechanism> {
        self.tools.mechanism().ok()
    }

    pub fn mount_points(&self) -> BTreeMap<u32, PathBuf> {
        self.mounts
            .iter()
            .map(|guard| (guard.partition(), guard.mount_point().to_path_buf()))
            .collect()
    }

    fn transition(&mut self, state: SessionState) {
        debug!(image = %self.image.display(), from = %self.state, to = %state, "session state");
        self.state = state;
    }

    /// Mount every requested partition or none of them.
    pub fn mount_all(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Mounting);

        let requested: Vec<u32> = self.requested.iter().copied().collect();
        for (position, &partition) in requested.iter().enumerate() {
            match MountGuard::mount(self.tools, &self.image, partition) {
                Ok(guard) => {
                    info!(partition, mount_point = %guard.mount_point().display(), "mounted");
                    self.mounts.push(guard);
                }
                Err(error) => {
                    warn!(partition, %error, "mount failed, releasing earlier mounts");
                    let released = self.mounts.iter().map(MountGuard::partition).collect();
                    let cleanup = self.teardown();
                    self.transition(SessionState::Failed);
                    return Err(SessionError::PartialMount {
                        image: self.image.clone(),
                        released,
                        failed: partition,
                        error,
                        not_attempted: requested[position + 1..].to_vec(),
                        cleanup,
                    });
                }
            }
        }

        self.transition(SessionState::Mounted);
        Ok(())
    }

    /// Release every mount in reverse order, attempting all of them even
    /// after a failure.
    pub fn teardown(&mut self) -> Vec<TeardownFailure> {
        if self.mounts.is_empty() {
            return Vec::new();
        }
        self.transition(SessionState::Unmounting);

        let mut failures = Vec::new();
        while let Some(guard) = self.mounts.pop() {
            let partition = guard.partition();
            match guard.release() {
                Ok(()) => info!(partition, "unmounted"),
                Err(failure) => failures.push(failure),
            }
        }

        let state = if failures.is_empty() {
            SessionState::Unmounted
        } else {
            SessionState::Failed
        };
        self.transition(state);
        failures
    }
}

impl Drop for MountSession<'_> {
    fn drop(&mut self) {
        for failure in self.teardown() {
            error!(%failure, "mount left behind");
        }
    }
}

/// What a finished session produced
#[derive(Debug)]
pub struct SessionOutcome<R> {
    pub image: PathBuf,
    pub result: R,
    /// Mounts that could not be released afterwards
    pub teardown: Vec<TeardownFailure>,
}

impl<R> SessionOutcome<R> {
    /// Separate the operation's result from any teardown failure
    pub fn split(self) -> (R, Option<SessionError>) {
        let error = (!self.teardown.is_empty()).then(|| SessionError::TeardownFailure {
            image: self.image,
            failures: self.teardown,
        });
        (self.result, error)
    }
}

/// Mount `requested` partitions of `image`, run `operation` with the
/// partition to mount point map, then unmount everything.
///
/// Teardown failures are reported next to the result and never replace it.
pub fn with_session<R>(
    tools: &dyn ToolAdapter,
    image: &Path,
    requested: &BTreeSet<u32>,
    operation: impl FnOnce(&BTreeMap<u32, PathBuf>) -> R,
) -> Result<SessionOutcome<R>, SessionError> {
    let mut session = MountSession::new(tools, image, requested);
    session.mount_all()?;
    if let Some(mechanism) = session.mechanism() {
        debug!(%mechanism, "partitions exposed");
    }

    let mounts = session.mount_points();
    let result = operation(&mounts);
    let teardown = session.teardown();

    Ok(SessionOutcome {
        image: image.to_path_buf(),
        result,
        teardown,
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Run `argv` with inherited stdio in `cwd` and return its exit code.
///
/// Each mount is exported as `DISKIMG_P<N>`. SIGTERM and SIGHUP received
/// while the command runs are passed on to it; SIGINT already reaches it
/// through the terminal's process group. A signal that arrived before the
/// command started fails with [`io::ErrorKind::Interrupted`] instead.
pub fn run_command(argv: &[String], cwd: &Path, mounts: &BTreeMap<u32, PathBuf>) -> io::Result<i32> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no command given"))?;

    if let Some(signal) = interrupt::pending() {
        interrupt::clear();
        return Err(io::Error::new(
            io::ErrorKind::Interrupted,
            format!("{signal} received before the command started"),
        ));
    }

    let mut command = Command::new(program);
    command.args(args).current_dir(cwd);
    for (partition, mount_point) in mounts {
        command.env(format!("{MOUNT_ENV_PREFIX}{partition}"), mount_point);
    }

    info!(command = %argv.join(" "), cwd = %cwd.display(), "running command");
    let mut child = command.spawn()?;
    let pid = i32::try_from(child.id())
        .map(Pid::from_raw)
        .map_err(|error| io::Error::other(error.to_string()))?;

    loop {
        if let Some(status) = child.try_wait()? {
            let code = exit_code(status);
            debug!(code, "command finished");
            return Ok(code);
        }

        if let Some(signal) = interrupt::pending() {
            interrupt::clear();
            if signal != Signal::SIGINT {
                debug!(%signal, "forwarding signal to command");
                if let Err(error) = kill(pid, signal) {
                    warn!(%signal, %error, "could not forward signal");
                }
            }
        }

        sleep(POLL_INTERVAL);
    }
}
