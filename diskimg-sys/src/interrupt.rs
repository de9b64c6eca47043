// SPDX-License-Identifier: GPL-3.0-only

//! Interrupt bookkeeping for long-running tool invocations.
//!
//! The handler only records which signal arrived. Callers poll [`pending`]
//! between steps and unwind through their normal cleanup paths, so mounts
//! are released even when the operator hits Ctrl-C.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::libc;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::{debug, warn};

static PENDING: AtomicI32 = AtomicI32::new(0);

const HANDLED: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

extern "C" fn record(signal: libc::c_int) {
    PENDING.store(signal, Ordering::SeqCst);
}

fn decode(raw: i32) -> Option<Signal> {
    if raw == 0 {
        return None;
    }
    Signal::try_from(raw).ok()
}

/// Signal received since the guard was installed, if any
pub fn pending() -> Option<Signal> {
    decode(PENDING.load(Ordering::SeqCst))
}

pub fn clear() {
    PENDING.store(0, Ordering::SeqCst);
}

/// Routes SIGINT, SIGTERM and SIGHUP into [`pending`] while alive.
/// Dropping it restores whatever dispositions were installed before.
pub struct InterruptGuard {
    previous: Vec<(Signal, SigAction)>,
}

impl InterruptGuard {
    pub fn install() -> Result<Self, nix::Error> {
        let action = SigAction::new(
            SigHandler::Handler(record),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        let mut previous = Vec::with_capacity(HANDLED.len());
        for signal in HANDLED {
            // SAFETY: `record` only stores into an atomic, which is async-signal-safe.
            match unsafe { sigaction(signal, &action) } {
                Ok(old) => previous.push((signal, old)),
                Err(error) => {
                    restore(&previous);
                    return Err(error);
                }
            }
        }

        debug!("interrupt handlers installed");
        Ok(Self { previous })
    }
}

fn restore(previous: &[(Signal, SigAction)]) {
    for (signal, old) in previous {
        // SAFETY: reinstalls the disposition that was active before install().
        if let Err(error) = unsafe { sigaction(*signal, old) } {
            warn!(%signal, %error, "failed to restore signal disposition");
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        restore(&self.previous);
    }
}
