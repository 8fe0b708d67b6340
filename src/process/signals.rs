/*!
 * Signal Forwarding
 * Keeps the shell session alive from prepare to the end of destroy
 *
 * SIGTERM and SIGHUP are passed on to the child so it can exit and the
 * session can still destroy the sandbox. While no child runs they are
 * recorded instead and picked up by the launcher. SIGINT and SIGQUIT already
 * reach the child through the terminal's process group and are ignored here.
 */

use crate::core::errors::{VelenError, VelenResult};
use nix::sys::signal::{kill, raise, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, warn};

/// Child receiving forwarded signals; 0 when none
static CHILD: AtomicI32 = AtomicI32::new(0);

/// Last forwarded signal that arrived while no child was attached; 0 when none
static PENDING: AtomicI32 = AtomicI32::new(0);

pub const FORWARDED: [Signal; 2] = [Signal::SIGTERM, Signal::SIGHUP];
pub const IGNORED: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];

extern "C" fn forward(signo: nix::libc::c_int) {
    let child = CHILD.load(Ordering::SeqCst);
    if child <= 0 {
        PENDING.store(signo, Ordering::SeqCst);
        return;
    }
    if let Ok(signal) = Signal::try_from(signo) {
        // kill(2) is async-signal-safe
        let _ = kill(Pid::from_raw(child), signal);
    }
}

/// Installed dispositions, restored on drop
pub struct SignalForwarder {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalForwarder {
    pub fn install() -> VelenResult<Self> {
        let forwarding = SigAction::new(
            SigHandler::Handler(forward),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let ignoring = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());

        let mut forwarder = Self {
            previous: Vec::with_capacity(FORWARDED.len() + IGNORED.len()),
        };
        for (signal, action) in FORWARDED
            .iter()
            .map(|s| (*s, &forwarding))
            .chain(IGNORED.iter().map(|s| (*s, &ignoring)))
        {
            // SAFETY: the handler only reads an atomic and calls kill(2)
            let old = unsafe { sigaction(signal, action) }.map_err(|e| {
                VelenError::ExecFailure {
                    program: "shell".to_string(),
                    reason: format!("installing {} handler: {}", signal, e.desc()),
                    not_found: false,
                }
            })?;
            forwarder.previous.push((signal, old));
        }

        debug!("Signal forwarding installed");
        Ok(forwarder)
    }

    /// Start forwarding to `child`, passing on anything recorded before
    pub fn attach(child: Pid) {
        CHILD.store(child.as_raw(), Ordering::SeqCst);
        if let Some(signal) = Self::take_pending() {
            debug!(signal = %signal, child = child.as_raw(), "Forwarding recorded signal");
            let _ = kill(child, signal);
        }
    }

    /// Stop forwarding; later signals are recorded again
    pub fn detach() {
        CHILD.store(0, Ordering::SeqCst);
    }

    /// Signal received while no child was attached, clearing it
    pub fn take_pending() -> Option<Signal> {
        match PENDING.swap(0, Ordering::SeqCst) {
            0 => None,
            signo => Signal::try_from(signo).ok(),
        }
    }

    /// Default dispositions for a freshly forked child
    ///
    /// Ignored signals stay ignored across exec, so the child must reset them.
    /// A signal the parent sent before the reset is raised again.
    pub fn reset_for_child() {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for signal in FORWARDED.iter().chain(IGNORED.iter()) {
            // SAFETY: restoring the default disposition
            let _ = unsafe { sigaction(*signal, &default) };
        }
        if let Some(signal) = Self::take_pending() {
            let _ = raise(signal);
        }
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        CHILD.store(0, Ordering::SeqCst);
        PENDING.store(0, Ordering::SeqCst);
        for (signal, action) in self.previous.drain(..).rev() {
            // SAFETY: reinstating the disposition that was active before install
            if let Err(e) = unsafe { sigaction(signal, &action) } {
                warn!(signal = %signal, error = %e, "Failed to restore signal disposition");
            }
        }
    }
}
