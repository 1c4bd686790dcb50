//! Interruption Handling
//!
//! SIGINT, SIGTERM and SIGHUP delivered to the harness only set an atomic
//! flag; the handler is async-signal-safe. Every blocking phase polls a
//! [`CancelToken`] in short slices, so an interruption unwinds to the
//! cleanup step from whichever phase was active.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps
pub const CANCEL_POLL_SLICE: Duration = Duration::from_millis(50);

/// Set by the signal handler.
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);
/// Number of the last signal delivered, 0 if none.
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

#[cfg(unix)]
extern "C" fn termination_handler(sig: libc::c_int) {
    LAST_SIGNAL.store(sig, Ordering::Relaxed);
    SIGNAL_RECEIVED.store(true, Ordering::Relaxed);
}

#[cfg(unix)]
fn install_handlers() -> io::Result<()> {
    for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = termination_handler as *const () as usize;
            sa.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            if libc::sigaction(sig, &sa, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// No-op on non-Unix; only [`CancelToken::cancel`] stops a run there.
#[cfg(not(unix))]
fn install_handlers() -> io::Result<()> {
    Ok(())
}

/// Cancellation flag shared by the phases of one run
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    local: Arc<AtomicBool>,
    watch_signals: bool,
}

impl CancelToken {
    /// Token that is only cancelled through [`CancelToken::cancel`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install termination handlers and return a token that observes them
    pub fn with_signal_handlers() -> io::Result<Self> {
        install_handlers()?;
        Ok(Self {
            local: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        })
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.local.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested or a termination signal arrived
    pub fn is_cancelled(&self) -> bool {
        self.local.load(Ordering::Relaxed)
            || (self.watch_signals && SIGNAL_RECEIVED.load(Ordering::Relaxed))
    }

    /// Signal number that cancelled the run, if any
    pub fn signal(&self) -> Option<i32> {
        if !self.watch_signals {
            return None;
        }
        match LAST_SIGNAL.load(Ordering::Relaxed) {
            0 => None,
            sig => Some(sig),
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(CANCEL_POLL_SLICE));
        }
    }
}
