//! Shutdown coordination for the generator and the mount loop
//!
//! One [`ShutdownSignal`] stops the generator thread; another is wired to
//! SIGINT/SIGTERM/SIGHUP by the binary and ends the mount loop.
//!
//! ```text
//!  SIGINT / SIGTERM / SIGHUP ──▶ trigger_from_handler()  (atomics only)
//!  ChainHandle::shutdown()   ──▶ trigger()               (atomics + condvar)
//!                                     │
//!                                     ▼
//!                     wait_timeout(interval) returns true
//! ```
//!
//! A signal handler may only touch atomics, so waiters also re-check the flag
//! every [`POLL_SLICE`] instead of relying solely on the condvar wakeup.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

/// Longest a waiter sleeps before re-checking the flag
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/// One-shot shutdown flag with an interruptible wait
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    signaled: AtomicBool,
    /// Signal number that triggered shutdown (0 if programmatic or none)
    signal_num: AtomicI32,
    lock: Mutex<()>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Signal number that triggered shutdown (0 if none)
    pub fn signal_number(&self) -> i32 {
        self.signal_num.load(Ordering::Acquire)
    }

    /// Request shutdown and wake every waiter
    pub fn trigger(&self, signal_num: i32) {
        self.trigger_from_handler(signal_num);
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.wake.notify_all();
    }

    /// Async-signal-safe variant of [`trigger`](Self::trigger)
    ///
    /// Waiters notice within [`POLL_SLICE`].
    pub fn trigger_from_handler(&self, signal_num: i32) {
        self.signal_num.store(signal_num, Ordering::Release);
        self.signaled.store(true, Ordering::Release);
    }

    /// Sleep for up to `timeout`, returning early once shutdown is requested
    ///
    /// Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.is_signaled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(POLL_SLICE);
            guard = match self.wake.wait_timeout(guard, slice) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Human-readable name of the triggering signal
    pub fn signal_name(&self) -> &'static str {
        match self.signal_num.load(Ordering::Acquire) {
            SIGINT => "SIGINT",
            SIGTERM => "SIGTERM",
            SIGHUP => "SIGHUP",
            0 => "none",
            _ => "unknown",
        }
    }
}

/// Route SIGINT, SIGTERM and (on Unix) SIGHUP to `shutdown`
pub fn install_signal_handlers(shutdown: Arc<ShutdownSignal>) -> std::io::Result<()> {
    for signal in [SIGINT, SIGTERM] {
        let target = Arc::clone(&shutdown);
        // SAFETY: the handler only stores to atomics.
        unsafe {
            signal_hook::low_level::register(signal, move || {
                target.trigger_from_handler(signal);
            })?;
        }
    }

    #[cfg(unix)]
    {
        let target = shutdown;
        // SAFETY: as above.
        unsafe {
            signal_hook::low_level::register(SIGHUP, move || {
                target.trigger_from_handler(SIGHUP);
            })?;
        }
    }

    Ok(())
}
