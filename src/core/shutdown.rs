//! Cancellation signal for the modification wait: SIGTERM/SIGINT request an
//! early stop.
//!
//! Uses the `signal-hook` crate for safe signal registration. Waiting code
//! polls the flag between sleep slices rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Longest single sleep between cancellation checks.
const SLICE: Duration = Duration::from_millis(250);

/// Shared stop flag, cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a signal that only trips when `request()` is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal wired to SIGTERM and SIGINT.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        for (name, sig) in [("SIGTERM", SIGTERM), ("SIGINT", SIGINT)] {
            if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&signal.flag)) {
                eprintln!("[VAG-SIGNAL] failed to register {name}: {e}");
            }
        }
        signal
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Sleep for `duration`, waking early if a stop is requested.
    ///
    /// Returns `false` when the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ShutdownSignal;
    use std::time::{Duration, Instant};

    #[test]
    fn fresh_signal_is_not_requested() {
        assert!(!ShutdownSignal::new().is_requested());
    }

    #[test]
    fn request_is_visible_through_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        clone.request();
        assert!(signal.is_requested());
    }

    #[test]
    fn sleep_completes_when_not_requested() {
        let signal = ShutdownSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn sleep_returns_immediately_once_requested() {
        let signal = ShutdownSignal::new();
        signal.request();
        let start = Instant::now();
        assert!(!signal.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_wakes_when_requested_from_another_thread() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.request();
        });
        let start = Instant::now();
        assert!(!signal.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().expect("join");
    }
}
