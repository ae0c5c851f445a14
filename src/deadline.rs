//! Overall processing deadline.
//!
//! An MTA content filter that hangs stalls the mail queue, so every run is
//! bounded. Stages call [`Deadline::check`] between units of work; the binary
//! additionally arms a [`Watchdog`] for steps that cannot be interrupted.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::error::{FilterError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// Start the clock now; `None` never expires.
    pub fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::start(None)
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Fail with [`FilterError::Timeout`] once the limit has passed.
    pub fn check(&self, stage: &str) -> Result<()> {
        match self.limit {
            Some(limit) if self.started.elapsed() >= limit => {
                tracing::error!(stage, limit = ?limit, "Processing deadline exceeded");
                Err(FilterError::Timeout(limit))
            }
            _ => Ok(()),
        }
    }
}

/// Runs an expiry action on a background thread unless dropped first.
///
/// Dropping the guard disarms it. The binary drops it as soon as the
/// pipeline returns, so a message already handed to the transport is never
/// followed by a retry-inducing exit. The remaining window is the time
/// between the transport exiting and the guard being dropped.
#[derive(Debug)]
pub struct Watchdog {
    _disarm: mpsc::Sender<()>,
}

impl Watchdog {
    /// Call `on_expiry` after `limit` unless the watchdog is dropped before.
    pub fn arm<F>(limit: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(limit) {
                on_expiry();
            }
        });
        Self { _disarm: tx }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_unlimited_never_expires() {
        assert!(Deadline::unlimited().check("walk").is_ok());
    }

    #[test]
    fn test_expired_deadline_is_timeout() {
        let deadline = Deadline::start(Some(Duration::ZERO));
        let err = deadline.check("submit").unwrap_err();
        assert!(matches!(err, FilterError::Timeout(_)));
        assert_eq!(err.exit_code(), crate::error::EX_TEMPFAIL);
    }

    #[test]
    fn test_watchdog_fires_when_not_disarmed() {
        let (tx, rx) = mpsc::channel();
        let _watchdog = Watchdog::arm(Duration::from_millis(10), move || {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_dropped_watchdog_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let watchdog = Watchdog::arm(Duration::from_millis(200), move || {
            flag.store(true, Ordering::SeqCst);
        });
        drop(watchdog);
        std::thread::sleep(Duration::from_millis(400));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
