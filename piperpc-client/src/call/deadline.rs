//! Call deadlines.
//!
//! A [`Deadline`] wraps an optional absolute expiry time and exposes a
//! cancellation token that fires once, at expiry. [`Deadline::is_expired`]
//! is only ever set by the timer, so a cancellation coming from anywhere
//! else can never be mistaken for a timeout.
//!
//! The timer task is spawned on the current Tokio runtime. A deadline built
//! outside a runtime arms its timer the first time it is awaited or the
//! call using it starts.

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// An optional absolute point in time after which local waits are aborted.
#[derive(Debug)]
pub struct Deadline {
    at: Option<SystemTime>,
    expired: Arc<AtomicBool>,
    token: CancellationToken,
    timer: OnceLock<JoinHandle<()>>,
}

impl Deadline {
    /// Create a deadline firing at `at`, or one that never fires if `None`.
    ///
    /// A deadline in the past is expired immediately.
    pub fn new(at: Option<SystemTime>) -> Self {
        let deadline = Self {
            at,
            expired: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
            timer: OnceLock::new(),
        };
        if at.is_some_and(|at| at <= SystemTime::now()) {
            expire(&deadline.expired, &deadline.token);
        } else {
            deadline.arm();
        }
        deadline
    }

    /// Start the expiry timer if it is not running yet.
    ///
    /// No-op for unset or expired deadlines, and outside a Tokio runtime.
    pub(crate) fn arm(&self) {
        let Some(at) = self.at else {
            return;
        };
        if self.is_expired() || self.timer.get().is_some() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        self.timer.get_or_init(|| {
            let remaining = at
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO);
            let fire_at = tokio::time::Instant::now() + remaining;
            let expired = self.expired.clone();
            let token = self.token.clone();
            handle.spawn(async move {
                tokio::time::sleep_until(fire_at).await;
                expire(&expired, &token);
            })
        });
    }

    /// A deadline that never fires.
    pub fn unset() -> Self {
        Self::new(None)
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self::new(Some(SystemTime::now() + timeout))
    }

    /// The absolute expiry time, if set.
    pub fn at(&self) -> Option<SystemTime> {
        self.at
    }

    /// Whether an expiry time was set.
    pub fn is_set(&self) -> bool {
        self.at.is_some()
    }

    /// Whether the deadline has fired.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    /// Token cancelled when the deadline fires.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait until the deadline fires. Never completes for an unset deadline.
    pub async fn cancelled(&self) {
        self.arm();
        self.token.cancelled().await
    }
}

fn expire(expired: &AtomicBool, token: &CancellationToken) {
    // flag before token so observers woken by the token see it set
    expired.store(true, Ordering::Release);
    token.cancel();
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_at_expiry() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert!(deadline.is_set());
        assert!(!deadline.is_expired());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!deadline.is_expired());
        assert!(!deadline.token().is_cancelled());

        deadline.cancelled().await;
        assert!(deadline.is_expired());
        assert!(deadline.token().is_cancelled());
    }

    #[test]
    fn test_past_deadline_is_expired_without_runtime() {
        let deadline = Deadline::new(Some(SystemTime::now() - Duration::from_secs(1)));
        assert!(deadline.is_expired());
        assert!(deadline.token().is_cancelled());
    }

    #[test]
    fn test_future_deadline_outside_runtime_arms_when_awaited() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            deadline.cancelled().await;
        });
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_deadline_never_fires() {
        let deadline = Deadline::unset();
        assert!(!deadline.is_set());

        let fired = tokio::time::timeout(Duration::from_secs(3600), deadline.cancelled()).await;
        assert!(fired.is_err());
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_cancel_is_not_expiry() {
        let deadline = Deadline::after(Duration::from_secs(60));
        deadline.token().cancel();

        assert!(deadline.token().is_cancelled());
        assert!(!deadline.is_expired());
    }
}
