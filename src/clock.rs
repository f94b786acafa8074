use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single injectable source of "now", so caveat-expiry and free-tier
/// window tests don't depend on wall-clock sleeps.
///
/// The default implementation reads real wall time; tests substitute a
/// `TestClock` and drive it forward deterministically (in lockstep with
/// `tokio::time::advance` where a sweeper is also under test).
pub trait Clock: Send + Sync {
    /// Unix seconds.
    fn now_secs(&self) -> u64;
    /// Unix milliseconds.
    fn now_millis(&self) -> u64 {
        self.now_secs() * 1000
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }

    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }
}

/// A clock that can be advanced by hand; used in tests that exercise
/// `expires_at` caveats or free-tier window expiry without real sleeps.
#[derive(Debug)]
pub struct TestClock {
    millis: AtomicU64,
}

impl TestClock {
    pub fn new(start_secs: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_secs * 1000),
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    pub fn set_secs(&self, secs: u64) {
        self.millis.store(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_secs(&self) -> u64 {
        self.millis.load(Ordering::SeqCst) / 1000
    }

    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
