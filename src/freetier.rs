//! Free-tier accountant (component D): a per-client windowed counter with
//! a background sweeper that reclaims stale entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy)]
struct FreeTierEntry {
    count: u32,
    window_start_ms: u64,
}

/// Parses `"<n>ms|s|m|h|d"` or a raw millisecond integer. Defaults to one
/// hour, including on anything that fails to parse — this accountant is
/// never allowed to reject a request because of a configuration typo.
pub fn parse_window(raw: &str) -> Duration {
    const DEFAULT: Duration = Duration::from_secs(3600);
    let raw = raw.trim();

    if let Ok(ms) = raw.parse::<u64>() {
        return Duration::from_millis(ms);
    }

    let (digits, unit) = raw.split_at(
        raw.find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len()),
    );
    let n: u64 = match digits.parse() {
        Ok(n) => n,
        Err(_) => return DEFAULT,
    };

    match unit {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        "d" => Duration::from_secs(n * 86400),
        _ => DEFAULT,
    }
}

/// Per-route free-tier counter. Cheap to clone: the map and sweeper
/// handle live behind an `Arc`.
#[derive(Clone)]
pub struct Accountant {
    inner: Arc<Inner>,
}

struct Inner {
    free_requests: u32,
    window_ms: u64,
    entries: Mutex<HashMap<String, FreeTierEntry>>,
    clock: Arc<dyn Clock>,
}

impl Accountant {
    pub fn new(free_requests: u32, free_window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                free_requests,
                window_ms: free_window.as_millis() as u64,
                entries: Mutex::new(HashMap::new()),
                clock,
            }),
        }
    }

    /// Admits `client_id` if the free-tier quota is not yet exhausted for
    /// its current window, resetting the window if it has expired.
    pub async fn admit(&self, client_id: &str) -> bool {
        if self.inner.free_requests == 0 {
            return false;
        }

        let now_ms = self.inner.clock.now_millis();
        let mut entries = self.inner.entries.lock().await;

        let entry = entries
            .entry(client_id.to_string())
            .or_insert(FreeTierEntry {
                count: 0,
                window_start_ms: now_ms,
            });

        if now_ms.saturating_sub(entry.window_start_ms) > self.inner.window_ms {
            entry.count = 0;
            entry.window_start_ms = now_ms;
        }

        if entry.count < self.inner.free_requests {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Spawns a detachable sweeper that evicts entries whose window ended
    /// more than `2 * window_ms` ago. Cancellable via the returned token;
    /// the join handle is tracked so shutdown can await it, but the
    /// sweeper itself never blocks process exit — it only wakes on its
    /// own cadence and the cancellation signal.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let period = Duration::from_millis(inner.window_ms.max(1));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("free-tier sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {
                        let now_ms = inner.clock.now_millis();
                        let mut entries = inner.entries.lock().await;
                        entries.retain(|_, e| now_ms.saturating_sub(e.window_start_ms) <= 2 * inner.window_ms);
                    }
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) async fn entry_count(&self) -> usize {
        self.inner.entries.lock().await.len()
    }
}
