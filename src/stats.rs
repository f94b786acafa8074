//! Stats recorder (component G): in-memory counters, per-endpoint
//! aggregation, and a bounded recent-events ring buffer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const DEFAULT_RING_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStats {
    pub revenue: u64,
    pub requests: u64,
    pub paid: u64,
    pub free: u64,
}

impl Default for EndpointStats {
    fn default() -> Self {
        Self {
            revenue: 0,
            requests: 0,
            paid: 0,
            free: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub endpoint: String,
    pub amount_sats: u64,
    pub payer_id: String,
    pub payment_hash: String,
    pub timestamp: u64,
}

/// A fully-materialized, caller-owned copy of the recorder's state —
/// mutating this has no effect on the live recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStats {
    pub total_revenue: u64,
    pub total_requests: u64,
    pub total_paid: u64,
    pub unique_payers: u64,
    pub endpoints: HashMap<String, EndpointStats>,
    pub recent_payments: Vec<PaymentRecord>,
}

struct Inner {
    total_revenue: u64,
    total_requests: u64,
    total_paid: u64,
    payers: HashSet<String>,
    endpoints: HashMap<String, EndpointStats>,
    recent_payments: VecDeque<PaymentRecord>,
    ring_cap: usize,
}

impl Inner {
    fn new(ring_cap: usize) -> Self {
        Self {
            total_revenue: 0,
            total_requests: 0,
            total_paid: 0,
            payers: HashSet::new(),
            endpoints: HashMap::new(),
            recent_payments: VecDeque::new(),
            ring_cap,
        }
    }
}

/// Single-writer-per-request stats recorder. Cheap to clone (an `Arc`
/// around a mutex) so it can be shared across every route's gate.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAP)
    }
}

impl Recorder {
    pub fn new(ring_cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(ring_cap))),
        }
    }

    /// Records one completed admission. `now` is the unix-second timestamp
    /// to stamp the payment record with (callers pass this in rather than
    /// reading wall time here, keeping the recorder clock-agnostic).
    pub async fn record(
        &self,
        endpoint: &str,
        paid: bool,
        amount_sats: u64,
        payer_id: &str,
        payment_hash: Option<&str>,
        now: u64,
    ) {
        let mut inner = self.inner.lock().await;

        inner.total_requests += 1;
        let ep = inner.endpoints.entry(endpoint.to_string()).or_default();
        ep.requests += 1;

        if paid && amount_sats > 0 {
            inner.total_revenue += amount_sats;
            inner.total_paid += 1;
            inner.payers.insert(payer_id.to_string());

            let ep = inner.endpoints.get_mut(endpoint).expect("just inserted");
            ep.revenue += amount_sats;
            ep.paid += 1;

            inner.recent_payments.push_back(PaymentRecord {
                endpoint: endpoint.to_string(),
                amount_sats,
                payer_id: payer_id.to_string(),
                payment_hash: payment_hash.unwrap_or_default().to_string(),
                timestamp: now,
            });
            let cap = inner.ring_cap;
            while inner.recent_payments.len() > cap {
                inner.recent_payments.pop_front();
            }
        } else {
            let ep = inner.endpoints.get_mut(endpoint).expect("just inserted");
            ep.free += 1;
        }
    }

    /// A deep-enough copy that the caller cannot mutate live state.
    /// `recent_payments` comes back newest-first.
    pub async fn snapshot(&self) -> ToolStats {
        let inner = self.inner.lock().await;
        let mut recent: Vec<PaymentRecord> = inner.recent_payments.iter().cloned().collect();
        recent.reverse();

        ToolStats {
            total_revenue: inner.total_revenue,
            total_requests: inner.total_requests,
            total_paid: inner.total_paid,
            unique_payers: inner.payers.len() as u64,
            endpoints: inner.endpoints.clone(),
            recent_payments: recent,
        }
    }

    /// Dashboard-shaped projection: same as `snapshot` but
    /// `recent_payments` trimmed to the 20 most recent.
    pub async fn dashboard_snapshot(&self) -> ToolStats {
        let mut s = self.snapshot().await;
        s.recent_payments.truncate(20);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paid_requests_accumulate_revenue_and_counts() {
        let rec = Recorder::default();
        for _ in 0..5 {
            rec.record("/api/joke", true, 10, "alice", Some("aa"), 1000)
                .await;
        }
        let snap = rec.snapshot().await;
        assert_eq!(snap.total_revenue, 50);
        assert_eq!(snap.total_paid, 5);
        assert_eq!(snap.endpoints["/api/joke"].revenue, 50);
        assert_eq!(snap.unique_payers, 1);
    }

    #[tokio::test]
    async fn free_requests_do_not_affect_revenue() {
        let rec = Recorder::default();
        rec.record("/api/joke", false, 0, "bob", None, 1000).await;
        let snap = rec.snapshot().await;
        assert_eq!(snap.total_revenue, 0);
        assert_eq!(snap.endpoints["/api/joke"].free, 1);
        assert_eq!(snap.total_requests, 1);
    }

    #[tokio::test]
    async fn unique_payers_counts_distinct_ids() {
        let rec = Recorder::default();
        rec.record("/x", true, 1, "a", Some("h1"), 0).await;
        rec.record("/x", true, 1, "b", Some("h2"), 0).await;
        rec.record("/x", true, 1, "a", Some("h3"), 0).await;
        assert_eq!(rec.snapshot().await.unique_payers, 2);
    }

    #[tokio::test]
    async fn ring_buffer_caps_and_orders_newest_first() {
        let rec = Recorder::new(3);
        for i in 0..5u64 {
            rec.record("/x", true, 1, "a", Some("h"), i).await;
        }
        let snap = rec.snapshot().await;
        assert_eq!(snap.recent_payments.len(), 3);
        assert_eq!(snap.recent_payments[0].timestamp, 4);
        assert_eq!(snap.recent_payments[2].timestamp, 2);
    }

    #[tokio::test]
    async fn invariant_total_requests_equals_sum_of_paid_and_free() {
        let rec = Recorder::default();
        rec.record("/a", true, 5, "p1", Some("h"), 0).await;
        rec.record("/a", false, 0, "p2", None, 0).await;
        rec.record("/b", true, 7, "p1", Some("h"), 0).await;

        let snap = rec.snapshot().await;
        let sum: u64 = snap.endpoints.values().map(|e| e.paid + e.free).sum();
        assert_eq!(snap.total_requests, sum);
        let revenue_sum: u64 = snap.endpoints.values().map(|e| e.revenue).sum();
        assert_eq!(snap.total_revenue, revenue_sum);
    }
}
