//! Prometheus text exposition over a stats snapshot. A thin projection,
//! same spirit as `dashboard_json`, kept separate so the wire format
//! (and its label-escaping rules) lives in one place.

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::stats::{PaymentRecord, ToolStats};

const PREFIX: &str = "lightning_toll_";

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders `stats` as `text/plain; version=0.0.4; charset=utf-8` content.
/// `now_secs` is used to compute the rolling `payments_per_minute` gauge
/// over `recent_payments`.
pub fn render(stats: &ToolStats, now_secs: u64) -> String {
    let mut out = String::new();

    writeln!(out, "# TYPE {PREFIX}revenue_sats_total counter").ok();
    writeln!(out, "{PREFIX}revenue_sats_total {}", stats.total_revenue).ok();

    writeln!(out, "# TYPE {PREFIX}requests_total counter").ok();
    writeln!(out, "{PREFIX}requests_total {}", stats.total_requests).ok();

    writeln!(out, "# TYPE {PREFIX}paid_requests_total counter").ok();
    writeln!(out, "{PREFIX}paid_requests_total {}", stats.total_paid).ok();

    writeln!(out, "# TYPE {PREFIX}unique_payers gauge").ok();
    writeln!(out, "{PREFIX}unique_payers {}", stats.unique_payers).ok();

    writeln!(out, "# TYPE {PREFIX}endpoint_revenue_sats gauge").ok();
    for (endpoint, s) in &stats.endpoints {
        writeln!(
            out,
            "{PREFIX}endpoint_revenue_sats{{endpoint=\"{}\"}} {}",
            escape(endpoint),
            s.revenue
        )
        .ok();
    }

    writeln!(out, "# TYPE {PREFIX}endpoint_requests gauge").ok();
    for (endpoint, s) in &stats.endpoints {
        writeln!(
            out,
            "{PREFIX}endpoint_requests{{endpoint=\"{}\"}} {}",
            escape(endpoint),
            s.requests
        )
        .ok();
    }

    writeln!(out, "# TYPE {PREFIX}endpoint_paid gauge").ok();
    for (endpoint, s) in &stats.endpoints {
        writeln!(
            out,
            "{PREFIX}endpoint_paid{{endpoint=\"{}\"}} {}",
            escape(endpoint),
            s.paid
        )
        .ok();
    }

    writeln!(out, "# TYPE {PREFIX}endpoint_free gauge").ok();
    for (endpoint, s) in &stats.endpoints {
        writeln!(
            out,
            "{PREFIX}endpoint_free{{endpoint=\"{}\"}} {}",
            escape(endpoint),
            s.free
        )
        .ok();
    }

    writeln!(out, "# TYPE {PREFIX}payments_per_minute gauge").ok();
    writeln!(
        out,
        "{PREFIX}payments_per_minute {}",
        payments_per_minute(&stats.recent_payments, now_secs)
    )
    .ok();

    if stats.total_paid > 0 {
        writeln!(out, "# TYPE {PREFIX}average_payment_sats gauge").ok();
        writeln!(
            out,
            "{PREFIX}average_payment_sats {}",
            stats.total_revenue as f64 / stats.total_paid as f64
        )
        .ok();
    }

    out
}

fn payments_per_minute(recent: &[PaymentRecord], now_secs: u64) -> usize {
    let window_start = now_secs.saturating_sub(60);
    let within: VecDeque<&PaymentRecord> = recent
        .iter()
        .filter(|p| p.timestamp >= window_start)
        .collect();
    within.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Recorder;

    #[tokio::test]
    async fn content_escapes_quotes_in_endpoint_labels() {
        let rec = Recorder::default();
        rec.record("/weird\"path", true, 5, "alice", Some("h"), 0).await;
        let snap = rec.snapshot().await;
        let body = render(&snap, 0);
        assert!(body.contains(r#"endpoint="/weird\"path""#));
    }

    #[tokio::test]
    async fn average_payment_only_emitted_when_paid_gt_zero() {
        let rec = Recorder::default();
        let snap = rec.snapshot().await;
        let body = render(&snap, 0);
        assert!(!body.contains("average_payment_sats"));

        rec.record("/x", true, 10, "a", Some("h"), 0).await;
        let snap = rec.snapshot().await;
        let body = render(&snap, 0);
        assert!(body.contains("average_payment_sats 10"));
    }

    #[tokio::test]
    async fn payments_per_minute_counts_only_recent_window() {
        let rec = Recorder::default();
        rec.record("/x", true, 1, "a", Some("h1"), 0).await;
        rec.record("/x", true, 1, "a", Some("h2"), 1000).await;
        let snap = rec.snapshot().await;
        let body = render(&snap, 1000);
        assert!(body.contains("payments_per_minute 1"));
    }
}
