//! `warp`-based reference host: wires a `RouteGate` into actual HTTP
//! handlers, the way the teacher crate's `api.rs`/`bin/server.rs` wire
//! their own handlers. Any other framework could bind the same
//! `RouteGate::decide` call instead — the gate core takes no dependency
//! on `warp` types.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use askama::Template;
use serde_json::json;
use tracing::warn;
use warp::http::{HeaderValue, StatusCode};
use warp::{Rejection, Reply};

use crate::gate::{GateDecision, RequestContext, RouteGate, TollGrant};
use crate::metrics;
use crate::stats::ToolStats;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

pub fn client_id_from_headers(headers: &warp::http::HeaderMap, peer: Option<std::net::SocketAddr>) -> String {
    let xff = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    crate::gate::client_id(xff, peer.map(|a| a.ip().to_string()).as_deref())
}

/// Runs a `RouteGate` against one request and returns either the toll
/// grant (so the caller's downstream handler can run) or a terminal
/// warp `Reply` (402 challenge, or a rejection the caller should return
/// directly).
pub async fn guard(
    route: &RouteGate,
    method: &str,
    path: &str,
    client_id: String,
    authorization: Option<String>,
    body: Vec<u8>,
) -> Result<TollGrant, warp::reply::Response> {
    let ctx = RequestContext {
        method: method.to_string(),
        path: path.to_string(),
        client_id,
        authorization,
        body,
    };

    match route.decide(ctx).await {
        GateDecision::Admit(grant) => Ok(grant),
        GateDecision::Challenge {
            status,
            www_authenticate,
            body,
        } => {
            let mut resp = warp::reply::with_status(
                warp::reply::json(&body),
                StatusCode::from_u16(status).unwrap_or(StatusCode::PAYMENT_REQUIRED),
            )
            .into_response();
            if let Ok(value) = HeaderValue::from_str(&www_authenticate) {
                resp.headers_mut().insert("WWW-Authenticate", value);
            }
            Err(resp)
        }
        GateDecision::Reject(err) => {
            warn!(error=%err, "request rejected");
            let resp =
                warp::reply::with_status(warp::reply::json(&err.body()), err.status_code())
                    .into_response();
            Err(resp)
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    total_revenue: u64,
    total_requests: u64,
    total_paid: u64,
    unique_payers: u64,
    endpoint_rows: Vec<EndpointRow>,
    recent_payments: Vec<crate::stats::PaymentRecord>,
}

struct EndpointRow {
    path: String,
    revenue: u64,
    requests: u64,
    paid: u64,
    free: u64,
}

fn to_template(stats: &ToolStats) -> DashboardTemplate {
    let mut endpoint_rows: Vec<EndpointRow> = stats
        .endpoints
        .iter()
        .map(|(path, s)| EndpointRow {
            path: path.clone(),
            revenue: s.revenue,
            requests: s.requests,
            paid: s.paid,
            free: s.free,
        })
        .collect();
    endpoint_rows.sort_by(|a, b| a.path.cmp(&b.path));

    DashboardTemplate {
        total_revenue: stats.total_revenue,
        total_requests: stats.total_requests,
        total_paid: stats.total_paid,
        unique_payers: stats.unique_payers,
        endpoint_rows,
        recent_payments: stats.recent_payments.clone(),
    }
}

/// `GET /dashboard.json` handler.
pub async fn dashboard_json(gate: Arc<crate::gate::Gate>) -> Result<impl Reply, Infallible> {
    let snapshot = gate.stats().dashboard_snapshot().await;
    Ok(warp::reply::json(&snapshot))
}

/// `GET /dashboard` handler (HTML).
pub async fn dashboard_html(gate: Arc<crate::gate::Gate>) -> Result<impl Reply, Rejection> {
    let snapshot = gate.stats().dashboard_snapshot().await;
    let rendered = to_template(&snapshot)
        .render()
        .map_err(|_| warp::reject::custom(TemplateError))?;
    Ok(warp::reply::html(rendered))
}

#[derive(Debug)]
struct TemplateError;
impl warp::reject::Reject for TemplateError {}

/// `GET /metrics` handler (Prometheus text exposition).
pub async fn metrics_text(gate: Arc<crate::gate::Gate>) -> Result<impl Reply, Infallible> {
    let snapshot = gate.stats().snapshot().await;
    let body = metrics::render(&snapshot, now_secs());
    Ok(warp::reply::with_header(
        body,
        "Content-Type",
        "text/plain; version=0.0.4; charset=utf-8",
    ))
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        code,
    ))
}
