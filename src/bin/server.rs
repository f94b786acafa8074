use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use warp::{Filter, Rejection, Reply};

use l402_toll::config::{Config, RouteConfig};
use l402_toll::freetier::parse_window;
use l402_toll::gate::{Description, GateBuilder, Price, RouteGate, RouteOpts};
use l402_toll::http::{client_id_from_headers, dashboard_html, dashboard_json, handle_rejection, metrics_text};
use l402_toll::wallet::lnd::LndWallet;

/// Builds the dynamic-pricing closure for a route's `price_words_in_field`:
/// counts whitespace-separated words in that top-level string field of the
/// JSON request body, floored at 1 sat (scenario S6's word-count pricing).
/// A missing/non-JSON/non-string body resolves to 1 sat rather than erroring
/// — price resolution is never allowed to fail a request on its own.
fn word_count_price(field: String) -> Price {
    Price::Dynamic(Arc::new(move |req: &l402_toll::gate::RequestContext| {
        let words = serde_json::from_slice::<serde_json::Value>(&req.body)
            .ok()
            .and_then(|v| v.get(&field).and_then(|f| f.as_str()).map(str::to_string))
            .map(|text| text.split_whitespace().count())
            .unwrap_or(0);
        words.max(1) as u64
    }))
}

/// Resolves a route's options from `config.toml`'s `routes` table,
/// falling back to the given demo default when the route isn't listed
/// there. Leaving `sats: None` when neither config nor this fallback
/// apply lets it fall through to the factory's own `defaultSats`.
fn route_opts(config: &Config, path: &str, demo_default_sats: u64) -> RouteOpts {
    let found: Option<&RouteConfig> = config.routes.iter().find(|r| r.path == path);

    match found {
        Some(r) => RouteOpts {
            sats: Some(match &r.price_words_in_field {
                Some(field) => word_count_price(field.clone()),
                None => Price::Fixed(r.sats.unwrap_or(demo_default_sats)),
            }),
            description: r.description.clone().map(Description::Fixed),
            free_requests: r.free_requests,
            free_window: parse_window(&r.free_window),
        },
        None => RouteOpts {
            sats: Some(Price::Fixed(demo_default_sats)),
            ..Default::default()
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::from_default_env())
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config: Config = config::Config::builder()
        .add_source(config::File::with_name("config"))
        .add_source(config::Environment::with_prefix("APP"))
        .build()
        .expect("problem building the config")
        .try_deserialize()
        .expect("problem deserializing config");

    info!("Configuration loaded on startup: {:?}", config);

    let wallet = Arc::new(
        LndWallet::connect(
            config.lnd.host.clone(),
            config.lnd.tls_path.clone(),
            config.lnd.mac_path.clone(),
        )
        .await
        .expect("failed to connect to LND"),
    );

    let secret = config
        .toll
        .resolve_secret()
        .expect("failed to resolve toll.secret_hex / toll.secret_path");

    let gate = Arc::new(
        GateBuilder::new()
            .wallet(wallet)
            .secret(secret)
            .default_sats(config.toll.default_sats)
            .invoice_expiry_secs(config.toll.invoice_expiry_secs)
            .macaroon_expiry_secs(config.toll.macaroon_expiry_secs)
            .bind_endpoint(config.toll.bind_endpoint)
            .bind_method(config.toll.bind_method)
            .bind_ip(config.toll.bind_ip)
            .replay_guard(config.toll.replay_guard)
            .on_payment(|event| {
                info!(
                    payment_hash = %event.payment_hash,
                    amount_sats = event.amount_sats,
                    endpoint = %event.endpoint,
                    "invoice settled"
                );
            })
            .build(),
    );

    // Two demo routes exercising fixed pricing and free-tier exhaustion,
    // matching the scenarios this gate is tested against. Options come
    // from `config.toml`'s `routes` table when present, else these
    // built-in defaults.
    let mut joke_opts = route_opts(&config, "/api/joke", 5);
    if joke_opts.description.is_none() {
        joke_opts.description = Some(Description::Fixed("A terrible joke, freshly told".to_string()));
    }
    let joke_route = Arc::new(gate.route("/api/joke", joke_opts));

    let mut premium_opts = route_opts(&config, "/api/premium", 21);
    if premium_opts.free_requests == 0 {
        premium_opts.free_requests = 3;
    }
    let premium_route = Arc::new(gate.route("/api/premium", premium_opts));

    let joke = warp::path!("api" / "joke")
        .and(warp::get())
        .and(with_clone(joke_route.clone()))
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and_then(joke_handler);

    let premium = warp::path!("api" / "premium")
        .and(warp::get())
        .and(with_clone(premium_route.clone()))
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and_then(premium_handler);

    let dashboard_json_route = warp::path!("dashboard.json")
        .and(warp::get())
        .and(with_clone(gate.clone()))
        .and_then(dashboard_json);

    let dashboard_route = warp::path!("dashboard")
        .and(warp::get())
        .and(with_clone(gate.clone()))
        .and_then(dashboard_html);

    let metrics_route = warp::path!("metrics")
        .and(warp::get())
        .and(with_clone(gate.clone()))
        .and_then(metrics_text);

    let routes = joke
        .or(premium)
        .or(dashboard_json_route)
        .or(dashboard_route)
        .or(metrics_route)
        .recover(handle_rejection);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Listening on {addr}");
    warp::serve(routes).run(addr).await;

    gate.close();
    Ok(())
}

async fn joke_handler(
    route: Arc<RouteGate>,
    headers: warp::http::HeaderMap,
    peer: Option<SocketAddr>,
) -> Result<impl Reply, Rejection> {
    respond(&route, "GET", "/api/joke", &headers, peer, Vec::new(), |_grant| {
        warp::reply::json(&serde_json::json!({ "joke": "Why did the sat cross the channel? To get to the other node." }))
    })
    .await
}

async fn premium_handler(
    route: Arc<RouteGate>,
    headers: warp::http::HeaderMap,
    peer: Option<SocketAddr>,
) -> Result<impl Reply, Rejection> {
    respond(&route, "GET", "/api/premium", &headers, peer, Vec::new(), |grant| {
        warp::reply::json(&serde_json::json!({ "paid": grant.paid, "free": grant.free }))
    })
    .await
}

async fn respond<F, R>(
    route: &RouteGate,
    method: &str,
    path: &str,
    headers: &warp::http::HeaderMap,
    peer: Option<SocketAddr>,
    body: Vec<u8>,
    handler: F,
) -> Result<warp::reply::Response, Rejection>
where
    F: FnOnce(&l402_toll::gate::TollGrant) -> R,
    R: Reply,
{
    let client_id = client_id_from_headers(headers, peer);
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match l402_toll::http::guard(route, method, path, client_id, authorization, body).await {
        Ok(grant) => Ok(handler(&grant).into_response()),
        Err(resp) => Ok(resp),
    }
}

fn with_clone<C: Clone + Send>(
    c: C,
) -> impl Filter<Extract = (C,), Error = Infallible> + Clone {
    warp::any().map(move || c.clone())
}
