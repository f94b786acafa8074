//! Gating middleware (component E): the per-request state machine that
//! drives A/B/C/D to decide whether a request is admitted, admitted
//! free, or challenged for payment.
//!
//! `RouteGate::decide` is framework-agnostic — it takes a plain
//! `RequestContext` and returns a `GateDecision`, so any HTTP host can
//! wrap it (`http.rs` is the `warp`-based reference host).

use std::sync::Arc;
use std::time::Duration;

use stretto::AsyncCache;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::challenge::{self, ChallengeBody};
use crate::clock::{Clock, SystemClock};
use crate::error::GateError;
use crate::freetier::Accountant;
use crate::macaroon::{self, MintParams, VerifyContext};
use crate::preimage;
use crate::stats::Recorder;
use crate::wallet::WalletAdapter;
use crate::watcher::{self, OnPayment};

/// Price resolution, per the base spec's §9 Design Notes: `number |
/// (req)→number` modeled as a tagged variant resolved once per request.
#[derive(Clone)]
pub enum Price {
    Fixed(u64),
    Dynamic(Arc<dyn Fn(&RequestContext) -> u64 + Send + Sync>),
}

impl Price {
    fn resolve(&self, ctx: &RequestContext) -> u64 {
        match self {
            Price::Fixed(n) => *n,
            Price::Dynamic(f) => f(ctx),
        }
    }
}

/// Description resolution, analogous to `Price`.
#[derive(Clone)]
pub enum Description {
    Fixed(String),
    Dynamic(Arc<dyn Fn(&RequestContext) -> String + Send + Sync>),
}

impl Description {
    fn resolve(&self, ctx: &RequestContext) -> String {
        match self {
            Description::Fixed(s) => s.clone(),
            Description::Dynamic(f) => f(ctx),
        }
    }
}

/// Per-route options (base spec §6 route options table). `sats: None`
/// means the route didn't set `sats`/`price` at all, falling through to
/// the factory's `defaultSats` at resolve time — the third tier of the
/// §4.5 price-resolution rule.
#[derive(Clone)]
pub struct RouteOpts {
    pub sats: Option<Price>,
    pub description: Option<Description>,
    pub free_requests: u32,
    pub free_window: Duration,
}

impl Default for RouteOpts {
    fn default() -> Self {
        Self {
            sats: None,
            description: None,
            free_requests: 0,
            free_window: Duration::from_secs(3600),
        }
    }
}

/// What a host framework hands the gate for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub client_id: String,
    pub authorization: Option<String>,
    /// Raw request body, exposed only so a `Price::Dynamic`/
    /// `Description::Dynamic` closure can inspect it (e.g. scenario S6's
    /// word-count pricing). The gate itself never reads this.
    pub body: Vec<u8>,
}

/// What the request carries forward once admitted.
#[derive(Debug, Clone)]
pub struct TollGrant {
    pub paid: bool,
    pub free: bool,
    pub payment_hash: Option<String>,
    pub amount_sats: u64,
    pub client_id: String,
}

/// The outcome of `RouteGate::decide`.
pub enum GateDecision {
    Admit(TollGrant),
    Challenge {
        status: u16,
        www_authenticate: String,
        body: ChallengeBody,
    },
    Reject(GateError),
}

/// The "toll booth" value (base spec §9): owns the shared accountant,
/// wallet, secret and stats recorder a `RouteGate` borrows from. Built
/// by `GateBuilder`; cheap to clone.
#[derive(Clone)]
pub struct Gate {
    secret: Arc<Vec<u8>>,
    wallet: Arc<dyn WalletAdapter>,
    stats: Recorder,
    clock: Arc<dyn Clock>,
    default_sats: u64,
    invoice_expiry_secs: u64,
    macaroon_expiry_secs: u64,
    bind_endpoint: bool,
    bind_method: bool,
    bind_ip: bool,
    replay_guard: bool,
    replay_seen: Option<Arc<AsyncCache<String, ()>>>,
    on_payment: Option<OnPayment>,
    shutdown: CancellationToken,
}

/// Builds a `Gate`. Mirrors the base spec's `createToll(opts)` factory.
pub struct GateBuilder {
    wallet: Option<Arc<dyn WalletAdapter>>,
    secret: Option<Vec<u8>>,
    default_sats: u64,
    invoice_expiry_secs: u64,
    macaroon_expiry_secs: u64,
    bind_endpoint: bool,
    bind_method: bool,
    bind_ip: bool,
    replay_guard: bool,
    on_payment: Option<OnPayment>,
    clock: Arc<dyn Clock>,
    stats: Recorder,
}

impl Default for GateBuilder {
    fn default() -> Self {
        Self {
            wallet: None,
            secret: None,
            default_sats: 10,
            invoice_expiry_secs: 300,
            macaroon_expiry_secs: 3600,
            bind_endpoint: true,
            bind_method: true,
            bind_ip: false,
            replay_guard: false,
            on_payment: None,
            clock: Arc::new(SystemClock),
            stats: Recorder::default(),
        }
    }
}

impl GateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet(mut self, wallet: Arc<dyn WalletAdapter>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn secret(mut self, secret: Vec<u8>) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn default_sats(mut self, sats: u64) -> Self {
        self.default_sats = sats;
        self
    }

    pub fn invoice_expiry_secs(mut self, secs: u64) -> Self {
        self.invoice_expiry_secs = secs;
        self
    }

    pub fn macaroon_expiry_secs(mut self, secs: u64) -> Self {
        self.macaroon_expiry_secs = secs;
        self
    }

    pub fn bind_endpoint(mut self, on: bool) -> Self {
        self.bind_endpoint = on;
        self
    }

    pub fn bind_method(mut self, on: bool) -> Self {
        self.bind_method = on;
        self
    }

    pub fn bind_ip(mut self, on: bool) -> Self {
        self.bind_ip = on;
        self
    }

    pub fn replay_guard(mut self, on: bool) -> Self {
        self.replay_guard = on;
        self
    }

    pub fn on_payment<F>(mut self, f: F) -> Self
    where
        F: Fn(watcher::PaymentEvent) + Send + Sync + 'static,
    {
        self.on_payment = Some(Arc::new(f));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(mut self, stats: Recorder) -> Self {
        self.stats = stats;
        self
    }

    /// Builds the `Gate`. Missing wallet or secret is a programmer error —
    /// panics at construction, never inside a request handler.
    pub fn build(self) -> Gate {
        let wallet = self.wallet.expect("GateBuilder: wallet is required");
        let secret = self.secret.expect("GateBuilder: secret is required");
        assert!(!secret.is_empty(), "GateBuilder: secret must not be empty");

        let replay_seen = if self.replay_guard {
            Some(Arc::new(
                AsyncCache::new(10_000, 1e6 as i64, tokio::spawn)
                    .expect("replay guard cache construction"),
            ))
        } else {
            None
        };

        Gate {
            secret: Arc::new(secret),
            wallet,
            stats: self.stats,
            clock: self.clock,
            default_sats: self.default_sats,
            invoice_expiry_secs: self.invoice_expiry_secs,
            macaroon_expiry_secs: self.macaroon_expiry_secs,
            bind_endpoint: self.bind_endpoint,
            bind_method: self.bind_method,
            bind_ip: self.bind_ip,
            replay_guard: self.replay_guard,
            replay_seen,
            on_payment: self.on_payment,
            shutdown: CancellationToken::new(),
        }
    }
}

impl Gate {
    pub fn stats(&self) -> &Recorder {
        &self.stats
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels every sweeper and in-flight watcher registered against this
    /// gate. Route gates created from this `Gate` share the same token.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Builds the per-route middleware for `path`, matching the base
    /// spec's `toll(routeOpts)` per-route constructor.
    pub fn route(&self, path: impl Into<String>, opts: RouteOpts) -> RouteGate {
        let free_requests = opts.free_requests;
        let free_window = opts.free_window;
        let accountant = Accountant::new(free_requests, free_window, self.clock.clone());
        if free_requests > 0 {
            accountant.spawn_sweeper(self.shutdown.clone());
        }

        RouteGate {
            gate: self.clone(),
            path: path.into(),
            opts,
            accountant,
        }
    }
}

/// Per-route middleware: the value a host framework invokes once per
/// incoming request.
#[derive(Clone)]
pub struct RouteGate {
    gate: Gate,
    path: String,
    opts: RouteOpts,
    accountant: Accountant,
}

impl RouteGate {
    /// Price resolution per the base spec's §4.5: a callable price wins,
    /// then a fixed `sats`, then the factory's `defaultSats`.
    fn resolve_price(&self, req: &RequestContext) -> u64 {
        match &self.opts.sats {
            Some(price) => price.resolve(req),
            None => self.gate.default_sats,
        }
    }

    /// Runs the full decision tree from the base spec's §4.5 diagram.
    #[instrument(skip(self, req), fields(path = %self.path, client = %req.client_id))]
    pub async fn decide(&self, req: RequestContext) -> GateDecision {
        match &req.authorization {
            Some(header) => self.decide_with_credentials(header, &req).await,
            None => self.decide_without_credentials(&req).await,
        }
    }

    async fn decide_with_credentials(
        &self,
        header: &str,
        req: &RequestContext,
    ) -> GateDecision {
        let Some((mac_raw, preimage_hex)) = challenge::parse_authorization(header) else {
            return GateDecision::Reject(GateError::InvalidMacaroon);
        };

        let Some(mac) = macaroon::decode(&mac_raw) else {
            return GateDecision::Reject(GateError::InvalidMacaroon);
        };

        let ctx = VerifyContext {
            now_secs: self.gate.clock.now_secs(),
            endpoint: self.gate.bind_endpoint.then_some(req.path.as_str()),
            method: self.gate.bind_method.then_some(req.method.as_str()),
            ip: self.gate.bind_ip.then_some(req.client_id.as_str()),
        };

        let claims = match macaroon::verify(&self.gate.secret, &mac, &ctx) {
            Ok(claims) => claims,
            Err(e) => return GateDecision::Reject(e),
        };

        if !preimage::verify_preimage(&preimage_hex, &mac.id) {
            return GateDecision::Reject(GateError::InvalidPreimage);
        }

        if self.gate.replay_guard {
            if let Some(seen) = &self.gate.replay_seen {
                if seen.get(&mac.id).is_some() {
                    return GateDecision::Reject(GateError::CaveatFailed(
                        "Credential already used".to_string(),
                    ));
                }
                seen.insert_with_ttl(mac.id.clone(), (), 1, Duration::from_secs(
                    self.gate.macaroon_expiry_secs,
                ))
                .await;
            }
        }

        let amount_sats = self.resolve_price(req);
        let payment_hash_hex = hex::encode(claims.payment_hash);

        self.gate
            .stats
            .record(
                &self.path,
                true,
                amount_sats,
                &req.client_id,
                Some(&payment_hash_hex),
                self.gate.clock.now_secs(),
            )
            .await;

        info!(amount_sats, "admitted paid request");

        GateDecision::Admit(TollGrant {
            paid: true,
            free: false,
            payment_hash: Some(payment_hash_hex),
            amount_sats,
            client_id: req.client_id.clone(),
        })
    }

    async fn decide_without_credentials(&self, req: &RequestContext) -> GateDecision {
        if self.accountant.admit(&req.client_id).await {
            self.gate
                .stats
                .record(&self.path, false, 0, &req.client_id, None, self.gate.clock.now_secs())
                .await;
            return GateDecision::Admit(TollGrant {
                paid: false,
                free: true,
                payment_hash: None,
                amount_sats: 0,
                client_id: req.client_id.clone(),
            });
        }

        self.issue_challenge(req).await
    }

    async fn issue_challenge(&self, req: &RequestContext) -> GateDecision {
        let amount_sats = self.resolve_price(req);

        let description = self
            .opts
            .description
            .as_ref()
            .map(|d| d.resolve(req))
            .unwrap_or_else(|| format!("API access: {} {}", req.method, req.path));

        let invoice = match self
            .gate
            .wallet
            .create_invoice(amount_sats, &description, self.gate.invoice_expiry_secs)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error=%e, "wallet error creating invoice");
                return GateDecision::Reject(GateError::WalletError(e.to_string()));
            }
        };

        let payment_hash = match <[u8; 32]>::try_from(
            hex::decode(&invoice.payment_hash).unwrap_or_default().as_slice(),
        ) {
            Ok(bytes) => bytes,
            Err(_) => {
                return GateDecision::Reject(GateError::WalletError(
                    "wallet returned malformed payment hash".to_string(),
                ))
            }
        };

        let now = self.gate.clock.now_secs();
        let mint_params = MintParams {
            payment_hash,
            expires_at: Some(now + self.gate.macaroon_expiry_secs),
            endpoint: self.gate.bind_endpoint.then(|| req.path.clone()),
            method: self.gate.bind_method.then(|| req.method.clone()),
            ip: self.gate.bind_ip.then(|| req.client_id.clone()),
        };
        let mac = macaroon::mint(&self.gate.secret, &mint_params);
        let mac_b64 = macaroon::encode(&mac);

        let www_authenticate = challenge::www_authenticate_header(&invoice.invoice, &mac_b64);
        let body = ChallengeBody::new(
            invoice.payment_hash.clone(),
            invoice.invoice.clone(),
            mac_b64,
            amount_sats,
            Some(description.clone()),
        );

        if let Some(on_payment) = &self.gate.on_payment {
            watcher::spawn(
                self.gate.wallet.clone(),
                invoice.payment_hash.clone(),
                amount_sats,
                self.path.clone(),
                req.client_id.clone(),
                self.gate.invoice_expiry_secs * 1000,
                Some(on_payment.clone()),
                self.gate.shutdown.clone(),
            );
        }

        GateDecision::Challenge {
            status: 402,
            www_authenticate,
            body,
        }
    }
}

/// Derives the client id per the base spec's glossary: first token of
/// `X-Forwarded-For`, else the peer address, else `"unknown"`.
pub fn client_id(forwarded_for: Option<&str>, peer_addr: Option<&str>) -> String {
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer_addr.unwrap_or("unknown").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::wallet::mock::MockWallet;

    fn gate(wallet: Arc<MockWallet>) -> Gate {
        GateBuilder::new()
            .wallet(wallet)
            .secret(b"super-secret-key-material-32-bytes!".to_vec())
            .clock(Arc::new(TestClock::new(1_700_000_000)))
            .build()
    }

    fn req(path: &str, auth: Option<String>) -> RequestContext {
        RequestContext {
            method: "GET".to_string(),
            path: path.to_string(),
            client_id: "client1".to_string(),
            authorization: auth,
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn unauthenticated_hit_yields_402_with_matching_payment_hash() {
        let wallet = Arc::new(MockWallet::new());
        let gate = gate(wallet);
        let route = gate.route("/api/joke", RouteOpts { sats: Some(Price::Fixed(5)), ..Default::default() });

        let decision = route.decide(req("/api/joke", None)).await;
        match decision {
            GateDecision::Challenge { status, www_authenticate, body } => {
                assert_eq!(status, 402);
                assert!(www_authenticate.starts_with(r#"L402 invoice=""#));
                assert_eq!(body.amount_sats, 5);
                let mac = macaroon::decode(&body.macaroon).expect("macaroon decodes");
                assert_eq!(mac.id, body.payment_hash);
                assert!(mac.caveats.contains(&"endpoint = /api/joke".to_string()));
                assert!(mac.caveats.contains(&"method = GET".to_string()));
            }
            _ => panic!("expected a challenge"),
        }
    }

    #[tokio::test]
    async fn successful_payment_retry_admits_as_paid_and_records_stats() {
        let wallet = Arc::new(MockWallet::new());
        let gate = gate(wallet.clone());
        let route = gate.route("/api/joke", RouteOpts { sats: Some(Price::Fixed(5)), ..Default::default() });

        let GateDecision::Challenge { body, .. } = route.decide(req("/api/joke", None)).await else {
            panic!("expected challenge");
        };

        let preimage = wallet.settle(&body.payment_hash, 1234).await.expect("settle");
        let header = format!("L402 {}:{}", body.macaroon, preimage);

        let decision = route.decide(req("/api/joke", Some(header))).await;
        match decision {
            GateDecision::Admit(grant) => {
                assert!(grant.paid);
                assert_eq!(grant.amount_sats, 5);
            }
            _ => panic!("expected admit"),
        }

        let snap = gate.stats().snapshot().await;
        assert_eq!(snap.total_paid, 1);
        assert_eq!(snap.total_revenue, 5);
    }

    #[tokio::test]
    async fn wrong_preimage_is_rejected() {
        let wallet = Arc::new(MockWallet::new());
        let gate = gate(wallet.clone());
        let route = gate.route("/api/joke", RouteOpts { sats: Some(Price::Fixed(5)), ..Default::default() });

        let GateDecision::Challenge { body, .. } = route.decide(req("/api/joke", None)).await else {
            panic!("expected challenge");
        };
        wallet.settle(&body.payment_hash, 1).await;

        let wrong_preimage = "00".repeat(32);
        let header = format!("L402 {}:{}", body.macaroon, wrong_preimage);
        let decision = route.decide(req("/api/joke", Some(header))).await;
        assert!(matches!(decision, GateDecision::Reject(GateError::InvalidPreimage)));
    }

    #[tokio::test]
    async fn endpoint_bound_macaroon_rejected_on_a_different_route() {
        let wallet = Arc::new(MockWallet::new());
        let gate = gate(wallet.clone());
        let joke_route = gate.route("/api/joke", RouteOpts { sats: Some(Price::Fixed(5)), ..Default::default() });
        let time_route = gate.route("/api/time", RouteOpts::default());

        let GateDecision::Challenge { body, .. } = joke_route.decide(req("/api/joke", None)).await else {
            panic!("expected challenge");
        };
        let preimage = wallet.settle(&body.payment_hash, 1).await.expect("settle");
        let header = format!("L402 {}:{}", body.macaroon, preimage);

        let decision = time_route.decide(req("/api/time", Some(header))).await;
        match decision {
            GateDecision::Reject(GateError::CaveatFailed(msg)) => {
                assert!(msg.contains("Endpoint mismatch"));
            }
            _ => panic!("expected endpoint mismatch rejection"),
        }

        let snap = gate.stats().snapshot().await;
        assert_eq!(snap.endpoints.get("/api/time").map(|e| e.paid).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn free_tier_exhaustion_then_challenge() {
        let wallet = Arc::new(MockWallet::new());
        let gate = gate(wallet);
        let route = gate.route(
            "/api/premium",
            RouteOpts {
                sats: Some(Price::Fixed(21)),
                free_requests: 3,
                free_window: Duration::from_secs(3600),
                ..Default::default()
            },
        );

        for _ in 0..3 {
            let decision = route.decide(req("/api/premium", None)).await;
            match decision {
                GateDecision::Admit(grant) => assert!(grant.free),
                _ => panic!("expected free admission"),
            }
        }

        let decision = route.decide(req("/api/premium", None)).await;
        match decision {
            GateDecision::Challenge { body, .. } => assert_eq!(body.amount_sats, 21),
            _ => panic!("expected challenge after quota exhausted"),
        }
    }

    #[tokio::test]
    async fn dynamic_pricing_resolves_per_request() {
        let wallet = Arc::new(MockWallet::new());
        let gate = gate(wallet);
        let route = gate.route(
            "/api/wordcount",
            RouteOpts {
                sats: Some(Price::Dynamic(Arc::new(|req: &RequestContext| {
                    let text = String::from_utf8_lossy(&req.body);
                    text.split_whitespace().count().max(1) as u64
                }))),
                ..Default::default()
            },
        );

        let mut r = req("/api/wordcount", None);
        r.method = "POST".to_string();
        r.body = b"a b c".to_vec();

        let decision = route.decide(r).await;
        match decision {
            GateDecision::Challenge { body, .. } => assert_eq!(body.amount_sats, 3),
            _ => panic!("expected challenge"),
        }
    }

    #[tokio::test]
    async fn route_without_sats_falls_back_to_factory_default() {
        let wallet = Arc::new(MockWallet::new());
        let gate = GateBuilder::new()
            .wallet(wallet)
            .secret(b"super-secret-key-material-32-bytes!".to_vec())
            .clock(Arc::new(TestClock::new(1_700_000_000)))
            .default_sats(42)
            .build();
        let route = gate.route("/api/unspecified", RouteOpts::default());

        let decision = route.decide(req("/api/unspecified", None)).await;
        match decision {
            GateDecision::Challenge { body, .. } => assert_eq!(body.amount_sats, 42),
            _ => panic!("expected challenge"),
        }
    }

    #[test]
    fn client_id_prefers_forwarded_for_first_token() {
        assert_eq!(client_id(Some("1.2.3.4, 5.6.7.8"), Some("9.9.9.9")), "1.2.3.4");
        assert_eq!(client_id(None, Some("9.9.9.9")), "9.9.9.9");
        assert_eq!(client_id(None, None), "unknown");
        assert_eq!(client_id(Some(""), Some("9.9.9.9")), "9.9.9.9");
    }
}
