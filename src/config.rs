//! Configuration loading: `config.toml` plus `APP_`-prefixed environment
//! overrides, in the same shape the teacher crate's own `config.rs` uses
//! (`https://github.com/mehcode/config-rs`), expanded to carry every
//! factory/route option the gate needs.

use std::net::IpAddr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    pub lnd: Lnd,
    pub toll: TollConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Lnd {
    pub host: String,
    pub tls_path: String,
    pub mac_path: String,
}

/// Factory-level options from the base spec's §6 `createToll(opts)`.
#[derive(Debug, Deserialize, Clone)]
pub struct TollConfig {
    /// Hex-encoded macaroon secret, given inline. Exactly one of this or
    /// `secret_path` must be set; ≥32 random bytes recommended.
    #[serde(default)]
    pub secret_hex: Option<String>,
    /// Path to a file holding the hex-encoded secret, for operators who'd
    /// rather not put it directly in `config.toml`.
    #[serde(default)]
    pub secret_path: Option<String>,
    #[serde(default = "default_sats")]
    pub default_sats: u64,
    #[serde(default = "default_invoice_expiry")]
    pub invoice_expiry_secs: u64,
    #[serde(default = "default_macaroon_expiry")]
    pub macaroon_expiry_secs: u64,
    #[serde(default = "default_true")]
    pub bind_endpoint: bool,
    #[serde(default = "default_true")]
    pub bind_method: bool,
    #[serde(default)]
    pub bind_ip: bool,
    #[serde(default)]
    pub replay_guard: bool,
}

impl TollConfig {
    /// Resolves the macaroon secret from whichever of `secret_hex` /
    /// `secret_path` the config supplied: hex inline, or a file whose
    /// contents are the hex-encoded secret. Exactly one must be set —
    /// a config mistake here is a bootstrap failure, not a request-path
    /// one, so it surfaces as `anyhow::Error` for the caller to `expect`.
    pub fn resolve_secret(&self) -> anyhow::Result<Vec<u8>> {
        match (&self.secret_hex, &self.secret_path) {
            (Some(hex_str), None) => {
                hex::decode(hex_str.trim()).context("toll.secret_hex must be hex")
            }
            (None, Some(path)) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read toll.secret_path {path}"))?;
                hex::decode(raw.trim()).context("toll.secret_path file must contain hex")
            }
            (Some(_), Some(_)) => {
                anyhow::bail!("toll: set only one of secret_hex or secret_path, not both")
            }
            (None, None) => anyhow::bail!("toll: one of secret_hex or secret_path is required"),
        }
    }
}

fn default_sats() -> u64 {
    10
}
fn default_invoice_expiry() -> u64 {
    300
}
fn default_macaroon_expiry() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}

/// Per-route options, matching the base spec's route options table.
/// `sats` is a fixed price; `price_words_in_field`, when set, names a
/// top-level string field of the JSON request body whose word count
/// becomes the dynamic price instead (base spec §4.5/scenario S6). The
/// two are mutually exclusive — when both are present, the dynamic
/// price wins, matching `gate::RouteOpts`'s "callable beats fixed" rule.
#[derive(Debug, Deserialize, Clone)]
pub struct RouteConfig {
    pub path: String,
    #[serde(default)]
    pub sats: Option<u64>,
    #[serde(default)]
    pub price_words_in_field: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub free_requests: u32,
    #[serde(default = "default_free_window")]
    pub free_window: String,
}

fn default_free_window() -> String {
    "1h".to_string()
}
