use serde_json::{json, Value};
use thiserror::Error;
use warp::http::StatusCode;

/// Taxonomy of failures a request can hit on the admission path.
///
/// Every variant here maps to exactly one HTTP status and one JSON body,
/// per the error handling design: nothing here should ever panic a request
/// handler. Wallet/internal failures are folded in as `WalletError` so the
/// gate always has a status+body pair to hand back, no matter what failed.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Invalid macaroon")]
    InvalidMacaroon,

    #[error("Invalid macaroon signature")]
    InvalidSignature,

    #[error("{0}")]
    CaveatFailed(String),

    #[error("Invalid preimage — does not match payment hash")]
    InvalidPreimage,

    #[error("Toll booth error: {0}")]
    WalletError(String),
}

impl GateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::WalletError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn body(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}
