//! Chained-HMAC macaroon codec (component A).
//!
//! A macaroon here is deliberately small: a 32-byte id (the invoice's
//! payment hash), an ordered list of `"key = value"` caveat strings, and a
//! 32-byte signature computed by folding HMAC-SHA256 over the id and then
//! each caveat in turn. Order is part of the signature — see `mint`.

use base64::{decode_config, encode_config, URL_SAFE_NO_PAD};
use hex::{FromHex, ToHex};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::GateError;

type HmacSha256 = Hmac<Sha256>;

/// Caveats are folded into the signature in this fixed order at mint time;
/// absent fields are skipped entirely (they never appear as caveats).
const CAVEAT_ORDER: [&str; 4] = ["expires_at", "endpoint", "method", "ip"];

#[derive(Debug, Clone, Default)]
pub struct MintParams {
    pub payment_hash: [u8; 32],
    pub expires_at: Option<u64>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub ip: Option<String>,
}

/// The wire-serializable credential: `{id, caveats, signature}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Macaroon {
    pub id: String,
    pub caveats: Vec<String>,
    pub signature: String,
}

/// Context against which caveats are checked at verify time. A `None`
/// dimension disables the corresponding check entirely (used when
/// server-side binding for that dimension is off) — verification only
/// ever narrows, so skipping a check here is safe as long as the caveat
/// that would have been checked was never minted either.
#[derive(Debug, Clone, Default)]
pub struct VerifyContext<'a> {
    pub now_secs: u64,
    pub endpoint: Option<&'a str>,
    pub method: Option<&'a str>,
    pub ip: Option<&'a str>,
}

/// Claims recovered from a macaroon that verified successfully.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub payment_hash: [u8; 32],
}

fn hmac_step(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sign_chain(secret: &[u8], payment_hash: &[u8; 32], caveats: &[String]) -> [u8; 32] {
    let mut sig = hmac_step(secret, payment_hash);
    for caveat in caveats {
        sig = hmac_step(&sig, caveat.as_bytes());
    }
    sig
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Mint a macaroon bound to `params.payment_hash`.
///
/// Missing secret or payment hash is a programmer error, not a request-
/// path failure — callers should fail loudly at construction, which is
/// why this takes `&[u8]` rather than `Option<&[u8]>`.
pub fn mint(secret: &[u8], params: &MintParams) -> Macaroon {
    assert!(!secret.is_empty(), "macaroon secret must not be empty");

    let mut caveats = Vec::new();
    if let Some(expires_at) = params.expires_at {
        caveats.push(format!("expires_at = {expires_at}"));
    }
    if let Some(endpoint) = &params.endpoint {
        caveats.push(format!("endpoint = {endpoint}"));
    }
    if let Some(method) = &params.method {
        caveats.push(format!("method = {method}"));
    }
    if let Some(ip) = &params.ip {
        caveats.push(format!("ip = {ip}"));
    }

    let signature = sign_chain(secret, &params.payment_hash, &caveats);

    Macaroon {
        id: params.payment_hash.encode_hex::<String>(),
        caveats,
        signature: signature.encode_hex::<String>(),
    }
}

/// Decode a serialized (`base64url(JSON(...))`) credential. Never panics
/// or propagates a parse error up the request path — any structural
/// problem collapses to `None`.
pub fn decode(raw: &str) -> Option<Macaroon> {
    let bytes = decode_config(raw, URL_SAFE_NO_PAD).ok()?;
    let mac: Macaroon = serde_json::from_slice(&bytes).ok()?;
    if <[u8; 32]>::from_hex(&mac.id).is_err() || <[u8; 32]>::from_hex(&mac.signature).is_err() {
        return None;
    }
    Some(mac)
}

/// Serialize a macaroon to its wire form.
pub fn encode(mac: &Macaroon) -> String {
    let json = serde_json::to_vec(mac).expect("Macaroon is always serializable");
    encode_config(json, URL_SAFE_NO_PAD)
}

/// Recompute the HMAC chain and check every caveat's predicate against
/// `ctx`. Unknown caveat keys are tolerated (forward compatibility) but
/// carry no semantic effect.
pub fn verify(secret: &[u8], mac: &Macaroon, ctx: &VerifyContext) -> Result<VerifiedClaims, GateError> {
    let payment_hash = <[u8; 32]>::from_hex(&mac.id).map_err(|_| GateError::InvalidMacaroon)?;
    let expected_sig =
        <[u8; 32]>::from_hex(&mac.signature).map_err(|_| GateError::InvalidMacaroon)?;

    let computed = sign_chain(secret, &payment_hash, &mac.caveats);
    if !constant_time_eq(&computed, &expected_sig) {
        return Err(GateError::InvalidSignature);
    }

    for caveat in &mac.caveats {
        check_caveat(caveat, ctx)?;
    }

    Ok(VerifiedClaims { payment_hash })
}

fn check_caveat(caveat: &str, ctx: &VerifyContext) -> Result<(), GateError> {
    let (key, value) = caveat
        .split_once(" = ")
        .ok_or_else(|| GateError::CaveatFailed(format!("Malformed caveat: {caveat}")))?;

    match key {
        "expires_at" => {
            let expires_at: u64 = value
                .parse()
                .map_err(|_| GateError::CaveatFailed(format!("Malformed caveat: {caveat}")))?;
            if ctx.now_secs > expires_at {
                return Err(GateError::CaveatFailed("Macaroon has expired".to_string()));
            }
        }
        "endpoint" => {
            if let Some(endpoint) = ctx.endpoint {
                if endpoint != value {
                    return Err(GateError::CaveatFailed("Endpoint mismatch".to_string()));
                }
            }
        }
        "method" => {
            if let Some(method) = ctx.method {
                if !method.eq_ignore_ascii_case(value) {
                    return Err(GateError::CaveatFailed("Method mismatch".to_string()));
                }
            }
        }
        "ip" => {
            if let Some(ip) = ctx.ip {
                if ip != value {
                    return Err(GateError::CaveatFailed("IP mismatch".to_string()));
                }
            }
        }
        _ => {
            // unrecognized caveat key: tolerated, no semantic effect.
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(hash: [u8; 32]) -> MintParams {
        MintParams {
            payment_hash: hash,
            expires_at: Some(4_102_444_800), // year 2100, far future
            endpoint: Some("/api/joke".to_string()),
            method: Some("GET".to_string()),
            ip: None,
        }
    }

    fn ctx(now_secs: u64) -> VerifyContext<'static> {
        VerifyContext {
            now_secs,
            endpoint: Some("/api/joke"),
            method: Some("GET"),
            ip: None,
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let secret = b"super-secret-key-material-32-bytes!";
        let hash = [7u8; 32];
        let mac = mint(secret, &params(hash));
        let claims = verify(secret, &mac, &ctx(1000)).expect("should verify");
        assert_eq!(claims.payment_hash, hash);
    }

    #[test]
    fn wrong_secret_fails_signature() {
        let hash = [7u8; 32];
        let mac = mint(b"secret-a-aaaaaaaaaaaaaaaaaaaaaaaaa", &params(hash));
        let err = verify(b"secret-b-bbbbbbbbbbbbbbbbbbbbbbbbb", &mac, &ctx(1000)).unwrap_err();
        assert!(matches!(err, GateError::InvalidSignature));
    }

    #[test]
    fn endpoint_mismatch_rejected() {
        let secret = b"super-secret-key-material-32-bytes!";
        let hash = [7u8; 32];
        let mac = mint(secret, &params(hash));
        let mut c = ctx(1000);
        c.endpoint = Some("/api/time");
        let err = verify(secret, &mac, &c).unwrap_err();
        assert!(matches!(err, GateError::CaveatFailed(_)));
    }

    #[test]
    fn expired_macaroon_rejected() {
        let secret = b"super-secret-key-material-32-bytes!";
        let hash = [7u8; 32];
        let mut p = params(hash);
        p.expires_at = Some(500);
        let mac = mint(secret, &p);
        assert!(verify(secret, &mac, &ctx(1000)).is_err());
        assert!(verify(secret, &mac, &ctx(500)).is_ok());
    }

    #[test]
    fn disabling_context_dimension_skips_that_check() {
        let secret = b"super-secret-key-material-32-bytes!";
        let hash = [7u8; 32];
        let mac = mint(secret, &params(hash));
        let mut c = ctx(1000);
        c.endpoint = None;
        assert!(verify(secret, &mac, &c).is_ok());
    }

    #[test]
    fn caveat_order_is_part_of_the_signature() {
        let secret = b"super-secret-key-material-32-bytes!";
        let hash = [1u8; 32];
        let mac_a = Macaroon {
            id: hash.encode_hex::<String>(),
            caveats: vec!["a = 1".to_string(), "b = 2".to_string()],
            signature: sign_chain(secret, &hash, &["a = 1".to_string(), "b = 2".to_string()])
                .encode_hex::<String>(),
        };
        let mac_b = Macaroon {
            id: hash.encode_hex::<String>(),
            caveats: vec!["b = 2".to_string(), "a = 1".to_string()],
            signature: sign_chain(secret, &hash, &["b = 2".to_string(), "a = 1".to_string()])
                .encode_hex::<String>(),
        };
        assert_ne!(mac_a.signature, mac_b.signature);
    }

    #[test]
    fn byte_mutation_always_invalidates_signature() {
        let secret = b"super-secret-key-material-32-bytes!";
        let hash = [9u8; 32];
        let mac = mint(secret, &params(hash));
        let raw = encode(&mac);
        let bytes = decode_config(&raw, URL_SAFE_NO_PAD).unwrap();

        let mut rejections = 0;
        let trials = bytes.len();
        for i in 0..trials {
            let mut mutated = bytes.clone();
            mutated[i] ^= 0xFF;
            let candidate = encode_config(&mutated, URL_SAFE_NO_PAD);
            match decode(&candidate) {
                Some(m) => {
                    if verify(secret, &m, &ctx(1000)).is_err() {
                        rejections += 1;
                    }
                }
                None => rejections += 1, // malformed JSON/base64 also counts as rejected
            }
        }
        assert_eq!(rejections, trials);
    }
}
