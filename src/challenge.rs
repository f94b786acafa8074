//! L402 wire format (component B): the 402 challenge header/body, and
//! strict parsing of the `Authorization` header a paying client sends back.

use serde::Serialize;

/// Body of a 402 challenge response, per the wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeBody {
    pub status: u16,
    pub message: String,
    pub payment_hash: String,
    pub invoice: String,
    pub macaroon: String,
    pub amount_sats: u64,
    pub description: Option<String>,
    pub protocol: String,
    pub instructions: Instructions,
}

#[derive(Debug, Clone, Serialize)]
pub struct Instructions {
    pub step1: String,
    pub step2: String,
    pub step3: String,
}

impl ChallengeBody {
    pub fn new(
        payment_hash: String,
        invoice: String,
        macaroon: String,
        amount_sats: u64,
        description: Option<String>,
    ) -> Self {
        Self {
            status: 402,
            message: "Payment Required".to_string(),
            payment_hash,
            invoice,
            macaroon,
            amount_sats,
            description,
            protocol: "L402".to_string(),
            instructions: Instructions {
                step1: "Pay the invoice using any Lightning wallet.".to_string(),
                step2: "Obtain the payment preimage once the invoice settles.".to_string(),
                step3: "Retry the request with Authorization: L402 <macaroon>:<preimage>"
                    .to_string(),
            },
        }
    }
}

/// Builds the exact `WWW-Authenticate` header value for a challenge:
/// `L402 invoice="<bolt11>", macaroon="<base64url>"`.
pub fn www_authenticate_header(invoice: &str, macaroon_b64: &str) -> String {
    format!(r#"L402 invoice="{invoice}", macaroon="{macaroon_b64}""#)
}

/// The decoded `(macaroon_raw, preimage_hex)` pair from an `Authorization`
/// header. Parsing is deliberately strict: scheme token `L402` compares
/// case-insensitively, everything after the first space is split on the
/// *first* `:` and both halves must be non-empty. Any deviation yields
/// `None` — looser parsing risks downgrading to an unbound credential.
pub fn parse_authorization(header_value: &str) -> Option<(String, String)> {
    let mut parts = header_value.splitn(2, ' ');
    let scheme = parts.next()?;
    let rest = parts.next()?;

    if !scheme.eq_ignore_ascii_case("L402") {
        return None;
    }

    let (mac, preimage) = rest.split_once(':')?;
    if mac.is_empty() || preimage.is_empty() {
        return None;
    }

    Some((mac.to_string(), preimage.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_exact_literal_format() {
        let h = www_authenticate_header("lnbc1...", "eyJ...");
        assert_eq!(h, r#"L402 invoice="lnbc1...", macaroon="eyJ...""#);
    }

    #[test]
    fn parse_is_case_insensitive_on_scheme_only() {
        assert!(parse_authorization("l402 abc:def").is_some());
        assert!(parse_authorization("L402 abc:def").is_some());
        assert!(parse_authorization("L402abc:def").is_none());
    }

    #[test]
    fn parse_rejects_missing_colon_or_empty_halves() {
        assert!(parse_authorization("L402 abcdef").is_none());
        assert!(parse_authorization("L402 :def").is_none());
        assert!(parse_authorization("L402 abc:").is_none());
    }

    #[test]
    fn parse_splits_on_first_colon_only() {
        let (mac, preimage) = parse_authorization("L402 abc:de:f").unwrap();
        assert_eq!(mac, "abc");
        assert_eq!(preimage, "de:f");
    }

    #[test]
    fn parse_is_left_inverse_of_emission() {
        for (m, p) in [("mac1", "deadbeef"), ("a", "b"), ("xx==", "0123456789abcdef")] {
            let header = format!("L402 {m}:{p}");
            let (out_m, out_p) = parse_authorization(&header).unwrap();
            assert_eq!(out_m, m);
            assert_eq!(out_p, p);
        }
    }
}
