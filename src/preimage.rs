//! Preimage verifier (component C): `SHA256(preimage) == payment_hash`,
//! compared in constant time. Never panics on malformed hex.

use hex::FromHex;
use sha2::{Digest, Sha256};

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

/// Returns `true` iff `preimage_hex` hashes to `payment_hash_hex`. Any
/// hex-decode failure on either side yields `false` rather than an error.
pub fn verify_preimage(preimage_hex: &str, payment_hash_hex: &str) -> bool {
    let preimage = match Vec::<u8>::from_hex(preimage_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let expected = match <[u8; 32]>::from_hex(payment_hash_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut hasher = Sha256::new();
    hasher.update(&preimage);
    let computed: [u8; 32] = hasher.finalize().into();

    constant_time_eq(&computed, &expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn matching_preimage_verifies() {
        let preimage = [3u8; 32];
        let mut hasher = Sha256::new();
        hasher.update(preimage);
        let hash: [u8; 32] = hasher.finalize().into();

        assert!(verify_preimage(&hex::encode(preimage), &hex::encode(hash)));
    }

    #[test]
    fn mismatched_preimage_fails() {
        let preimage = [3u8; 32];
        let other_hash = [4u8; 32];
        assert!(!verify_preimage(
            &hex::encode(preimage),
            &hex::encode(other_hash)
        ));
    }

    #[test]
    fn malformed_hex_never_panics() {
        assert!(!verify_preimage("not-hex", "also-not-hex"));
        assert!(!verify_preimage("ab", &hex::encode([1u8; 32])));
    }
}
