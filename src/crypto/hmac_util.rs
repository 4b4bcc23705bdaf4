use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes `hex(HMAC-SHA256(secret, message))`, used both for the Stripe
/// signature check and for signing our own outbound webhook payloads (spec
/// §4.6).
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a hex-encoded HMAC against a freshly computed
/// one. `hex::decode` failure (malformed signature) is treated as mismatch.
/// `openssl::memcmp::eq` panics on a length mismatch, so a signature that
/// decodes to the wrong number of bytes (any length the attacker likes) is
/// rejected before reaching it rather than crashing the caller.
pub fn verify_hmac_sha256_hex(secret: &str, message: &str, signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(hmac_sha256_hex(secret, message)) else {
        return false;
    };
    let Ok(given) = hex::decode(signature_hex) else {
        return false;
    };
    if expected.len() != given.len() {
        return false;
    }
    openssl::memcmp::eq(&expected, &given)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let sig = hmac_sha256_hex("secret", "payload");
        assert!(verify_hmac_sha256_hex("secret", "payload", &sig));
        assert!(!verify_hmac_sha256_hex("secret", "payload", "deadbeef"));
        assert!(!verify_hmac_sha256_hex("wrong", "payload", &sig));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(!verify_hmac_sha256_hex("secret", "payload", "not-hex"));
    }

    #[test]
    fn rejects_short_valid_hex_without_panicking() {
        assert!(!verify_hmac_sha256_hex("secret", "payload", "deadbeef"));
    }
}
