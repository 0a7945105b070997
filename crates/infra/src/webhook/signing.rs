//! HMAC-SHA256 webhook signatures.
//!
//! The platform sends `X-Signature: sha256=<hex>` computed over the raw body.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

const PREFIX: &str = "sha256=";

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// Sign a payload and return the header value (`sha256=<hex>`).
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(payload);
    format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header against a payload in constant time.
///
/// The `sha256=` prefix is optional; anything that is not valid hex fails.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let hex_part = signature.strip_prefix(PREFIX).unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };

    let mut mac = mac(secret);
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let secret = "test_secret_12345";
        let payload = br#"{"event":"message_received"}"#;
        let sig = sign_payload(secret, payload);

        assert!(sig.starts_with("sha256="));
        assert!(verify_signature(secret, payload, &sig));
        assert!(verify_signature(secret, payload, &sig["sha256=".len()..]));
        assert!(!verify_signature("wrong_secret", payload, &sig));
        assert!(!verify_signature(secret, b"tampered", &sig));
    }

    #[test]
    fn malformed_signatures_fail() {
        let payload = b"{}";
        assert!(!verify_signature("s", payload, ""));
        assert!(!verify_signature("s", payload, "sha256="));
        assert!(!verify_signature("s", payload, "sha256=not-hex"));
        assert!(!verify_signature("s", payload, "sha256=abcd"));
    }
}
