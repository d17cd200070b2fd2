use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the HMAC-SHA256 signature of a payload, hex encoded.
///
/// The result only contains `[0-9a-f]` and is safe to place in a
/// header or message attribute.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> String {
    // HMAC accepts keys of any length, including empty ones.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Signature for a webhook payload, or `None` when the webhook has no secret.
pub fn signature_for_payload(payload: &[u8], secret: Option<&str>) -> Option<String> {
    secret.map(|secret| compute_signature(secret.as_bytes(), payload))
}

/// Verify a received signature.
///
/// Intended for receivers. Comparison is constant time.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&signature).is_ok()
}
