use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Verifies an HMAC-SHA256 webhook signature in `sha256=<hex>` header form.
/// The comparison is constant-time.
pub fn valid_sha256_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let header = header.trim();
    let Some((scheme, hex_digest)) = header.split_once('=') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("sha256") {
        return false;
    }
    let Ok(provided) = hex::decode(hex_digest.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Compares two shared tokens without leaking their length or content
/// through timing, by comparing digests instead of the raw values.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}
