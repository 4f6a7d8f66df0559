//! SHA-256 fingerprints for keys and tokens.

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Key fingerprint as lowercase hex byte pairs joined by `:`, the form
/// printed next to exported keys.
pub fn fingerprint_of(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    let mut out = String::with_capacity(digest.len() * 3);
    for (i, byte) in digest.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Hash a token for audit records (raw tokens are never recorded).
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
