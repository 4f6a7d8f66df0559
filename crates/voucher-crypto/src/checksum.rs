//! Keyed checksums for short codes.
//!
//! A [`ChecksumKey`] is expanded from secret keying material via HKDF-SHA256
//! and used as an HMAC-SHA256 key. Checksums are rendered in a
//! caller-supplied alphabet so they stay short enough to type.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// HKDF info string for checksum key derivation.
const HKDF_INFO: &[u8] = b"voucher-short-code-checksum-v1";

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"voucher-short-code-hkdf-salt-v1";

/// Secret HMAC key for short-code checksums.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChecksumKey {
    key: [u8; 32],
}

impl std::fmt::Debug for ChecksumKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl ChecksumKey {
    /// Expand secret input keying material. The same secret always yields
    /// the same key.
    pub fn from_secret(ikm: &[u8]) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), ikm);
        let mut key = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self { key })
    }

    /// HMAC-SHA256 tag over `data`.
    pub fn tag(&self, data: &[u8]) -> Result<[u8; 32], CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }

    /// Render the first `len` tag bytes as characters of `alphabet`.
    ///
    /// `len` is capped at 32. With a 32-symbol alphabet every symbol is
    /// equally likely.
    pub fn checksum(&self, data: &[u8], alphabet: &[u8], len: usize) -> Result<String, CryptoError> {
        if alphabet.is_empty() {
            return Err(CryptoError::KeyDerivationFailed(
                "empty checksum alphabet".to_string(),
            ));
        }
        let tag = self.tag(data)?;
        Ok(tag
            .iter()
            .take(len)
            .map(|b| char::from(alphabet[usize::from(*b) % alphabet.len()]))
            .collect())
    }

    /// Check `candidate` against the checksum of `data` in constant time.
    pub fn verify_checksum(&self, data: &[u8], alphabet: &[u8], candidate: &str) -> bool {
        if candidate.is_empty() || candidate.len() > 32 {
            return false;
        }
        self.checksum(data, alphabet, candidate.len())
            .is_ok_and(|expected| constant_time_str_eq(&expected, candidate))
    }
}

/// Compare two strings in constant time (with respect to content).
///
/// Returns `false` immediately when lengths differ; lengths are not secret.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
