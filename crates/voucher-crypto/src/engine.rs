//! Signature engine.
//!
//! Free functions over [`PrivateKey`] / [`PublicKey`]. Signatures are
//! fixed-width `r || s` as used by JWS, and deterministic (RFC 6979): the same
//! key and message always produce the same bytes.

use voucher_core::clock::unix_timestamp;

use crate::error::CryptoError;
use crate::keys::{Curve, KeyPair, PrivateKey, PublicKey};

/// Generate a new key pair on `curve`, stamped with the current time.
pub fn generate_key_pair(curve: Curve) -> KeyPair {
    KeyPair::generate(curve, unix_timestamp())
}

/// Sign `message` with `key`.
pub fn sign(message: &[u8], key: &PrivateKey) -> Result<Vec<u8>, CryptoError> {
    key.sign(message)
}

/// Verify `signature` over `message`.
///
/// Returns `false` for any mismatch, including signatures of the wrong length
/// or for a different curve; never errors.
pub fn verify(message: &[u8], signature: &[u8], key: &PublicKey) -> bool {
    if signature.len() != key.curve().signature_len() {
        return false;
    }
    key.verify(message, signature)
}

/// Export a public key as SPKI PEM.
pub fn export_public_key(key: &PublicKey) -> Result<String, CryptoError> {
    key.to_pem()
}

/// Import a public key from SPKI PEM.
pub fn import_public_key(pem: &str) -> Result<PublicKey, CryptoError> {
    PublicKey::from_pem(pem)
}
