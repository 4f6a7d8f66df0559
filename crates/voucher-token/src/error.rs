//! Error types for token encoding, key management and issuance.
//!
//! Validation outcomes (bad signature, expiry, voucher mismatch) are not
//! errors: they are reported through `ValidationResult`.

use voucher_crypto::{Algorithm, CryptoError};

use crate::store::StoreError;

/// Structurally invalid tokens or claims. Always fail closed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Malformed claims: {0}")]
    MalformedClaims(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Key manager failures.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("No active signing key for {0}")]
    NoActiveKey(Algorithm),

    #[error("Key rotation conflict: {0}")]
    RotationConflict(String),

    #[error("Corrupt key record: {0}")]
    Corrupt(String),

    #[error("Key store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Token issuance failures.
///
/// `InvalidTtl`, `EmptyBatch`, `InvalidLimit` and `InvalidPrefix` are caller
/// mistakes and are returned before any signing or store I/O happens.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("Invalid TTL {ttl_secs}s: must be between 1 and {max_secs}s")]
    InvalidTtl { ttl_secs: i64, max_secs: i64 },

    #[error("Batch must contain at least one voucher")]
    EmptyBatch,

    #[error("Redemption limit must be at least 1")]
    InvalidLimit,

    #[error("Invalid batch prefix {0:?}: expected 1-8 uppercase letters or digits")]
    InvalidPrefix(String),

    #[error("No free batch code after {0} attempts")]
    BatchCodeExhausted(u32),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Issuance cache error: {0}")]
    Store(#[from] StoreError),
}
