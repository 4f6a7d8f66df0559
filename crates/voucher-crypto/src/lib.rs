//! Voucher Token Signing Library
//!
//! Stateless cryptographic primitives behind voucher redemption tokens.
//! Nothing in this crate performs I/O or holds shared mutable state, so every
//! function is safe to call from any number of tasks.
//!
//! ## Crypto primitives
//!
//! - **Signatures**: ECDSA over P-256 (`ES256`, default) or P-384 (`ES384`),
//!   deterministic nonces (RFC 6979), fixed-width `r || s` encoding
//! - **Key export**: SPKI/PKCS#8 PEM and JWK / JWK Set
//! - **Checksums**: HKDF-SHA256 derived HMAC-SHA256 key for short codes
//! - **Fingerprints**: SHA-256 of tokens and public keys

pub mod checksum;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod jwk;
pub mod keys;

pub use checksum::{ChecksumKey, constant_time_str_eq};
pub use engine::{export_public_key, generate_key_pair, import_public_key, sign, verify};
pub use error::CryptoError;
pub use fingerprint::{fingerprint_of, token_fingerprint};
pub use jwk::{Jwk, JwkSet, VerificationKey};
pub use keys::{Algorithm, Curve, KeyPair, PrivateKey, PublicKey};
