//! Voucher Token Library
//!
//! Signed redemption tokens for a voucher platform:
//! - Compact JWS token codec with strict claim decoding
//! - Signing key lifecycle (rotation, overlap window, JWKS export) in a
//!   shared key-value store
//! - Per-user and print-batch issuance with an issuance cache and audit trail
//! - Human-typable short codes with keyed checksums
//! - Offline validation against a cached key set, with later reconciliation

pub mod audit;
pub mod cache;
pub mod claims;
pub mod codec;
pub mod error;
pub mod issuer;
pub mod keys;
pub mod offline;
pub mod short_code;
pub mod store;
pub mod validation;

pub use claims::{SubjectType, VoucherClaims};
pub use error::{CodecError, IssueError, KeyError};
pub use issuer::{BatchOptions, OnlineVerifier, TokenIssuer};
pub use keys::{KeyManager, RotationPolicy};
pub use offline::{OfflineOptions, OfflineValidator};
pub use short_code::{ShortCodeOptions, ShortCodeService};
pub use store::{KeyValueStore, MemoryStore, SharedStore, SqliteStore, StoreError, TimedStore};
pub use validation::{Confidence, ValidationContext, ValidationResult};
