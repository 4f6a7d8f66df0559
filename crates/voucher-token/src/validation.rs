//! Token validation pipeline shared by online and offline validation.
//!
//! Checks run in a fixed order and the first failure is the single reported
//! error: structure, signature, claims, voucher id, expiry, print type.

use serde::Serialize;
use uuid::Uuid;
use voucher_crypto::VerificationKey;

use crate::claims::VoucherClaims;
use crate::codec;

pub const ERR_INVALID_SIGNATURE: &str = "Invalid signature";
pub const ERR_VOUCHER_MISMATCH: &str = "Voucher ID mismatch";
pub const ERR_EXPIRED: &str = "Token has expired";
pub const ERR_PRINT_REQUIRED: &str = "Print token required";

/// How much of the verification pipeline stands behind a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Heuristic only: rule-table match, or the key store was unreachable.
    Low,
    /// Signature verified against a cached key set.
    Medium,
    /// Signature verified against the live key set.
    High,
}

/// Optional constraints applied after the signature check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationContext {
    pub expected_voucher_id: Option<Uuid>,
    pub allow_expired: bool,
    pub require_print_token: bool,
}

impl ValidationContext {
    pub fn for_voucher(voucher_id: Uuid) -> Self {
        Self {
            expected_voucher_id: Some(voucher_id),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub confidence: Confidence,
    /// Decoded claims; present only on a valid result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voucher_info: Option<VoucherClaims>,
    /// Id of the key the signature verified against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub(crate) fn valid(checked: Checked, confidence: Confidence) -> Self {
        Self {
            is_valid: true,
            confidence,
            voucher_info: Some(checked.claims),
            key_id: Some(checked.key_id),
            errors: Vec::new(),
        }
    }

    pub(crate) fn invalid(error: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            is_valid: false,
            confidence,
            voucher_info: None,
            key_id: None,
            errors: vec![error.into()],
        }
    }

    /// The first (and only) reported error.
    pub fn error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}

/// A token that passed every check.
#[derive(Debug, Clone)]
pub(crate) struct Checked {
    pub claims: VoucherClaims,
    pub key_id: String,
}

/// Why a token was refused. `claims` is set once the payload was decoded
/// from a correctly signed token, for audit correlation.
#[derive(Debug, Clone)]
pub(crate) struct Rejection {
    pub message: String,
    pub claims: Option<VoucherClaims>,
}

impl Rejection {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            claims: None,
        }
    }

    fn with_claims(message: &str, claims: VoucherClaims) -> Self {
        Self {
            message: message.to_string(),
            claims: Some(claims),
        }
    }
}

/// Run the pipeline against `keys` at time `now`.
pub(crate) fn check_token(
    token: &str,
    keys: &[VerificationKey],
    ctx: &ValidationContext,
    now: i64,
    strict: bool,
) -> Result<Checked, Rejection> {
    let parts = codec::split_token(token).map_err(|e| Rejection::new(e.to_string()))?;

    let key = codec::verify_parts(&parts, keys).ok_or_else(|| Rejection::new(ERR_INVALID_SIGNATURE))?;

    let claims =
        codec::decode_claims(&parts.payload, strict).map_err(|e| Rejection::new(e.to_string()))?;

    if ctx
        .expected_voucher_id
        .is_some_and(|expected| expected != claims.voucher_id)
    {
        return Err(Rejection::with_claims(ERR_VOUCHER_MISMATCH, claims));
    }
    if !ctx.allow_expired && claims.is_expired_at(now) {
        return Err(Rejection::with_claims(ERR_EXPIRED, claims));
    }
    if ctx.require_print_token && !claims.is_print() {
        return Err(Rejection::with_claims(ERR_PRINT_REQUIRED, claims));
    }

    Ok(Checked {
        claims,
        key_id: key.kid.clone(),
    })
}
