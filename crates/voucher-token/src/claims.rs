//! Voucher claims: the signed payload of a redemption token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;

/// Who a token is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    /// A single user.
    User,
    /// An anonymous print run sharing a batch code.
    Print,
}

impl SubjectType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Print => "print",
        }
    }

    /// Single-character tag used as the first symbol of a short code.
    pub const fn tag(self) -> u8 {
        match self {
            Self::User => b'U',
            Self::Print => b'P',
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'U' => Some(Self::User),
            b'P' => Some(Self::Print),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "print" => Ok(Self::Print),
            other => Err(format!("unknown subject type {other:?}")),
        }
    }
}

/// Claims embedded in a voucher token.
///
/// Field order is the wire order; encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherClaims {
    #[serde(rename = "vid")]
    pub voucher_id: Uuid,
    #[serde(rename = "sty")]
    pub subject_type: SubjectType,
    /// User the token is bound to (`user` tokens only).
    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Shared print-run code (`print` tokens only).
    #[serde(rename = "bat", default, skip_serializing_if = "Option::is_none")]
    pub batch_code: Option<String>,
    #[serde(rename = "lim", default, skip_serializing_if = "Option::is_none")]
    pub redemption_limit: Option<u32>,
    /// Issued at (unix timestamp).
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expiration (unix timestamp).
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// Unique per issuance.
    #[serde(rename = "jti", default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl VoucherClaims {
    pub fn for_user(voucher_id: Uuid, user_id: &str, issued_at: i64, ttl_secs: i64) -> Self {
        Self {
            voucher_id,
            subject_type: SubjectType::User,
            user_id: Some(user_id.to_string()),
            batch_code: None,
            redemption_limit: None,
            issued_at,
            expires_at: issued_at + ttl_secs,
            token_id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn for_print(
        voucher_id: Uuid,
        batch_code: &str,
        redemption_limit: u32,
        issued_at: i64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            voucher_id,
            subject_type: SubjectType::Print,
            user_id: None,
            batch_code: Some(batch_code.to_string()),
            redemption_limit: Some(redemption_limit),
            issued_at,
            expires_at: issued_at + ttl_secs,
            token_id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn is_user(&self) -> bool {
        self.subject_type == SubjectType::User
    }

    pub fn is_print(&self) -> bool {
        self.subject_type == SubjectType::Print
    }

    /// A token is expired from its `exp` second onwards.
    pub const fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_secs(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }

    /// Check the structural invariants every encoded or decoded claim set
    /// must satisfy.
    pub fn check(&self) -> Result<(), CodecError> {
        let fail = |msg: &str| Err(CodecError::MalformedClaims(msg.to_string()));

        if self.issued_at < 0 {
            return fail("iat must not be negative");
        }
        if self.expires_at <= self.issued_at {
            return fail("exp must be after iat");
        }
        if self.user_id.is_some() && self.batch_code.is_some() {
            return fail("sub and bat are mutually exclusive");
        }
        if self.token_id.as_deref().is_some_and(str::is_empty) {
            return fail("jti must not be empty");
        }

        match self.subject_type {
            SubjectType::User => {
                if self.user_id.as_deref().is_none_or(str::is_empty) {
                    return fail("user token requires sub");
                }
                if self.redemption_limit.is_some() {
                    return fail("user token must not carry lim");
                }
            }
            SubjectType::Print => {
                if self.batch_code.as_deref().is_none_or(str::is_empty) {
                    return fail("print token requires bat");
                }
                match self.redemption_limit {
                    Some(limit) if limit > 0 => {}
                    Some(_) => return fail("lim must be at least 1"),
                    None => return fail("print token requires lim"),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn constructors_produce_valid_claims() {
        let user = VoucherClaims::for_user(Uuid::new_v4(), "u1", 1_000, 300);
        user.check().unwrap();
        assert!(user.is_user());
        assert_eq!(user.expires_at, 1_300);

        let print = VoucherClaims::for_print(Uuid::new_v4(), "SHOP-2026-10-AB2C", 100, 1_000, 60);
        print.check().unwrap();
        assert!(print.is_print());
        assert_ne!(user.token_id, print.token_id);
    }

    #[test]
    fn user_and_batch_are_mutually_exclusive() {
        let mut claims = VoucherClaims::for_user(Uuid::new_v4(), "u1", 1_000, 300);
        claims.batch_code = Some("SHOP-2026-10-AB2C".into());
        let err = claims.check().unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn conditional_fields_are_required() {
        let mut user = VoucherClaims::for_user(Uuid::new_v4(), "u1", 1_000, 300);
        user.user_id = None;
        assert!(user.check().is_err());

        let mut print = VoucherClaims::for_print(Uuid::new_v4(), "B", 5, 1_000, 300);
        print.redemption_limit = None;
        assert!(print.check().is_err());
        print.redemption_limit = Some(0);
        assert!(print.check().is_err());
        print.redemption_limit = Some(1);
        print.batch_code = None;
        assert!(print.check().is_err());
    }

    #[test]
    fn expiry_must_follow_issuance() {
        let claims = VoucherClaims::for_user(Uuid::new_v4(), "u1", 1_000, 0);
        assert!(claims.check().is_err());
    }

    #[test]
    fn expiry_boundary() {
        let claims = VoucherClaims::for_user(Uuid::new_v4(), "u1", 1_000, 300);
        assert!(!claims.is_expired_at(1_299));
        assert!(claims.is_expired_at(1_300));
        assert_eq!(claims.remaining_secs(1_200), 100);
        assert_eq!(claims.remaining_secs(2_000), 0);
    }

    #[test]
    fn subject_tags_roundtrip() {
        for st in [SubjectType::User, SubjectType::Print] {
            assert_eq!(SubjectType::from_tag(st.tag()), Some(st));
            assert_eq!(st.as_str().parse::<SubjectType>().unwrap(), st);
        }
        assert_eq!(SubjectType::from_tag(b'X'), None);
    }
}
