//! Compact token encoding.
//!
//! A token is `base64url(header) . base64url(claims) . base64url(signature)`,
//! the JWS compact serialization, so stock JWT libraries can verify it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use voucher_crypto::{Algorithm, KeyPair, VerificationKey};

use crate::claims::VoucherClaims;
use crate::error::CodecError;

/// Claim names a strict decoder accepts.
const CLAIM_FIELDS: [&str; 8] = ["vid", "sty", "sub", "bat", "lim", "iat", "exp", "jti"];

/// Claims that must be non-negative integer Unix seconds.
const TIMESTAMP_FIELDS: [&str; 2] = ["iat", "exp"];

/// Token header: algorithm and signing key id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: Algorithm,
    pub typ: String,
    pub kid: String,
}

impl TokenHeader {
    pub fn new(alg: Algorithm, kid: &str) -> Self {
        Self {
            alg,
            typ: "JWT".to_string(),
            kid: kid.to_string(),
        }
    }
}

/// A token split into its decoded segments.
#[derive(Debug, Clone)]
pub struct TokenParts {
    pub header: TokenHeader,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    signing_input: String,
}

impl TokenParts {
    /// The bytes the signature covers: the first two segments as transmitted.
    pub fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }
}

/// Serialize claims after checking their invariants.
pub fn encode_claims(claims: &VoucherClaims) -> Result<Vec<u8>, CodecError> {
    claims.check()?;
    serde_json::to_vec(claims).map_err(|e| CodecError::MalformedClaims(e.to_string()))
}

/// Parse and check claims.
///
/// In `strict` mode any top-level field outside the known claim set is
/// rejected, so a token cannot smuggle fields meant for another consumer.
pub fn decode_claims(payload: &[u8], strict: bool) -> Result<VoucherClaims, CodecError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| CodecError::MalformedClaims(format!("invalid JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(CodecError::MalformedClaims(
            "claims must be a JSON object".to_string(),
        ));
    };

    if strict {
        if let Some(unknown) = map.keys().find(|k| !CLAIM_FIELDS.contains(&k.as_str())) {
            return Err(CodecError::MalformedClaims(format!(
                "unknown field {unknown:?}"
            )));
        }
    }

    for field in TIMESTAMP_FIELDS {
        match map.get(field) {
            Some(v) if v.is_u64() => {}
            Some(_) => {
                return Err(CodecError::MalformedClaims(format!(
                    "{field} must be a non-negative integer"
                )));
            }
            None => {
                return Err(CodecError::MalformedClaims(format!(
                    "missing field {field:?}"
                )));
            }
        }
    }

    let claims: VoucherClaims = serde_json::from_value(Value::Object(map))
        .map_err(|e| CodecError::MalformedClaims(e.to_string()))?;
    claims.check()?;
    Ok(claims)
}

/// Join header, payload and signature into a token string.
pub fn assemble_token(
    header: &TokenHeader,
    payload: &[u8],
    signature: &[u8],
) -> Result<String, CodecError> {
    let input = signing_input(header, payload)?;
    Ok(format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Split a token into exactly three decoded segments.
pub fn split_token(token: &str) -> Result<TokenParts, CodecError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
        return Err(CodecError::MalformedToken(format!(
            "expected 3 segments, got {}",
            segments.len()
        )));
    };
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CodecError::MalformedToken("empty segment".to_string()));
    }

    let header_bytes = decode_segment(header_b64, "header")?;
    let payload = decode_segment(payload_b64, "payload")?;
    let signature = decode_segment(signature_b64, "signature")?;

    let header: TokenHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| CodecError::MalformedToken(format!("header: {e}")))?;

    Ok(TokenParts {
        header,
        payload,
        signature,
        signing_input: format!("{header_b64}.{payload_b64}"),
    })
}

/// Encode, sign and assemble in one step.
pub fn sign_token(claims: &VoucherClaims, key_pair: &KeyPair) -> Result<String, CodecError> {
    let header = TokenHeader::new(key_pair.algorithm(), &key_pair.id);
    let payload = encode_claims(claims)?;
    let input = signing_input(&header, &payload)?;
    let signature = voucher_crypto::sign(input.as_bytes(), key_pair.private_key())?;
    assemble_token(&header, &payload, &signature)
}

/// Find the key in `keys` whose signature check passes.
///
/// Keys whose id matches the header `kid` are tried first; the rest follow so
/// tokens with a stale or missing `kid` still verify. A key is only tried
/// with the algorithm it was made for.
pub fn verify_parts<'a>(
    parts: &TokenParts,
    keys: &'a [VerificationKey],
) -> Option<&'a VerificationKey> {
    let kid = parts.header.kid.as_str();
    keys.iter()
        .filter(|k| k.kid == kid)
        .chain(keys.iter().filter(|k| k.kid != kid))
        .filter(|k| k.key.algorithm() == parts.header.alg)
        .find(|k| voucher_crypto::verify(parts.signing_input(), &parts.signature, &k.key))
}

fn signing_input(header: &TokenHeader, payload: &[u8]) -> Result<String, CodecError> {
    let header_json =
        serde_json::to_vec(header).map_err(|e| CodecError::MalformedToken(e.to_string()))?;
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(payload)
    ))
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, CodecError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| CodecError::MalformedToken(format!("{name}: {e}")))
}
