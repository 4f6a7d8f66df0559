//! JSON Web Key export of public keys.
//!
//! Disconnected devices are handed a [`JwkSet`] ahead of time and verify
//! tokens against it without ever contacting the key store.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::keys::{Curve, PublicKey};

/// An EC public key in JWK form (RFC 7517 / RFC 7518 section 6.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

/// A JWK Set document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// A public key labelled with the id tokens reference in their `kid` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationKey {
    pub kid: String,
    pub key: PublicKey,
}

impl PublicKey {
    pub fn to_jwk(&self, kid: Option<&str>) -> Jwk {
        let sec1 = self.to_sec1_bytes();
        let n = self.curve().coordinate_len();
        // Uncompressed point: 0x04 || x || y
        let (x, y) = sec1[1..].split_at(n);
        Jwk {
            kty: "EC".to_string(),
            crv: self.curve().name().to_string(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
            kid: kid.map(ToString::to_string),
            alg: Some(self.algorithm().as_str().to_string()),
            key_use: Some("sig".to_string()),
        }
    }

    pub fn from_jwk(jwk: &Jwk) -> Result<Self, CryptoError> {
        if jwk.kty != "EC" {
            return Err(CryptoError::MalformedKey(format!(
                "JWK kty must be EC, got {}",
                jwk.kty
            )));
        }
        let curve: Curve = jwk.crv.parse()?;
        if let Some(alg) = &jwk.alg {
            if alg != curve.algorithm().as_str() {
                return Err(CryptoError::MalformedKey(format!(
                    "JWK alg {alg} does not match curve {}",
                    curve.name()
                )));
            }
        }

        let x = decode_coordinate(&jwk.x, curve)?;
        let y = decode_coordinate(&jwk.y, curve)?;
        let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);
        Self::from_sec1_bytes(curve, &sec1)
    }
}

fn decode_coordinate(value: &str, curve: Curve) -> Result<Vec<u8>, CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| CryptoError::MalformedKey(format!("JWK coordinate: {e}")))?;
    if bytes.len() != curve.coordinate_len() {
        return Err(CryptoError::MalformedKey(format!(
            "JWK coordinate must be {} bytes, got {}",
            curve.coordinate_len(),
            bytes.len()
        )));
    }
    Ok(bytes)
}

impl VerificationKey {
    pub fn to_jwk(&self) -> Jwk {
        self.key.to_jwk(Some(&self.kid))
    }

    /// Parse a JWK; a `kid` is required.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, CryptoError> {
        let kid = jwk
            .kid
            .clone()
            .ok_or_else(|| CryptoError::MalformedKey("JWK without kid".to_string()))?;
        Ok(Self {
            kid,
            key: PublicKey::from_jwk(jwk)?,
        })
    }
}

impl JwkSet {
    pub fn from_keys(keys: &[VerificationKey]) -> Self {
        Self {
            keys: keys.iter().map(VerificationKey::to_jwk).collect(),
        }
    }

    pub fn verification_keys(&self) -> Result<Vec<VerificationKey>, CryptoError> {
        self.keys.iter().map(VerificationKey::from_jwk).collect()
    }

    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(json).map_err(|e| {
            CryptoError::SerializationError(format!("Failed to parse JWK set: {e}"))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn jwk_roundtrip_on_both_curves() {
        for curve in [Curve::P256, Curve::P384] {
            let kp = KeyPair::generate(curve, 0);
            let jwk = kp.verification_key().to_jwk();
            assert_eq!(jwk.kty, "EC");
            assert_eq!(jwk.crv, curve.name());
            assert_eq!(jwk.kid.as_deref(), Some(kp.id.as_str()));
            assert_eq!(jwk.key_use.as_deref(), Some("sig"));

            let back = VerificationKey::from_jwk(&jwk).unwrap();
            assert_eq!(back, kp.verification_key());
        }
    }

    #[test]
    fn jwk_serializes_use_field() {
        let kp = KeyPair::generate(Curve::P256, 0);
        let json = serde_json::to_value(kp.public_key().to_jwk(None)).unwrap();
        assert_eq!(json["use"], "sig");
        assert_eq!(json["alg"], "ES256");
        assert!(json.get("kid").is_none());
    }

    #[test]
    fn jwk_set_json_roundtrip() {
        let keys: Vec<_> = (0..3)
            .map(|_| KeyPair::generate(Curve::P256, 0).verification_key())
            .collect();
        let set = JwkSet::from_keys(&keys);
        let parsed = JwkSet::from_json(&set.to_json().unwrap()).unwrap();
        assert_eq!(parsed.verification_keys().unwrap(), keys);
    }

    #[test]
    fn from_jwk_rejects_bad_input() {
        let kp = KeyPair::generate(Curve::P256, 0);
        let good = kp.verification_key().to_jwk();

        let mut no_kid = good.clone();
        no_kid.kid = None;
        assert!(VerificationKey::from_jwk(&no_kid).is_err());

        let mut wrong_kty = good.clone();
        wrong_kty.kty = "RSA".into();
        assert!(PublicKey::from_jwk(&wrong_kty).is_err());

        let mut wrong_alg = good.clone();
        wrong_alg.alg = Some("ES384".into());
        assert!(PublicKey::from_jwk(&wrong_alg).is_err());

        let mut short_x = good.clone();
        short_x.x = URL_SAFE_NO_PAD.encode([1u8; 31]);
        assert!(PublicKey::from_jwk(&short_x).is_err());

        let mut off_curve = good;
        off_curve.y = URL_SAFE_NO_PAD.encode([7u8; 32]);
        assert!(PublicKey::from_jwk(&off_curve).is_err());
    }
}
