//! Signing key types.
//!
//! [`PrivateKey`] wraps secret material so that it cannot be serialized,
//! displayed or logged: `Debug` is redacted, there is no `Serialize`, and the
//! underlying scalar is zeroized on drop. The only way out is
//! [`PrivateKey::to_pkcs8_pem`], used by the key manager to persist pairs.

use std::fmt;
use std::str::FromStr;

use p256::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::fingerprint::fingerprint_of;
use crate::jwk::VerificationKey;

/// Elliptic curve a key lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Curve {
    #[default]
    #[serde(rename = "P-256")]
    P256,
    #[serde(rename = "P-384")]
    P384,
}

impl Curve {
    pub const fn algorithm(self) -> Algorithm {
        match self {
            Self::P256 => Algorithm::Es256,
            Self::P384 => Algorithm::Es384,
        }
    }

    /// JWK `crv` name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
        }
    }

    /// Byte length of one affine coordinate (and of `r` / `s`).
    pub const fn coordinate_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }

    /// Byte length of a fixed-width `r || s` signature.
    pub const fn signature_len(self) -> usize {
        self.coordinate_len() * 2
    }
}

impl FromStr for Curve {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P-256" | "p256" | "P256" => Ok(Self::P256),
            "P-384" | "p384" | "P384" => Ok(Self::P384),
            other => Err(CryptoError::UnsupportedAlgorithm(format!("curve {other}"))),
        }
    }
}

/// JWS algorithm identifier carried in every token header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "ES256")]
    Es256,
    #[serde(rename = "ES384")]
    Es384,
}

impl Algorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
        }
    }

    pub const fn curve(self) -> Curve {
        match self {
            Self::Es256 => Curve::P256,
            Self::Es384 => Curve::P384,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ES256" => Ok(Self::Es256),
            "ES384" => Ok(Self::Es384),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

enum PrivateInner {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

/// Secret signing key.
pub struct PrivateKey(PrivateInner);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("curve", &self.curve())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl PrivateKey {
    /// Generate a new random key on `curve`.
    pub fn generate(curve: Curve) -> Self {
        match curve {
            Curve::P256 => Self(PrivateInner::P256(p256::ecdsa::SigningKey::random(
                &mut OsRng,
            ))),
            Curve::P384 => Self(PrivateInner::P384(p384::ecdsa::SigningKey::random(
                &mut OsRng,
            ))),
        }
    }

    pub const fn curve(&self) -> Curve {
        match &self.0 {
            PrivateInner::P256(_) => Curve::P256,
            PrivateInner::P384(_) => Curve::P384,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match &self.0 {
            PrivateInner::P256(sk) => {
                PublicKey(PublicInner::P256(p256::ecdsa::VerifyingKey::from(sk)))
            }
            PrivateInner::P384(sk) => {
                PublicKey(PublicInner::P384(p384::ecdsa::VerifyingKey::from(sk)))
            }
        }
    }

    /// Parse a PKCS#8 PEM private key. The curve is taken from the key itself.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CryptoError> {
        if let Ok(sk) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
            return Ok(Self(PrivateInner::P256(sk)));
        }
        p384::ecdsa::SigningKey::from_pkcs8_pem(pem)
            .map(|sk| Self(PrivateInner::P384(sk)))
            .map_err(|e| CryptoError::MalformedKey(format!("PKCS#8 private key: {e}")))
    }

    /// Export as PKCS#8 PEM. Only for writing to the key store.
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        let pem = match &self.0 {
            PrivateInner::P256(sk) => sk.to_pkcs8_pem(LineEnding::LF),
            PrivateInner::P384(sk) => sk.to_pkcs8_pem(LineEnding::LF),
        };
        pem.map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        use p256::ecdsa::signature::Signer;

        match &self.0 {
            PrivateInner::P256(sk) => {
                let sig: p256::ecdsa::Signature = sk
                    .try_sign(message)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                Ok(sig.to_bytes().to_vec())
            }
            PrivateInner::P384(sk) => {
                let sig: p384::ecdsa::Signature = sk
                    .try_sign(message)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        match &self.0 {
            PrivateInner::P256(sk) => Zeroizing::new(sk.to_bytes().to_vec()),
            PrivateInner::P384(sk) => Zeroizing::new(sk.to_bytes().to_vec()),
        }
    }
}

#[derive(Clone)]
enum PublicInner {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
}

/// Public verification key.
#[derive(Clone)]
pub struct PublicKey(PublicInner);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("curve", &self.curve())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.curve() == other.curve() && self.to_sec1_bytes() == other.to_sec1_bytes()
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    pub const fn curve(&self) -> Curve {
        match &self.0 {
            PublicInner::P256(_) => Curve::P256,
            PublicInner::P384(_) => Curve::P384,
        }
    }

    pub const fn algorithm(&self) -> Algorithm {
        self.curve().algorithm()
    }

    /// Uncompressed SEC1 encoding (`0x04 || x || y`).
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        match &self.0 {
            PublicInner::P256(vk) => vk.to_encoded_point(false).as_bytes().to_vec(),
            PublicInner::P384(vk) => vk.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    pub fn from_sec1_bytes(curve: Curve, bytes: &[u8]) -> Result<Self, CryptoError> {
        let inner = match curve {
            Curve::P256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                .map(PublicInner::P256)
                .map_err(|e| CryptoError::MalformedKey(format!("SEC1 P-256 point: {e}")))?,
            Curve::P384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                .map(PublicInner::P384)
                .map_err(|e| CryptoError::MalformedKey(format!("SEC1 P-384 point: {e}")))?,
        };
        Ok(Self(inner))
    }

    /// SPKI PEM encoding.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        let pem = match &self.0 {
            PublicInner::P256(vk) => vk.to_public_key_pem(LineEnding::LF),
            PublicInner::P384(vk) => vk.to_public_key_pem(LineEnding::LF),
        };
        pem.map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    /// Parse an SPKI PEM public key. The curve is taken from the key itself.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        if let Ok(vk) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
            return Ok(Self(PublicInner::P256(vk)));
        }
        p384::ecdsa::VerifyingKey::from_public_key_pem(pem)
            .map(|vk| Self(PublicInner::P384(vk)))
            .map_err(|e| CryptoError::MalformedKey(format!("SPKI public key: {e}")))
    }

    /// Colon-separated SHA-256 fingerprint of the SEC1 encoding.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.to_sec1_bytes())
    }

    pub(crate) fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        use p256::ecdsa::signature::Verifier;

        match &self.0 {
            PublicInner::P256(vk) => p256::ecdsa::Signature::from_slice(signature)
                .is_ok_and(|sig| vk.verify(message, &sig).is_ok()),
            PublicInner::P384(vk) => p384::ecdsa::Signature::from_slice(signature)
                .is_ok_and(|sig| vk.verify(message, &sig).is_ok()),
        }
    }
}

/// A signing key pair with its rotation metadata.
///
/// `rotates_at` is unset while the pair is the current signing key and is
/// stamped with the moment it was superseded.
#[derive(Debug)]
pub struct KeyPair {
    pub id: String,
    private: PrivateKey,
    public: PublicKey,
    pub created_at: i64,
    pub rotates_at: Option<i64>,
}

impl KeyPair {
    pub fn new(id: String, private: PrivateKey, created_at: i64, rotates_at: Option<i64>) -> Self {
        let public = private.public_key();
        Self {
            id,
            private,
            public,
            created_at,
            rotates_at,
        }
    }

    /// Generate a fresh pair with a random UUID id.
    pub fn generate(curve: Curve, created_at: i64) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            PrivateKey::generate(curve),
            created_at,
            None,
        )
    }

    pub const fn curve(&self) -> Curve {
        self.private.curve()
    }

    pub const fn algorithm(&self) -> Algorithm {
        self.curve().algorithm()
    }

    pub const fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The public half, labelled with this pair's id.
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey {
            kid: self.id.clone(),
            key: self.public.clone(),
        }
    }
}
