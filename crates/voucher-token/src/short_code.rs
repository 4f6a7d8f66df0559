//! Human-typable short codes.
//!
//! A code body is 8 symbols from [`ALPHABET`]; the first symbol tags the
//! subject type (`U` user, `P` print). It is shown as `XXXX-XXXX` next to a
//! 4-symbol keyed checksum, so a code cannot be made up without the secret.
//! Every code is registered in the store until it expires, binding it to its
//! voucher.
//!
//! The checksum secret belongs to the registry (`{ns}:checksum-secret`), not
//! to any signing key: rotating signing keys never invalidates a live code.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voucher_core::SharedClock;
use voucher_core::config::ShortCodeConfig;
use voucher_crypto::{ChecksumKey, CryptoError};
use zeroize::Zeroizing;

use crate::claims::SubjectType;
use crate::store::{SharedStore, StoreError};

/// Code alphabet: digits and uppercase letters without `0`, `O`, `1`, `I`.
pub const ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

pub const BODY_LEN: usize = 8;
pub const CHECKSUM_LEN: usize = 4;

const SECONDS_PER_DAY: i64 = 86_400;

const CHECKSUM_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ShortCodeError {
    #[error("No checksum key configured")]
    NoChecksumKey,

    #[error("User short code requires a user id")]
    MissingUserId,

    #[error("Expiration must be at least one day")]
    InvalidExpiration,

    #[error("No free short code after {0} attempts")]
    CodeSpaceExhausted(u32),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Short-code registry error: {0}")]
    Store(#[from] StoreError),
}

/// A registered short code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortCode {
    /// Display form, `XXXX-XXXX`.
    pub code: String,
    pub checksum: String,
    pub voucher_id: Uuid,
    pub subject_type: SubjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub expires_at: i64,
}

impl ShortCode {
    /// The code without grouping dashes.
    pub fn body(&self) -> String {
        normalize(&self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortCodeOptions {
    pub user_id: Option<String>,
    pub subject_type: SubjectType,
    /// Falls back to the configured default.
    pub expiration_days: Option<u32>,
}

impl ShortCodeOptions {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            subject_type: SubjectType::User,
            expiration_days: None,
        }
    }

    pub const fn print() -> Self {
        Self {
            user_id: None,
            subject_type: SubjectType::Print,
            expiration_days: None,
        }
    }
}

/// Outcome of [`ShortCodeService::validate_short_code`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortCodeCheck {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<SubjectType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voucher_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ShortCodeCheck {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            subject_type: None,
            voucher_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// Registry entry for a code.
#[derive(Debug, Serialize, Deserialize)]
struct CodeRecord {
    voucher_id: Uuid,
    subject_type: SubjectType,
    #[serde(default)]
    user_id: Option<String>,
    expires_at: i64,
}

/// Uppercase and strip dashes and whitespace.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// `ABCDEFGH` -> `ABCD-EFGH`.
pub fn format_code(body: &str) -> String {
    let (head, tail) = body.split_at(body.len().min(BODY_LEN / 2));
    format!("{head}-{tail}")
}

fn is_well_formed(body: &str, len: usize) -> bool {
    body.len() == len && body.bytes().all(|b| ALPHABET.contains(&b))
}

/// Load the registry's checksum key, creating its secret on first use.
///
/// The secret has no TTL. Concurrent first callers race on `set_if_absent`
/// and all end up with the winner's secret.
pub async fn load_checksum_key(
    store: &SharedStore,
    namespace: &str,
) -> Result<ChecksumKey, ShortCodeError> {
    let secret_key = format!("{namespace}:checksum-secret");
    if let Some(secret) = store.get(&secret_key).await? {
        return Ok(ChecksumKey::from_secret(&Zeroizing::new(secret))?);
    }

    let mut fresh = Zeroizing::new([0u8; CHECKSUM_SECRET_LEN]);
    rand::thread_rng().fill(fresh.as_mut_slice());
    if store
        .set_if_absent(&secret_key, fresh.as_slice(), None)
        .await?
    {
        info!(namespace, "Short-code checksum secret created");
        return Ok(ChecksumKey::from_secret(fresh.as_slice())?);
    }

    let secret = store
        .get(&secret_key)
        .await?
        .ok_or(ShortCodeError::NoChecksumKey)?;
    Ok(ChecksumKey::from_secret(&Zeroizing::new(secret))?)
}

pub struct ShortCodeService {
    store: SharedStore,
    namespace: String,
    /// The first key generates; any key validates.
    keys: Vec<ChecksumKey>,
    clock: SharedClock,
    default_expiration_days: u32,
    max_attempts: u32,
}

impl std::fmt::Debug for ShortCodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortCodeService")
            .field("namespace", &self.namespace)
            .field("keys", &self.keys.len())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl ShortCodeService {
    /// Service keyed by the registry's persisted checksum secret.
    pub async fn open(
        store: SharedStore,
        config: &ShortCodeConfig,
        clock: SharedClock,
    ) -> Result<Self, ShortCodeError> {
        let key = load_checksum_key(&store, &config.namespace).await?;
        Self::new(store, config, vec![key], clock)
    }

    /// Service with an explicit key ring: the first key generates, any key
    /// validates.
    pub fn new(
        store: SharedStore,
        config: &ShortCodeConfig,
        keys: Vec<ChecksumKey>,
        clock: SharedClock,
    ) -> Result<Self, ShortCodeError> {
        if keys.is_empty() {
            return Err(ShortCodeError::NoChecksumKey);
        }
        Ok(Self {
            store,
            namespace: config.namespace.clone(),
            keys,
            clock,
            default_expiration_days: config.default_expiration_days,
            max_attempts: config.max_attempts,
        })
    }

    fn registry_key(&self, body: &str) -> String {
        format!("{}:short:{body}", self.namespace)
    }

    fn checksum(&self, body: &str) -> Result<String, ShortCodeError> {
        let key = self.keys.first().ok_or(ShortCodeError::NoChecksumKey)?;
        Ok(key.checksum(body.as_bytes(), ALPHABET, CHECKSUM_LEN)?)
    }

    fn checksum_matches(&self, body: &str, checksum: &str) -> bool {
        self.keys
            .iter()
            .any(|key| key.verify_checksum(body.as_bytes(), ALPHABET, checksum))
    }

    fn expiry(&self, options: &ShortCodeOptions) -> Result<i64, ShortCodeError> {
        if options.subject_type == SubjectType::User
            && options.user_id.as_deref().is_none_or(str::is_empty)
        {
            return Err(ShortCodeError::MissingUserId);
        }
        let days = options
            .expiration_days
            .unwrap_or(self.default_expiration_days);
        if days == 0 {
            return Err(ShortCodeError::InvalidExpiration);
        }
        Ok(self.clock.now() + i64::from(days) * SECONDS_PER_DAY)
    }

    /// Try to register `body`. Returns `false` if the code is taken.
    async fn register(
        &self,
        body: &str,
        voucher_id: Uuid,
        options: &ShortCodeOptions,
        expires_at: i64,
    ) -> Result<bool, ShortCodeError> {
        let record = CodeRecord {
            voucher_id,
            subject_type: options.subject_type,
            user_id: options.user_id.clone(),
            expires_at,
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Backend(e.to_string()))?;
        let ttl = (expires_at - self.clock.now()).max(1);
        Ok(self
            .store
            .set_if_absent(&self.registry_key(body), &bytes, Some(ttl))
            .await?)
    }

    fn build(
        &self,
        body: &str,
        voucher_id: Uuid,
        options: &ShortCodeOptions,
        expires_at: i64,
    ) -> Result<ShortCode, ShortCodeError> {
        Ok(ShortCode {
            code: format_code(body),
            checksum: self.checksum(body)?,
            voucher_id,
            subject_type: options.subject_type,
            user_id: options.user_id.clone(),
            expires_at,
        })
    }

    /// Draw and register a code for one voucher.
    pub async fn generate_short_code(
        &self,
        voucher_id: Uuid,
        options: &ShortCodeOptions,
    ) -> Result<ShortCode, ShortCodeError> {
        let expires_at = self.expiry(options)?;
        for _ in 0..self.max_attempts {
            let body = random_body(options.subject_type);
            if self.register(&body, voucher_id, options, expires_at).await? {
                debug!(%voucher_id, code = %body, "Short code registered");
                return self.build(&body, voucher_id, options, expires_at);
            }
        }
        Err(ShortCodeError::CodeSpaceExhausted(self.max_attempts))
    }

    /// One code per voucher, all distinct.
    pub async fn generate_batch_short_codes(
        &self,
        vouchers: &[Uuid],
        options: &ShortCodeOptions,
    ) -> Result<Vec<ShortCode>, ShortCodeError> {
        let expires_at = self.expiry(options)?;
        let mut seen = HashSet::with_capacity(vouchers.len());
        let mut codes = Vec::with_capacity(vouchers.len());

        for &voucher_id in vouchers {
            let mut accepted = None;
            for _ in 0..self.max_attempts {
                let body = random_body(options.subject_type);
                if seen.contains(&body) {
                    continue;
                }
                if self.register(&body, voucher_id, options, expires_at).await? {
                    accepted = Some(body);
                    break;
                }
            }
            let body = accepted.ok_or(ShortCodeError::CodeSpaceExhausted(self.max_attempts))?;
            codes.push(self.build(&body, voucher_id, options, expires_at)?);
            seen.insert(body);
        }

        info!(count = codes.len(), subject_type = %options.subject_type, "Short code batch generated");
        Ok(codes)
    }

    /// Check a typed code and checksum. Never fails: every problem is a
    /// rejected result.
    pub async fn validate_short_code(
        &self,
        code: &str,
        checksum: &str,
        expected_type: Option<SubjectType>,
    ) -> ShortCodeCheck {
        let body = normalize(code);
        let checksum = normalize(checksum);
        if !is_well_formed(&body, BODY_LEN) || !is_well_formed(&checksum, CHECKSUM_LEN) {
            return ShortCodeCheck::rejected("Malformed short code");
        }
        let Some(subject_type) = body.bytes().next().and_then(SubjectType::from_tag) else {
            return ShortCodeCheck::rejected("Unknown code type");
        };
        if !self.checksum_matches(&body, &checksum) {
            return ShortCodeCheck::rejected("Invalid checksum");
        }
        if expected_type.is_some_and(|t| t != subject_type) {
            return ShortCodeCheck::rejected("Code type mismatch");
        }

        let record = match self.store.get(&self.registry_key(&body)).await {
            Ok(Some(bytes)) => serde_json::from_slice::<CodeRecord>(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Short-code registry unavailable");
                return ShortCodeCheck::rejected(format!("Short-code registry unavailable: {e}"));
            }
        };
        let Some(record) = record else {
            return ShortCodeCheck::rejected("Unknown or expired code");
        };
        if record.subject_type != subject_type || record.expires_at <= self.clock.now() {
            return ShortCodeCheck::rejected("Unknown or expired code");
        }

        ShortCodeCheck {
            is_valid: true,
            subject_type: Some(subject_type),
            voucher_id: Some(record.voucher_id),
            reason: None,
        }
    }
}

/// Subject tag followed by random symbols.
fn random_body(subject_type: SubjectType) -> String {
    let mut rng = rand::thread_rng();
    let mut body = String::with_capacity(BODY_LEN);
    body.push(char::from(subject_type.tag()));
    for _ in 1..BODY_LEN {
        body.push(char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]));
    }
    body
}
