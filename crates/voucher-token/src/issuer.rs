//! Token issuance service.
//!
//! Mints per-user and print-batch tokens, validates tokens against a key set
//! with contextual constraints, and audits both.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;
use voucher_core::SharedClock;
use voucher_core::config::IssuanceConfig;
use voucher_crypto::{Algorithm, KeyPair, VerificationKey, token_fingerprint};

use crate::audit::{AuditEntry, AuditOperation, AuditSink, TracingAuditSink};
use crate::cache::{CacheStats, CachedIssuance, IssuanceCache};
use crate::claims::VoucherClaims;
use crate::codec;
use crate::error::{CodecError, IssueError, KeyError};
use crate::keys::KeyManager;
use crate::short_code::ALPHABET;
use crate::store::StoreError;
use crate::validation::{self, Confidence, ValidationContext, ValidationResult};

/// Length of the random disambiguator at the end of a batch code.
const BATCH_SUFFIX_LEN: usize = 4;

/// Longest accepted batch prefix.
const MAX_PREFIX_LEN: usize = 8;

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub voucher_id: Uuid,
    pub expires_at: i64,
}

/// Parameters shared by every token of a print batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// 1-8 uppercase letters or digits, e.g. `SHOP`.
    pub prefix: String,
    pub ttl_secs: i64,
    /// Redemption limit embedded in every token.
    pub limit: u32,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedBatch {
    pub batch_code: String,
    pub tokens: Vec<IssuedToken>,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

/// Result of a decode-only expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpirationStatus {
    pub expires_at: i64,
    pub remaining_seconds: i64,
    pub is_expired: bool,
}

/// Live validation, as used to reconcile offline results.
#[async_trait]
pub trait OnlineVerifier: Send + Sync {
    /// Validate against the live key set. `Err` means the key store could
    /// not be consulted, so nothing was decided.
    async fn verify_online(
        &self,
        token: &str,
        ctx: &ValidationContext,
    ) -> Result<ValidationResult, KeyError>;
}

pub struct TokenIssuer {
    keys: KeyManager,
    cache: IssuanceCache,
    audit: Arc<dyn AuditSink>,
    clock: SharedClock,
    config: IssuanceConfig,
    algorithm: Algorithm,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("keys", &self.keys)
            .field("cache", &self.cache)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Audits to [`TracingAuditSink`] and validates ES256 tokens online
    /// unless told otherwise.
    pub fn new(
        keys: KeyManager,
        cache: IssuanceCache,
        clock: SharedClock,
        config: IssuanceConfig,
    ) -> Self {
        Self {
            keys,
            cache,
            audit: Arc::new(TracingAuditSink),
            clock,
            config,
            algorithm: Algorithm::default(),
        }
    }

    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Algorithm whose key set is consulted when a token's header cannot be
    /// read.
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub const fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    fn check_ttl(&self, ttl_secs: i64) -> Result<(), IssueError> {
        if ttl_secs < 1 || ttl_secs > self.config.max_ttl_secs {
            return Err(IssueError::InvalidTtl {
                ttl_secs,
                max_secs: self.config.max_ttl_secs,
            });
        }
        Ok(())
    }

    /// Sign a token bound to one user.
    pub async fn issue_user_token(
        &self,
        voucher_id: Uuid,
        user_id: &str,
        signing_key: &KeyPair,
        ttl_secs: i64,
    ) -> Result<IssuedToken, IssueError> {
        self.check_ttl(ttl_secs)?;
        let claims = VoucherClaims::for_user(voucher_id, user_id, self.clock.now(), ttl_secs);
        let issued = self.sign_and_record(&claims, signing_key, json!({})).await?;
        info!(%voucher_id, token_id = %issued.token_id, key_id = %signing_key.id, "User token issued");
        Ok(issued)
    }

    /// Sign one `print` token per voucher, all sharing a fresh batch code.
    pub async fn issue_batch(
        &self,
        vouchers: &[Uuid],
        signing_key: &KeyPair,
        options: &BatchOptions,
    ) -> Result<IssuedBatch, IssueError> {
        if vouchers.is_empty() {
            return Err(IssueError::EmptyBatch);
        }
        if options.limit == 0 {
            return Err(IssueError::InvalidLimit);
        }
        validate_prefix(&options.prefix)?;
        self.check_ttl(options.ttl_secs)?;

        let now = self.clock.now();
        let expires_at = now + options.ttl_secs;
        let batch_code = self
            .reserve_batch_code(&options.prefix, now, expires_at)
            .await?;

        let context = json!({
            "batch_code": batch_code,
            "campaign_id": options.campaign_id,
        });
        let mut tokens = Vec::with_capacity(vouchers.len());
        for voucher_id in vouchers {
            let claims = VoucherClaims::for_print(
                *voucher_id,
                &batch_code,
                options.limit,
                now,
                options.ttl_secs,
            );
            tokens.push(
                self.sign_and_record(&claims, signing_key, context.clone())
                    .await?,
            );
        }

        info!(
            batch_code = %batch_code,
            count = tokens.len(),
            limit = options.limit,
            campaign_id = ?options.campaign_id,
            key_id = %signing_key.id,
            "Print batch issued"
        );
        Ok(IssuedBatch {
            batch_code,
            tokens,
            expires_at,
            campaign_id: options.campaign_id.clone(),
        })
    }

    /// Draw `PREFIX-YYYY-MM-XXXX` codes until one is free in the cache.
    async fn reserve_batch_code(
        &self,
        prefix: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<String, IssueError> {
        let month = chrono::DateTime::from_timestamp(now, 0)
            .unwrap_or_default()
            .format("%Y-%m")
            .to_string();
        let attempts = self.config.batch_code_attempts;
        for _ in 0..attempts {
            let code = format!("{prefix}-{month}-{}", random_symbols(BATCH_SUFFIX_LEN));
            if self.cache.reserve_batch_code(&code, expires_at).await? {
                return Ok(code);
            }
            debug!(batch_code = %code, "Batch code taken, drawing another");
        }
        Err(IssueError::BatchCodeExhausted(attempts))
    }

    async fn sign_and_record(
        &self,
        claims: &VoucherClaims,
        signing_key: &KeyPair,
        mut context: serde_json::Value,
    ) -> Result<IssuedToken, IssueError> {
        let token = codec::sign_token(claims, signing_key)?;
        let token_id = claims.token_id.clone().unwrap_or_default();

        // The token is valid whether or not the cache took it.
        if let Err(e) = self.cache.record(claims, &token, &signing_key.id).await {
            warn!(token_id = %token_id, error = %e, "Failed to cache issued token");
        }

        if let Some(map) = context.as_object_mut() {
            map.insert("key_id".into(), signing_key.id.clone().into());
            map.insert("token_id".into(), token_id.clone().into());
        }
        self.audit.record(&AuditEntry {
            operation: AuditOperation::Generated,
            token_fingerprint: token_fingerprint(&token),
            voucher_id: Some(claims.voucher_id),
            subject_type: Some(claims.subject_type),
            success: true,
            timestamp: self.clock.now(),
            context,
        });

        Ok(IssuedToken {
            token,
            token_id,
            voucher_id: claims.voucher_id,
            expires_at: claims.expires_at,
        })
    }

    /// Validate against the given key set. Never fails: every problem is
    /// reported in the result.
    pub fn validate(
        &self,
        token: &str,
        keys: &[VerificationKey],
        ctx: &ValidationContext,
    ) -> ValidationResult {
        self.validate_with_confidence(token, keys, ctx, Confidence::High)
    }

    fn validate_with_confidence(
        &self,
        token: &str,
        keys: &[VerificationKey],
        ctx: &ValidationContext,
        confidence: Confidence,
    ) -> ValidationResult {
        let now = self.clock.now();
        let outcome =
            validation::check_token(token, keys, ctx, now, self.config.strict_claims);

        let (operation, success, claims, context, result) = match outcome {
            Ok(checked) => {
                let claims = checked.claims.clone();
                let context = json!({ "key_id": checked.key_id });
                (
                    AuditOperation::Validated,
                    true,
                    Some(claims),
                    context,
                    ValidationResult::valid(checked, confidence),
                )
            }
            Err(rejection) => {
                debug!(error = %rejection.message, "Token rejected");
                let context = json!({ "error": rejection.message });
                let result = ValidationResult::invalid(rejection.message, confidence);
                (
                    AuditOperation::Rejected,
                    false,
                    rejection.claims,
                    context,
                    result,
                )
            }
        };

        self.audit.record(&AuditEntry {
            operation,
            token_fingerprint: token_fingerprint(token),
            voucher_id: claims.as_ref().map(|c| c.voucher_id),
            subject_type: claims.as_ref().map(|c| c.subject_type),
            success,
            timestamp: now,
            context,
        });
        result
    }

    /// Validate against the live verification set from the key manager.
    ///
    /// If the key store cannot be reached the token is refused with `low`
    /// confidence.
    pub async fn validate_online(&self, token: &str, ctx: &ValidationContext) -> ValidationResult {
        match self.verify_online(token, ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Key store unavailable during validation");
                ValidationResult::invalid(format!("Key store unavailable: {e}"), Confidence::Low)
            }
        }
    }

    /// Read expiry from a token without checking its signature.
    ///
    /// For "about to expire" hints only; never an authorization decision.
    pub fn check_expiration(&self, token: &str) -> Result<ExpirationStatus, CodecError> {
        let parts = codec::split_token(token)?;
        let claims = codec::decode_claims(&parts.payload, self.config.strict_claims)?;
        let now = self.clock.now();
        Ok(ExpirationStatus {
            expires_at: claims.expires_at,
            remaining_seconds: claims.remaining_secs(now),
            is_expired: claims.is_expired_at(now),
        })
    }

    /// Look up an issued token by `token_id`.
    pub async fn cached_issuance(
        &self,
        token_id: &str,
    ) -> Result<Option<CachedIssuance>, StoreError> {
        self.cache.get(token_id).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl OnlineVerifier for TokenIssuer {
    async fn verify_online(
        &self,
        token: &str,
        ctx: &ValidationContext,
    ) -> Result<ValidationResult, KeyError> {
        let alg = codec::split_token(token).map_or(self.algorithm, |p| p.header.alg);
        let keys = self.keys.verification_keys(alg).await?;
        Ok(self.validate_with_confidence(token, &keys, ctx, Confidence::High))
    }
}

fn validate_prefix(prefix: &str) -> Result<(), IssueError> {
    let ok = !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && prefix
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(IssueError::InvalidPrefix(prefix.to_string()))
    }
}

/// `len` random characters from the short-code alphabet.
fn random_symbols(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use voucher_core::ManualClock;
    use voucher_crypto::Curve;

    use crate::audit::MemoryAuditSink;
    use crate::claims::SubjectType;
    use crate::keys::RotationPolicy;
    use crate::store::{KeyValueStore, MemoryStore, SharedStore, StalledStore, TimedStore};
    use crate::validation::ERR_INVALID_SIGNATURE;

    const START: i64 = 1_780_000_000;

    struct Fixture {
        issuer: TokenIssuer,
        clock: Arc<ManualClock>,
        audit: Arc<MemoryAuditSink>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let shared: SharedStore = store.clone();
        let keys = KeyManager::new(
            shared.clone(),
            "keys",
            RotationPolicy::default(),
            clock.clone(),
        );
        let config = IssuanceConfig::default();
        let cache = IssuanceCache::from_config(shared, &config, clock.clone());
        let audit = Arc::new(MemoryAuditSink::new());
        let issuer =
            TokenIssuer::new(keys, cache, clock.clone(), config).with_audit_sink(audit.clone());
        Fixture {
            issuer,
            clock,
            audit,
            store,
        }
    }

    #[tokio::test]
    async fn user_token_lifecycle_across_expiry() {
        let f = fixture();
        let key = f.issuer.key_manager().ensure_signing_key(Algorithm::Es256).await.unwrap();
        let v1 = Uuid::new_v4();
        let issued = f.issuer.issue_user_token(v1, "U1", &key, 300).await.unwrap();
        let keys = [key.verification_key()];

        let ctx = ValidationContext::for_voucher(v1);
        let result = f.issuer.validate(&issued.token, &keys, &ctx);
        assert!(result.is_valid, "{result:?}");
        assert_eq!(result.confidence, Confidence::High);
        let info = result.voucher_info.unwrap();
        assert_eq!(info.user_id.as_deref(), Some("U1"));
        assert_eq!(info.subject_type, SubjectType::User);

        f.clock.advance(301);
        let result = f.issuer.validate(&issued.token, &keys, &ctx);
        assert!(!result.is_valid);
        assert!(result.error().unwrap().contains("expired"));

        let lenient = ValidationContext {
            allow_expired: true,
            ..ctx
        };
        assert!(f.issuer.validate(&issued.token, &keys, &lenient).is_valid);
    }

    #[tokio::test]
    async fn print_batch_shares_code_and_limit() {
        let f = fixture();
        let key = f.issuer.key_manager().ensure_signing_key(Algorithm::Es256).await.unwrap();
        let vouchers = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let options = BatchOptions {
            prefix: "SHOP".into(),
            ttl_secs: 3_600,
            limit: 100,
            campaign_id: Some("spring".into()),
        };
        let batch = f.issuer.issue_batch(&vouchers, &key, &options).await.unwrap();

        assert_eq!(batch.tokens.len(), 3);
        let month = chrono::DateTime::from_timestamp(START, 0)
            .unwrap()
            .format("%Y-%m")
            .to_string();
        assert!(batch.batch_code.starts_with(&format!("SHOP-{month}-")));
        let suffix = batch.batch_code.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.bytes().all(|b| ALPHABET.contains(&b)));

        for (issued, voucher_id) in batch.tokens.iter().zip(vouchers) {
            let parts = codec::split_token(&issued.token).unwrap();
            let claims = codec::decode_claims(&parts.payload, true).unwrap();
            assert_eq!(claims.subject_type, SubjectType::Print);
            assert_eq!(claims.voucher_id, voucher_id);
            assert_eq!(claims.batch_code.as_deref(), Some(batch.batch_code.as_str()));
            assert_eq!(claims.redemption_limit, Some(100));
        }

        let ctx = ValidationContext {
            require_print_token: true,
            ..ValidationContext::default()
        };
        let result = f
            .issuer
            .validate(&batch.tokens[0].token, &[key.verification_key()], &ctx);
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn foreign_key_reports_invalid_signature() {
        let f = fixture();
        let key = f.issuer.key_manager().ensure_signing_key(Algorithm::Es256).await.unwrap();
        let issued = f
            .issuer
            .issue_user_token(Uuid::new_v4(), "U1", &key, 300)
            .await
            .unwrap();
        let foreign = KeyPair::generate(Curve::P256, START);
        let result = f.issuer.validate(
            &issued.token,
            &[foreign.verification_key()],
            &ValidationContext::default(),
        );
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec![ERR_INVALID_SIGNATURE.to_string()]);
        assert!(result.voucher_info.is_none());
    }

    #[tokio::test]
    async fn construction_errors_precede_io() {
        let f = fixture();
        let key = KeyPair::generate(Curve::P256, START);
        let opts = |prefix: &str, ttl_secs: i64, limit: u32| BatchOptions {
            prefix: prefix.into(),
            ttl_secs,
            limit,
            campaign_id: None,
        };

        assert!(matches!(
            f.issuer.issue_batch(&[], &key, &opts("SHOP", 60, 1)).await,
            Err(IssueError::EmptyBatch)
        ));
        let one = [Uuid::new_v4()];
        assert!(matches!(
            f.issuer.issue_batch(&one, &key, &opts("SHOP", 60, 0)).await,
            Err(IssueError::InvalidLimit)
        ));
        for bad in ["", "shop", "TOOLONGPREFIX", "SH-OP"] {
            assert!(matches!(
                f.issuer.issue_batch(&one, &key, &opts(bad, 60, 1)).await,
                Err(IssueError::InvalidPrefix(_))
            ));
        }
        assert!(matches!(
            f.issuer.issue_user_token(one[0], "u", &key, 0).await,
            Err(IssueError::InvalidTtl { .. })
        ));
        assert!(matches!(
            f.issuer
                .issue_user_token(one[0], "u", &key, IssuanceConfig::default().max_ttl_secs + 1)
                .await,
            Err(IssueError::InvalidTtl { .. })
        ));

        assert!(f.store.is_empty().await);
        assert!(f.audit.is_empty());
    }

    /// Every batch code is already taken.
    struct FullStore;

    #[async_trait]
    impl KeyValueStore for FullStore {
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
        async fn set(&self, _: &str, _: &[u8], _: Option<i64>) -> Result<(), StoreError> {
            Ok(())
        }
        async fn set_if_absent(&self, _: &str, _: &[u8], _: Option<i64>) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn compare_and_swap(
            &self,
            _: &str,
            _: Option<&[u8]>,
            _: &[u8],
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn batch_code_space_exhaustion_fails() {
        let clock = Arc::new(ManualClock::new(START));
        let full: SharedStore = Arc::new(FullStore);
        let config = IssuanceConfig {
            batch_code_attempts: 3,
            ..IssuanceConfig::default()
        };
        let keys = KeyManager::new(full.clone(), "keys", RotationPolicy::default(), clock.clone());
        let cache = IssuanceCache::from_config(full, &config, clock.clone());
        let issuer = TokenIssuer::new(keys, cache, clock, config);

        let key = KeyPair::generate(Curve::P256, START);
        let options = BatchOptions {
            prefix: "X".into(),
            ttl_secs: 60,
            limit: 1,
            campaign_id: None,
        };
        assert!(matches!(
            issuer.issue_batch(&[Uuid::new_v4()], &key, &options).await,
            Err(IssueError::BatchCodeExhausted(3))
        ));
    }

    #[tokio::test]
    async fn issuance_is_cached_and_audited() {
        let f = fixture();
        let key = f.issuer.key_manager().ensure_signing_key(Algorithm::Es256).await.unwrap();
        let voucher_id = Uuid::new_v4();
        let issued = f.issuer.issue_user_token(voucher_id, "U1", &key, 300).await.unwrap();

        let cached = f.issuer.cached_issuance(&issued.token_id).await.unwrap().unwrap();
        assert_eq!(cached.token, issued.token);
        assert_eq!(cached.voucher_id, voucher_id);
        assert_eq!(cached.key_id, key.id);
        assert_eq!(f.issuer.cache_stats().hits, 1);

        f.issuer.validate(&issued.token, &[], &ValidationContext::default());
        let entries = f.audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, AuditOperation::Generated);
        assert_eq!(entries[0].token_fingerprint, token_fingerprint(&issued.token));
        assert_eq!(entries[0].context["token_id"], issued.token_id.as_str());
        assert_eq!(entries[1].operation, AuditOperation::Rejected);
        assert!(!entries[1].success);
        assert!(entries.iter().all(|e| !e.context.to_string().contains(&issued.token)));
    }

    #[tokio::test]
    async fn online_validation_uses_live_key_set() {
        let f = fixture();
        let km = f.issuer.key_manager();
        let old = km.ensure_signing_key(Algorithm::Es256).await.unwrap();
        let issued = f
            .issuer
            .issue_user_token(Uuid::new_v4(), "U1", &old, 3_600)
            .await
            .unwrap();

        // Still valid after rotation, inside the overlap window.
        km.rotate_keys(Algorithm::Es256).await.unwrap();
        let result = f
            .issuer
            .validate_online(&issued.token, &ValidationContext::default())
            .await;
        assert!(result.is_valid);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.key_id.as_deref(), Some(old.id.as_str()));

        // Past the overlap the old key is gone.
        f.clock.advance(km.policy().overlap_secs);
        let result = f
            .issuer
            .validate_online(
                &issued.token,
                &ValidationContext {
                    allow_expired: true,
                    ..ValidationContext::default()
                },
            )
            .await;
        assert_eq!(result.error(), Some(ERR_INVALID_SIGNATURE));
    }

    #[tokio::test]
    async fn check_expiration_reads_without_verifying() {
        let f = fixture();
        let key = KeyPair::generate(Curve::P384, START);
        let issued = f
            .issuer
            .issue_user_token(Uuid::new_v4(), "U1", &key, 300)
            .await
            .unwrap();
        f.clock.advance(100);
        let status = f.issuer.check_expiration(&issued.token).unwrap();
        assert_eq!(status.remaining_seconds, 200);
        assert!(!status.is_expired);
        assert_eq!(status.expires_at, START + 300);

        f.clock.advance(500);
        let status = f.issuer.check_expiration(&issued.token).unwrap();
        assert_eq!(status.remaining_seconds, 0);
        assert!(status.is_expired);

        assert!(f.issuer.check_expiration("garbage").is_err());
    }

    #[tokio::test]
    async fn stalled_key_store_refuses_with_low_confidence() {
        let clock = Arc::new(ManualClock::new(START));
        let stalled: SharedStore = Arc::new(TimedStore::new(StalledStore, Duration::from_millis(50)));
        let config = IssuanceConfig::default();
        let keys = KeyManager::new(stalled.clone(), "keys", RotationPolicy::default(), clock.clone());
        let cache = IssuanceCache::from_config(stalled, &config, clock.clone());
        let issuer = TokenIssuer::new(keys, cache, clock, config);

        let key = KeyPair::generate(Curve::P256, START);
        let token =
            codec::sign_token(&VoucherClaims::for_user(Uuid::new_v4(), "U1", START, 300), &key)
                .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            issuer.validate_online(&token, &ValidationContext::default()),
        )
        .await
        .unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.error().unwrap().starts_with("Key store unavailable"));
        assert!(result.voucher_info.is_none());
    }
}
