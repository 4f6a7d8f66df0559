//! Validation on devices without connectivity.
//!
//! An [`OfflineValidator`] only knows the key set it was handed when the
//! device last synced. It cannot tell whether a key has since been rotated
//! out, so a verified token is reported with `medium` confidence, never
//! `high`. Every attempt is journaled and replayed against the live system by
//! [`OfflineValidator::sync_offline_validations`] once connectivity returns.
//!
//! The journal lives in a device-local key-value store, so it survives a
//! restart of the device process:
//!
//! - `{ns}:offline:index` JSON list of pending attempt ids, oldest first
//! - `{ns}:offline:attempt:{id}` one attempt, expiring after the retention

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voucher_core::SharedClock;
use voucher_core::config::OfflineConfig;
use voucher_crypto::{CryptoError, JwkSet, VerificationKey, constant_time_str_eq, token_fingerprint};

use crate::claims::SubjectType;
use crate::issuer::OnlineVerifier;
use crate::short_code::{ShortCode, normalize};
use crate::store::{SharedStore, StoreError};
use crate::validation::{self, Confidence, ValidationContext};

/// How many times an index update is retried under contention.
const INDEX_UPDATE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineOptions {
    pub expected_voucher_id: Option<Uuid>,
    pub allow_expired: bool,
}

impl OfflineOptions {
    fn context(&self) -> ValidationContext {
        ValidationContext {
            expected_voucher_id: self.expected_voucher_id,
            allow_expired: self.allow_expired,
            require_print_token: false,
        }
    }
}

/// How an offline result was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OfflineValidationInfo {
    /// The signature verified against a cached key.
    pub reliable: bool,
    pub validated_at: i64,
    pub key_set_synced_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineValidationResult {
    pub is_valid: bool,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voucher_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub offline_validation: OfflineValidationInfo,
    pub errors: Vec<String>,
}

/// Expected claims for one pre-synced short code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRule {
    pub checksum: String,
    pub voucher_id: Uuid,
    pub subject_type: SubjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub expires_at: i64,
}

/// Short code (normalized body) to expected claims. Shipped to devices ahead
/// of time as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRules {
    pub generated_at: i64,
    pub rules: BTreeMap<String, OfflineRule>,
}

impl OfflineRules {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A journaled offline attempt awaiting reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OfflineAttempt {
    token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_voucher_id: Option<Uuid>,
    allow_expired: bool,
    validated_at: i64,
    offline_valid: bool,
}

/// One replayed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledValidation {
    pub token_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voucher_id: Option<Uuid>,
    pub validated_at: i64,
    pub offline_valid: bool,
    pub online_valid: bool,
    /// Confidence of the online verdict.
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Online verdict agrees with the offline one.
    pub confirmed: Vec<ReconciledValidation>,
    /// Online verdict differs, e.g. the key was rotated out before the
    /// device synced.
    pub overturned: Vec<ReconciledValidation>,
    /// Attempts kept for the next sync because the live system was
    /// unreachable.
    pub retained: usize,
}

pub struct OfflineValidator {
    keys: Vec<VerificationKey>,
    key_set_synced_at: i64,
    clock: SharedClock,
    strict_claims: bool,
    journal: SharedStore,
    namespace: String,
    retention_secs: i64,
    max_pending: usize,
}

impl std::fmt::Debug for OfflineValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineValidator")
            .field("keys", &self.keys.len())
            .field("key_set_synced_at", &self.key_set_synced_at)
            .field("namespace", &self.namespace)
            .field("retention_secs", &self.retention_secs)
            .finish_non_exhaustive()
    }
}

impl OfflineValidator {
    /// `journal` is the device's own store; attempts recorded there by an
    /// earlier validator over the same store are picked up by the next sync.
    pub fn new(
        keys: Vec<VerificationKey>,
        key_set_synced_at: i64,
        journal: SharedStore,
        clock: SharedClock,
    ) -> Self {
        let defaults = OfflineConfig::default();
        Self {
            keys,
            key_set_synced_at,
            clock,
            strict_claims: true,
            journal,
            namespace: defaults.namespace,
            retention_secs: defaults.retention_secs,
            max_pending: defaults.max_pending,
        }
    }

    /// Build from a JWK Set fetched while the device was online.
    pub fn from_jwks(
        jwks: &JwkSet,
        key_set_synced_at: i64,
        journal: SharedStore,
        clock: SharedClock,
    ) -> Result<Self, CryptoError> {
        Ok(Self::new(
            jwks.verification_keys()?,
            key_set_synced_at,
            journal,
            clock,
        ))
    }

    #[must_use]
    pub const fn with_strict_claims(mut self, strict: bool) -> Self {
        self.strict_claims = strict;
        self
    }

    /// Journal namespace and retention from configuration.
    #[must_use]
    pub fn with_config(self, config: &OfflineConfig) -> Self {
        let mut validator = self.with_retention(config.retention_secs, config.max_pending);
        validator.namespace.clone_from(&config.namespace);
        validator
    }

    /// How long attempts wait for a sync, and how many may wait at once.
    #[must_use]
    pub fn with_retention(mut self, retention_secs: i64, max_pending: usize) -> Self {
        self.retention_secs = retention_secs.max(1);
        self.max_pending = max_pending.max(1);
        self
    }

    pub const fn key_set_synced_at(&self) -> i64 {
        self.key_set_synced_at
    }

    fn index_key(&self) -> String {
        format!("{}:offline:index", self.namespace)
    }

    fn attempt_key(&self, id: &str) -> String {
        format!("{}:offline:attempt:{id}", self.namespace)
    }

    async fn read_index(&self) -> Result<(Option<Vec<u8>>, Vec<String>), StoreError> {
        let raw = self.journal.get(&self.index_key()).await?;
        let ids = match &raw {
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| StoreError::Backend(format!("offline journal index: {e}")))?,
            None => Vec::new(),
        };
        Ok((raw, ids))
    }

    /// Rewrite the index as `edit` of its current contents, retrying when
    /// another writer got there first. Returns the ids before and after.
    async fn update_index(
        &self,
        edit: impl Fn(Vec<String>) -> Vec<String> + Send + Sync,
    ) -> Result<(Vec<String>, Vec<String>), StoreError> {
        let index_key = self.index_key();
        for _ in 0..INDEX_UPDATE_ATTEMPTS {
            let (raw, ids) = self.read_index().await?;
            let edited = edit(ids.clone());
            let new = serde_json::to_vec(&edited).map_err(|e| StoreError::Backend(e.to_string()))?;
            if raw.as_deref() == Some(new.as_slice())
                || self
                    .journal
                    .compare_and_swap(&index_key, raw.as_deref(), &new)
                    .await?
            {
                return Ok((ids, edited));
            }
            debug!("Offline journal index changed concurrently, retrying");
        }
        Err(StoreError::Backend(
            "offline journal index kept changing".to_string(),
        ))
    }

    /// Attempts not yet reconciled. Attempts past their retention are not
    /// counted.
    pub async fn pending_attempts(&self) -> Result<usize, StoreError> {
        let (_, ids) = self.read_index().await?;
        let mut pending = 0;
        for id in ids {
            if self.journal.get(&self.attempt_key(&id)).await?.is_some() {
                pending += 1;
            }
        }
        Ok(pending)
    }

    async fn record_attempt(&self, attempt: &OfflineAttempt) -> Result<(), StoreError> {
        let id = format!("{}-{}", attempt.validated_at, Uuid::new_v4().simple());
        let bytes = serde_json::to_vec(attempt).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.journal
            .set(&self.attempt_key(&id), &bytes, Some(self.retention_secs))
            .await?;

        let max_pending = self.max_pending;
        let (previous, kept) = self
            .update_index(|mut ids| {
                ids.push(id.clone());
                let excess = ids.len().saturating_sub(max_pending);
                ids.split_off(excess)
            })
            .await?;

        let kept: HashSet<&String> = kept.iter().collect();
        let dropped: Vec<&String> = previous.iter().filter(|old| !kept.contains(old)).collect();
        if !dropped.is_empty() {
            warn!(
                dropped = dropped.len(),
                max_pending, "Offline journal full, dropping oldest attempts"
            );
            for old in dropped {
                self.journal.delete(&self.attempt_key(old)).await?;
            }
        }
        Ok(())
    }

    /// Verify a token against the cached key set only.
    ///
    /// A journal write failure is logged; the verdict is still returned.
    pub async fn validate_offline(
        &self,
        token: &str,
        options: &OfflineOptions,
    ) -> OfflineValidationResult {
        let now = self.clock.now();
        let outcome = validation::check_token(
            token,
            &self.keys,
            &options.context(),
            now,
            self.strict_claims,
        );

        let result = match outcome {
            Ok(checked) => OfflineValidationResult {
                is_valid: true,
                confidence: Confidence::Medium,
                voucher_id: Some(checked.claims.voucher_id),
                user_id: checked.claims.user_id,
                offline_validation: self.info(true, now),
                errors: Vec::new(),
            },
            Err(rejection) => {
                // Claims are only present once the signature verified.
                let reliable = rejection.claims.is_some();
                OfflineValidationResult {
                    is_valid: false,
                    confidence: if reliable {
                        Confidence::Medium
                    } else {
                        Confidence::Low
                    },
                    voucher_id: rejection.claims.as_ref().map(|c| c.voucher_id),
                    user_id: None,
                    offline_validation: self.info(reliable, now),
                    errors: vec![rejection.message],
                }
            }
        };

        let attempt = OfflineAttempt {
            token: token.to_string(),
            expected_voucher_id: options.expected_voucher_id,
            allow_expired: options.allow_expired,
            validated_at: now,
            offline_valid: result.is_valid,
        };
        if let Err(e) = self.record_attempt(&attempt).await {
            warn!(
                token_fingerprint = %token_fingerprint(token),
                error = %e,
                "Failed to journal offline attempt"
            );
        }
        result
    }

    const fn info(&self, reliable: bool, validated_at: i64) -> OfflineValidationInfo {
        OfflineValidationInfo {
            reliable,
            validated_at,
            key_set_synced_at: self.key_set_synced_at,
        }
    }

    /// Precompute a lookup table of unexpired short codes for a device.
    pub fn generate_offline_rules(short_codes: &[ShortCode], now: i64) -> OfflineRules {
        let rules = short_codes
            .iter()
            .filter(|sc| sc.expires_at > now)
            .map(|sc| {
                (
                    sc.body(),
                    OfflineRule {
                        checksum: sc.checksum.clone(),
                        voucher_id: sc.voucher_id,
                        subject_type: sc.subject_type,
                        user_id: sc.user_id.clone(),
                        expires_at: sc.expires_at,
                    },
                )
            })
            .collect();
        OfflineRules {
            generated_at: now,
            rules,
        }
    }

    /// Match a scanned code against a pre-synced rule table.
    ///
    /// No signature is involved, so a match is only ever `low` confidence.
    pub fn check_short_code(
        &self,
        rules: &OfflineRules,
        code: &str,
        checksum: &str,
    ) -> OfflineValidationResult {
        let now = self.clock.now();
        let body = normalize(code);
        let checksum = normalize(checksum);

        let error = match rules.rules.get(&body) {
            None => Some("Code not in offline rules"),
            Some(rule) if !constant_time_str_eq(&rule.checksum, &checksum) => {
                Some("Invalid checksum")
            }
            Some(rule) if rule.expires_at <= now => Some("Code has expired"),
            Some(_) => None,
        };
        let rule = rules.rules.get(&body).filter(|_| error.is_none());

        OfflineValidationResult {
            is_valid: error.is_none(),
            confidence: Confidence::Low,
            voucher_id: rule.map(|r| r.voucher_id),
            user_id: rule.and_then(|r| r.user_id.clone()),
            offline_validation: OfflineValidationInfo {
                reliable: false,
                validated_at: now,
                key_set_synced_at: rules.generated_at,
            },
            errors: error.map(str::to_string).into_iter().collect(),
        }
    }

    /// Replay journaled attempts against the live system.
    ///
    /// Each token is re-validated online as of the moment it was checked
    /// offline: expiry is judged against the original attempt time, the
    /// signature against the live key set. Reconciled attempts leave the
    /// journal; attempts the live system could not judge stay for the next
    /// sync. `Err` only when the journal itself is unreadable.
    pub async fn sync_offline_validations(
        &self,
        online: &impl OnlineVerifier,
    ) -> Result<SyncReport, StoreError> {
        let (_, ids) = self.read_index().await?;
        let mut report = SyncReport::default();
        let mut settled: HashSet<String> = HashSet::new();

        for id in ids {
            let attempt = match self.journal.get(&self.attempt_key(&id)).await? {
                Some(bytes) => match serde_json::from_slice::<OfflineAttempt>(&bytes) {
                    Ok(attempt) => attempt,
                    Err(e) => {
                        warn!(attempt = %id, error = %e, "Dropping unreadable offline attempt");
                        settled.insert(id);
                        continue;
                    }
                },
                // Past retention.
                None => {
                    settled.insert(id);
                    continue;
                }
            };

            let ctx = ValidationContext {
                expected_voucher_id: attempt.expected_voucher_id,
                allow_expired: true,
                require_print_token: false,
            };
            let result = match online.verify_online(&attempt.token, &ctx).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Live validation unavailable, keeping offline attempt");
                    report.retained += 1;
                    continue;
                }
            };

            let expired_then = result
                .voucher_info
                .as_ref()
                .is_some_and(|c| c.is_expired_at(attempt.validated_at));
            let online_valid = result.is_valid && (attempt.allow_expired || !expired_then);
            let error = if result.is_valid && !online_valid {
                Some(validation::ERR_EXPIRED.to_string())
            } else {
                result.error().map(str::to_string)
            };

            let reconciled = ReconciledValidation {
                token_fingerprint: token_fingerprint(&attempt.token),
                voucher_id: result.voucher_info.as_ref().map(|c| c.voucher_id),
                validated_at: attempt.validated_at,
                offline_valid: attempt.offline_valid,
                online_valid,
                confidence: result.confidence,
                error,
            };
            if online_valid == attempt.offline_valid {
                report.confirmed.push(reconciled);
            } else {
                warn!(
                    token_fingerprint = %reconciled.token_fingerprint,
                    offline_valid = reconciled.offline_valid,
                    online_valid,
                    "Offline validation overturned"
                );
                report.overturned.push(reconciled);
            }
            settled.insert(id);
        }

        if !settled.is_empty() {
            // Attempts journaled while this sync ran are kept.
            self.update_index(|ids| ids.into_iter().filter(|id| !settled.contains(id)).collect())
                .await?;
            for id in &settled {
                if let Err(e) = self.journal.delete(&self.attempt_key(id)).await {
                    warn!(attempt = %id, error = %e, "Failed to delete reconciled attempt");
                }
            }
        }

        info!(
            confirmed = report.confirmed.len(),
            overturned = report.overturned.len(),
            retained = report.retained,
            "Offline validations synced"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use voucher_core::{Clock, ManualClock};
    use voucher_crypto::{Curve, KeyPair};

    use crate::claims::VoucherClaims;
    use crate::codec::sign_token;
    use crate::error::KeyError;
    use crate::store::MemoryStore;
    use crate::validation::{ERR_INVALID_SIGNATURE, ValidationResult};

    const START: i64 = 1_780_000_000;

    /// Validates against a fixed key set, or fails like an unreachable store.
    struct FakeOnline {
        keys: Vec<VerificationKey>,
        clock: Arc<ManualClock>,
        down: AtomicBool,
    }

    #[async_trait]
    impl OnlineVerifier for FakeOnline {
        async fn verify_online(
            &self,
            token: &str,
            ctx: &ValidationContext,
        ) -> Result<ValidationResult, KeyError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(KeyError::Store(StoreError::Backend("down".into())));
            }
            Ok(
                match validation::check_token(token, &self.keys, ctx, self.clock.now(), true) {
                    Ok(checked) => ValidationResult::valid(checked, Confidence::High),
                    Err(r) => ValidationResult::invalid(r.message, Confidence::High),
                },
            )
        }
    }

    struct Fixture {
        key: KeyPair,
        clock: Arc<ManualClock>,
        journal: SharedStore,
        validator: OfflineValidator,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let key = KeyPair::generate(Curve::P256, START);
        let journal: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
        let validator = device(&key, &journal, &clock);
        Fixture {
            key,
            clock,
            journal,
            validator,
        }
    }

    /// A validator as a device builds it at startup from its synced key set.
    fn device(key: &KeyPair, journal: &SharedStore, clock: &Arc<ManualClock>) -> OfflineValidator {
        let jwks = JwkSet::from_keys(&[key.verification_key()]);
        OfflineValidator::from_jwks(&jwks, START, journal.clone(), clock.clone()).unwrap()
    }

    fn online(f: &Fixture, keys: Vec<VerificationKey>, down: bool) -> FakeOnline {
        FakeOnline {
            keys,
            clock: f.clock.clone(),
            down: AtomicBool::new(down),
        }
    }

    fn user_token(key: &KeyPair, voucher_id: Uuid, ttl: i64) -> String {
        sign_token(&VoucherClaims::for_user(voucher_id, "U1", START, ttl), key).unwrap()
    }

    #[tokio::test]
    async fn verified_offline_is_medium_confidence() {
        let f = fixture();
        let voucher_id = Uuid::new_v4();
        let token = user_token(&f.key, voucher_id, 300);
        let result = f.validator.validate_offline(
            &token,
            &OfflineOptions {
                expected_voucher_id: Some(voucher_id),
                allow_expired: false,
            },
        ).await;
        assert!(result.is_valid);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.voucher_id, Some(voucher_id));
        assert_eq!(result.user_id.as_deref(), Some("U1"));
        assert!(result.offline_validation.reliable);
        assert_eq!(result.offline_validation.key_set_synced_at, START);
        assert_eq!(f.validator.pending_attempts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_key_is_low_confidence_failure() {
        let f = fixture();
        let other = KeyPair::generate(Curve::P256, START);
        let token = user_token(&other, Uuid::new_v4(), 300);
        let result = f.validator.validate_offline(&token, &OfflineOptions::default()).await;
        assert!(!result.is_valid);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(!result.offline_validation.reliable);
        assert_eq!(result.errors, vec![ERR_INVALID_SIGNATURE.to_string()]);
    }

    #[tokio::test]
    async fn expiry_applies_offline() {
        let f = fixture();
        let token = user_token(&f.key, Uuid::new_v4(), 300);
        f.clock.advance(300);
        let result = f.validator.validate_offline(&token, &OfflineOptions::default()).await;
        assert!(!result.is_valid);
        assert_eq!(result.confidence, Confidence::Medium);
        assert!(result.errors[0].contains("expired"));

        let lenient = OfflineOptions {
            allow_expired: true,
            ..OfflineOptions::default()
        };
        assert!(f.validator.validate_offline(&token, &lenient).await.is_valid);
    }

    #[test]
    fn rule_table_matching() {
        let f = fixture();
        let voucher_id = Uuid::new_v4();
        let live = ShortCode {
            code: "UAB2-CD3E".into(),
            checksum: "XY23".into(),
            voucher_id,
            subject_type: SubjectType::User,
            user_id: Some("U1".into()),
            expires_at: START + 100,
        };
        let stale = ShortCode {
            code: "PAB2-CD3E".into(),
            expires_at: START,
            ..live.clone()
        };
        let rules = OfflineValidator::generate_offline_rules(&[live, stale], START);
        assert_eq!(rules.len(), 1);

        let hit = f.validator.check_short_code(&rules, "uab2cd3e", "xy23");
        assert!(hit.is_valid);
        assert_eq!(hit.confidence, Confidence::Low);
        assert_eq!(hit.voucher_id, Some(voucher_id));
        assert!(!hit.offline_validation.reliable);

        let bad_sum = f.validator.check_short_code(&rules, "UAB2-CD3E", "XY24");
        assert_eq!(bad_sum.errors, vec!["Invalid checksum".to_string()]);
        assert!(bad_sum.voucher_id.is_none());

        let missing = f.validator.check_short_code(&rules, "PAB2-CD3E", "XY23");
        assert!(!missing.is_valid);

        f.clock.advance(100);
        let expired = f.validator.check_short_code(&rules, "UAB2-CD3E", "XY23");
        assert_eq!(expired.errors, vec!["Code has expired".to_string()]);

        let json = serde_json::to_string(&rules).unwrap();
        let back: OfflineRules = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules);
    }

    #[tokio::test]
    async fn sync_confirms_and_overturns() {
        let f = fixture();
        let token = user_token(&f.key, Uuid::new_v4(), 300);
        assert!(f.validator.validate_offline(&token, &OfflineOptions::default()).await.is_valid);

        // The device never learned about this key; online knows it.
        let newer = KeyPair::generate(Curve::P256, START);
        let newer_token = user_token(&newer, Uuid::new_v4(), 300);
        assert!(!f.validator.validate_offline(&newer_token, &OfflineOptions::default()).await.is_valid);

        // Online, the original key has since been revoked.
        let online = online(&f, vec![newer.verification_key()], false);
        f.clock.advance(3_600);
        let report = f.validator.sync_offline_validations(&online).await.unwrap();

        assert_eq!(report.retained, 0);
        assert_eq!(report.overturned.len(), 2);
        let revoked = &report.overturned[0];
        assert!(revoked.offline_valid && !revoked.online_valid);
        assert_eq!(revoked.error.as_deref(), Some(ERR_INVALID_SIGNATURE));
        let upgraded = &report.overturned[1];
        assert!(!upgraded.offline_valid && upgraded.online_valid);
        assert_eq!(upgraded.confidence, Confidence::High);
        assert_eq!(f.validator.pending_attempts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sync_judges_expiry_at_attempt_time() {
        let f = fixture();
        let token = user_token(&f.key, Uuid::new_v4(), 300);
        f.clock.advance(100);
        f.validator.validate_offline(&token, &OfflineOptions::default()).await;

        // Long after expiry, the attempt made inside the window is confirmed.
        f.clock.advance(10_000);
        let online = online(&f, vec![f.key.verification_key()], false);
        let report = f.validator.sync_offline_validations(&online).await.unwrap();
        assert_eq!(report.confirmed.len(), 1);
        assert!(report.confirmed[0].online_valid);
        assert_eq!(report.confirmed[0].confidence, Confidence::High);
    }

    #[tokio::test]
    async fn unreachable_online_retains_attempts() {
        let f = fixture();
        let token = user_token(&f.key, Uuid::new_v4(), 300);
        f.validator.validate_offline(&token, &OfflineOptions::default()).await;
        f.validator.validate_offline(&token, &OfflineOptions::default()).await;

        let online = online(&f, vec![f.key.verification_key()], true);
        let report = f.validator.sync_offline_validations(&online).await.unwrap();
        assert_eq!(report.retained, 2);
        assert!(report.confirmed.is_empty());
        assert_eq!(f.validator.pending_attempts().await.unwrap(), 2);

        online.down.store(false, Ordering::SeqCst);
        let report = f.validator.sync_offline_validations(&online).await.unwrap();
        assert_eq!(report.confirmed.len(), 2);
        assert_eq!(f.validator.pending_attempts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn journal_survives_validator_restart() {
        let f = fixture();
        let token = user_token(&f.key, Uuid::new_v4(), 300);
        assert!(f.validator.validate_offline(&token, &OfflineOptions::default()).await.is_valid);
        drop(f.validator);

        // The device process restarts and rebuilds its validator.
        let restarted = device(&f.key, &f.journal, &f.clock);
        assert_eq!(restarted.pending_attempts().await.unwrap(), 1);

        let revoked = FakeOnline {
            keys: Vec::new(),
            clock: f.clock.clone(),
            down: AtomicBool::new(false),
        };
        let report = restarted.sync_offline_validations(&revoked).await.unwrap();
        assert_eq!(report.overturned.len(), 1);
        assert_eq!(restarted.pending_attempts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn journal_is_bounded_and_expires() {
        let f = fixture();
        let validator = device(&f.key, &f.journal, &f.clock).with_retention(600, 2);
        let tokens: Vec<_> = (0..3)
            .map(|_| user_token(&f.key, Uuid::new_v4(), 300))
            .collect();
        for token in &tokens {
            validator.validate_offline(token, &OfflineOptions::default()).await;
        }
        // Oldest attempt dropped once the cap is reached.
        assert_eq!(validator.pending_attempts().await.unwrap(), 2);

        let online = online(&f, vec![f.key.verification_key()], false);
        let report = validator.sync_offline_validations(&online).await.unwrap();
        let replayed: Vec<_> = report
            .confirmed
            .iter()
            .map(|r| r.token_fingerprint.clone())
            .collect();
        assert_eq!(
            replayed,
            [token_fingerprint(&tokens[1]), token_fingerprint(&tokens[2])]
        );

        // Unsynced attempts lapse after the retention period.
        validator.validate_offline(&tokens[0], &OfflineOptions::default()).await;
        f.clock.advance(600);
        assert_eq!(validator.pending_attempts().await.unwrap(), 0);
        let report = validator.sync_offline_validations(&online).await.unwrap();
        assert!(report.confirmed.is_empty() && report.overturned.is_empty());
    }
}
