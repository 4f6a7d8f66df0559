#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end redemption flow on the `SQLite` store.
//!
//! Covers issuance, online and offline validation, key rotation with its
//! overlap window, offline reconciliation, short codes, and persistence of
//! keys, short-code secrets and the offline journal across a store reopen.

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use voucher_core::config::{IssuanceConfig, ShortCodeConfig};
use voucher_core::{Clock, ManualClock};
use voucher_crypto::{Algorithm, JwkSet};
use voucher_token::audit::{AuditOperation, MemoryAuditSink};
use voucher_token::cache::IssuanceCache;
use voucher_token::validation::ERR_INVALID_SIGNATURE;
use voucher_token::{
    BatchOptions, Confidence, KeyManager, OfflineOptions, OfflineValidator, RotationPolicy,
    SharedStore, ShortCodeOptions, ShortCodeService, SqliteStore, SubjectType, TokenIssuer,
    ValidationContext,
};

const START: i64 = 1_780_000_000;
const OVERLAP: i64 = 3_600;

struct Platform {
    clock: Arc<ManualClock>,
    store: SharedStore,
    keys: KeyManager,
    issuer: TokenIssuer,
    audit: Arc<MemoryAuditSink>,
}

async fn journal_at(path: &Path, clock: Arc<ManualClock>) -> SharedStore {
    Arc::new(SqliteStore::open(path, clock).await.unwrap())
}

async fn short_codes(p: &Platform) -> ShortCodeService {
    ShortCodeService::open(p.store.clone(), &ShortCodeConfig::default(), p.clock.clone())
        .await
        .unwrap()
}

async fn platform(path: &Path, clock: Arc<ManualClock>) -> Platform {
    let sqlite = SqliteStore::open(path, clock.clone()).await.unwrap();
    let store: SharedStore = Arc::new(sqlite);
    let policy = RotationPolicy {
        max_age_secs: 7 * 86_400,
        overlap_secs: OVERLAP,
    };
    let keys = KeyManager::new(store.clone(), "keys", policy, clock.clone());
    let config = IssuanceConfig::default();
    let cache = IssuanceCache::from_config(store.clone(), &config, clock.clone());
    let audit = Arc::new(MemoryAuditSink::new());
    let issuer = TokenIssuer::new(keys.clone(), cache, clock.clone(), config)
        .with_audit_sink(audit.clone());
    Platform {
        clock,
        store,
        keys,
        issuer,
        audit,
    }
}

#[tokio::test]
async fn test_user_token_through_rotation_and_offline_sync() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let p = platform(&dir.path().join("vouchers.db"), clock).await;

    let key = p.keys.ensure_signing_key(Algorithm::Es256).await.unwrap();
    let voucher_id = Uuid::new_v4();
    let issued = p
        .issuer
        .issue_user_token(voucher_id, "user-9", &key, 2 * 86_400)
        .await
        .unwrap();

    let ctx = ValidationContext::for_voucher(voucher_id);
    let online = p.issuer.validate_online(&issued.token, &ctx).await;
    assert!(online.is_valid, "{online:?}");
    assert_eq!(online.confidence, Confidence::High);

    let cached = p.issuer.cached_issuance(&issued.token_id).await.unwrap().unwrap();
    assert_eq!(cached.voucher_id, voucher_id);
    assert_eq!(cached.key_id, key.id);

    // A device syncs the key set, then goes offline.
    let jwks_json = p.keys.public_key_set(Algorithm::Es256).await.unwrap().to_json().unwrap();
    let jwks = JwkSet::from_json(&jwks_json).unwrap();
    let journal = journal_at(&dir.path().join("journal.db"), p.clock.clone()).await;
    let device =
        OfflineValidator::from_jwks(&jwks, p.clock.now(), journal, p.clock.clone()).unwrap();
    let offline = device
        .validate_offline(
            &issued.token,
            &OfflineOptions {
                expected_voucher_id: Some(voucher_id),
                allow_expired: false,
            },
        )
        .await;
    assert!(offline.is_valid, "{offline:?}");
    assert_eq!(offline.confidence, Confidence::Medium);
    assert_eq!(offline.user_id.as_deref(), Some("user-9"));
    assert_eq!(device.pending_attempts().await.unwrap(), 1);

    // Rotation keeps the old key verifying for the overlap window.
    let rotated = p.keys.rotate_keys(Algorithm::Es256).await.unwrap();
    assert_ne!(rotated.id, key.id);
    p.clock.advance(OVERLAP - 60);
    assert!(p.issuer.validate_online(&issued.token, &ctx).await.is_valid);

    // Past the window the old key is gone.
    p.clock.advance(120);
    let after = p.issuer.validate_online(&issued.token, &ctx).await;
    assert!(!after.is_valid);
    assert_eq!(after.error(), Some(ERR_INVALID_SIGNATURE));

    // The device's earlier acceptance is overturned once it reconciles.
    let report = device.sync_offline_validations(&p.issuer).await.unwrap();
    assert!(report.confirmed.is_empty());
    assert_eq!(report.overturned.len(), 1);
    assert!(report.overturned[0].offline_valid);
    assert!(!report.overturned[0].online_valid);
    assert_eq!(report.retained, 0);
    assert_eq!(device.pending_attempts().await.unwrap(), 0);

    let operations: Vec<_> = p.audit.entries().iter().map(|e| e.operation).collect();
    assert_eq!(operations.first(), Some(&AuditOperation::Generated));
    assert!(operations.contains(&AuditOperation::Rejected));
}

#[tokio::test]
async fn test_print_batch_and_short_codes() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let p = platform(&dir.path().join("vouchers.db"), clock).await;
    let key = p.keys.ensure_signing_key(Algorithm::Es256).await.unwrap();

    let vouchers = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let batch = p
        .issuer
        .issue_batch(
            &vouchers,
            &key,
            &BatchOptions {
                prefix: "FAIR".into(),
                ttl_secs: 86_400,
                limit: 100,
                campaign_id: Some("autumn".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(batch.tokens.len(), 3);

    let print_only = ValidationContext {
        require_print_token: true,
        ..ValidationContext::default()
    };
    for issued in &batch.tokens {
        let result = p.issuer.validate_online(&issued.token, &print_only).await;
        assert!(result.is_valid, "{result:?}");
        let claims = result.voucher_info.unwrap();
        assert_eq!(claims.batch_code.as_deref(), Some(batch.batch_code.as_str()));
        assert_eq!(claims.redemption_limit, Some(100));
    }

    let codes = short_codes(&p).await;

    let print_codes = codes
        .generate_batch_short_codes(&vouchers, &ShortCodeOptions::print())
        .await
        .unwrap();
    assert_eq!(print_codes.len(), 3);
    for (code, voucher_id) in print_codes.iter().zip(vouchers) {
        let check = codes
            .validate_short_code(
                &code.code.to_lowercase(),
                &code.checksum,
                Some(SubjectType::Print),
            )
            .await;
        assert!(check.is_valid, "{check:?}");
        assert_eq!(check.voucher_id, Some(voucher_id));
    }

    let user_code = codes
        .generate_short_code(vouchers[0], &ShortCodeOptions::user("user-3"))
        .await
        .unwrap();
    let mismatch = codes
        .validate_short_code(&user_code.code, &user_code.checksum, Some(SubjectType::Print))
        .await;
    assert!(!mismatch.is_valid);
    assert_eq!(mismatch.reason.as_deref(), Some("Code type mismatch"));

    // Codes expire with their registry entries.
    p.clock.advance(31 * 86_400);
    let expired = codes
        .validate_short_code(&user_code.code, &user_code.checksum, None)
        .await;
    assert!(!expired.is_valid);
}

#[tokio::test]
async fn test_keys_survive_store_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vouchers.db");
    let clock = Arc::new(ManualClock::new(START));

    let (key_id, token) = {
        let p = platform(&path, clock.clone()).await;
        let key = p.keys.ensure_signing_key(Algorithm::Es256).await.unwrap();
        let issued = p
            .issuer
            .issue_user_token(Uuid::new_v4(), "user-1", &key, 3_600)
            .await
            .unwrap();
        (key.id.clone(), issued.token)
    };

    let p = platform(&path, clock).await;
    let current = p.keys.current_signing_key(Algorithm::Es256).await.unwrap();
    assert_eq!(current.id, key_id);
    let result = p
        .issuer
        .validate_online(&token, &ValidationContext::default())
        .await;
    assert!(result.is_valid, "{result:?}");
    assert_eq!(result.key_id.as_deref(), Some(key_id.as_str()));
}

#[tokio::test]
async fn test_short_code_outlives_key_rotation_and_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vouchers.db");
    let clock = Arc::new(ManualClock::new(START));

    let code = {
        let p = platform(&path, clock.clone()).await;
        p.keys.ensure_signing_key(Algorithm::Es256).await.unwrap();
        short_codes(&p)
            .await
            .generate_short_code(Uuid::new_v4(), &ShortCodeOptions::print())
            .await
            .unwrap()
    };

    // The signing key that was current at print time leaves the key set.
    let p = platform(&path, clock).await;
    p.keys.rotate_keys(Algorithm::Es256).await.unwrap();
    p.clock.advance(OVERLAP + 1);
    assert!(p.clock.now() < code.expires_at);

    let check = short_codes(&p)
        .await
        .validate_short_code(&code.code, &code.checksum, Some(SubjectType::Print))
        .await;
    assert!(check.is_valid, "{check:?}");
    assert_eq!(check.voucher_id, Some(code.voucher_id));
}

#[tokio::test]
async fn test_offline_journal_survives_device_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let journal_path = dir.path().join("journal.db");
    let clock = Arc::new(ManualClock::new(START));
    let p = platform(&dir.path().join("vouchers.db"), clock.clone()).await;

    let key = p.keys.ensure_signing_key(Algorithm::Es256).await.unwrap();
    let voucher_id = Uuid::new_v4();
    let issued = p
        .issuer
        .issue_user_token(voucher_id, "user-4", &key, 86_400)
        .await
        .unwrap();
    let jwks = p.keys.public_key_set(Algorithm::Es256).await.unwrap();

    {
        let journal = journal_at(&journal_path, clock.clone()).await;
        let device =
            OfflineValidator::from_jwks(&jwks, clock.now(), journal, clock.clone()).unwrap();
        let result = device
            .validate_offline(&issued.token, &OfflineOptions::default())
            .await;
        assert!(result.is_valid, "{result:?}");
    }

    // A fresh validator over the reopened journal still owes the replay.
    let journal = journal_at(&journal_path, clock.clone()).await;
    let device = OfflineValidator::from_jwks(&jwks, clock.now(), journal, clock.clone()).unwrap();
    assert_eq!(device.pending_attempts().await.unwrap(), 1);

    let report = device.sync_offline_validations(&p.issuer).await.unwrap();
    assert_eq!(report.confirmed.len(), 1);
    assert_eq!(report.confirmed[0].voucher_id, Some(voucher_id));
    assert!(report.overturned.is_empty());
    assert_eq!(device.pending_attempts().await.unwrap(), 0);
}
