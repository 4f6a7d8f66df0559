//! Voucher token CLI
//!
//! Operates the token subsystem against a local `SQLite` store: key rotation,
//! JWKS export, issuance, online and offline validation, short codes.
//! Offline commands keep their journal in a separate device-local file.
//!
//! Command output is JSON on stdout; logs go to stderr.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use voucher_core::config::{
    Config, OfflineConfig, default_database_path, default_journal_path, load_config,
};
use voucher_core::tracing_init::init_tracing;
use voucher_core::{SharedClock, SystemClock};
use voucher_crypto::{Algorithm, JwkSet};
use voucher_token::cache::IssuanceCache;
use voucher_token::{
    BatchOptions, KeyManager, OfflineOptions, OfflineValidator, SharedStore, ShortCodeOptions,
    ShortCodeService, SqliteStore, SubjectType, TimedStore, TokenIssuer, ValidationContext,
};

#[derive(Parser, Debug)]
#[command(name = "voucher-token")]
#[command(version, about = "Voucher token issuance, validation and key management")]
struct Args {
    /// Path to SQLite store file.
    #[arg(long, global = true, env = "VOUCHER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Explicit config file (JSON), applied over the global one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Signing algorithm (ES256 or ES384). Defaults to the configured one.
    #[arg(long, global = true)]
    algorithm: Option<Algorithm>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the current signing key.
    RotateKeys,
    /// Print the verification key set as a JWK Set.
    PublicKeys,
    /// Issue a token bound to one user.
    IssueUser {
        #[arg(long)]
        voucher_id: Uuid,
        #[arg(long)]
        user_id: String,
        /// Token lifetime in seconds. Defaults to the configured TTL.
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Issue print tokens sharing one batch code.
    IssueBatch {
        /// Batch code prefix, 1-8 uppercase letters or digits.
        #[arg(long)]
        prefix: String,
        /// Redemption limit per token.
        #[arg(long)]
        limit: u32,
        #[arg(long)]
        ttl: Option<i64>,
        #[arg(long)]
        campaign_id: Option<String>,
        /// Voucher ids, one token each.
        #[arg(required = true)]
        vouchers: Vec<Uuid>,
    },
    /// Validate a token against the live key set.
    Validate {
        token: String,
        #[arg(long)]
        voucher_id: Option<Uuid>,
        #[arg(long)]
        allow_expired: bool,
        #[arg(long)]
        require_print: bool,
    },
    /// Validate a token against a JWK Set file only, as a disconnected
    /// device would.
    ValidateOffline {
        token: String,
        /// JWK Set file from `public-keys`.
        #[arg(long)]
        jwks: PathBuf,
        /// When the JWK Set was fetched (Unix seconds). Defaults to now.
        #[arg(long)]
        synced_at: Option<i64>,
        #[arg(long)]
        voucher_id: Option<Uuid>,
        #[arg(long)]
        allow_expired: bool,
        /// Offline journal file. Defaults to the configured one.
        #[arg(long)]
        journal: Option<PathBuf>,
    },
    /// Replay journaled offline validations against the live key set.
    SyncOffline {
        #[arg(long)]
        journal: Option<PathBuf>,
    },
    /// Read a token's expiry without verifying it.
    CheckExpiration { token: String },
    /// Generate and register a short code.
    ShortCode {
        #[arg(long)]
        voucher_id: Uuid,
        /// Bind to a user; omit for a print code.
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Check a short code and its checksum.
    CheckShortCode {
        code: String,
        checksum: String,
        /// Expected subject type (`user` or `print`).
        #[arg(long = "type")]
        expected_type: Option<SubjectType>,
    },
    /// Delete expired entries from the store.
    PurgeExpired,
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let level = &config.log_level;
    init_tracing(
        &format!("voucher_token={level},voucher_core={level},voucher_audit=info"),
        args.log_json,
    );

    let algorithm = match args.algorithm {
        Some(alg) => alg,
        None => config.keys.algorithm.parse()?,
    };

    // Offline validation must work without the key store.
    if let Command::ValidateOffline {
        token,
        jwks,
        synced_at,
        voucher_id,
        allow_expired,
        journal,
    } = &args.command
    {
        let journal = open_journal(journal.as_deref(), &config.offline).await?;
        let options = OfflineOptions {
            expected_voucher_id: *voucher_id,
            allow_expired: *allow_expired,
        };
        return validate_offline(token, jwks, *synced_at, journal, &config.offline, &options).await;
    }

    let clock = SystemClock::shared();
    let db_path = match args.db_path.clone().or_else(|| config.store.database_path.clone()) {
        Some(path) => path,
        None => default_database_path().context("Cannot determine data directory")?,
    };
    info!(path = %db_path.display(), "Opening key-value store");
    let sqlite = SqliteStore::open(&db_path, clock.clone()).await?;
    let store: SharedStore = Arc::new(TimedStore::new(sqlite.clone(), config.store.timeout()));

    let keys = KeyManager::from_config(store.clone(), &config.keys, clock.clone());
    let ctx = Ctx {
        config,
        algorithm,
        clock,
        store,
        keys,
    };

    match args.command {
        Command::RotateKeys => rotate_keys(&ctx).await,
        Command::PublicKeys => {
            let jwks = ctx.keys.public_key_set(ctx.algorithm).await?;
            print_json(&jwks)
        }
        Command::IssueUser {
            voucher_id,
            user_id,
            ttl,
        } => {
            let key = ctx.keys.ensure_signing_key(ctx.algorithm).await?;
            let ttl = ttl.unwrap_or(ctx.config.issuance.default_ttl_secs);
            let issued = ctx
                .issuer()
                .issue_user_token(voucher_id, &user_id, &key, ttl)
                .await?;
            print_json(&issued)
        }
        Command::IssueBatch {
            prefix,
            limit,
            ttl,
            campaign_id,
            vouchers,
        } => {
            let key = ctx.keys.ensure_signing_key(ctx.algorithm).await?;
            let options = BatchOptions {
                prefix,
                ttl_secs: ttl.unwrap_or(ctx.config.issuance.default_ttl_secs),
                limit,
                campaign_id,
            };
            let batch = ctx.issuer().issue_batch(&vouchers, &key, &options).await?;
            print_json(&batch)
        }
        Command::Validate {
            token,
            voucher_id,
            allow_expired,
            require_print,
        } => {
            let validation = ValidationContext {
                expected_voucher_id: voucher_id,
                allow_expired,
                require_print_token: require_print,
            };
            let result = ctx.issuer().validate_online(&token, &validation).await;
            print_json(&result)
        }
        // Handled before the store is opened.
        Command::ValidateOffline { .. } => Ok(()),
        Command::SyncOffline { journal } => {
            let journal = open_journal(journal.as_deref(), &ctx.config.offline).await?;
            let validator = OfflineValidator::new(Vec::new(), 0, journal, ctx.clock.clone())
                .with_config(&ctx.config.offline);
            let report = validator.sync_offline_validations(&ctx.issuer()).await?;
            print_json(&report)
        }
        Command::CheckExpiration { token } => {
            let status = ctx.issuer().check_expiration(&token)?;
            print_json(&status)
        }
        Command::ShortCode {
            voucher_id,
            user_id,
            days,
        } => {
            let options = ShortCodeOptions {
                subject_type: if user_id.is_some() {
                    SubjectType::User
                } else {
                    SubjectType::Print
                },
                user_id,
                expiration_days: days,
            };
            let code = ctx
                .short_codes()
                .await?
                .generate_short_code(voucher_id, &options)
                .await?;
            print_json(&code)
        }
        Command::CheckShortCode {
            code,
            checksum,
            expected_type,
        } => {
            let check = ctx
                .short_codes()
                .await?
                .validate_short_code(&code, &checksum, expected_type)
                .await;
            print_json(&check)
        }
        Command::PurgeExpired => {
            let purged = sqlite.purge_expired().await?;
            print_json(&json!({ "purged": purged }))
        }
    }
}

/// Everything the store-backed commands share.
struct Ctx {
    config: Config,
    algorithm: Algorithm,
    clock: SharedClock,
    store: SharedStore,
    keys: KeyManager,
}

impl Ctx {
    fn issuer(&self) -> TokenIssuer {
        let cache =
            IssuanceCache::from_config(self.store.clone(), &self.config.issuance, self.clock.clone());
        TokenIssuer::new(
            self.keys.clone(),
            cache,
            self.clock.clone(),
            self.config.issuance.clone(),
        )
        .with_algorithm(self.algorithm)
    }

    async fn short_codes(&self) -> anyhow::Result<ShortCodeService> {
        Ok(
            ShortCodeService::open(self.store.clone(), &self.config.short_codes, self.clock.clone())
                .await?,
        )
    }
}

async fn rotate_keys(ctx: &Ctx) -> anyhow::Result<()> {
    let key = ctx.keys.rotate_keys(ctx.algorithm).await?;
    print_json(&json!({
        "key_id": key.id,
        "algorithm": key.algorithm(),
        "created_at": key.created_at,
        "fingerprint": key.public_key().fingerprint(),
        "public_key_pem": key.public_key().to_pem()?,
    }))
}

/// The device-local journal. Never the shared key store.
async fn open_journal(path: Option<&Path>, config: &OfflineConfig) -> anyhow::Result<SharedStore> {
    let path = match path.map(Path::to_path_buf).or_else(|| config.journal_path.clone()) {
        Some(path) => path,
        None => default_journal_path().context("Cannot determine data directory")?,
    };
    debug!(path = %path.display(), "Opening offline journal");
    let journal = SqliteStore::open(&path, SystemClock::shared()).await?;
    Ok(Arc::new(journal))
}

async fn validate_offline(
    token: &str,
    jwks_path: &Path,
    synced_at: Option<i64>,
    journal: SharedStore,
    config: &OfflineConfig,
    options: &OfflineOptions,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(jwks_path)
        .with_context(|| format!("Failed to read JWK Set {}", jwks_path.display()))?;
    let jwks = JwkSet::from_json(&content)?;
    let clock = SystemClock::shared();
    let synced_at = synced_at.unwrap_or_else(|| clock.now());
    let validator =
        OfflineValidator::from_jwks(&jwks, synced_at, journal, clock)?.with_config(config);
    let result = validator.validate_offline(token, options).await;
    print_json(&result)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let mut out = io::stdout();
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}
