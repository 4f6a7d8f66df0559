//! `SQLite` pool construction for the persistent key-value store.
//!
//! The store file may be shared by several processes (the CLI and a
//! long-running issuer), so file pools run in WAL mode with a busy timeout
//! instead of failing fast on lock contention.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const FILE_POOL_SIZE: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("cannot create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot connect to store: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("store migration failed: {0}")]
    Migration(String),

    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open the store database at `path`, creating the file and any missing
/// parent directories.
pub async fn open_pool(path: &Path) -> Result<Pool<Sqlite>, DatabaseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = connect(options, FILE_POOL_SIZE).await?;

    info!(path = %path.display(), "Store database opened");
    Ok(pool)
}

/// Open a private in-memory database.
///
/// Each `:memory:` connection is a separate database, so the pool holds one.
pub async fn open_pool_in_memory() -> Result<Pool<Sqlite>, DatabaseError> {
    let options = SqliteConnectOptions::new().in_memory(true);
    let pool = connect(options, 1).await?;
    debug!("In-memory store database opened");
    Ok(pool)
}

async fn connect(
    options: SqliteConnectOptions,
    max_connections: u32,
) -> Result<Pool<Sqlite>, DatabaseError> {
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)
}
