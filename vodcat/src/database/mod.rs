//! Persistence layer for the working-directory cache.
//!
//! SQLite via sqlx: a small read pool, a single-connection write pool, and
//! embedded migrations.

pub mod time;
pub mod workdir_cache;

pub use workdir_cache::{
    CACHE_ENTRY_TTL, CacheSession, DisabledWorkdirRepository, SqlxWorkdirRepository, WorkdirCache,
    WorkdirRecord, WorkdirRepository,
};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Serialized write pool type alias (max_connections=1).
pub type WritePool = Pool<Sqlite>;

/// Readers needed by a single CLI process.
const READ_POOL_SIZE: u32 = 2;

/// Default busy timeout in milliseconds. Several processes may share one
/// database file.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 10_000;

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        // Enable WAL mode for concurrent reads during writes
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .create_if_missing(true)
}

/// Open the read pool for the database file at `path`.
pub async fn init_pool(path: &Path) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(READ_POOL_SIZE)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options(path))
        .await?;
    tracing::debug!(path = %path.display(), "Database read pool initialized");
    Ok(pool)
}

/// Open a serialized write pool with `max_connections = 1`.
///
/// All writes go through this pool so that only one connection ever
/// attempts to take the SQLite write lock.
pub async fn init_write_pool(path: &Path) -> Result<WritePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(60))
        .connect_with(connect_options(path))
        .await?;
    tracing::debug!(path = %path.display(), "Database write pool initialized");
    Ok(pool)
}

pub async fn run_migrations(pool: &WritePool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::debug!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
