//! Working-directory cache.
//!
//! Remembers which working directory was used for a source URL so that an
//! interrupted run resumes in the same place even when the output path
//! changes. Storage failures are logged and never abort a run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::time::{ms_to_datetime, now_ms};
use super::{init_pool, init_write_pool, run_migrations};
use crate::Result;
use crate::utils::fs::absolutize;

/// Records not accessed for this long are purged when the cache is opened.
pub const CACHE_ENTRY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdirRecord {
    pub url: String,
    pub workdir: PathBuf,
    pub last_access: DateTime<Utc>,
}

/// Working-directory repository trait.
#[async_trait]
pub trait WorkdirRepository: Send + Sync {
    async fn get(&self, url: &str) -> Result<Option<WorkdirRecord>>;
    /// Insert or replace the record for `url`, refreshing its timestamp.
    async fn upsert(&self, url: &str, workdir: &Path) -> Result<()>;
    async fn remove(&self, url: &str) -> Result<()>;
    /// Delete records last accessed before `cutoff_ms`; returns the count.
    async fn purge_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// SQLx implementation of [`WorkdirRepository`].
pub struct SqlxWorkdirRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxWorkdirRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }

    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| crate::utils::fs::io_error("creating directory", parent, e))?;
        }
        let write_pool = init_write_pool(path).await?;
        run_migrations(&write_pool).await?;
        let pool = init_pool(path).await?;
        Ok(Self::new(pool, write_pool))
    }
}

#[async_trait]
impl WorkdirRepository for SqlxWorkdirRepository {
    async fn get(&self, url: &str) -> Result<Option<WorkdirRecord>> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT url, workdir, last_access FROM workdir_cache WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(url, workdir, last_access)| WorkdirRecord {
            url,
            workdir: PathBuf::from(workdir),
            last_access: ms_to_datetime(last_access),
        }))
    }

    async fn upsert(&self, url: &str, workdir: &Path) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workdir_cache (url, workdir, last_access)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                workdir = excluded.workdir,
                last_access = excluded.last_access
            "#,
        )
        .bind(url)
        .bind(workdir.to_string_lossy().as_ref())
        .bind(now_ms())
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM workdir_cache WHERE url = ?")
            .bind(url)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workdir_cache WHERE last_access < ?")
            .bind(cutoff_ms)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Repository used when caching is turned off: remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledWorkdirRepository;

#[async_trait]
impl WorkdirRepository for DisabledWorkdirRepository {
    async fn get(&self, _url: &str) -> Result<Option<WorkdirRecord>> {
        Ok(None)
    }

    async fn upsert(&self, _url: &str, _workdir: &Path) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn purge_older_than(&self, _cutoff_ms: i64) -> Result<u64> {
        Ok(0)
    }
}

/// Error-swallowing front end over a [`WorkdirRepository`].
///
/// Read-then-write sequences must run inside one [`CacheSession`], which
/// holds the process-wide cache lock.
pub struct WorkdirCache {
    repo: Arc<dyn WorkdirRepository>,
    lock: Mutex<()>,
}

impl WorkdirCache {
    pub fn new(repo: Arc<dyn WorkdirRepository>) -> Self {
        Self {
            repo,
            lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledWorkdirRepository))
    }

    /// Open the SQLite cache at `path` and purge expired records. Falls back
    /// to a disabled cache if the database cannot be used.
    pub async fn open(path: &Path) -> Self {
        let repo = match SqlxWorkdirRepository::open(path).await {
            Ok(repo) => repo,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to open cache database, caching disabled");
                return Self::disabled();
            }
        };
        let cache = Self::new(Arc::new(repo));
        cache.purge_expired(CACHE_ENTRY_TTL).await;
        cache
    }

    /// Remove records not accessed within `ttl`.
    pub async fn purge_expired(&self, ttl: Duration) {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(ttl_ms);
        let _guard = self.lock.lock().await;
        match self.repo.purge_older_than(cutoff).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged expired working directory records"),
            Err(e) => error!(error = %e, "Failed to purge expired cache records"),
        }
    }

    /// Take the cache lock for a sequence of operations.
    pub async fn session(&self) -> CacheSession<'_> {
        CacheSession {
            repo: self.repo.as_ref(),
            _guard: self.lock.lock().await,
        }
    }

    pub async fn lookup(&self, url: &str) -> Option<PathBuf> {
        self.session().await.lookup(url).await
    }

    pub async fn upsert(&self, url: &str, workdir: &Path) {
        self.session().await.upsert(url, workdir).await
    }

    pub async fn remove(&self, url: &str) {
        self.session().await.remove(url).await
    }
}

/// Exclusive access to the cache until dropped.
pub struct CacheSession<'a> {
    repo: &'a dyn WorkdirRepository,
    _guard: MutexGuard<'a, ()>,
}

impl CacheSession<'_> {
    /// Cached working directory for `url`; storage errors read as a miss.
    pub async fn lookup(&self, url: &str) -> Option<PathBuf> {
        match self.repo.get(url).await {
            Ok(record) => record.map(|r| r.workdir),
            Err(e) => {
                error!(url, error = %e, "Exception when reading cache");
                None
            }
        }
    }

    /// Stores `workdir` in absolute, normalized form.
    pub async fn upsert(&self, url: &str, workdir: &Path) {
        let workdir = absolutize(workdir);
        match self.repo.upsert(url, &workdir).await {
            Ok(()) => debug!(url, workdir = %workdir.display(), "Cached working directory"),
            Err(e) => error!(url, error = %e, "Exception when updating cache"),
        }
    }

    pub async fn remove(&self, url: &str) {
        if let Err(e) = self.repo.remove(url).await {
            warn!(url, error = %e, "Exception when updating cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    async fn open_repo(dir: &Path) -> SqlxWorkdirRepository {
        SqlxWorkdirRepository::open(&dir.join("data.db")).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;

        assert_eq!(repo.get("https://a/x.m3u8").await.unwrap(), None);
        repo.upsert("https://a/x.m3u8", Path::new("/work/x")).await.unwrap();
        let first = repo.get("https://a/x.m3u8").await.unwrap().unwrap();
        assert_eq!(first.workdir, PathBuf::from("/work/x"));

        tokio::time::sleep(Duration::from_millis(5)).await;
        repo.upsert("https://a/x.m3u8", Path::new("/work/y")).await.unwrap();
        let second = repo.get("https://a/x.m3u8").await.unwrap().unwrap();
        assert_eq!(second.workdir, PathBuf::from("/work/y"));
        assert!(second.last_access > first.last_access);
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(dir.path()).await;
        repo.upsert("u", Path::new("/w")).await.unwrap();
        repo.remove("u").await.unwrap();
        repo.remove("never-inserted").await.unwrap();
        assert_eq!(repo.get("u").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_records_are_purged_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("data.db");
        {
            let repo = SqlxWorkdirRepository::open(&db).await.unwrap();
            repo.upsert("fresh", Path::new("/w/fresh")).await.unwrap();
            repo.upsert("stale", Path::new("/w/stale")).await.unwrap();
            let eight_days_ago = now_ms() - 8 * 24 * 60 * 60 * 1000;
            sqlx::query("UPDATE workdir_cache SET last_access = ? WHERE url = 'stale'")
                .bind(eight_days_ago)
                .execute(&repo.write_pool)
                .await
                .unwrap();
        }

        let cache = WorkdirCache::open(&db).await;

        assert_eq!(cache.lookup("fresh").await, Some(PathBuf::from("/w/fresh")));
        assert_eq!(cache.lookup("stale").await, None);
    }

    #[tokio::test]
    async fn test_relative_workdir_is_stored_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WorkdirCache::open(&dir.path().join("data.db")).await;

        cache.upsert("u", Path::new("resume-here")).await;

        let expected = std::env::current_dir()
            .unwrap()
            .canonicalize()
            .unwrap()
            .join("resume-here");
        let stored = cache.lookup("u").await.unwrap();
        assert!(stored.is_absolute());
        assert_eq!(stored, expected);
    }

    #[tokio::test]
    async fn test_disabled_cache_remembers_nothing() {
        let cache = WorkdirCache::disabled();
        cache.upsert("u", Path::new("/w")).await;
        assert_eq!(cache.lookup("u").await, None);
    }

    struct BrokenRepository;

    #[async_trait]
    impl WorkdirRepository for BrokenRepository {
        async fn get(&self, _url: &str) -> Result<Option<WorkdirRecord>> {
            Err(Error::DatabaseSqlx(sqlx::Error::PoolClosed))
        }
        async fn upsert(&self, _url: &str, _workdir: &Path) -> Result<()> {
            Err(Error::DatabaseSqlx(sqlx::Error::PoolClosed))
        }
        async fn remove(&self, _url: &str) -> Result<()> {
            Err(Error::DatabaseSqlx(sqlx::Error::PoolClosed))
        }
        async fn purge_older_than(&self, _cutoff_ms: i64) -> Result<u64> {
            Err(Error::DatabaseSqlx(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn test_storage_errors_are_swallowed() {
        let cache = WorkdirCache::new(Arc::new(BrokenRepository));
        cache.purge_expired(CACHE_ENTRY_TTL).await;
        cache.upsert("u", Path::new("/w")).await;
        cache.remove("u").await;
        assert_eq!(cache.lookup("u").await, None);
    }

    #[tokio::test]
    async fn test_session_serializes_access() {
        let cache = Arc::new(WorkdirCache::disabled());
        let session = cache.session().await;
        let contender = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.lookup("u").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(session);
        assert_eq!(contender.await.unwrap(), None);
    }
}
