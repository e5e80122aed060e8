use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::repository::{AttemptRepository, QuestionRepository, Storage, StudentRepository};

mod attempt_repo;
mod mapping;
mod migrate;
mod question_repo;
mod student_repo;

/// Database used by the binaries when neither `--db` nor `QUIZ_DB_URL` is set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:quiz.sqlite3";

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Question bank and attempt history in one `SQLite` file.
///
/// Learners practice concurrently on a shared pool. Single-statement writes
/// rely on the busy timeout; multi-statement writes go through
/// [`SqliteRepository::begin_write`] so they hold the write lock from their
/// first read.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRepository {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// Connections enforce foreign keys and use WAL so readers never block
    /// the learner who is being graded.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the URL is malformed or the pool cannot
    /// open a connection.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if migration queries fail.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }

    /// Start a transaction that takes the write lock up front.
    ///
    /// A deferred transaction that reads and then writes cannot upgrade its
    /// WAL snapshot once another connection has committed, and fails with
    /// `SQLITE_BUSY` without consulting the busy timeout. `BEGIN IMMEDIATE`
    /// queues behind the busy timeout instead.
    pub(crate) async fn begin_write(
        &self,
    ) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }
}

/// Rewrite a relative `sqlite:` path as an absolute `sqlite://` URL.
///
/// In-memory and already-absolute URLs pass through unchanged.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_owned();
    }

    let path = Path::new(trimmed.strip_prefix("sqlite:").unwrap_or(trimmed));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

impl Storage {
    /// Build a `Storage` backed by `SQLite`, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connection or migrations cannot be
    /// completed.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        let repo = Arc::new(repo);
        let students: Arc<dyn StudentRepository> = repo.clone();
        let questions: Arc<dyn QuestionRepository> = repo.clone();
        let attempts: Arc<dyn AttemptRepository> = repo;
        Ok(Self {
            students,
            questions,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_write_opens_a_transaction() {
        let repo = SqliteRepository::connect("sqlite::memory:").await.unwrap();
        let mut tx = repo.begin_write().await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(one, 1);
        tx.commit().await.unwrap();
    }

    #[test]
    fn default_url_normalizes_to_an_absolute_file() {
        let url = normalize_url(DEFAULT_DATABASE_URL);
        let path = url.strip_prefix("sqlite://").unwrap();
        assert!(Path::new(path).is_absolute());
        assert!(path.ends_with("quiz.sqlite3"));
        assert_eq!(normalize_url(&url), url);
        assert_eq!(normalize_url(" sqlite::memory: "), "sqlite::memory:");
    }
}
