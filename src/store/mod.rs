//! Persistent model records on SQLite
//!
//! Every status change goes through a single conditional `UPDATE` scoped by
//! the row key and the expected current status. Zero affected rows means
//! another worker moved the row first and is reported as
//! [`StoreError::ConcurrentUpdate`]. No other locking is used, so several
//! worker processes may share one database file.

mod activation;
mod base_model;
mod hf_model_repo;
mod model;
mod records;
mod storage_config;

pub use base_model::{NewBaseModel, SucceededFields};
pub use model::NewModel;
pub use records::{
    ActivationStatus, AdapterType, BaseModel, HfModelRepo, LoadingStatus, Model, ModelFormat,
    ModelKey, QuantizationType, SourceRepository, StorageConfig,
};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The conditional update matched no row
    #[error("concurrent update")]
    ConcurrentUpdate,

    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    AlreadyExists,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Maps a unique-constraint violation on insert to [`StoreError::AlreadyExists`]
pub(crate) fn map_insert_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
        _ => StoreError::Database(err),
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection that is never
    /// recycled, since each SQLite `:memory:` connection is its own database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("Store migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
