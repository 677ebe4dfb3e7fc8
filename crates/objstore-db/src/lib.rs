//! Objstore persistence layer.
//!
//! This crate wraps a single SQLite table of key/value objects behind an async
//! API (sqlx). The database assigns every key; values are opaque strings whose
//! maximum size is a connection-level option. Each method maps to exactly one
//! SQL statement so callers never hold a connection across requests.

use std::{path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Connection, Row, SqlitePool,
};
use thiserror::Error;
use tracing::debug;

/// Default SQLite busy timeout in milliseconds when the DB is under load.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default maximum value size in bytes.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 64;

/// Default number of pooled connections for file-backed databases.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

const CREATE_TABLE_QUERY: &str =
    "CREATE TABLE IF NOT EXISTS objects (key INTEGER PRIMARY KEY AUTOINCREMENT, value TEXT NULL)";

/// Tunables applied when the pool is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    /// Upper bound on `value` length in bytes; `None` disables the check.
    pub max_value_size: Option<usize>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_value_size: Some(DEFAULT_MAX_VALUE_SIZE),
        }
    }
}

/// Primary entry point to the persistence layer.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    max_value_size: Option<usize>,
}

impl Database {
    /// Opens (or creates) the SQLite database at the given URL
    /// (e.g. `sqlite:///var/db/objects.db`) with default options.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, DatabaseOptions::default()).await
    }

    /// Opens the database and makes sure the `objects` table exists.
    ///
    /// In-memory URLs are pinned to one long-lived connection, otherwise every
    /// pooled connection would see its own empty database.
    pub async fn connect_with(database_url: &str, options: DatabaseOptions) -> Result<Self> {
        let in_memory = is_in_memory_url(database_url);

        let mut connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url '{database_url}'"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        let max_connections = if in_memory {
            1
        } else {
            options.max_connections.max(1)
        };

        let mut pool_options = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections);
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(connect_options).await?;

        sqlx::query(CREATE_TABLE_QUERY)
            .execute(&pool)
            .await
            .context("failed to create objects table")?;
        debug!(max_connections, "objects table ready");

        Ok(Self {
            pool,
            max_value_size: options.max_value_size,
        })
    }

    /// Connects to a file path via `sqlite://` scheme.
    pub async fn connect_file(path: &Path, options: DatabaseOptions) -> Result<Self> {
        let url = format!("sqlite://{}", path.display());
        Self::connect_with(&url, options).await
    }

    /// Exposes the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn max_value_size(&self) -> Option<usize> {
        self.max_value_size
    }

    /// Stores a new value and returns it with the key the database assigned.
    ///
    /// Values above the configured size fail with [`ObjectError::ValueTooLarge`]
    /// before any statement is issued.
    pub async fn insert_object(&self, value: &str) -> Result<ObjectRecord> {
        if let Some(max) = self.max_value_size {
            if value.len() > max {
                return Err(anyhow::Error::new(ObjectError::ValueTooLarge {
                    len: value.len(),
                    max,
                }));
            }
        }

        let result = sqlx::query("INSERT INTO objects (value) VALUES (?)")
            .bind(value)
            .execute(&self.pool)
            .await
            .context("couldn't insert object into database")?;

        let rowid = result.last_insert_rowid();
        let key = u64::try_from(rowid).map_err(|_| ObjectError::KeyOutOfRange(rowid))?;

        Ok(ObjectRecord {
            key,
            value: value.to_owned(),
        })
    }

    /// Retrieves an object by key.
    pub async fn fetch_object(&self, key: u64) -> Result<Option<ObjectRecord>> {
        // SQLite rowids are signed, so anything above i64::MAX cannot exist.
        let Ok(rowid) = i64::try_from(key) else {
            return Ok(None);
        };

        let row = sqlx::query("SELECT key, value FROM objects WHERE key = ?")
            .bind(rowid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(map_object).transpose()
    }

    /// Lists objects ordered by key ascending.
    pub async fn list_objects(&self, page: Page) -> Result<Vec<ObjectRecord>> {
        // LIMIT -1 is SQLite for "no limit".
        let limit = page.limit.map(i64::from).unwrap_or(-1);
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);

        let mut rows =
            sqlx::query("SELECT key, value FROM objects ORDER BY key ASC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch(&self.pool);

        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_object(row)?);
        }
        Ok(out)
    }

    pub async fn count_objects(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Checks that a pooled connection can be acquired and answers.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire database connection")?;
        conn.ping().await.context("database did not answer ping")?;
        Ok(())
    }

    /// Closes every pooled connection. Later calls fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Matches both `sqlite::memory:` and URI-style `file:name?mode=memory` DSNs.
fn is_in_memory_url(database_url: &str) -> bool {
    if database_url.contains(":memory:") {
        return true;
    }
    database_url
        .split_once('?')
        .map(|(_, params)| params.split('&').any(|param| param == "mode=memory"))
        .unwrap_or(false)
}

fn map_object(row: SqliteRow) -> Result<ObjectRecord> {
    let rowid: i64 = row.try_get("key")?;
    let key = u64::try_from(rowid).map_err(|_| ObjectError::KeyOutOfRange(rowid))?;

    Ok(ObjectRecord {
        key,
        // value is nullable in the schema; a NULL reads as empty.
        value: row
            .try_get::<Option<String>, _>("value")?
            .unwrap_or_default(),
    })
}

/// Parses a key as it appears in a URL path: ASCII digits only, fitting in u64.
pub fn parse_key(raw: &str) -> Result<u64, ObjectError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ObjectError::InvalidKey(raw.to_owned()));
    }
    raw.parse::<u64>()
        .map_err(|_| ObjectError::InvalidKey(raw.to_owned()))
}

/// Errors returned by the database layer that callers are expected to classify.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("payload max size is {max}")]
    ValueTooLarge { len: usize, max: usize },
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("assigned key {0} does not fit an unsigned 64-bit key")]
    KeyOutOfRange(i64),
}

/// Persisted object row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: u64,
    pub value: String,
}

/// Window over the key-ordered object listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: u64,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }
}
