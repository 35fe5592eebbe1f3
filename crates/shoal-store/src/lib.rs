//! The placement metadata store: the durable key→bucket mapping that
//! makes routing decisions stable across restarts.
//!
//! One row per placed object key. Writes are transactional at the row
//! level through SQLite; concurrent upserts for the same key serialize in
//! the storage engine and the last write wins. Keys are opaque UTF-8 and
//! preserved byte-exact.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use shoal_core::error::{ShoalError, ShoalResult};

/// Page size when the caller does not supply one.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Hard ceiling on a single listing page.
pub const MAX_LIST_LIMIT: usize = 1000;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS placements (
    key          TEXT PRIMARY KEY,
    bucket_name  TEXT NOT NULL,
    size         INTEGER NOT NULL,
    content_type TEXT NOT NULL DEFAULT '',
    metadata     TEXT NOT NULL DEFAULT '{}',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
)";

const BUCKET_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_placements_bucket ON placements (bucket_name)";

const UPSERT: &str = "\
INSERT INTO placements (key, bucket_name, size, content_type, metadata, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(key) DO UPDATE SET
    bucket_name  = excluded.bucket_name,
    size         = excluded.size,
    content_type = excluded.content_type,
    metadata     = excluded.metadata,
    updated_at   = excluded.updated_at";

/// One persisted placement: where an object key lives and what we know
/// about it.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementRecord {
    /// The object key, byte-exact as the client sent it.
    pub key: String,
    /// The backend bucket the object was placed on. The bucket may have
    /// been removed from the registry since; readers must tolerate that.
    pub bucket_name: String,
    /// Object size in bytes, as declared at placement time.
    pub size: u64,
    /// Declared content type, empty when unknown.
    pub content_type: String,
    /// Small client-supplied string map.
    pub metadata: HashMap<String, String>,
    /// First placement time.
    pub created_at: DateTime<Utc>,
    /// Last placement or re-placement time.
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed placement store.
#[derive(Debug, Clone)]
pub struct PlacementStore {
    pool: SqlitePool,
}

impl PlacementStore {
    /// Connect to the store named by `dsn` (e.g. `sqlite://shoal.db`)
    /// and run the schema migration.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::InvalidArgument`] for an unparseable DSN and
    /// [`ShoalError::Internal`] for connection or migration failures.
    pub async fn connect(dsn: &str) -> ShoalResult<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| ShoalError::invalid(format!("invalid database DSN {dsn}: {e}")))?
            .create_if_missing(true);

        // An in-memory SQLite database exists per connection; extra pool
        // connections would each see an empty database.
        let max_connections = if dsn.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| ShoalError::internal(format!("connect placement store: {e}")))?;

        for statement in [SCHEMA, BUCKET_INDEX] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| ShoalError::internal(format!("migrate placement store: {e}")))?;
        }
        info!(dsn, "placement store ready");

        Ok(Self { pool })
    }

    /// Upsert the placement for `key`. Re-placement of an existing key
    /// keeps `created_at` and refreshes everything else.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::Internal`] on storage failure.
    pub async fn record(
        &self,
        key: &str,
        bucket_name: &str,
        size: u64,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> ShoalResult<()> {
        let now = Utc::now();
        let metadata_json =
            serde_json::to_string(metadata).map_err(ShoalError::internal)?;

        sqlx::query(UPSERT)
            .bind(key)
            .bind(bucket_name)
            .bind(size.min(i64::MAX as u64) as i64)
            .bind(content_type.unwrap_or(""))
            .bind(metadata_json)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| ShoalError::internal(format!("record placement: {e}")))?;

        debug!(key, bucket = bucket_name, size, "placement recorded");
        Ok(())
    }

    /// The bucket a key was placed on.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::NotFound`] when the key has no placement.
    pub async fn find_bucket(&self, key: &str) -> ShoalResult<String> {
        let row = sqlx::query("SELECT bucket_name FROM placements WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShoalError::internal(format!("find placement: {e}")))?;

        row.map(|r| r.get("bucket_name"))
            .ok_or_else(|| ShoalError::NotFound(format!("object {key}")))
    }

    /// The full placement record for a key.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::NotFound`] when the key has no placement.
    pub async fn get_info(&self, key: &str) -> ShoalResult<PlacementRecord> {
        let row = sqlx::query(
            "SELECT key, bucket_name, size, content_type, metadata, created_at, updated_at \
             FROM placements WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ShoalError::internal(format!("get placement: {e}")))?;

        row.map(|r| record_from_row(&r))
            .ok_or_else(|| ShoalError::NotFound(format!("object {key}")))
    }

    /// List placements, lexicographically by key, strictly after
    /// `marker`. `bucket` and `prefix` filters are AND-combined. A zero
    /// `limit` means [`DEFAULT_LIST_LIMIT`]; anything above
    /// [`MAX_LIST_LIMIT`] is capped.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::Internal`] on storage failure.
    pub async fn list(
        &self,
        bucket: Option<&str>,
        prefix: Option<&str>,
        marker: Option<&str>,
        limit: usize,
    ) -> ShoalResult<Vec<PlacementRecord>> {
        let limit = if limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            limit.min(MAX_LIST_LIMIT)
        };

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT key, bucket_name, size, content_type, metadata, created_at, updated_at \
             FROM placements WHERE 1 = 1",
        );
        if let Some(bucket) = bucket.filter(|b| !b.is_empty()) {
            builder.push(" AND bucket_name = ");
            builder.push_bind(bucket.to_owned());
        }
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            builder.push(" AND key LIKE ");
            builder.push_bind(format!("{}%", escape_like(prefix)));
            builder.push(" ESCAPE '\\'");
        }
        if let Some(marker) = marker.filter(|m| !m.is_empty()) {
            builder.push(" AND key > ");
            builder.push_bind(marker.to_owned());
        }
        builder.push(" ORDER BY key LIMIT ");
        builder.push_bind(limit as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ShoalError::internal(format!("list placements: {e}")))?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Delete the placement for `key`. Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::Internal`] on storage failure.
    pub async fn delete(&self, key: &str) -> ShoalResult<()> {
        sqlx::query("DELETE FROM placements WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| ShoalError::internal(format!("delete placement: {e}")))?;
        debug!(key, "placement deleted");
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> PlacementRecord {
    let metadata_json: String = row.get("metadata");
    PlacementRecord {
        key: row.get("key"),
        bucket_name: row.get("bucket_name"),
        size: row.get::<i64, _>("size").max(0) as u64,
        content_type: row.get("content_type"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Escape SQL LIKE wildcards so a prefix matches literally.
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
