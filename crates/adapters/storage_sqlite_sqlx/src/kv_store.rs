//! `SQLite` implementation of [`KeyValueStore`].
//!
//! Values are stored as JSON scalars so their type survives a restart.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use thingrules_app::error::EngineError;
use thingrules_app::ports::KeyValueStore;
use thingrules_domain::property::{PropertyMap, PropertyValue};

use crate::error::StorageError;

/// Wrapper for converting database rows into domain types without polluting
/// domain structs with database concerns.
struct Wrapper(String, PropertyValue);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let name: String = row.try_get("name")?;
        let raw: String = row.try_get("value")?;
        let value: PropertyValue =
            serde_json::from_str(&raw).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        Ok(Self(name, value))
    }
}

const SELECT_ALL: &str = "SELECT name, value FROM properties";

const UPSERT: &str = r"
    INSERT INTO properties (name, value, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
";

/// `SQLite`-backed key-value store.
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Create a new store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    async fn load_all(&self) -> Result<PropertyMap, EngineError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(|w| (w.0, w.1)).collect())
    }

    async fn put(&self, name: &str, value: &PropertyValue) -> Result<(), EngineError> {
        let json = serde_json::to_string(value).map_err(StorageError::from)?;

        sqlx::query(UPSERT)
            .bind(name)
            .bind(&json)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(())
    }
}
