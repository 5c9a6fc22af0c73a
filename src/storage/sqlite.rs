//! SQLite Persistent Storage for Confirmations State
//!
//! Provides durable storage for the token ledger and retry queue that
//! survives process restarts. Uses connection pooling via r2d2.
//!
//! Each save replaces the whole snapshot inside a single transaction, so
//! a crash mid-save leaves the previous snapshot intact.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Row};
use serde::de::DeserializeOwned;
use std::path::Path;

use super::traits::{ConfirmationsSnapshot, StateStore, StorageError, StorageResult};
use crate::types::{
    AdType, Confirmation, ConfirmationType, UnblindedPaymentToken, UnblindedToken,
};

/// SQLite-backed state store with connection pooling
pub struct SqliteStateStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStateStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS unblinded_tokens (
                position INTEGER PRIMARY KEY,
                token TEXT NOT NULL UNIQUE,
                public_key TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS unblinded_payment_tokens (
                position INTEGER PRIMARY KEY,
                token TEXT NOT NULL UNIQUE,
                public_key TEXT NOT NULL,
                confirmation_type TEXT NOT NULL,
                ad_type TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS failed_confirmations (
                position INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                transaction_id TEXT NOT NULL,
                creative_instance_id TEXT NOT NULL,
                confirmation_type TEXT NOT NULL,
                ad_type TEXT NOT NULL,
                value REAL NOT NULL,
                created_at TEXT NOT NULL,
                unblinded_token TEXT,
                unblinded_token_public_key TEXT,
                tokens TEXT NOT NULL DEFAULT '[]',
                blinded_tokens TEXT NOT NULL DEFAULT '[]',
                user_data TEXT NOT NULL DEFAULT '',
                credential TEXT,
                was_created INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .map_err(map_db_err)?;

        Ok(())
    }

    /// Convert a database row to a Confirmation
    fn row_to_confirmation(row: &Row) -> rusqlite::Result<Confirmation> {
        let unblinded_token = match (
            row.get::<_, Option<String>>("unblinded_token")?,
            row.get::<_, Option<String>>("unblinded_token_public_key")?,
        ) {
            (Some(value), Some(public_key)) => Some(UnblindedToken { value, public_key }),
            _ => None,
        };

        Ok(Confirmation {
            id: row.get("id")?,
            transaction_id: row.get("transaction_id")?,
            creative_instance_id: row.get("creative_instance_id")?,
            confirmation_type: row.get("confirmation_type")?,
            ad_type: row.get("ad_type")?,
            value: row.get("value")?,
            created_at: timestamp_column(row, "created_at")?,
            unblinded_token,
            tokens: json_column(row, "tokens")?,
            blinded_tokens: json_column(row, "blinded_tokens")?,
            user_data: row.get("user_data")?,
            credential: row.get("credential")?,
            was_created: row.get("was_created")?,
        })
    }

    fn row_to_payment_token(row: &Row) -> rusqlite::Result<UnblindedPaymentToken> {
        Ok(UnblindedPaymentToken {
            value: row.get("token")?,
            public_key: row.get("public_key")?,
            confirmation_type: row.get("confirmation_type")?,
            ad_type: row.get("ad_type")?,
        })
    }

    // Synchronous helper methods for the trait implementation

    fn load_sync(&self) -> StorageResult<ConfirmationsSnapshot> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT token, public_key FROM unblinded_tokens ORDER BY position")
            .map_err(map_db_err)?;
        let unblinded_tokens = stmt
            .query_map([], |row| {
                Ok(UnblindedToken {
                    value: row.get("token")?,
                    public_key: row.get("public_key")?,
                })
            })
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;

        let mut stmt = conn
            .prepare("SELECT * FROM unblinded_payment_tokens ORDER BY position")
            .map_err(map_db_err)?;
        let unblinded_payment_tokens = stmt
            .query_map([], Self::row_to_payment_token)
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;

        let mut stmt = conn
            .prepare("SELECT * FROM failed_confirmations ORDER BY position")
            .map_err(map_db_err)?;
        let failed_confirmations = stmt
            .query_map([], Self::row_to_confirmation)
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;

        Ok(ConfirmationsSnapshot {
            unblinded_tokens,
            unblinded_payment_tokens,
            failed_confirmations,
        })
    }

    fn save_sync(&self, snapshot: &ConfirmationsSnapshot) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_db_err)?;

        tx.execute_batch(
            r#"
            DELETE FROM unblinded_tokens;
            DELETE FROM unblinded_payment_tokens;
            DELETE FROM failed_confirmations;
            "#,
        )
        .map_err(map_db_err)?;

        {
            let mut stmt = tx
                .prepare("INSERT INTO unblinded_tokens (position, token, public_key) VALUES (?1, ?2, ?3)")
                .map_err(map_db_err)?;
            for (position, token) in snapshot.unblinded_tokens.iter().enumerate() {
                stmt.execute(params![position as i64, token.value, token.public_key])
                    .map_err(map_db_err)?;
            }

            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO unblinded_payment_tokens (
                        position, token, public_key, confirmation_type, ad_type
                    ) VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                )
                .map_err(map_db_err)?;
            for (position, token) in snapshot.unblinded_payment_tokens.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    token.value,
                    token.public_key,
                    token.confirmation_type,
                    token.ad_type,
                ])
                .map_err(map_db_err)?;
            }

            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO failed_confirmations (
                        position, id, transaction_id, creative_instance_id,
                        confirmation_type, ad_type, value, created_at,
                        unblinded_token, unblinded_token_public_key,
                        tokens, blinded_tokens, user_data, credential, was_created
                    ) VALUES (
                        ?1, ?2, ?3, ?4,
                        ?5, ?6, ?7, ?8,
                        ?9, ?10,
                        ?11, ?12, ?13, ?14, ?15
                    )
                    "#,
                )
                .map_err(map_db_err)?;
            for (position, confirmation) in snapshot.failed_confirmations.iter().enumerate() {
                let tokens = serde_json::to_string(&confirmation.tokens)?;
                let blinded_tokens = serde_json::to_string(&confirmation.blinded_tokens)?;

                stmt.execute(params![
                    position as i64,
                    confirmation.id,
                    confirmation.transaction_id,
                    confirmation.creative_instance_id,
                    confirmation.confirmation_type,
                    confirmation.ad_type,
                    confirmation.value,
                    confirmation
                        .created_at
                        .to_rfc3339_opts(SecondsFormat::Nanos, true),
                    confirmation.unblinded_token.as_ref().map(|t| t.value.as_str()),
                    confirmation
                        .unblinded_token
                        .as_ref()
                        .map(|t| t.public_key.as_str()),
                    tokens,
                    blinded_tokens,
                    confirmation.user_data,
                    confirmation.credential,
                    confirmation.was_created,
                ])
                .map_err(map_db_err)?;
            }
        }

        tx.commit().map_err(map_db_err)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self) -> StorageResult<ConfirmationsSnapshot> {
        self.load_sync()
    }

    async fn save(&self, snapshot: &ConfirmationsSnapshot) -> StorageResult<()> {
        self.save_sync(snapshot)
    }

    fn store_type(&self) -> &'static str {
        "sqlite"
    }
}

impl ToSql for ConfirmationType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for ConfirmationType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for AdType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for AdType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn json_column<T: DeserializeOwned>(row: &Row, name: &str) -> rusqlite::Result<T> {
    let text: String = row.get(name)?;
    serde_json::from_str(&text).map_err(|e| {
        let index = row.as_ref().column_index(name).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}

fn timestamp_column(row: &Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(name)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            let index = row.as_ref().column_index(name).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
        })
}

fn map_db_err(e: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ref err, ref message) = e {
        if err.extended_code == 1555 || err.extended_code == 2067 {
            return StorageError::Duplicate(message.clone().unwrap_or_else(|| e.to_string()));
        }
    }
    if let rusqlite::Error::FromSqlConversionFailure(..) = e {
        return StorageError::InvalidData(e.to_string());
    }
    StorageError::Database(e.to_string())
}
