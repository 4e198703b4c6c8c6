//! SQLite conversation store.
//!
//! Two tables:
//! - `conversation_states`: one row per patient dialogue
//! - `conversation_messages`: append-only log, ordered by an integer rowid
//!
//! Every read-modify-write runs inside `BEGIN IMMEDIATE`, so concurrent
//! writers serialize on the database write lock instead of racing.

use crate::{apply_clear, apply_switch, apply_update, extended_expiry, new_state, phone_variants};
use async_trait::async_trait;
use careline_core::conversation::{
    ContextSwitch, ConversationContext, ConversationMessage, ConversationState, ConversationStats,
    GenerationMetadata, NewMessage, StateData, StateUpdate,
};
use careline_core::error::StoreError;
use careline_core::store::{ConversationStore, DEFAULT_STATE_TTL_MINUTES};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::BoxFuture;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A production SQLite conversation store.
pub struct SqliteStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; it is held on a
    /// single pooled connection so every caller sees the same data.
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite conversation store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            ttl: Duration::minutes(DEFAULT_STATE_TTL_MINUTES),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Override the state lifetime.
    pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl = Duration::minutes(minutes);
        self
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_states (
                iid                        INTEGER PRIMARY KEY AUTOINCREMENT,
                id                         TEXT UNIQUE NOT NULL,
                patient_id                 TEXT NOT NULL,
                phone_number               TEXT NOT NULL,
                current_context            TEXT NOT NULL,
                expected_response_type     TEXT NOT NULL,
                related_entity_id          TEXT,
                related_entity_type        TEXT,
                state_data                 TEXT NOT NULL DEFAULT '{"kind":"empty"}',
                last_message               TEXT,
                last_message_at            TEXT,
                message_count              INTEGER NOT NULL DEFAULT 0,
                is_active                  INTEGER NOT NULL DEFAULT 1,
                expires_at                 TEXT NOT NULL,
                attempt_count              INTEGER NOT NULL DEFAULT 0,
                context_set_at             TEXT,
                last_clarification_sent_at TEXT,
                created_at                 TEXT NOT NULL,
                updated_at                 TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversation_states table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_messages (
                iid                   INTEGER PRIMARY KEY AUTOINCREMENT,
                id                    TEXT UNIQUE NOT NULL,
                conversation_state_id TEXT NOT NULL REFERENCES conversation_states(id),
                message               TEXT NOT NULL,
                direction             TEXT NOT NULL,
                message_type          TEXT NOT NULL,
                intent                TEXT,
                confidence            INTEGER,
                processed_at          TEXT,
                llm_model             TEXT,
                llm_tokens_used       INTEGER,
                llm_cost_usd          REAL,
                llm_response_time_ms  INTEGER,
                created_at            TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversation_messages table: {e}")))?;

        for (name, ddl) in [
            (
                "patient index",
                "CREATE INDEX IF NOT EXISTS idx_states_patient ON conversation_states(patient_id, is_active)",
            ),
            (
                "phone index",
                "CREATE INDEX IF NOT EXISTS idx_states_phone ON conversation_states(phone_number, is_active)",
            ),
            (
                "expiry index",
                "CREATE INDEX IF NOT EXISTS idx_states_expiry ON conversation_states(is_active, expires_at)",
            ),
            (
                "message index",
                "CREATE INDEX IF NOT EXISTS idx_messages_state ON conversation_messages(conversation_state_id, iid)",
            ),
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{name}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Run `op` inside a `BEGIN IMMEDIATE` transaction on one pooled connection.
    async fn immediate<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, StoreError>> + Send,
    {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Storage(format!("acquire connection: {e}")))?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN IMMEDIATE: {e}")))?;

        match op(&mut *conn).await {
            Ok(value) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| StoreError::Storage(format!("COMMIT: {e}")))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(error = %e, "ROLLBACK failed");
                }
                Err(err)
            }
        }
    }

    async fn load(conn: &mut SqliteConnection, id: &str) -> Result<ConversationState, StoreError> {
        let row = sqlx::query("SELECT * FROM conversation_states WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("load state: {e}")))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row_to_state(&row)
    }

    async fn insert(conn: &mut SqliteConnection, s: &ConversationState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_states (
                id, patient_id, phone_number, current_context, expected_response_type,
                related_entity_id, related_entity_type, state_data, last_message, last_message_at,
                message_count, is_active, expires_at, attempt_count, context_set_at,
                last_clarification_sent_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
        )
        .bind(&s.id)
        .bind(&s.patient_id)
        .bind(&s.phone_number)
        .bind(s.current_context.as_str())
        .bind(s.expected_response_type.as_str())
        .bind(&s.related_entity_id)
        .bind(&s.related_entity_type)
        .bind(s.state_data.to_json())
        .bind(&s.last_message)
        .bind(s.last_message_at.map(ts))
        .bind(s.message_count as i64)
        .bind(s.is_active)
        .bind(ts(s.expires_at))
        .bind(s.attempt_count as i64)
        .bind(s.context_set_at.map(ts))
        .bind(s.last_clarification_sent_at.map(ts))
        .bind(ts(s.created_at))
        .bind(ts(s.updated_at))
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT state failed: {e}")))?;
        Ok(())
    }

    /// Write every mutable column back. `message_count` is owned by `append_message`.
    async fn save(conn: &mut SqliteConnection, s: &ConversationState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE conversation_states SET
                current_context = ?2,
                expected_response_type = ?3,
                related_entity_id = ?4,
                related_entity_type = ?5,
                state_data = ?6,
                is_active = ?7,
                expires_at = ?8,
                attempt_count = ?9,
                context_set_at = ?10,
                last_clarification_sent_at = ?11,
                updated_at = ?12
            WHERE id = ?1
            "#,
        )
        .bind(&s.id)
        .bind(s.current_context.as_str())
        .bind(s.expected_response_type.as_str())
        .bind(&s.related_entity_id)
        .bind(&s.related_entity_type)
        .bind(s.state_data.to_json())
        .bind(s.is_active)
        .bind(ts(s.expires_at))
        .bind(s.attempt_count as i64)
        .bind(s.context_set_at.map(ts))
        .bind(s.last_clarification_sent_at.map(ts))
        .bind(ts(s.updated_at))
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE state failed: {e}")))?;
        Ok(())
    }

    /// Load, mutate, and save one state in a single write transaction.
    async fn modify<F>(&self, id: &str, f: F) -> Result<ConversationState, StoreError>
    where
        F: FnOnce(&mut ConversationState) + Send + 'static,
    {
        let id = id.to_string();
        self.immediate(move |conn| {
            Box::pin(async move {
                let mut state = Self::load(conn, &id).await?;
                f(&mut state);
                Self::save(conn, &state).await?;
                Ok(state)
            })
        })
        .await
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC so text order is time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn col<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    col::<Option<String>>(row, column)?
        .map(|raw| parse_ts(&raw, column))
        .transpose()
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(StoreError::QueryFailed)
}

fn row_to_state(row: &SqliteRow) -> Result<ConversationState, StoreError> {
    let context: String = col(row, "current_context")?;
    let expected: String = col(row, "expected_response_type")?;
    let state_data: String = col(row, "state_data")?;
    let expires_at: String = col(row, "expires_at")?;
    let created_at: String = col(row, "created_at")?;
    let updated_at: String = col(row, "updated_at")?;

    Ok(ConversationState {
        id: col(row, "id")?,
        patient_id: col(row, "patient_id")?,
        phone_number: col(row, "phone_number")?,
        current_context: parse_enum(&context)?,
        expected_response_type: parse_enum(&expected)?,
        related_entity_id: col(row, "related_entity_id")?,
        related_entity_type: col(row, "related_entity_type")?,
        state_data: StateData::from_json(&state_data),
        last_message: col(row, "last_message")?,
        last_message_at: opt_ts(row, "last_message_at")?,
        message_count: col::<i64>(row, "message_count")? as u32,
        is_active: col(row, "is_active")?,
        expires_at: parse_ts(&expires_at, "expires_at")?,
        attempt_count: col::<i64>(row, "attempt_count")? as u32,
        context_set_at: opt_ts(row, "context_set_at")?,
        last_clarification_sent_at: opt_ts(row, "last_clarification_sent_at")?,
        created_at: parse_ts(&created_at, "created_at")?,
        updated_at: parse_ts(&updated_at, "updated_at")?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<ConversationMessage, StoreError> {
    let direction: String = col(row, "direction")?;
    let message_type: String = col(row, "message_type")?;
    let created_at: String = col(row, "created_at")?;
    let confidence: Option<i64> = col(row, "confidence")?;
    let model: Option<String> = col(row, "llm_model")?;

    let generation = match model {
        Some(model) => Some(GenerationMetadata {
            model,
            tokens_used: col::<Option<i64>>(row, "llm_tokens_used")?.unwrap_or(0) as u32,
            cost_usd: col::<Option<f64>>(row, "llm_cost_usd")?.unwrap_or(0.0),
            response_time_ms: col::<Option<i64>>(row, "llm_response_time_ms")?.unwrap_or(0) as u64,
        }),
        None => None,
    };

    Ok(ConversationMessage {
        id: col(row, "id")?,
        conversation_state_id: col(row, "conversation_state_id")?,
        message: col(row, "message")?,
        direction: parse_enum(&direction)?,
        message_type: parse_enum(&message_type)?,
        intent: col(row, "intent")?,
        confidence: confidence.map(|c| c.clamp(0, 100) as u8),
        processed_at: opt_ts(row, "processed_at")?,
        generation,
        created_at: parse_ts(&created_at, "created_at")?,
    })
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_or_create(
        &self,
        patient_id: &str,
        phone_number: &str,
        default_context: ConversationContext,
    ) -> Result<ConversationState, StoreError> {
        let patient_id = patient_id.to_string();
        let phone_number = phone_number.to_string();
        let ttl = self.ttl;

        self.immediate(move |conn| {
            Box::pin(async move {
                let now = Utc::now();
                let existing = sqlx::query(
                    r#"
                    SELECT * FROM conversation_states
                    WHERE patient_id = ?1 AND is_active = 1 AND expires_at > ?2
                    ORDER BY updated_at DESC, iid DESC
                    LIMIT 1
                    "#,
                )
                .bind(&patient_id)
                .bind(ts(now))
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("active state lookup: {e}")))?;

                if let Some(row) = existing {
                    return row_to_state(&row);
                }

                // Whatever is still flagged active for this patient has expired.
                sqlx::query(
                    "UPDATE conversation_states SET is_active = 0, updated_at = ?2 WHERE patient_id = ?1 AND is_active = 1",
                )
                .bind(&patient_id)
                .bind(ts(now))
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Storage(format!("retire expired states: {e}")))?;

                let state = new_state(&patient_id, &phone_number, default_context, ttl, now);
                Self::insert(conn, &state).await?;
                debug!(patient_id = %patient_id, state_id = %state.id, context = %default_context, "Created conversation state");
                Ok(state)
            })
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<ConversationState, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Storage(format!("acquire connection: {e}")))?;
        Self::load(&mut conn, id).await
    }

    async fn update(&self, id: &str, update: StateUpdate) -> Result<ConversationState, StoreError> {
        self.modify(id, move |state| apply_update(state, update, Utc::now()))
            .await
    }

    async fn append_message(
        &self,
        id: &str,
        message: NewMessage,
    ) -> Result<ConversationMessage, StoreError> {
        let id = id.to_string();
        self.immediate(move |conn| {
            Box::pin(async move {
                let now = Utc::now();
                let bumped = sqlx::query(
                    r#"
                    UPDATE conversation_states SET
                        message_count = message_count + 1,
                        last_message = ?2,
                        last_message_at = ?3,
                        updated_at = ?3
                    WHERE id = ?1
                    "#,
                )
                .bind(&id)
                .bind(&message.message)
                .bind(ts(now))
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Storage(format!("bump message count: {e}")))?;

                if bumped.rows_affected() == 0 {
                    return Err(StoreError::NotFound(id));
                }

                let stored = ConversationMessage {
                    id: Uuid::new_v4().to_string(),
                    conversation_state_id: id,
                    message: message.message,
                    direction: message.direction,
                    message_type: message.message_type,
                    intent: message.intent,
                    confidence: message.confidence,
                    processed_at: message.processed_at,
                    generation: message.generation,
                    created_at: now,
                };

                let generation = stored.generation.as_ref();
                sqlx::query(
                    r#"
                    INSERT INTO conversation_messages (
                        id, conversation_state_id, message, direction, message_type, intent,
                        confidence, processed_at, llm_model, llm_tokens_used, llm_cost_usd,
                        llm_response_time_ms, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    "#,
                )
                .bind(&stored.id)
                .bind(&stored.conversation_state_id)
                .bind(&stored.message)
                .bind(stored.direction.as_str())
                .bind(stored.message_type.as_str())
                .bind(&stored.intent)
                .bind(stored.confidence.map(i64::from))
                .bind(stored.processed_at.map(ts))
                .bind(generation.map(|g| g.model.clone()))
                .bind(generation.map(|g| g.tokens_used as i64))
                .bind(generation.map(|g| g.cost_usd))
                .bind(generation.map(|g| g.response_time_ms as i64))
                .bind(ts(stored.created_at))
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

                Ok(stored)
            })
        })
        .await
    }

    async fn history(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Storage(format!("acquire connection: {e}")))?;
        // Existence check so an unknown id is NotFound rather than empty.
        Self::load(&mut conn, id).await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM conversation_messages
                WHERE conversation_state_id = ?1
                ORDER BY iid DESC
                LIMIT ?2
            ) ORDER BY iid ASC
            "#,
        )
        .bind(id)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("history: {e}")))?;

        rows.iter().map(row_to_message).collect()
    }

    async fn deactivate(&self, id: &str) -> Result<(), StoreError> {
        self.modify(id, |state| {
            state.is_active = false;
            state.updated_at = Utc::now();
        })
        .await?;
        Ok(())
    }

    async fn extend_expiry(&self, id: &str, minutes: i64) -> Result<ConversationState, StoreError> {
        self.modify(id, move |state| {
            let now = Utc::now();
            state.expires_at = extended_expiry(state.expires_at, minutes, now);
            state.updated_at = now;
        })
        .await
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let now = ts(Utc::now());
        let result = sqlx::query(
            "UPDATE conversation_states SET is_active = 0, updated_at = ?1 WHERE is_active = 1 AND expires_at <= ?1",
        )
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("sweep: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn switch_context(
        &self,
        id: &str,
        switch: ContextSwitch,
    ) -> Result<ConversationState, StoreError> {
        let ttl = self.ttl;
        self.modify(id, move |state| apply_switch(state, switch, ttl, Utc::now()))
            .await
    }

    async fn find_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<ConversationState>, StoreError> {
        let variants = phone_variants(phone_number);
        let placeholders: Vec<String> = (0..variants.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            r#"
            SELECT * FROM conversation_states
            WHERE is_active = 1 AND expires_at > ?1 AND phone_number IN ({})
            ORDER BY updated_at DESC, iid DESC
            LIMIT 1
            "#,
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(ts(Utc::now()));
        for variant in &variants {
            query = query.bind(variant);
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("phone lookup: {e}")))?;
        row.as_ref().map(row_to_state).transpose()
    }

    async fn clear_context(&self, patient_id: &str) -> Result<u64, StoreError> {
        let patient_id = patient_id.to_string();
        self.immediate(move |conn| {
            Box::pin(async move {
                let rows = sqlx::query(
                    "SELECT * FROM conversation_states WHERE patient_id = ?1 AND is_active = 1",
                )
                .bind(&patient_id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("clear lookup: {e}")))?;

                let now = Utc::now();
                let mut cleared = 0;
                for row in &rows {
                    let mut state = row_to_state(row)?;
                    apply_clear(&mut state, now);
                    Self::save(conn, &state).await?;
                    cleared += 1;
                }
                Ok(cleared)
            })
        })
        .await
    }

    async fn stats(&self, patient_id: &str) -> Result<ConversationStats, StoreError> {
        let now = ts(Utc::now());
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN is_active = 1 AND expires_at > ?2 THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(AVG(message_count), 0.0) AS avg_messages
            FROM conversation_states
            WHERE patient_id = ?1
            "#,
        )
        .bind(patient_id)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("stats: {e}")))?;

        let by_context_rows = sqlx::query(
            "SELECT current_context, COUNT(*) AS n FROM conversation_states WHERE patient_id = ?1 GROUP BY current_context",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("stats by context: {e}")))?;

        let mut stats = ConversationStats {
            total_conversations: col::<i64>(&totals, "total")? as u64,
            active_conversations: col::<i64>(&totals, "active")? as u64,
            average_message_count: col::<f64>(&totals, "avg_messages")?,
            ..Default::default()
        };
        for row in &by_context_rows {
            stats
                .by_context
                .insert(col(row, "current_context")?, col::<i64>(row, "n")? as u64);
        }
        Ok(stats)
    }

    async fn record_clarification(&self, id: &str) -> Result<(), StoreError> {
        self.modify(id, |state| {
            let now = Utc::now();
            state.attempt_count += 1;
            state.last_clarification_sent_at = Some(now);
            state.updated_at = now;
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use careline_core::conversation::{MessageDirection, MessageType};
    use std::sync::Arc;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_reload() {
        let store = test_store().await;
        let state = store
            .get_or_create("p-1", "081234567890", ConversationContext::Verification)
            .await
            .unwrap();
        let loaded = store.get(&state.id).await.unwrap();
        assert_eq!(loaded.patient_id, "p-1");
        assert_eq!(loaded.current_context, ConversationContext::Verification);
        assert_eq!(loaded.expires_at, state.expires_at);
        assert!(loaded.is_alive());

        let again = store
            .get_or_create("p-1", "081234567890", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        assert_eq!(again.id, state.id);
    }

    #[tokio::test]
    async fn expired_state_is_retired_on_create() {
        let store = test_store().await.with_ttl_minutes(0);
        let a = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        let b = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert!(!store.get(&a.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn not_found_errors() {
        let store = test_store().await;
        assert!(matches!(store.get("missing").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store
                .append_message("missing", NewMessage::inbound("halo", MessageType::General))
                .await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.history("missing", 10).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_appends_match_stored_rows() {
        let store = Arc::new(test_store().await);
        let state = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let id = state.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_message(&id, NewMessage::inbound(format!("pesan {i}"), MessageType::General))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let state = store.get(&state.id).await.unwrap();
        let rows = store.history(&state.id, 100).await.unwrap();
        assert_eq!(state.message_count, 20);
        assert_eq!(rows.len(), 20);
    }

    #[tokio::test]
    async fn history_round_trips_generation_metadata() {
        let store = test_store().await;
        let state = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        store
            .append_message(
                &state.id,
                NewMessage::inbound("kapan minum obat?", MessageType::General)
                    .with_intent("reminder_inquiry", 0.82),
            )
            .await
            .unwrap();
        store
            .append_message(
                &state.id,
                NewMessage::outbound("Jadwal obat Anda pukul 08:00.", MessageType::General)
                    .with_generation(GenerationMetadata {
                        model: "gpt-4o-mini".into(),
                        tokens_used: 64,
                        cost_usd: 0.00002,
                        response_time_ms: 840,
                    }),
            )
            .await
            .unwrap();

        let history = store.history(&state.id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].confidence, Some(82));
        assert_eq!(history[0].intent.as_deref(), Some("reminder_inquiry"));
        assert_eq!(history[1].direction, MessageDirection::Outbound);
        assert_eq!(history[1].generation.as_ref().unwrap().tokens_used, 64);

        let state = store.get(&state.id).await.unwrap();
        assert_eq!(
            state.last_message.as_deref(),
            Some("Jadwal obat Anda pukul 08:00.")
        );
    }

    #[tokio::test]
    async fn switch_context_persists_typed_data() {
        let store = test_store().await;
        let state = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        let switched = store
            .switch_context(
                &state.id,
                ContextSwitch::to(ConversationContext::ReminderConfirmation)
                    .related("reminder", "rem-1")
                    .with_data(StateData::Reminder {
                        reminder_id: "rem-1".into(),
                        scheduled_for: None,
                    }),
            )
            .await
            .unwrap();
        assert!(switched.expires_at >= state.expires_at);

        let loaded = store.get(&state.id).await.unwrap();
        assert_eq!(loaded.current_context, ConversationContext::ReminderConfirmation);
        assert_eq!(
            loaded.state_data,
            StateData::Reminder {
                reminder_id: "rem-1".into(),
                scheduled_for: None
            }
        );
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let store = test_store().await.with_ttl_minutes(0);
        store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        store
            .get_or_create("p-2", "0813", ConversationContext::Verification)
            .await
            .unwrap();
        assert_eq!(store.sweep_expired().await.unwrap(), 2);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn phone_variants_find_same_state() {
        let store = test_store().await;
        let state = store
            .get_or_create("p-1", "081234567890", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        let a = store.find_by_phone_number("081234567890").await.unwrap().unwrap();
        let b = store.find_by_phone_number("6281234567890").await.unwrap().unwrap();
        let c = store.find_by_phone_number("+6281234567890").await.unwrap().unwrap();
        assert_eq!(a.id, state.id);
        assert_eq!(b.id, state.id);
        assert_eq!(c.id, state.id);
    }

    #[tokio::test]
    async fn deactivated_state_not_found_by_phone() {
        let store = test_store().await;
        let state = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        store.deactivate(&state.id).await.unwrap();
        assert!(store.find_by_phone_number("0812").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_context_and_stats() {
        let store = test_store().await;
        let state = store
            .get_or_create("p-1", "0812", ConversationContext::Verification)
            .await
            .unwrap();
        store
            .append_message(&state.id, NewMessage::inbound("ya", MessageType::Verification))
            .await
            .unwrap();
        assert_eq!(store.clear_context("p-1").await.unwrap(), 1);

        let stats = store.stats("p-1").await.unwrap();
        assert_eq!(stats.total_conversations, 1);
        assert_eq!(stats.active_conversations, 1);
        assert!((stats.average_message_count - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.by_context.get("general_inquiry"), Some(&1));

        let empty = store.stats("nobody").await.unwrap();
        assert_eq!(empty.total_conversations, 0);
    }

    #[tokio::test]
    async fn update_and_extend() {
        let store = test_store().await;
        let state = store
            .get_or_create("p-1", "0812", ConversationContext::GeneralInquiry)
            .await
            .unwrap();
        let updated = store
            .update(
                &state.id,
                StateUpdate {
                    related_entity_id: Some("rem-9".into()),
                    related_entity_type: Some("reminder".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.related_entity_id.as_deref(), Some("rem-9"));
        assert!(updated.updated_at >= state.updated_at);

        let extended = store.extend_expiry(&state.id, 600).await.unwrap();
        assert!(extended.expires_at > state.expires_at);

        store.record_clarification(&state.id).await.unwrap();
        assert_eq!(store.get(&state.id).await.unwrap().attempt_count, 1);
    }
}
