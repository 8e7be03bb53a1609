//! SQLite message store
//!
//! Durable home for in-app message records plus the handful of scalar values
//! the engine persists (sync cursor, debounce watermark, consent flag). The
//! store is a cache of server state keyed by server-assigned message id; all
//! access goes through a pooled connection so operations are serialized.

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::types::error::EngageError;
use crate::types::message::{IncomingMessage, Message, PresentRule};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

const KV_SYNC_CURSOR: &str = "sync_cursor";
const KV_LAST_SYNCED_AT: &str = "last_synced_at";
const KV_CONSENT_GRANTED: &str = "consent_granted";

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(ts)
}

fn from_ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn opt_from_ts(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.map(from_ts)
}

fn json_text(value: &Value) -> String {
    value.to_string()
}

fn opt_json_text(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(json_text)
}

/// Ids deleted by an eviction pass, plus whether any of them were
/// inbox-visible (signal for the inbox-updated notification).
#[derive(Debug, Clone, Default)]
pub struct EvictionResult {
    pub evicted_ids: Vec<i64>,
    pub evicted_inbox: bool,
}

pub struct MessageStore {
    pool: DbPool,
}

impl MessageStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, EngageError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| EngageError::Database(format!("Failed to create store pool: {}", e)))?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, EngageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| EngageError::Database(format!("Failed to create store pool: {}", e)))?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn connection(&self) -> Result<DbConnection, EngageError> {
        self.pool
            .get()
            .map_err(|e| EngageError::Database(format!("Failed to get store connection: {}", e)))
    }

    fn initialize_schema(&self) -> Result<(), EngageError> {
        let conn = self.connection()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- Message records, keyed by server-assigned id.
            -- Timestamps are unix epoch milliseconds (UTC).
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                updated_at INTEGER NOT NULL,
                sent_at INTEGER,
                present_rule TEXT NOT NULL,
                content TEXT NOT NULL,       -- JSON
                data TEXT,                   -- JSON
                badge_config TEXT,           -- JSON
                inbox_config TEXT,           -- JSON; presence = inbox-visible
                inbox_from INTEGER,
                inbox_to INTEGER,
                dismissed_at INTEGER,
                read_at INTEGER,
                expires_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_messages_recency
                ON messages (sent_at DESC, updated_at DESC, id DESC);

            -- Scalar persisted state (sync cursor, consent flag, watermark)
            CREATE TABLE IF NOT EXISTS kv_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Message store schema initialized");
        Ok(())
    }

    // ========== Upsert ==========

    /// Insert or merge a validated server record.
    ///
    /// Merge rules: `dismissed_at`, `read_at` and `sent_at` are only set when
    /// currently absent; every other field takes the incoming value. An
    /// `inboxDeletedAt` marker clears the inbox association and dismisses the
    /// record if it was not already dismissed.
    pub fn upsert(&self, incoming: &IncomingMessage) -> Result<(), EngageError> {
        let conn = self.connection()?;
        let tx = conn.unchecked_transaction()?;

        let existing: Option<(Option<i64>, Option<i64>, Option<i64>)> = tx
            .query_row(
                "SELECT dismissed_at, read_at, sent_at FROM messages WHERE id = ?1",
                params![incoming.id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (prev_dismissed, prev_read, prev_sent) = existing.unwrap_or((None, None, None));

        let mut dismissed_at = prev_dismissed.or(opt_ts(incoming.dismissed_at));
        let read_at = prev_read.or(opt_ts(incoming.read_at));
        let sent_at = prev_sent.or(opt_ts(incoming.sent_at));

        let mut inbox_config = opt_json_text(&incoming.inbox_config);
        let mut inbox_from = opt_ts(incoming.inbox_from);
        let mut inbox_to = opt_ts(incoming.inbox_to);

        if let Some(deleted_at) = incoming.inbox_deleted_at {
            inbox_config = None;
            inbox_from = None;
            inbox_to = None;
            if dismissed_at.is_none() {
                dismissed_at = Some(ts(deleted_at));
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO messages (
                id, updated_at, sent_at, present_rule, content, data,
                badge_config, inbox_config, inbox_from, inbox_to,
                dismissed_at, read_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                incoming.id,
                ts(incoming.updated_at),
                sent_at,
                incoming.present_rule.as_str(),
                json_text(&incoming.content),
                opt_json_text(&incoming.data),
                opt_json_text(&incoming.badge_config),
                inbox_config,
                inbox_from,
                inbox_to,
                dismissed_at,
                read_at,
                opt_ts(incoming.expires_at),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ========== Eviction ==========

    /// Delete records no longer needed for inbox display or re-presentation:
    /// dismissed or expired records without inbox membership, and records
    /// whose inbox window has closed and are dismissed or expired.
    pub fn evict_expired_or_dismissed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EvictionResult, EngageError> {
        let conn = self.connection()?;
        let now_ms = ts(now);

        let mut stmt = conn.prepare(
            "SELECT id, inbox_config IS NOT NULL FROM messages WHERE
                (inbox_config IS NULL AND dismissed_at IS NOT NULL)
             OR (inbox_config IS NULL AND expires_at IS NOT NULL AND expires_at <= ?1)
             OR (inbox_to IS NOT NULL AND inbox_to < ?1
                 AND (dismissed_at IS NOT NULL
                      OR (expires_at IS NOT NULL AND expires_at <= ?1)))",
        )?;

        let rows = stmt.query_map(params![now_ms], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
        })?;

        let mut result = EvictionResult::default();
        for row in rows {
            let (id, had_inbox) = row?;
            result.evicted_ids.push(id);
            result.evicted_inbox |= had_inbox;
        }
        drop(stmt);

        self.delete_ids(&conn, &result.evicted_ids)?;
        Ok(result)
    }

    /// Delete everything beyond `limit`, ordered by recency descending.
    /// Runs as a second pass after [`Self::evict_expired_or_dismissed`] has
    /// committed, since offset queries are unreliable against pending deletes.
    pub fn evict_over_capacity(&self, limit: usize) -> Result<EvictionResult, EngageError> {
        let conn = self.connection()?;

        let mut stmt = conn.prepare(
            "SELECT id, inbox_config IS NOT NULL FROM messages
             ORDER BY COALESCE(sent_at, updated_at) DESC, updated_at DESC, id DESC
             LIMIT -1 OFFSET ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
        })?;

        let mut result = EvictionResult::default();
        for row in rows {
            let (id, had_inbox) = row?;
            result.evicted_ids.push(id);
            result.evicted_inbox |= had_inbox;
        }
        drop(stmt);

        self.delete_ids(&conn, &result.evicted_ids)?;
        Ok(result)
    }

    fn delete_ids(&self, conn: &DbConnection, ids: &[i64]) -> Result<(), EngageError> {
        if ids.is_empty() {
            return Ok(());
        }

        let tx = conn.unchecked_transaction()?;
        for id in ids {
            if let Err(e) = tx.execute("DELETE FROM messages WHERE id = ?1", params![id]) {
                warn!("Failed to evict message {}: {}", id, e);
            }
        }
        tx.commit()?;

        debug!("Evicted {} message(s)", ids.len());
        Ok(())
    }

    // ========== Queries ==========

    fn map_message(row: &Row) -> rusqlite::Result<Message> {
        let present_rule: String = row.get(3)?;
        let content: String = row.get(4)?;
        let data: Option<String> = row.get(5)?;
        let badge_config: Option<String> = row.get(6)?;
        let inbox_config: Option<String> = row.get(7)?;

        Ok(Message {
            id: row.get(0)?,
            updated_at: from_ts(row.get(1)?),
            sent_at: opt_from_ts(row.get(2)?),
            present_rule: PresentRule::parse(&present_rule).unwrap_or(PresentRule::Never),
            content: serde_json::from_str(&content).unwrap_or(Value::Null),
            data: data.and_then(|s| serde_json::from_str(&s).ok()),
            badge_config: badge_config.and_then(|s| serde_json::from_str(&s).ok()),
            inbox_config: inbox_config.and_then(|s| serde_json::from_str(&s).ok()),
            inbox_from: opt_from_ts(row.get(8)?),
            inbox_to: opt_from_ts(row.get(9)?),
            dismissed_at: opt_from_ts(row.get(10)?),
            read_at: opt_from_ts(row.get(11)?),
            expires_at: opt_from_ts(row.get(12)?),
        })
    }

    const MESSAGE_COLUMNS: &'static str = "id, updated_at, sent_at, present_rule, content, data, \
         badge_config, inbox_config, inbox_from, inbox_to, dismissed_at, read_at, expires_at";

    pub fn get(&self, id: i64) -> Result<Option<Message>, EngageError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE id = ?1",
            Self::MESSAGE_COLUMNS
        );
        let message = conn
            .query_row(&sql, params![id], Self::map_message)
            .optional()?;
        Ok(message)
    }

    /// Messages eligible for display right now: display rule in `rules` or id
    /// in `tickle_ids`, not dismissed, not expired. Oldest first, so the
    /// presentation queue shows older content before newer.
    pub fn messages_to_present(
        &self,
        rules: &[PresentRule],
        tickle_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>, EngageError> {
        let conn = self.connection()?;

        let rule_marks = std::iter::repeat("?")
            .take(rules.len().max(1))
            .collect::<Vec<_>>()
            .join(", ");
        let tickle_marks = std::iter::repeat("?")
            .take(tickle_ids.len().max(1))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {} FROM messages
             WHERE (present_rule IN ({}) OR id IN ({}))
               AND dismissed_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY COALESCE(sent_at, updated_at) ASC, updated_at ASC, id ASC",
            Self::MESSAGE_COLUMNS,
            rule_marks,
            tickle_marks,
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if rules.is_empty() {
            values.push(Box::new(Option::<String>::None));
        } else {
            for rule in rules {
                values.push(Box::new(rule.as_str().to_string()));
            }
        }
        if tickle_ids.is_empty() {
            values.push(Box::new(Option::<i64>::None));
        } else {
            for id in tickle_ids {
                values.push(Box::new(*id));
            }
        }
        values.push(Box::new(ts(now)));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), Self::map_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// All records carrying an inbox association, most recent first.
    /// Availability-window filtering happens in the inbox layer.
    pub fn inbox_messages(&self) -> Result<Vec<Message>, EngageError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE inbox_config IS NOT NULL
             ORDER BY COALESCE(sent_at, updated_at) DESC, updated_at DESC, id DESC",
            Self::MESSAGE_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::map_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn count(&self) -> Result<u32, EngageError> {
        let conn = self.connection()?;
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========== Mutations ==========

    /// Mark a message read. Returns true when a row actually changed
    /// (already-read messages are left untouched).
    pub fn mark_read(&self, id: i64, now: DateTime<Utc>) -> Result<bool, EngageError> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
            params![id, ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Mark a message dismissed (and read, if it was unread).
    pub fn mark_dismissed(&self, id: i64, now: DateTime<Utc>) -> Result<bool, EngageError> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE messages SET dismissed_at = COALESCE(dismissed_at, ?2),
                                 read_at = COALESCE(read_at, ?2)
             WHERE id = ?1",
            params![id, ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Strip the inbox association and dismiss. Turns the record into an
    /// eviction candidate on the next sync pass.
    pub fn remove_from_inbox(&self, id: i64, now: DateTime<Utc>) -> Result<bool, EngageError> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE messages SET inbox_config = NULL, inbox_from = NULL, inbox_to = NULL,
                                 dismissed_at = COALESCE(dismissed_at, ?2),
                                 read_at = COALESCE(read_at, ?2)
             WHERE id = ?1 AND inbox_config IS NOT NULL",
            params![id, ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Full wipe: all message records and all scalar state. Used on consent
    /// revocation.
    pub fn delete_all(&self) -> Result<(), EngageError> {
        let conn = self.connection()?;
        conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM kv_state;",
        )?;
        debug!("Message store wiped");
        Ok(())
    }

    // ========== Scalar state ==========

    fn get_kv(&self, key: &str) -> Result<Option<String>, EngageError> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_kv(&self, key: &str, value: &str) -> Result<(), EngageError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete_kv(&self, key: &str) -> Result<(), EngageError> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM kv_state WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Incremental sync cursor: most recent `updatedAt` seen.
    pub fn cursor(&self) -> Result<Option<DateTime<Utc>>, EngageError> {
        Ok(self
            .get_kv(KV_SYNC_CURSOR)?
            .and_then(|v| v.parse::<i64>().ok())
            .map(from_ts))
    }

    pub fn set_cursor(&self, cursor: DateTime<Utc>) -> Result<(), EngageError> {
        self.set_kv(KV_SYNC_CURSOR, &ts(cursor).to_string())
    }

    pub fn clear_cursor(&self) -> Result<(), EngageError> {
        self.delete_kv(KV_SYNC_CURSOR)
    }

    /// Debounce watermark: when the last successful sync finished.
    pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, EngageError> {
        Ok(self
            .get_kv(KV_LAST_SYNCED_AT)?
            .and_then(|v| v.parse::<i64>().ok())
            .map(from_ts))
    }

    pub fn set_last_synced_at(&self, at: DateTime<Utc>) -> Result<(), EngageError> {
        self.set_kv(KV_LAST_SYNCED_AT, &ts(at).to_string())
    }

    pub fn consent_granted(&self) -> Result<bool, EngageError> {
        Ok(self.get_kv(KV_CONSENT_GRANTED)?.as_deref() == Some("true"))
    }

    pub fn set_consent_granted(&self, granted: bool) -> Result<(), EngageError> {
        self.set_kv(KV_CONSENT_GRANTED, if granted { "true" } else { "false" })
    }
}
