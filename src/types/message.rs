//! Message models
//!
//! `ServerMessage` is the raw wire record returned by the messages endpoint.
//! `IncomingMessage` is a validated wire record ready for upsert.
//! `Message` is the stored model handed to the presentation and inbox layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::error::EngageError;

/// Display policy attached to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentRule {
    Immediately,
    NextOpen,
    Never,
}

impl PresentRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediately => "immediately",
            Self::NextOpen => "next-open",
            Self::Never => "never",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "immediately" => Some(Self::Immediately),
            "next-open" => Some(Self::NextOpen),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

/// Raw message record as returned by the sync endpoint.
///
/// Everything is optional at this level; validation happens in
/// [`ServerMessage::validate`] so a single malformed record can be skipped
/// without failing the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub id: Option<i64>,
    pub updated_at: Option<String>,
    pub presented_when: Option<String>,
    pub content: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub badge: Option<Value>,
    #[serde(default)]
    pub inbox: Option<Value>,
    #[serde(default)]
    pub inbox_deleted_at: Option<String>,
    #[serde(default)]
    pub dismissed_at: Option<String>,
    #[serde(default)]
    pub opened_at: Option<String>,
    #[serde(default)]
    pub read_at: Option<String>,
    #[serde(default)]
    pub sent_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Parse an ISO-8601 timestamp with timezone offset. Locale-independent.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_optional(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_timestamp)
}

impl ServerMessage {
    /// Validate required fields and parse timestamps.
    ///
    /// Required: `id`, `updatedAt` (parseable), `presentedWhen` (known value),
    /// `content`.
    pub fn validate(&self) -> Result<IncomingMessage, EngageError> {
        let id = self
            .id
            .ok_or_else(|| EngageError::MalformedRecord("missing id".into()))?;
        let updated_at = self
            .updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| {
                EngageError::MalformedRecord(format!("message {id}: missing or bad updatedAt"))
            })?;
        let present_rule = self
            .presented_when
            .as_deref()
            .and_then(PresentRule::parse)
            .ok_or_else(|| {
                EngageError::MalformedRecord(format!("message {id}: missing or bad presentedWhen"))
            })?;
        let content = self
            .content
            .clone()
            .ok_or_else(|| EngageError::MalformedRecord(format!("message {id}: missing content")))?;

        // Inbox availability window comes from inside the inbox payload.
        let (inbox_from, inbox_to) = match &self.inbox {
            Some(inbox) => (
                inbox.get("from").and_then(Value::as_str).and_then(parse_timestamp),
                inbox.get("to").and_then(Value::as_str).and_then(parse_timestamp),
            ),
            None => (None, None),
        };

        // Older payloads carry the dismissal under "openedAt".
        let dismissed_at = parse_optional(&self.dismissed_at).or_else(|| parse_optional(&self.opened_at));

        Ok(IncomingMessage {
            id,
            updated_at,
            present_rule,
            content,
            data: self.data.clone(),
            badge_config: self.badge.clone(),
            inbox_config: self.inbox.clone(),
            inbox_from,
            inbox_to,
            inbox_deleted_at: parse_optional(&self.inbox_deleted_at),
            dismissed_at,
            read_at: parse_optional(&self.read_at),
            sent_at: parse_optional(&self.sent_at),
            expires_at: parse_optional(&self.expires_at),
        })
    }
}

/// Validated server record, ready to be merged into the store.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: i64,
    pub updated_at: DateTime<Utc>,
    pub present_rule: PresentRule,
    pub content: Value,
    pub data: Option<Value>,
    pub badge_config: Option<Value>,
    pub inbox_config: Option<Value>,
    pub inbox_from: Option<DateTime<Utc>>,
    pub inbox_to: Option<DateTime<Utc>>,
    pub inbox_deleted_at: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Stored message record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub updated_at: DateTime<Utc>,
    pub present_rule: PresentRule,
    pub content: Value,
    pub data: Option<Value>,
    pub badge_config: Option<Value>,
    pub inbox_config: Option<Value>,
    pub inbox_from: Option<DateTime<Utc>>,
    pub inbox_to: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Whether the message is inside its inbox availability window.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.inbox_from {
            if from > now {
                return false;
            }
        }
        if let Some(to) = self.inbox_to {
            if to < now {
                return false;
            }
        }
        true
    }

    /// Recency sort key: `sentAt` falls back to `updatedAt` when absent.
    pub fn recency(&self) -> DateTime<Utc> {
        self.sent_at.unwrap_or(self.updated_at)
    }
}
