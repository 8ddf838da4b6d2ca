//! Session and message storage.
//!
//! Grounded on `session_db.py`'s `get_or_create_session`/`add_message`/
//! `get_messages`/`get_recent_messages`/`get_session_stats` family, adapted
//! to store timestamps as RFC3339 TEXT (via `chrono`) rather than the
//! original's float epoch seconds, consistent with the rest of this crate.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, StoreResult};

pub const SCOPE_MAIN: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: Option<String>,
    pub tool_params: Option<serde_json::Value>,
    pub tool_result: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Converts to the `{role, content}` shape expected by a model message
    /// history entry.
    pub fn to_model_message(&self) -> serde_json::Value {
        serde_json::json!({ "role": self.role.as_str(), "content": self.content })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub session_key: String,
    pub chat_id: i64,
    pub agent_id: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePreview {
    pub role: MessageRole,
    pub content_preview: String,
    pub chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: i64,
    pub chat_id: i64,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub idle_seconds: i64,
    pub estimated_tokens: usize,
    pub total_chars: usize,
    pub last_messages: Vec<MessagePreview>,
}

fn session_key(agent_id: &str, scope: &str, chat_id: i64) -> String {
    format!("agent:{agent_id}:{scope}:{chat_id}")
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role: String = row.get("role")?;
    let timestamp: String = row.get("timestamp")?;
    let tool_params: Option<String> = row.get("tool_params")?;
    let metadata: Option<String> = row.get("metadata")?;
    Ok(Message {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        role: MessageRole::parse(&role),
        content: row.get("content")?,
        timestamp: parse_ts(&timestamp),
        tool_name: row.get("tool_name")?,
        tool_params: tool_params.and_then(|s| serde_json::from_str(&s).ok()),
        tool_result: row.get("tool_result")?,
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Store {
    /// Returns the existing session id for `(agent_id, scope, chat_id)` or
    /// creates a new row. Idempotent: concurrent callers racing on the same
    /// key will serialize through the store's connection mutex and only one
    /// insert wins, since `session_key` is UNIQUE.
    pub async fn get_or_create_session(
        &self,
        chat_id: i64,
        scope: &str,
        agent_id: &str,
    ) -> StoreResult<i64> {
        let key = session_key(agent_id, scope, chat_id);
        let agent_id = agent_id.to_string();
        let scope = scope.to_string();
        self.run_blocking(move |conn| {
            if let Some(id) = conn
                .query_row(
                    "SELECT id FROM sessions WHERE session_key = ?1",
                    params![key],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
            {
                return Ok(id);
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (session_key, chat_id, agent_id, scope, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![key, chat_id, agent_id, scope, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_session(&self, session_id: i64) -> StoreResult<Option<Session>> {
        self.run_blocking(move |conn| {
            conn.query_row(
                "SELECT id, session_key, chat_id, agent_id, scope, created_at, updated_at, message_count
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    let created_at: String = row.get(5)?;
                    let updated_at: String = row.get(6)?;
                    Ok(Session {
                        id: row.get(0)?,
                        session_key: row.get(1)?,
                        chat_id: row.get(2)?,
                        agent_id: row.get(3)?,
                        scope: row.get(4)?,
                        created_at: parse_ts(&created_at),
                        updated_at: parse_ts(&updated_at),
                        message_count: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: impl Into<String>,
        tool_name: Option<String>,
        tool_params: Option<serde_json::Value>,
        tool_result: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<i64> {
        let content = content.into();
        self.run_blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages (session_id, role, content, timestamp, tool_name, tool_params, tool_result, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session_id,
                    role.as_str(),
                    content,
                    now,
                    tool_name,
                    tool_params.map(|v| v.to_string()),
                    tool_result,
                    metadata.map(|v| v.to_string()),
                ],
            )?;
            let message_id = conn.last_insert_rowid();
            conn.execute(
                "UPDATE sessions SET message_count = message_count + 1, updated_at = ?1 WHERE id = ?2",
                params![now, session_id],
            )?;
            Ok(message_id)
        })
        .await
    }

    /// Oldest-first page of a session's messages.
    pub async fn get_messages(
        &self,
        session_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE session_id = ?1 ORDER BY timestamp ASC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![session_id, limit, offset], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Most recent `limit` messages, returned oldest-first (suitable for
    /// feeding directly into an LLM context window).
    pub async fn get_recent_messages(&self, session_id: i64, limit: i64) -> StoreResult<Vec<Message>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE session_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(params![session_id, limit], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    /// `{role, content}` pairs in chronological order, ready for a model
    /// message history.
    pub async fn get_conversation_history(
        &self,
        session_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<serde_json::Value>> {
        let messages = self.get_recent_messages(session_id, limit).await?;
        Ok(messages.iter().map(Message::to_model_message).collect())
    }

    /// Deletes all messages for a session but keeps the session row itself.
    pub async fn clear_session(&self, session_id: i64) -> StoreResult<()> {
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE sessions SET message_count = 0, updated_at = ?1 WHERE id = ?2",
                params![now, session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session_stats(
        &self,
        session_id: i64,
        include_last_messages: usize,
    ) -> StoreResult<SessionStats> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or(StoreError::SessionNotFound(session_id))?;
        let messages = self.get_recent_messages(session_id, 100).await?;

        let total_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let estimated_tokens = total_chars / 3;

        let last_messages = messages
            .iter()
            .rev()
            .take(include_last_messages)
            .map(|m| {
                let chars = m.content.chars().count();
                let preview: String = if chars > 100 {
                    let truncated: String = m.content.chars().take(100).collect();
                    format!("{truncated}...")
                } else {
                    m.content.clone()
                };
                MessagePreview {
                    role: m.role,
                    content_preview: preview,
                    chars,
                }
            })
            .rev()
            .collect();

        let now = Utc::now();
        Ok(SessionStats {
            session_id,
            chat_id: session.chat_id,
            message_count: session.message_count,
            created_at: session.created_at,
            updated_at: session.updated_at,
            uptime_seconds: (now - session.created_at).num_seconds(),
            idle_seconds: (now - session.updated_at).num_seconds(),
            estimated_tokens,
            total_chars,
            last_messages,
        })
    }

    /// Reads the opaque, provider-specific message history blob stored
    /// alongside the session, if any.
    pub async fn get_model_message_history(
        &self,
        session_id: i64,
    ) -> StoreResult<Option<Vec<serde_json::Value>>> {
        self.run_blocking(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT model_message_history FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            match raw {
                Some(s) => Ok(Some(serde_json::from_str(&s)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Atomically replaces the opaque message history blob. Trimming to
    /// `MAX_MESSAGE_HISTORY` entries is the caller's responsibility.
    pub async fn set_model_message_history(
        &self,
        session_id: i64,
        history: &[serde_json::Value],
    ) -> StoreResult<()> {
        let blob = serde_json::to_string(history)?;
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE sessions SET model_message_history = ?1 WHERE id = ?2",
                params![blob, session_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_session_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store.get_or_create_session(1, SCOPE_MAIN, "agent").await.unwrap();
        let b = store.get_or_create_session(1, SCOPE_MAIN, "agent").await.unwrap();
        assert_eq!(a, b);

        let c = store.get_or_create_session(2, SCOPE_MAIN, "agent").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn messages_round_trip_in_chronological_order() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = store.get_or_create_session(1, SCOPE_MAIN, "agent").await.unwrap();

        store
            .add_message(session_id, MessageRole::User, "hello", None, None, None, None)
            .await
            .unwrap();
        store
            .add_message(session_id, MessageRole::Assistant, "hi", None, None, None, None)
            .await
            .unwrap();

        let messages = store.get_messages(session_id, 50, 0).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "hi");

        let session = store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.message_count, 2);
    }

    #[tokio::test]
    async fn clear_session_removes_messages_but_keeps_session() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = store.get_or_create_session(1, SCOPE_MAIN, "agent").await.unwrap();
        store
            .add_message(session_id, MessageRole::User, "hello", None, None, None, None)
            .await
            .unwrap();

        store.clear_session(session_id).await.unwrap();

        let messages = store.get_messages(session_id, 50, 0).await.unwrap();
        assert!(messages.is_empty());
        assert!(store.get_session(session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn model_message_history_round_trips() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = store.get_or_create_session(1, SCOPE_MAIN, "agent").await.unwrap();

        assert!(store.get_model_message_history(session_id).await.unwrap().is_none());

        let history = vec![serde_json::json!({"role": "user", "content": "hi"})];
        store.set_model_message_history(session_id, &history).await.unwrap();

        let loaded = store.get_model_message_history(session_id).await.unwrap().unwrap();
        assert_eq!(loaded, history);
    }
}
