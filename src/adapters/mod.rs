//! Front-end adapter interface.
//!
//! Adapters (chat bots, terminal entry points) are explicitly out of
//! scope for implementation; only the shape they must deliver and the
//! callback they must expose is specified here, mirroring the trait-based
//! boundary the teacher draws around its own channel implementations.

use async_trait::async_trait;

/// An inbound event as delivered by any front-end. `provider` lets a
/// front-end pin a specific transport provider for this event; `None`
/// defers to the runtime's configured default.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub text: String,
    pub provider: Option<String>,
}

impl InboundEvent {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_id: None,
            username: None,
            text: text.into(),
            provider: None,
        }
    }
}

/// The callback surface the core uses to push replies back to whatever
/// front-end originated an event. Delivery is best-effort: a front-end
/// that has gone away should not bring the core down.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, chat_id: i64, text: String);
}

/// A no-op sink used in tests and for chat_id == 0 (CLI-originated, no
/// front-end to notify).
pub struct NullReplySink;

#[async_trait]
impl ReplySink for NullReplySink {
    async fn reply(&self, _chat_id: i64, _text: String) {}
}

/// Records replies in memory; used by tests that assert on delivery order.
#[cfg(any(test, feature = "test-util"))]
pub struct RecordingReplySink {
    pub replies: tokio::sync::Mutex<Vec<(i64, String)>>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingReplySink {
    pub fn new() -> Self {
        Self {
            replies: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Default for RecordingReplySink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl ReplySink for RecordingReplySink {
    async fn reply(&self, chat_id: i64, text: String) {
        self.replies.lock().await.push((chat_id, text));
    }
}
