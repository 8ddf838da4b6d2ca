pub mod mock;

use async_trait::async_trait;

/// Opaque element of the transport's native message-history representation.
///
/// The core never inspects the contents; it serializes the blob verbatim,
/// trims only by element count, and never performs byte surgery on it.
pub type OpaqueMessage = serde_json::Value;

/// Context handed to the transport alongside a goal. The core fills in
/// everything it knows; the transport is free to ignore fields it doesn't
/// need.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: i64,
    pub chat_id: i64,
    pub model: String,
}

/// What a successful transport run returns: the rendered output plus any
/// new opaque history elements to append to `message_history`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub output: String,
    pub new_messages: Vec<OpaqueMessage>,
}

/// The abstract LLM capability the core drives. Tool invocation, provider
/// selection (vllm, openrouter, or any equivalent), and wire-format details
/// are entirely the transport's concern; the core only needs a string it
/// can hand the classifier when this raises.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn run(
        &self,
        goal: &str,
        context: &RunContext,
        message_history: Option<&[OpaqueMessage]>,
    ) -> Result<RunOutcome, String>;

    fn default_model(&self) -> String;

    fn provider_name(&self) -> &'static str;
}

pub type BoxedTransport = std::sync::Arc<dyn LlmTransport>;
