//! Self-healing retry loop: the orchestration layer wiring the classifier,
//! compressor, and fallback synthesizer around a transport call.
//!
//! Split into `HealingStrategy` (decide + execute one action) and
//! `SelfHealingRunner` (drive the retry loop), mirroring
//! `healing/strategies.py`'s `HealingStrategy`/`SelfHealingRunner` split —
//! kept as two types rather than flattened into one loop because the
//! decision and the execution of an action are independently testable
//! concerns in the original and stay that way here.

use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::store::{MessageRole, Store, StoreResult};
use crate::transport::{BoxedTransport, OpaqueMessage, RunContext};

use super::classifier::{ClassifiedError, ErrorClassifier, ErrorKind};
use super::compressor::ContextCompressor;
use super::fallback::{FallbackHandler, ToolCallSummary};

pub const AUTO_REPAIR_TASK_PREFIX: &str = "[Auto-repair]";
const MAX_REPAIR_PARTIAL_LEN: usize = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealingAction {
    Retry,
    CompressAndRetry,
    WaitAndRetry,
    Fallback,
    Abort,
}

pub struct HealingResult {
    pub action: HealingAction,
    pub success: bool,
    pub message: String,
    pub compressed_history: Option<Vec<Value>>,
    pub wait_seconds: Option<u64>,
}

pub struct HealingStrategy {
    compressor: ContextCompressor,
    max_wait_seconds: u64,
}

impl HealingStrategy {
    pub fn new(max_wait_seconds: u64) -> Self {
        Self {
            compressor: ContextCompressor::default(),
            max_wait_seconds,
        }
    }

    pub fn determine_action(
        &self,
        classified: &ClassifiedError,
        attempt: usize,
        max_attempts: usize,
    ) -> HealingAction {
        if attempt + 1 >= max_attempts {
            return HealingAction::Fallback;
        }
        match classified.kind {
            ErrorKind::ContextOverflow => HealingAction::CompressAndRetry,
            ErrorKind::RateLimit => HealingAction::WaitAndRetry,
            ErrorKind::UsageLimit | ErrorKind::AuthError => HealingAction::Abort,
            ErrorKind::Fatal => HealingAction::Fallback,
            ErrorKind::Recoverable => HealingAction::Retry,
        }
    }

    pub async fn execute(
        &self,
        action: HealingAction,
        classified: &ClassifiedError,
        history: &[Value],
    ) -> HealingResult {
        match action {
            HealingAction::Retry => HealingResult {
                action,
                success: true,
                message: "retrying with error context".to_string(),
                compressed_history: None,
                wait_seconds: None,
            },
            HealingAction::CompressAndRetry => {
                let result = self.compressor.compress(history, Some(10));
                HealingResult {
                    action,
                    success: true,
                    message: format!("compressed context (removed {} messages)", result.removed_count),
                    compressed_history: Some(result.compressed_history),
                    wait_seconds: None,
                }
            }
            HealingAction::WaitAndRetry => {
                let wait_seconds = classified.wait_seconds.unwrap_or(30).min(self.max_wait_seconds);
                tracing::info!(wait_seconds, "rate limited, waiting before retry");
                tokio::time::sleep(std::time::Duration::from_secs(wait_seconds)).await;
                HealingResult {
                    action,
                    success: true,
                    message: format!("waited {wait_seconds}s, ready to retry"),
                    compressed_history: None,
                    wait_seconds: Some(wait_seconds),
                }
            }
            HealingAction::Abort => HealingResult {
                action,
                success: false,
                message: "non-retryable error, aborting".to_string(),
                compressed_history: None,
                wait_seconds: None,
            },
            HealingAction::Fallback => HealingResult {
                action,
                success: false,
                message: "generating fallback response".to_string(),
                compressed_history: None,
                wait_seconds: None,
            },
        }
    }
}

pub struct RunResult {
    pub output: String,
    pub success: bool,
    pub total_attempts: usize,
    pub retryable_attempts: usize,
}

pub struct SelfHealingRunner {
    store: Store,
    transport: BoxedTransport,
    config: Arc<Config>,
    classifier: ErrorClassifier,
    strategy: HealingStrategy,
    fallback: FallbackHandler,
}

impl SelfHealingRunner {
    pub fn new(store: Store, transport: BoxedTransport, config: Arc<Config>) -> Self {
        Self {
            classifier: ErrorClassifier::new(config.max_wait_seconds),
            strategy: HealingStrategy::new(config.max_wait_seconds),
            fallback: FallbackHandler::new(),
            store,
            transport,
            config,
        }
    }

    /// Drives the retry loop for one invocation. `resumable_task_id`, when
    /// present, is transitioned to `completed`/`failed` at exit per
    /// §4.6.1; `chat_id == 0` suppresses auto-repair task emission (no
    /// chat to resume into).
    pub async fn run(
        &self,
        session_id: i64,
        chat_id: i64,
        goal: &str,
        resumable_task_id: Option<i64>,
    ) -> StoreResult<RunResult> {
        let max_attempts = self.config.max_retries.max(1) as usize;
        let mut current_task = goal.to_string();
        let mut total_attempts = 0usize;
        let mut retryable_attempts = 0usize;
        let mut last_classified: Option<ClassifiedError> = None;

        self.store
            .add_message(session_id, MessageRole::User, goal, None, None, None, None)
            .await?;

        for attempt in 0..max_attempts {
            total_attempts += 1;
            let message_history = self.load_message_history(session_id).await?;

            let ctx = RunContext {
                session_id,
                chat_id,
                model: self.config.default_model.clone(),
            };

            match self
                .transport
                .run(&current_task, &ctx, message_history.as_deref())
                .await
            {
                Ok(outcome) => {
                    self.save_message_history(session_id, message_history, outcome.new_messages)
                        .await?;
                    self.store
                        .add_message(
                            session_id,
                            MessageRole::Assistant,
                            outcome.output.clone(),
                            None,
                            None,
                            None,
                            None,
                        )
                        .await?;
                    if let Some(task_id) = resumable_task_id {
                        self.store.mark_resumable_task_completed(task_id).await?;
                    }
                    return Ok(RunResult {
                        output: outcome.output,
                        success: true,
                        total_attempts,
                        retryable_attempts,
                    });
                }
                Err(error_message) => {
                    let classified = self.classifier.classify(&error_message);
                    if classified.is_retryable {
                        retryable_attempts += 1;
                    } else {
                        tracing::info!(kind = ?classified.kind, "non-retryable error");
                    }

                    let action = self.strategy.determine_action(&classified, attempt, max_attempts);
                    let conversation = self.store.get_conversation_history(session_id, 100).await?;
                    let healing = self.strategy.execute(action, &classified, &conversation).await;

                    last_classified = Some(classified.clone());

                    if !healing.success {
                        return self
                            .finish_failed(session_id, chat_id, goal, &classified, total_attempts, retryable_attempts, resumable_task_id)
                            .await;
                    }

                    current_task = self.fallback.generate_retry_prompt(goal, &classified, attempt, max_attempts);
                }
            }
        }

        let classified = last_classified.unwrap_or_else(|| self.classifier.classify("task failed without a specific error"));
        self.finish_failed(session_id, chat_id, goal, &classified, total_attempts, retryable_attempts, resumable_task_id)
            .await
    }

    async fn load_message_history(&self, session_id: i64) -> StoreResult<Option<Vec<OpaqueMessage>>> {
        let limit = self.config.max_message_history;
        let history = self.store.get_model_message_history(session_id).await?;
        Ok(history.map(|mut h| {
            if h.len() > limit {
                h = h.split_off(h.len() - limit);
            }
            h
        }))
    }

    async fn save_message_history(
        &self,
        session_id: i64,
        previous: Option<Vec<OpaqueMessage>>,
        new_messages: Vec<OpaqueMessage>,
    ) -> StoreResult<()> {
        if new_messages.is_empty() {
            return Ok(());
        }
        let limit = self.config.max_message_history;
        let mut full = previous.unwrap_or_default();
        full.extend(new_messages);
        if full.len() > limit {
            full = full.split_off(full.len() - limit);
        }
        self.store.set_model_message_history(session_id, &full).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_failed(
        &self,
        session_id: i64,
        chat_id: i64,
        original_goal: &str,
        classified: &ClassifiedError,
        total_attempts: usize,
        retryable_attempts: usize,
        resumable_task_id: Option<i64>,
    ) -> StoreResult<RunResult> {
        let tool_calls = self.partial_tool_calls(session_id).await?;
        let fallback_text = self.fallback.generate_from_error(classified, total_attempts, tool_calls);

        self.store
            .add_message(session_id, MessageRole::Assistant, fallback_text.clone(), None, None, None, None)
            .await?;

        if let Some(task_id) = resumable_task_id {
            self.store.mark_resumable_task_failed(task_id, classified.reason).await?;
        }

        if chat_id != 0 && !original_goal.starts_with(AUTO_REPAIR_TASK_PREFIX) {
            let repair_goal = build_repair_goal(original_goal, total_attempts, &classified.message, &fallback_text);
            self.store.upsert_resumable_task(session_id, chat_id, repair_goal).await?;
        }

        Ok(RunResult {
            output: fallback_text,
            success: false,
            total_attempts,
            retryable_attempts,
        })
    }

    async fn partial_tool_calls(&self, session_id: i64) -> StoreResult<Vec<ToolCallSummary>> {
        let messages = self.store.get_recent_messages(session_id, 50).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| ToolCallSummary {
                name: m.tool_name.unwrap_or_else(|| "unknown".to_string()),
                result: m.tool_result.or(Some(m.content)),
            })
            .collect())
    }
}

/// Reproduces the auto-repair goal template verbatim.
pub fn build_repair_goal(original_goal: &str, attempts: usize, last_error: &str, partial_output: &str) -> String {
    let truncated_partial = if partial_output.chars().count() > MAX_REPAIR_PARTIAL_LEN {
        let head: String = partial_output.chars().take(MAX_REPAIR_PARTIAL_LEN).collect();
        format!("{head}\n[truncated]")
    } else {
        partial_output.to_string()
    };

    format!(
        "{AUTO_REPAIR_TASK_PREFIX} The previous run failed after {attempts} attempt(s). Fix the cause \
and complete the original task. Use get_todo if needed, then reply with \
the result.\n\n\
Original goal:\n{original_goal}\n\n\
Last error:\n{last_error}\n\n\
Partial output before failure:\n{truncated_partial}\n\n\
Fix the error and complete or report progress."
    )
}

/// Prompt used by the boot-time sweeper to resume an interrupted task.
pub fn build_resume_prompt(stored_goal: &str, resume_count: i64) -> String {
    format!(
        "You are continuing a previously interrupted task (resume attempt {resume_count}). \
Review what has already been done before repeating work.\n\n{stored_goal}"
    )
}
