//! Fallback response synthesis from partial results.
//!
//! Structure reproduced from `healing/fallback.py::FallbackHandler`. The
//! templates are illustrative English copy rather than a translation of
//! the original's Russian strings: only the one-to-one mapping from
//! `ErrorKind` to template is load-bearing.

use super::classifier::{ClassifiedError, ErrorKind};

#[derive(Debug, Clone)]
pub struct ToolCallSummary {
    pub name: String,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    pub tool_calls: Vec<ToolCallSummary>,
    pub error_message: Option<String>,
    pub attempt_count: usize,
    pub error_kind: Option<ErrorKind>,
}

struct Template {
    title: &'static str,
    suggestion: &'static str,
}

fn template_for(kind: Option<ErrorKind>) -> Template {
    match kind {
        Some(ErrorKind::UsageLimit) => Template {
            title: "Usage limit reached",
            suggestion: "Try again later or reduce the scope of the task.",
        },
        Some(ErrorKind::AuthError) => Template {
            title: "Authentication error",
            suggestion: "Check the API key or contact an administrator.",
        },
        Some(ErrorKind::RateLimit) => Template {
            title: "Rate limit exceeded",
            suggestion: "Wait a moment and try again.",
        },
        Some(ErrorKind::ContextOverflow) => Template {
            title: "Context overflow",
            suggestion: "Start a new session or simplify the task.",
        },
        Some(ErrorKind::Fatal) => Template {
            title: "Fatal error",
            suggestion: "Contact an administrator.",
        },
        Some(ErrorKind::Recoverable) | None => Template {
            title: "Execution error",
            suggestion: "Try simplifying the task or starting over.",
        },
    }
}

pub struct FallbackHandler;

impl FallbackHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, partial: &PartialResult) -> String {
        let template = template_for(partial.error_kind);
        let mut parts = vec![template.title.to_string(), String::new()];

        if !partial.tool_calls.is_empty() {
            parts.push("**Actions taken:**".to_string());
            for call in partial.tool_calls.iter().take(5) {
                let summary = Self::summarize_result(call.result.as_deref());
                parts.push(format!("- {}: {summary}", call.name));
            }
            parts.push(String::new());
        }

        if let Some(error_message) = &partial.error_message {
            parts.push(format!("**Reason for stopping:** {error_message}"));
            parts.push(String::new());
        }

        if partial.attempt_count > 1 {
            parts.push(format!("**Attempts:** {}", partial.attempt_count));
            parts.push(String::new());
        }

        parts.push(format!("**Recommendation:** {}", template.suggestion));
        parts.join("\n")
    }

    fn summarize_result(result: Option<&str>) -> String {
        const MAX_LENGTH: usize = 100;
        match result {
            None => "no result".to_string(),
            Some(s) if s.chars().count() > MAX_LENGTH => {
                let truncated: String = s.chars().take(MAX_LENGTH - 3).collect();
                format!("{truncated}...")
            }
            Some(s) => s.to_string(),
        }
    }

    pub fn generate_from_error(
        &self,
        classified: &ClassifiedError,
        attempt_count: usize,
        partial_results: Vec<ToolCallSummary>,
    ) -> String {
        let partial = PartialResult {
            tool_calls: partial_results,
            error_message: Some(classified.message.clone()),
            attempt_count,
            error_kind: Some(classified.kind),
        };
        self.generate(&partial)
    }

    /// A bracketed diagnostic appended to the original goal for the next
    /// retry attempt.
    pub fn generate_retry_prompt(
        &self,
        original_task: &str,
        classified: &ClassifiedError,
        attempt: usize,
        max_attempts: usize,
    ) -> String {
        let kind_name = match classified.kind {
            ErrorKind::Recoverable => "RECOVERABLE",
            ErrorKind::ContextOverflow => "CONTEXT_OVERFLOW",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::UsageLimit => "USAGE_LIMIT",
            ErrorKind::AuthError => "AUTH_ERROR",
            ErrorKind::Fatal => "FATAL",
        };

        let mut retry_context = format!(
            "\n\n[Attempt {}/{max_attempts} failed.\nError type: {kind_name}\nMessage: {}\n",
            attempt + 1,
            classified.message
        );

        match classified.suggested_action {
            "compress_context" => retry_context
                .push_str("\nRecommendation: the context is too large, try shorter responses or start a new session.]"),
            "wait_and_retry" => {
                retry_context.push_str("\nRecommendation: a rate limit was hit, wait briefly before retrying.]")
            }
            _ => retry_context.push_str("\nFix the problem and complete the task again.]"),
        }

        format!("{original_task}{retry_context}")
    }
}

impl Default for FallbackHandler {
    fn default() -> Self {
        Self::new()
    }
}
