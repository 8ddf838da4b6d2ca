//! Error classification for the self-healing loop.
//!
//! Pattern tables and priority order are reproduced from
//! `healing/classifier.py`'s `ErrorClassifier`: context overflow first
//! (it's the one case we can recover from without losing the run), then
//! usage limit and auth (fatal to the whole session), then rate limit,
//! then generic fatal, with anything unmatched treated as recoverable.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Recoverable,
    ContextOverflow,
    RateLimit,
    UsageLimit,
    AuthError,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub is_retryable: bool,
    pub suggested_action: &'static str,
    pub wait_seconds: Option<u64>,
    pub reason: &'static str,
}

const CONTEXT_OVERFLOW_PATTERNS: &[&str] = &[
    r"(?i)context.*too.*long",
    r"(?i)context.*length.*exceed",
    r"(?i)token.*limit.*exceed",
    r"(?i)max.*context.*length",
    r"(?i)context.*window.*exceeded",
    r"(?i)conversation.*too.*long",
    r"(?i)message.*too.*long",
    r"(?i)prompt.*too.*long",
    r"(?i)input.*length.*exceed",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    r"(?i)rate.*limit",
    r"(?i)too.*many.*request",
    r"(?i)request.*throttl",
    r"(?i)slow.*down",
    r"(?i)retry.*after",
    r"429",
];

const USAGE_LIMIT_PATTERNS: &[&str] = &[
    r"(?i)usage.*limit.*exceed",
    r"(?i)quota.*exceed",
    r"(?i)insufficient.*quota",
    r"(?i)billing.*limit",
    r"(?i)credit.*limit",
    r"(?i)account.*limit",
    r"(?i)monthly.*limit",
    r"(?i)daily.*limit",
];

const AUTH_ERROR_PATTERNS: &[&str] = &[
    r"(?i)invalid.*api.*key",
    r"(?i)authentication.*fail",
    r"(?i)unauthorized",
    r"401",
    r"403",
    r"(?i)permission.*denied",
    r"(?i)access.*denied",
    r"(?i)invalid.*credential",
];

const FATAL_PATTERNS: &[&str] = &[
    r"(?i)model.*not.*found",
    r"(?i)model.*unavailable",
    r"(?i)service.*unavailable",
    r"(?i)internal.*server.*error",
    "500",
    "502",
    "503",
    "504",
];

const WAIT_TIME_PATTERNS: &[&str] = &[
    r"(?i)retry.*after.*?(\d+)",
    r"(?i)wait.*?(\d+).*?(?:second|sec)",
    r"(?i)retry.?in.*?(\d+)",
];

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).expect("pattern is valid")).collect()
}

static CONTEXT_OVERFLOW: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(CONTEXT_OVERFLOW_PATTERNS));
static RATE_LIMIT: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(RATE_LIMIT_PATTERNS));
static USAGE_LIMIT: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(USAGE_LIMIT_PATTERNS));
static AUTH_ERROR: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(AUTH_ERROR_PATTERNS));
static FATAL: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(FATAL_PATTERNS));
static WAIT_TIME: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(WAIT_TIME_PATTERNS));

fn matches_any(patterns: &[Regex], message: &str) -> bool {
    patterns.iter().any(|p| p.is_match(message))
}

pub struct ErrorClassifier {
    max_wait_seconds: u64,
}

impl ErrorClassifier {
    pub fn new(max_wait_seconds: u64) -> Self {
        Self { max_wait_seconds }
    }

    pub fn classify(&self, message: &str) -> ClassifiedError {
        if matches_any(&CONTEXT_OVERFLOW, message) {
            return ClassifiedError {
                kind: ErrorKind::ContextOverflow,
                message: message.to_string(),
                is_retryable: true,
                suggested_action: "compress_context",
                wait_seconds: None,
                reason: "context window exceeded",
            };
        }
        if matches_any(&USAGE_LIMIT, message) {
            return ClassifiedError {
                kind: ErrorKind::UsageLimit,
                message: message.to_string(),
                is_retryable: false,
                suggested_action: "fallback_response",
                wait_seconds: None,
                reason: "usage quota exceeded",
            };
        }
        if matches_any(&AUTH_ERROR, message) {
            return ClassifiedError {
                kind: ErrorKind::AuthError,
                message: message.to_string(),
                is_retryable: false,
                suggested_action: "fallback_response",
                wait_seconds: None,
                reason: "authentication failed",
            };
        }
        if matches_any(&RATE_LIMIT, message) {
            let wait_seconds = self.extract_wait_seconds(message);
            return ClassifiedError {
                kind: ErrorKind::RateLimit,
                message: message.to_string(),
                is_retryable: true,
                suggested_action: "wait_and_retry",
                wait_seconds: Some(wait_seconds),
                reason: "rate limited",
            };
        }
        if matches_any(&FATAL, message) {
            return ClassifiedError {
                kind: ErrorKind::Fatal,
                message: message.to_string(),
                is_retryable: false,
                suggested_action: "fallback_response",
                wait_seconds: None,
                reason: "fatal error",
            };
        }

        ClassifiedError {
            kind: ErrorKind::Recoverable,
            message: message.to_string(),
            is_retryable: true,
            suggested_action: "retry_with_context",
            wait_seconds: None,
            reason: "unknown error, attempting recovery",
        }
    }

    /// Extracts a wait time in seconds from a rate-limit message, capped at
    /// `max_wait_seconds`; defaults to 60 when no number is found.
    fn extract_wait_seconds(&self, message: &str) -> u64 {
        for pattern in WAIT_TIME.iter() {
            if let Some(caps) = pattern.captures(message) {
                if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                    return n.min(self.max_wait_seconds);
                }
            }
        }
        60u64.min(self.max_wait_seconds)
    }

    pub fn should_retry(&self, message: &str, attempt: usize, max_attempts: usize) -> bool {
        if attempt + 1 >= max_attempts {
            return false;
        }
        self.classify(message).is_retryable
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(300)
    }
}

/// Convenience accessor for surfacing classification metadata (e.g. in a
/// fallback template) without cloning the whole `ClassifiedError`.
pub fn reason_map(error: &ClassifiedError) -> HashMap<&'static str, String> {
    let mut map = HashMap::new();
    map.insert("reason", error.reason.to_string());
    if let Some(wait) = error.wait_seconds {
        map.insert("wait_seconds", wait.to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_context_overflow() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("Error: context length exceeded maximum of 128000 tokens");
        assert_eq!(result.kind, ErrorKind::ContextOverflow);
        assert!(result.is_retryable);
    }

    #[test]
    fn context_overflow_outranks_rate_limit_wording() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("rate limit hit: prompt too long for this request");
        assert_eq!(result.kind, ErrorKind::ContextOverflow);
    }

    #[test]
    fn classifies_usage_limit_as_non_retryable() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("monthly quota exceeded for this account");
        assert_eq!(result.kind, ErrorKind::UsageLimit);
        assert!(!result.is_retryable);
    }

    #[test]
    fn classifies_auth_error() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("401 Unauthorized: invalid api key");
        assert_eq!(result.kind, ErrorKind::AuthError);
        assert!(!result.is_retryable);
    }

    #[test]
    fn extracts_wait_seconds_from_rate_limit_message() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("rate limit exceeded, retry after 45 seconds");
        assert_eq!(result.kind, ErrorKind::RateLimit);
        assert_eq!(result.wait_seconds, Some(45));
    }

    #[test]
    fn wait_seconds_defaults_to_sixty_when_absent() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("429 too many requests");
        assert_eq!(result.wait_seconds, Some(60));
    }

    #[test]
    fn wait_seconds_capped_at_configured_max() {
        let classifier = ErrorClassifier::new(30);
        let result = classifier.classify("rate limit exceeded, retry after 9000 seconds");
        assert_eq!(result.wait_seconds, Some(30));
    }

    #[test]
    fn classifies_fatal_server_errors() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("503 Service Unavailable");
        assert_eq!(result.kind, ErrorKind::Fatal);
        assert!(!result.is_retryable);
    }

    #[test]
    fn unknown_errors_default_to_recoverable() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify("connection reset by peer");
        assert_eq!(result.kind, ErrorKind::Recoverable);
        assert!(result.is_retryable);
    }

    #[test]
    fn should_retry_respects_attempt_budget() {
        let classifier = ErrorClassifier::default();
        assert!(classifier.should_retry("connection reset", 0, 3));
        assert!(!classifier.should_retry("connection reset", 2, 3));
    }

    #[test]
    fn should_retry_respects_non_retryable_kind_even_with_budget_left() {
        let classifier = ErrorClassifier::default();
        assert!(!classifier.should_retry("401 unauthorized", 0, 3));
    }
}
