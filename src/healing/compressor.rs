//! Context compression for handling context-overflow errors.
//!
//! Sliding window + summarization, reproduced from
//! `healing/compressor.py::ContextCompressor`: keep recent messages and
//! tool calls verbatim, fold everything else into one synthetic summary
//! message.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const DEFAULT_KEEP_RECENT: usize = 10;
const MAX_TOOL_MESSAGES: usize = 10;
const MAX_SYSTEM_MESSAGES: usize = 3;

pub struct CompressionResult {
    pub compressed_history: Vec<Value>,
    pub removed_count: usize,
    pub summary: Option<String>,
    pub compression_ratio: f64,
}

pub struct ContextCompressor {
    keep_recent: usize,
}

fn role_of(message: &Value) -> &str {
    message.get("role").and_then(Value::as_str).unwrap_or("")
}

fn content_of(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn is_tool_message(message: &Value) -> bool {
    let role = role_of(message);
    role == "tool" || role == "tool_call" || message.get("tool").is_some()
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").to_string()
}

struct TopicPattern {
    regex: Regex,
    label: &'static str,
}

static TOPIC_PATTERNS: LazyLock<Vec<TopicPattern>> = LazyLock::new(|| {
    vec![
        TopicPattern {
            regex: Regex::new(r"(?i)files?\s*[:\s]+([a-zA-Z0-9_\-.]+)").unwrap(),
            label: "files",
        },
        TopicPattern {
            regex: Regex::new(r"(?i)directory(?:ies)?\s*[:\s]+([a-zA-Z0-9_\-/]+)").unwrap(),
            label: "directories",
        },
        TopicPattern {
            regex: Regex::new(r"(?i)function(?:ality)?\s*[:\s]+([a-zA-Z0-9_\-]+)").unwrap(),
            label: "functions",
        },
        TopicPattern {
            regex: Regex::new(r"(?i)class(?:es)?\s*[:\s]+([a-zA-Z0-9_\-]+)").unwrap(),
            label: "classes",
        },
        TopicPattern {
            regex: Regex::new(r"(?i)module(?:s)?\s*[:\s]+([a-zA-Z0-9_\-]+)").unwrap(),
            label: "modules",
        },
    ]
});

impl ContextCompressor {
    pub fn new(keep_recent: usize) -> Self {
        Self { keep_recent }
    }

    pub fn compress(&self, history: &[Value], target_messages: Option<usize>) -> CompressionResult {
        if history.is_empty() {
            return CompressionResult {
                compressed_history: Vec::new(),
                removed_count: 0,
                summary: None,
                compression_ratio: 1.0,
            };
        }

        let target = target_messages.unwrap_or(self.keep_recent);
        if history.len() <= target {
            return CompressionResult {
                compressed_history: history.to_vec(),
                removed_count: 0,
                summary: None,
                compression_ratio: 1.0,
            };
        }

        let recent_start = history.len().saturating_sub(self.keep_recent);
        let recent_messages = &history[recent_start..];
        let older_messages = &history[..recent_start];

        let mut system_messages = Vec::new();
        let mut tool_messages = Vec::new();
        let mut non_tool_older = Vec::new();

        for msg in older_messages {
            if role_of(msg) == "system" {
                system_messages.push(msg.clone());
            } else if is_tool_message(msg) {
                tool_messages.push(msg.clone());
            } else {
                non_tool_older.push(msg.clone());
            }
        }

        let summary = if non_tool_older.is_empty() {
            None
        } else {
            Some(self.summarize_messages(&non_tool_older))
        };

        let mut compressed = Vec::new();
        compressed.extend(system_messages.into_iter().take(MAX_SYSTEM_MESSAGES));

        if let Some(summary) = &summary {
            compressed.push(serde_json::json!({
                "role": "system",
                "content": format!("[Previous context summary: {summary}]"),
                "metadata": {"compressed": true},
            }));
        }

        let tool_tail_start = tool_messages.len().saturating_sub(MAX_TOOL_MESSAGES);
        compressed.extend(tool_messages[tool_tail_start..].iter().cloned());
        compressed.extend(recent_messages.iter().cloned());

        let original_size: usize = history.iter().map(|m| content_of(m).len()).sum();
        let compressed_size: usize = compressed.iter().map(|m| content_of(m).len()).sum();
        let ratio = if compressed_size > 0 {
            original_size as f64 / compressed_size as f64
        } else {
            1.0
        };

        CompressionResult {
            removed_count: history.len().saturating_sub(compressed.len()),
            compressed_history: compressed,
            summary,
            compression_ratio: ratio,
        }
    }

    fn summarize_messages(&self, messages: &[Value]) -> String {
        if messages.is_empty() {
            return String::new();
        }

        let user_messages: Vec<&Value> = messages.iter().filter(|m| role_of(m) == "user").collect();
        let assistant_messages: Vec<&Value> =
            messages.iter().filter(|m| role_of(m) == "assistant").collect();

        let mut parts = Vec::new();

        if !user_messages.is_empty() {
            parts.push(format!("{} user messages", user_messages.len()));
        }
        if !assistant_messages.is_empty() {
            parts.push(format!("{} assistant responses", assistant_messages.len()));
        }

        if let Some(first) = user_messages.first() {
            let content = content_of(first);
            let truncated: String = content.chars().take(80).collect();
            let cleaned = collapse_whitespace(&truncated);
            if !cleaned.is_empty() {
                parts.push(format!("Started with: {cleaned}..."));
            }
        }

        if user_messages.len() > 1 {
            let content = content_of(user_messages[user_messages.len() - 1]);
            let truncated: String = content.chars().take(60).collect();
            let cleaned = collapse_whitespace(&truncated);
            if !cleaned.is_empty() {
                parts.push(format!("Last request: {cleaned}..."));
            }
        }

        if !assistant_messages.is_empty() {
            let owned: Vec<Value> = assistant_messages.iter().map(|v| (*v).clone()).collect();
            let topics = self.extract_topics(&owned);
            if !topics.is_empty() {
                let shown: Vec<&String> = topics.iter().take(3).collect();
                let joined = shown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
                parts.push(format!("Topics: {joined}"));
            }
        }

        parts.join(" | ")
    }

    fn extract_topics(&self, messages: &[Value]) -> Vec<String> {
        let mut topics = Vec::new();
        for msg in messages.iter().take(5) {
            let content = content_of(msg);
            for pattern in TOPIC_PATTERNS.iter() {
                if let Some(caps) = pattern.regex.captures(&content) {
                    if let Some(matched) = caps.get(1) {
                        let text: String = matched.as_str().chars().take(20).collect();
                        let topic = format!("{}: {text}", pattern.label);
                        if !topics.contains(&topic) {
                            topics.push(topic);
                        }
                    }
                }
            }
        }
        topics
    }

    /// Rough token estimate: ~4 characters per token.
    pub fn estimate_tokens(&self, history: &[Value]) -> usize {
        let total_chars: usize = history
            .iter()
            .map(|m| content_of(m).len() + role_of(m).len())
            .sum();
        total_chars / 4
    }

    pub fn needs_compression(&self, history: &[Value], max_tokens: usize) -> bool {
        self.estimate_tokens(history) > max_tokens
    }

    /// Iteratively shrinks `keep_recent` until the estimated token count
    /// fits within `max_tokens * safety_margin`, or ten iterations pass.
    pub fn compress_to_token_limit(
        &self,
        history: &[Value],
        max_tokens: usize,
        safety_margin: f64,
    ) -> CompressionResult {
        let target_tokens = (max_tokens as f64 * safety_margin) as usize;
        let mut current = history.to_vec();

        for i in 0..10usize {
            if self.estimate_tokens(&current) <= target_tokens {
                break;
            }
            let keep_recent = (self.keep_recent.saturating_sub(i * 2)).max(3);
            let compressor = ContextCompressor::new(keep_recent);
            current = compressor.compress(&current, None).compressed_history;
        }

        let original_tokens = self.estimate_tokens(history);
        let current_tokens = self.estimate_tokens(&current);
        let ratio = if current_tokens > 0 {
            original_tokens as f64 / current_tokens as f64
        } else {
            1.0
        };

        CompressionResult {
            removed_count: history.len().saturating_sub(current.len()),
            compressed_history: current,
            summary: None,
            compression_ratio: ratio,
        }
    }
}

impl Default for ContextCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_RECENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> Value {
        serde_json::json!({"role": role, "content": content})
    }

    #[test]
    fn short_history_is_left_untouched() {
        let compressor = ContextCompressor::default();
        let history = vec![msg("user", "hi"), msg("assistant", "hello")];
        let result = compressor.compress(&history, None);
        assert_eq!(result.removed_count, 0);
        assert_eq!(result.compressed_history.len(), 2);
    }

    #[test]
    fn long_history_keeps_recent_and_summarizes_rest() {
        let compressor = ContextCompressor::new(4);
        let mut history = Vec::new();
        for i in 0..20 {
            history.push(msg("user", &format!("message number {i}")));
            history.push(msg("assistant", &format!("response number {i}")));
        }

        let result = compressor.compress(&history, None);
        assert!(result.compressed_history.len() < history.len());
        assert!(result.summary.is_some());
        assert!(result.removed_count > 0);
    }

    #[test]
    fn tool_messages_survive_compression() {
        let compressor = ContextCompressor::new(2);
        let mut history = vec![msg("user", "do the task")];
        for i in 0..15 {
            history.push(serde_json::json!({"role": "tool", "tool": "shell", "content": format!("output {i}")}));
        }
        history.push(msg("assistant", "done"));
        history.push(msg("user", "thanks"));

        let result = compressor.compress(&history, None);
        let tool_count = result
            .compressed_history
            .iter()
            .filter(|m| is_tool_message(m))
            .count();
        assert!(tool_count > 0 && tool_count <= MAX_TOOL_MESSAGES);
    }

    #[test]
    fn estimate_tokens_is_chars_over_four() {
        let compressor = ContextCompressor::default();
        let history = vec![msg("user", &"a".repeat(400))];
        assert_eq!(compressor.estimate_tokens(&history), 101);
    }

    #[test]
    fn needs_compression_respects_threshold() {
        let compressor = ContextCompressor::default();
        let small = vec![msg("user", "hi")];
        let large = vec![msg("user", &"a".repeat(100_000))];
        assert!(!compressor.needs_compression(&small, 1000));
        assert!(compressor.needs_compression(&large, 1000));
    }

    #[test]
    fn compress_to_token_limit_converges() {
        let compressor = ContextCompressor::default();
        let mut history = Vec::new();
        for i in 0..50 {
            history.push(msg("user", &format!("{} {}", "padding".repeat(50), i)));
        }
        let result = compressor.compress_to_token_limit(&history, 500, 0.8);
        assert!(compressor.estimate_tokens(&result.compressed_history) <= 500);
    }
}
