//! Runtime configuration, loaded from environment variables.
//!
//! Field names track the options table in the spec's environment & config
//! section: `DEFAULT_MODEL`, `PROVIDER_DEFAULT`, `MAX_RETRIES`,
//! `MAX_MESSAGE_HISTORY`, `DB_PATH`, `MAX_RESUME_COUNT`. A
//! `MAX_WAIT_SECONDS` knob is added for the rate-limit healing action's
//! wait cap, since the source hardcodes it but the teacher's config
//! convention is to expose every tunable as an env var.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "openrouter/auto";
pub const DEFAULT_PROVIDER: &str = "openrouter";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_MESSAGE_HISTORY: usize = 40;
pub const DEFAULT_DB_PATH: &str = "data/sessions.db";
pub const DEFAULT_MAX_RESUME_COUNT: u32 = 3;
pub const DEFAULT_MAX_WAIT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub default_model: String,
    pub provider_default: String,
    pub max_retries: u32,
    pub max_message_history: usize,
    pub db_path: String,
    pub max_resume_count: u32,
    pub max_wait_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            provider_default: DEFAULT_PROVIDER.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_message_history: DEFAULT_MAX_MESSAGE_HISTORY,
            db_path: DEFAULT_DB_PATH.to_string(),
            max_resume_count: DEFAULT_MAX_RESUME_COUNT,
            max_wait_seconds: DEFAULT_MAX_WAIT_SECONDS,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_model: std::env::var("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            provider_default: std::env::var("PROVIDER_DEFAULT")
                .unwrap_or(defaults.provider_default),
            max_retries: env_parsed("MAX_RETRIES").unwrap_or(defaults.max_retries),
            max_message_history: env_parsed("MAX_MESSAGE_HISTORY")
                .unwrap_or(defaults.max_message_history),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            max_resume_count: env_parsed("MAX_RESUME_COUNT").unwrap_or(defaults.max_resume_count),
            max_wait_seconds: env_parsed("MAX_WAIT_SECONDS").unwrap_or(defaults.max_wait_seconds),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
