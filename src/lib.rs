//! Conversational agent runtime core: per-chat dispatch, a self-healing
//! execution loop around an opaque LLM transport, a SQLite-backed session
//! and memory store, and a resumable-task ledger that survives restarts.

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod healing;
pub mod runtime;
pub mod store;
pub mod sweeper;
pub mod transport;

pub use error::{Result, RuntimeError};
pub use runtime::AgentRuntime;
