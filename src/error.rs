//! Top-level error type aggregating every subsystem's failure modes.
//!
//! Mirrors the teacher's single-enum-with-`#[from]` convention: subsystem
//! errors (`StoreError`, `DispatcherError`) are defined where they live and
//! folded in here so call sites that cross module boundaries can use `?`
//! without manual mapping.

use crate::dispatcher::DispatcherError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
