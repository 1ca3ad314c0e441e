#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the teardown release primitives
//!
//! This crate provides fine-grained error types organized by domain.
//! All error types implement Clone for easier handling.

use thiserror::Error;

pub mod collector;
pub mod refcount;

// Re-export all error types at the root
pub use collector::CollectorError;
pub use refcount::RefCountError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("reference counting error: {0}")]
    RefCount(#[from] RefCountError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias for teardown operations
pub type Result<T> = std::result::Result<T, Error>;
