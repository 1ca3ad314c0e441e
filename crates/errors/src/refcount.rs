//! Error types for the reference-counting release decorator

use thiserror::Error;

/// Errors emitted by the reference-counting decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum RefCountError {
    /// A hold was given up more times than it was acquired.
    #[error("release without a matching acquire")]
    UnbalancedRelease,
}
