//! Collector-specific error types for batched resource release

use thiserror::Error;

/// Errors emitted by the resource collector.
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum CollectorError {
    /// Registration attempted after the collector released its members.
    #[error("collector is already disposed")]
    AlreadyDisposed,

    /// The same handle was registered twice in one collector.
    ///
    /// Membership is identity-based: the id is assigned when the handle is
    /// created, so two handles wrapping equal values are still distinct.
    #[error("handle {id} is already registered")]
    DuplicateHandle { id: u64 },

    /// One or more members failed during the release sweep.
    ///
    /// Every member is attempted regardless of earlier failures; this
    /// variant aggregates whatever went wrong along the way.
    #[error("{failed} of {attempted} resources failed to release")]
    ReleaseIncomplete {
        failed: usize,
        attempted: usize,
        causes: Vec<String>,
    },
}
