#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Composable primitives for aggregating and deferring resource release
//!
//! Everything here builds on one capability: a [`Release`] value can be
//! told to give up its held state, and stays inert once it has. On top of
//! that sit two components with real invariants:
//!
//! - [`Collector`] batches releasable resources behind identity-carrying
//!   [`Handle`]s and releases all of them together, exactly once, under
//!   concurrent registration and release.
//! - [`RefCounted`] wraps a lazily-constructed resource and defers its
//!   release until the last outstanding [`RefGuard`] is gone.
//!
//! Both satisfy [`Release`] themselves, so a collector can hold a counter
//! and a counter's inner value can be a collector.

pub mod collector;
pub mod handle;
pub mod refcount;
pub mod release;

pub use collector::Collector;
pub use handle::{Handle, HandleId};
pub use refcount::{RefCounted, RefGuard};
pub use release::{ActionGuard, NoopRelease, Release, ReleaseExt};

// Re-export the shared error types for convenience
pub use teardown_errors::{CollectorError, Error, RefCountError, Result};
