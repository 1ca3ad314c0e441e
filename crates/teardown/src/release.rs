//! The releasable-resource capability and adapters around it

use std::fmt;

use teardown_errors::Result;

use crate::collector::Collector;
use crate::handle::Handle;

/// A resource that can give up its held state.
///
/// `release` is idempotent after the first call: every implementation in
/// this crate drains its state the first time through and turns later
/// calls into no-ops. Implementations outside this crate are expected to
/// uphold the same contract.
pub trait Release {
    /// Give up the held state.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying resource fails to release. The
    /// resource counts as consumed either way; calling `release` again
    /// must not repeat the work.
    fn release(&mut self) -> Result<()>;
}

impl<T: Release + ?Sized> Release for Box<T> {
    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}

/// A releasable resource that holds nothing and never fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopRelease;

impl Release for NoopRelease {
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

type Action = Box<dyn FnOnce() -> Result<()> + Send>;

/// Adapts arbitrary cleanup actions into a releasable resource.
///
/// Actions run in registration order on the first `release` call and are
/// consumed by it. All actions run even when an earlier one fails; the
/// first failure is the one returned.
pub struct ActionGuard {
    actions: Vec<Action>,
}

impl ActionGuard {
    /// Create a guard around a single cleanup action.
    #[must_use]
    pub fn new(action: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            actions: vec![Box::new(action)],
        }
    }

    /// Append another action, run after the ones already held.
    #[must_use]
    pub fn and_then(mut self, action: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    /// Number of actions still waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.actions.len()
    }
}

impl Release for ActionGuard {
    fn release(&mut self) -> Result<()> {
        let mut first_failure = None;
        for action in self.actions.drain(..) {
            if let Err(err) = action() {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ActionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionGuard")
            .field("pending", &self.actions.len())
            .finish()
    }
}

/// Fluent helpers for combining releasable values.
pub trait ReleaseExt: Release + Send + Sized + 'static {
    /// Merge `self` and `rest` into a [`Collector`] that releases both
    /// together, `self` first.
    #[must_use]
    fn release_with<R>(self, rest: R) -> Collector
    where
        R: Release + Send + 'static,
    {
        let collector = Collector::new();
        collector.push_fresh(Handle::new(self));
        collector.push_fresh(Handle::new(rest));
        collector
    }
}

impl<T: Release + Send + Sized + 'static> ReleaseExt for T {}
