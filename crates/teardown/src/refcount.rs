//! Reference-counted deferral of a single resource's release

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use teardown_errors::{RefCountError, Result};

use crate::release::Release;

type Factory<R> = Box<dyn FnMut() -> R + Send>;

struct CounterState<R> {
    factory: Factory<R>,
    value: Option<R>,
    holders: usize,
}

/// Defers release of a lazily-constructed resource until the last
/// outstanding holder is done with it.
///
/// The counter is cheaply cloneable; clones share the same state, so each
/// thread in a storm can acquire and release through its own clone. The
/// inner value is constructed on the first [`acquire`](Self::acquire) and
/// released exactly once, on the transition from one holder to zero.
///
/// A fully-released counter can be acquired again: the factory runs once
/// more and a fresh inner value begins a new generation.
pub struct RefCounted<R: Release> {
    state: Arc<Mutex<CounterState<R>>>,
}

impl<R: Release> RefCounted<R> {
    /// Create a counter around a factory for the inner resource.
    ///
    /// The factory runs lazily, on the first acquire of each generation.
    #[must_use]
    pub fn new(factory: impl FnMut() -> R + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(CounterState {
                factory: Box::new(factory),
                value: None,
                holders: 0,
            })),
        }
    }

    /// Take one hold on the inner resource, constructing it if absent.
    ///
    /// The returned guard represents exactly one unit of ownership; give
    /// it up with [`RefGuard::release`], or let its `Drop` do so.
    #[must_use]
    pub fn acquire(&self) -> RefGuard<R> {
        {
            let mut state = self.lock_state();
            if state.value.is_none() {
                tracing::debug!("constructing ref-counted inner value");
                state.value = Some((state.factory)());
            }
            state.holders += 1;
        }
        RefGuard {
            counter: self.clone(),
            released: false,
        }
    }

    /// Give up one hold; this is the decorator's own release operation.
    ///
    /// On the transition from one holder to zero the inner value is taken
    /// out of the shared state and released. The state lock is not held
    /// while the inner release runs, so no two callers can both observe
    /// the final transition.
    ///
    /// # Errors
    ///
    /// Returns [`RefCountError::UnbalancedRelease`] when there is no
    /// outstanding hold, and propagates the inner resource's failure when
    /// this call performed the final release.
    pub fn release(&self) -> Result<()> {
        let value = {
            let mut state = self.lock_state();
            match state.holders {
                0 => return Err(RefCountError::UnbalancedRelease.into()),
                1 => {
                    state.holders = 0;
                    state.value.take()
                }
                _ => {
                    state.holders -= 1;
                    None
                }
            }
        };
        if let Some(mut inner) = value {
            tracing::debug!("last holder gone, releasing inner value");
            return inner.release();
        }
        Ok(())
    }

    /// Run `f` against the inner value, if one is currently constructed.
    ///
    /// Returns `None` before the first acquire and again once the last
    /// hold is given up. `f` runs under the counter's internal lock, so it
    /// must not call back into the counter.
    #[must_use]
    pub fn with_value<U>(&self, f: impl FnOnce(&R) -> U) -> Option<U> {
        self.lock_state().value.as_ref().map(f)
    }

    /// Whether an inner value is currently constructed.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.lock_state().value.is_some()
    }

    /// Number of outstanding holders.
    #[must_use]
    pub fn holders(&self) -> usize {
        self.lock_state().holders
    }

    fn lock_state(&self) -> MutexGuard<'_, CounterState<R>> {
        // Poisoning is recovered: the count and value stay coherent across
        // a panicking thread.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Release> Clone for RefCounted<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R: Release> Release for RefCounted<R> {
    fn release(&mut self) -> Result<()> {
        RefCounted::release(self)
    }
}

impl<R: Release> fmt::Debug for RefCounted<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("RefCounted")
            .field("holders", &state.holders)
            .field("has_value", &state.value.is_some())
            .finish()
    }
}

/// One unit of ownership handed out by [`RefCounted::acquire`].
///
/// Consuming the guard with [`release`](Self::release) surfaces the inner
/// resource's failure when this was the final hold. Dropping an unreleased
/// guard performs the same decrement as a best-effort backstop, logging
/// instead of propagating any failure.
#[must_use = "dropping the guard gives the hold back immediately"]
pub struct RefGuard<R: Release> {
    counter: RefCounted<R>,
    released: bool,
}

impl<R: Release> RefGuard<R> {
    /// Give up this hold explicitly.
    ///
    /// # Errors
    ///
    /// Propagates the inner resource's failure when this was the final
    /// hold.
    pub fn release(mut self) -> Result<()> {
        Release::release(&mut self)
    }

    /// The counter this guard holds into.
    #[must_use]
    pub fn counter(&self) -> &RefCounted<R> {
        &self.counter
    }

    /// Run `f` against the shared inner value.
    #[must_use]
    pub fn with_value<U>(&self, f: impl FnOnce(&R) -> U) -> Option<U> {
        self.counter.with_value(f)
    }
}

impl<R: Release> Release for RefGuard<R> {
    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.counter.release()
    }
}

impl<R: Release> Drop for RefGuard<R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.counter.release() {
            tracing::warn!(error = %err, "ref-counted inner value failed to release on drop");
        }
    }
}

impl<R: Release> fmt::Debug for RefGuard<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefGuard")
            .field("released", &self.released)
            .finish()
    }
}
