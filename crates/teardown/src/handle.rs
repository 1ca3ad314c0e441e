//! Identity-carrying handles over releasable resources

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use teardown_errors::Result;

use crate::release::{ActionGuard, Release};

/// Process-wide source of handle identities.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity token for a [`Handle`].
///
/// The id is assigned at construction and shared by all clones of the same
/// handle. Two handles wrapping equal-by-value resources still carry
/// distinct ids, so collector membership is identity-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric form, used in error reporting.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Slot = Arc<Mutex<Option<Box<dyn Release + Send>>>>;

/// A cloneable reference to a releasable resource, used as the unit of
/// registration.
///
/// All clones share one underlying resource and one [`HandleId`]. The
/// first `release` through any clone takes the resource out of the shared
/// slot; every later call is a no-op.
#[derive(Clone)]
pub struct Handle {
    id: HandleId,
    slot: Slot,
}

impl Handle {
    /// Wrap a resource in a fresh handle with its own identity.
    #[must_use]
    pub fn new(resource: impl Release + Send + 'static) -> Self {
        Self {
            id: HandleId::next(),
            slot: Arc::new(Mutex::new(Some(Box::new(resource)))),
        }
    }

    /// Wrap a single cleanup action in a fresh handle.
    #[must_use]
    pub fn from_fn(action: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self::new(ActionGuard::new(action))
    }

    /// Identity token shared by all clones of this handle.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Whether the underlying resource has already been taken and released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lock_slot().is_none()
    }

    /// Release the underlying resource.
    ///
    /// Exactly one caller across all clones performs the release; the
    /// resource itself runs outside the slot lock, so a slow release never
    /// blocks `is_released` probes from other threads.
    ///
    /// # Errors
    ///
    /// Propagates the resource's release failure. The resource is consumed
    /// even when it fails; later calls return `Ok(())`.
    pub fn release(&self) -> Result<()> {
        let taken = self.lock_slot().take();
        if let Some(mut resource) = taken {
            return resource.release();
        }
        Ok(())
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Box<dyn Release + Send>>> {
        // Poisoning is recovered: the slot Option stays coherent across a
        // panicking thread.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Release for Handle {
    fn release(&mut self) -> Result<()> {
        Handle::release(self)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
