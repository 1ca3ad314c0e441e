//! Thread-safe aggregation of releasable resources

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use teardown_errors::{CollectorError, Result};

use crate::handle::Handle;
use crate::release::Release;

/// Collects releasable resources so they can all be released together,
/// exactly once.
///
/// Registration and release serialize on one per-instance lock. Once
/// `release` begins, the collector is observably disposed: concurrent
/// `register` calls fail, `try_register` calls turn into no-ops, and a
/// racing `release` returns immediately while the winning call performs
/// the sweep.
pub struct Collector {
    // None is the disposed state; the member set is gone once released.
    members: Mutex<Option<Vec<Handle>>>,
}

impl Collector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Some(Vec::new())),
        }
    }

    /// Create a collector pre-seeded with the given handles.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::DuplicateHandle`] if the same handle
    /// appears twice in the seed.
    pub fn from_handles<I>(handles: I) -> Result<Self>
    where
        I: IntoIterator<Item = Handle>,
    {
        let collector = Self::new();
        collector.register_all(handles)?;
        Ok(collector)
    }

    /// Add a handle to the member set, returning a clone of it so
    /// registration can be chained into further use of the handle.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::AlreadyDisposed`] if the collector has
    /// released its members, or [`CollectorError::DuplicateHandle`] if a
    /// handle with the same identity is already a member.
    pub fn register(&self, handle: Handle) -> Result<Handle> {
        let mut state = self.lock_members();
        let members = state.as_mut().ok_or(CollectorError::AlreadyDisposed)?;
        Self::insert(members, handle.clone())?;
        Ok(handle)
    }

    /// Add every handle in the batch.
    ///
    /// The batch is validated before anything is inserted: when any handle
    /// is a duplicate, nothing is added.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::AlreadyDisposed`] if the collector has
    /// released its members, or [`CollectorError::DuplicateHandle`] if any
    /// handle is already a member or appears twice in the batch.
    pub fn register_all<I>(&self, handles: I) -> Result<()>
    where
        I: IntoIterator<Item = Handle>,
    {
        let incoming: Vec<Handle> = handles.into_iter().collect();
        let mut state = self.lock_members();
        let members = state.as_mut().ok_or(CollectorError::AlreadyDisposed)?;
        Self::check_batch(members, &incoming)?;
        members.extend(incoming);
        Ok(())
    }

    /// Like [`register`](Self::register), but a disposed collector is a
    /// silent no-op: the handle comes back unchanged and will not be
    /// released by this collector. Duplicate identities still fail.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::DuplicateHandle`] if a handle with the
    /// same identity is already a member.
    pub fn try_register(&self, handle: Handle) -> Result<Handle> {
        let mut state = self.lock_members();
        let Some(members) = state.as_mut() else {
            return Ok(handle);
        };
        Self::insert(members, handle.clone())?;
        Ok(handle)
    }

    /// Batch form of [`try_register`](Self::try_register).
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::DuplicateHandle`] if any handle is
    /// already a member or appears twice in the batch.
    pub fn try_register_all<I>(&self, handles: I) -> Result<()>
    where
        I: IntoIterator<Item = Handle>,
    {
        let incoming: Vec<Handle> = handles.into_iter().collect();
        let mut state = self.lock_members();
        let Some(members) = state.as_mut() else {
            return Ok(());
        };
        Self::check_batch(members, &incoming)?;
        members.extend(incoming);
        Ok(())
    }

    /// Wrap a raw resource in a fresh [`Handle`], register it, and return
    /// the handle.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::AlreadyDisposed`] if the collector has
    /// released its members.
    pub fn adopt(&self, resource: impl Release + Send + 'static) -> Result<Handle> {
        self.register(Handle::new(resource))
    }

    /// Whether the terminal release transition has begun.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock_members().is_none()
    }

    /// Number of currently held members; zero once disposed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_members().as_ref().map_or(0, Vec::len)
    }

    /// Whether the collector holds no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every held member, exactly once across all callers.
    ///
    /// The member set is taken in one atomic step, so the collector reads
    /// as disposed before the first individual release starts and no
    /// registration can slip in mid-sweep. The sweep itself runs outside
    /// the collector lock, attempting every member in registration order
    /// even when earlier ones fail.
    ///
    /// The winning call returns once every member was attempted; a
    /// concurrent call that loses the race returns immediately with
    /// `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::ReleaseIncomplete`] when one or more
    /// members failed to release; the rest were still attempted.
    pub fn release(&self) -> Result<()> {
        let members = {
            let mut state = self.lock_members();
            state.take()
        };
        let Some(members) = members else {
            return Ok(());
        };

        let attempted = members.len();
        tracing::debug!(members = attempted, "releasing collector");

        let mut causes = Vec::new();
        for handle in members {
            if let Err(err) = handle.release() {
                tracing::warn!(handle = %handle.id(), error = %err, "member failed to release");
                causes.push(format!("{}: {err}", handle.id()));
            }
        }

        if causes.is_empty() {
            Ok(())
        } else {
            Err(CollectorError::ReleaseIncomplete {
                failed: causes.len(),
                attempted,
                causes,
            }
            .into())
        }
    }

    // Seeds a handle that was created moments ago and cannot collide or
    // observe a disposed collector. Used by the combinators.
    pub(crate) fn push_fresh(&self, handle: Handle) {
        if let Some(members) = self.lock_members().as_mut() {
            members.push(handle);
        }
    }

    fn insert(
        members: &mut Vec<Handle>,
        handle: Handle,
    ) -> std::result::Result<(), CollectorError> {
        if members.iter().any(|member| member.id() == handle.id()) {
            return Err(CollectorError::DuplicateHandle {
                id: handle.id().as_u64(),
            });
        }
        members.push(handle);
        Ok(())
    }

    fn check_batch(
        members: &[Handle],
        incoming: &[Handle],
    ) -> std::result::Result<(), CollectorError> {
        for (index, handle) in incoming.iter().enumerate() {
            let duplicate = members.iter().any(|member| member.id() == handle.id())
                || incoming[..index].iter().any(|seen| seen.id() == handle.id());
            if duplicate {
                return Err(CollectorError::DuplicateHandle {
                    id: handle.id().as_u64(),
                });
            }
        }
        Ok(())
    }

    fn lock_members(&self) -> MutexGuard<'_, Option<Vec<Handle>>> {
        // Poisoning is recovered: the disposed flag and member set stay
        // coherent across a panicking thread.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Release for Collector {
    fn release(&mut self) -> Result<()> {
        Collector::release(self)
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("disposed", &self.is_disposed())
            .field("members", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use teardown_errors::Error;

    use super::*;
    use crate::release::NoopRelease;

    fn counting_handle() -> (Handle, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&releases);
        let handle = Handle::from_fn(move || {
            probe.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (handle, releases)
    }

    fn failing_handle(message: &'static str) -> Handle {
        Handle::from_fn(move || Err(Error::internal(message)))
    }

    #[test]
    fn test_empty_collector_releases_cleanly() {
        let collector = Collector::new();
        assert!(!collector.is_disposed());
        assert!(collector.is_empty());

        collector.release().unwrap();
        assert!(collector.is_disposed());
        assert_eq!(collector.len(), 0);
    }

    #[test]
    fn test_release_releases_every_member_once() {
        let collector = Collector::new();
        let mut probes = Vec::new();
        for _ in 0..5 {
            let (handle, releases) = counting_handle();
            collector.register(handle).unwrap();
            probes.push(releases);
        }

        collector.release().unwrap();
        for releases in &probes {
            assert_eq!(releases.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_repeated_release_is_a_noop() {
        let collector = Collector::new();
        let (handle, releases) = counting_handle();
        collector.register(handle).unwrap();

        collector.release().unwrap();
        collector.release().unwrap();
        collector.release().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_after_release_fails() {
        let collector = Collector::new();
        collector.release().unwrap();

        let err = collector.register(Handle::new(NoopRelease)).unwrap_err();
        assert!(matches!(
            err,
            Error::Collector(CollectorError::AlreadyDisposed)
        ));
    }

    #[test]
    fn test_duplicate_registration_always_fails() {
        let collector = Collector::new();
        let handle = collector.register(Handle::new(NoopRelease)).unwrap();

        let err = collector.register(handle.clone()).unwrap_err();
        assert!(matches!(
            err,
            Error::Collector(CollectorError::DuplicateHandle { .. })
        ));

        // The try variant tolerates disposal, not duplication.
        let err = collector.try_register(handle).unwrap_err();
        assert!(matches!(
            err,
            Error::Collector(CollectorError::DuplicateHandle { .. })
        ));
    }

    #[test]
    fn test_try_register_on_disposed_is_a_noop() {
        let collector = Collector::new();
        collector.release().unwrap();

        let (handle, releases) = counting_handle();
        let returned = collector.try_register(handle.clone()).unwrap();
        assert_eq!(returned.id(), handle.id());
        assert_eq!(collector.len(), 0);

        // A second release sweeps nothing; the orphaned handle stays live.
        collector.release().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert!(!handle.is_released());
    }

    #[test]
    fn test_try_register_all_tolerates_disposal_only() {
        let collector = Collector::new();
        let (a, releases_a) = counting_handle();
        let (b, _releases_b) = counting_handle();
        collector.try_register_all([a, b.clone()]).unwrap();
        assert_eq!(collector.len(), 2);

        // Duplicates still fail while the collector is live.
        let err = collector.try_register_all([b]).unwrap_err();
        assert!(matches!(
            err,
            Error::Collector(CollectorError::DuplicateHandle { .. })
        ));

        collector.release().unwrap();
        assert_eq!(releases_a.load(Ordering::SeqCst), 1);

        // After disposal the batch form is a silent no-op as well.
        let (c, releases_c) = counting_handle();
        collector.try_register_all([c]).unwrap();
        collector.release().unwrap();
        assert_eq!(releases_c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_returns_the_same_handle() {
        let collector = Collector::new();
        let handle = Handle::new(NoopRelease);
        let id = handle.id();

        let returned = collector.register(handle).unwrap();
        assert_eq!(returned.id(), id);
    }

    #[test]
    fn test_register_all_adds_nothing_on_duplicate() {
        let collector = Collector::new();
        let existing = collector.register(Handle::new(NoopRelease)).unwrap();

        let fresh = Handle::new(NoopRelease);
        let err = collector
            .register_all([fresh.clone(), existing])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Collector(CollectorError::DuplicateHandle { .. })
        ));
        assert_eq!(collector.len(), 1);

        // The non-duplicate half of the batch was not inserted either.
        collector.register(fresh).unwrap();
    }

    #[test]
    fn test_register_all_rejects_duplicates_within_the_batch() {
        let collector = Collector::new();
        let handle = Handle::new(NoopRelease);

        let err = collector
            .register_all([handle.clone(), handle])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Collector(CollectorError::DuplicateHandle { .. })
        ));
        assert!(collector.is_empty());
    }

    #[test]
    fn test_from_handles_seeds_the_collector() {
        let (a, releases_a) = counting_handle();
        let (b, releases_b) = counting_handle();

        let collector = Collector::from_handles([a, b]).unwrap();
        assert_eq!(collector.len(), 2);

        collector.release().unwrap();
        assert_eq!(releases_a.load(Ordering::SeqCst), 1);
        assert_eq!(releases_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_handles_rejects_duplicate_seed() {
        let handle = Handle::new(NoopRelease);
        let result = Collector::from_handles([handle.clone(), handle]);
        assert!(result.is_err());
    }

    #[test]
    fn test_adopt_wraps_and_registers() {
        let collector = Collector::new();
        let handle = collector.adopt(NoopRelease).unwrap();
        assert_eq!(collector.len(), 1);

        collector.release().unwrap();
        assert!(handle.is_released());
    }

    #[test]
    fn test_release_attempts_all_members_and_aggregates_failures() {
        let collector = Collector::new();
        collector.register(failing_handle("first refused")).unwrap();
        let (handle, releases) = counting_handle();
        collector.register(handle).unwrap();
        collector.register(failing_handle("third refused")).unwrap();

        let err = collector.release().unwrap_err();
        match err {
            Error::Collector(CollectorError::ReleaseIncomplete {
                failed,
                attempted,
                causes,
            }) => {
                assert_eq!(failed, 2);
                assert_eq!(attempted, 3);
                assert_eq!(causes.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The healthy member in the middle was still released.
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collector_composes_as_a_member() {
        let inner = Collector::new();
        let (handle, releases) = counting_handle();
        inner.register(handle).unwrap();

        let outer = Collector::new();
        outer.adopt(inner).unwrap();

        outer.release().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
