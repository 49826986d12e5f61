//! The loader lock and the publish-once memoization primitive.
//!
//! All mutation of loader state happens while holding [`LoaderLock`]. Lazily computed
//! values are stored in a [`Memo`]: readers check it without locking, writers take the lock,
//! check again and compute at most once. The lock is reentrant because computing one memo
//! routinely triggers loading of other classes on the same thread.

use std::sync::OnceLock;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// The reentrant mutex serialising all type-system mutation
#[derive(Default)]
pub struct LoaderLock {
    inner: ReentrantMutex<()>,
}

impl LoaderLock {
    /// Creates an unlocked loader lock
    #[must_use]
    pub fn new() -> Self {
        LoaderLock {
            inner: ReentrantMutex::new(()),
        }
    }

    /// Acquires the lock, blocking while another thread holds it
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.lock()
    }

    /// Returns true if some thread currently holds the lock
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// A value computed at most once under the loader lock and published to all readers
pub struct Memo<T> {
    cell: OnceLock<T>,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Memo<T> {
    /// Creates an empty memo
    #[must_use]
    pub const fn new() -> Self {
        Memo {
            cell: OnceLock::new(),
        }
    }

    /// The published value, if any
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Returns true once a value has been published
    pub fn is_published(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Publishes `value` unless a value is already present and returns the published value
    pub fn publish(&self, value: T) -> &T {
        self.cell.get_or_init(|| value)
    }

    /// Returns the published value, computing it under `lock` if absent.
    ///
    /// `compute` may re-enter the loader and even publish this very memo; in that case the
    /// first published value wins and the freshly computed one is dropped.
    pub fn get_or_compute<F>(&self, lock: &LoaderLock, compute: F) -> &T
    where
        F: FnOnce() -> T,
    {
        if let Some(value) = self.cell.get() {
            return value;
        }

        let _guard = lock.lock();
        if let Some(value) = self.cell.get() {
            return value;
        }

        let value = compute();
        self.publish(value)
    }

    /// Fallible variant of [`Memo::get_or_compute`]; errors are not memoized
    ///
    /// # Errors
    /// Returns the error produced by `compute`.
    pub fn try_get_or_compute<F, E>(&self, lock: &LoaderLock, compute: F) -> Result<&T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }

        let _guard = lock.lock();
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }

        let value = compute()?;
        Ok(self.publish(value))
    }
}
