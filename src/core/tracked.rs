//! # Tracked References
//!
//! [`RefCounted`] is shared ownership with an explicit counting contract. The owner
//! holds the first reference; anyone who needs the value to outlive a lock or a
//! frame calls [`RefCounted::track`] and receives a [`TrackedHandle`] whose drop is
//! the matching release. The value is destroyed exactly once, on the thread that
//! performs the final decrement, and an optional disposer receives it by value.
//!
//! ```
//! use voxel_streaming::core::RefCounted;
//!
//! let chunk = RefCounted::new(vec![1u16; 8]);
//! let reader = chunk.track().unwrap();
//!
//! // The owner lets go, the tracked reader still sees the data.
//! chunk.decrement().unwrap();
//! assert_eq!(reader.try_get().map(|blocks| blocks.len()), Some(8));
//!
//! reader.release();
//! assert!(chunk.is_destroyed());
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use thiserror::Error;

/// Misuse of the counting contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    /// The count already reached zero and the value was disposed.
    #[error("tracked value was already destroyed")]
    Destroyed,
}

type Disposer<T> = Box<dyn FnOnce(T) + Send>;

struct Shared<T> {
    count: AtomicUsize,
    value: RwLock<Option<T>>,
    disposer: Mutex<Option<Disposer<T>>>,
}

/// A reference-counted value whose destruction is driven by explicit decrements.
pub struct RefCounted<T: Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
}

/// A counted reference obtained from [`RefCounted::track`]. Dropping it releases
/// the reference.
pub struct TrackedHandle<T: Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
}

/// Read access to a live tracked value.
pub struct TrackedRef<'a, T> {
    guard: RwLockReadGuard<'a, Option<T>>,
}

impl<T: Send + Sync + 'static> RefCounted<T> {
    /// Wraps `value` with a count of one, owned by the caller.
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                count: AtomicUsize::new(1),
                value: RwLock::new(Some(value)),
                disposer: Mutex::new(None),
            }),
        }
    }

    /// Like [`RefCounted::new`], with `disposer` invoked on the value when the
    /// count reaches zero.
    pub fn with_disposer(value: T, disposer: impl FnOnce(T) + Send + 'static) -> Self {
        let counted = Self::new(value);
        *counted
            .shared
            .disposer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(disposer));
        counted
    }

    /// Adds one reference.
    pub fn increment(&self) -> Result<(), HandleError> {
        increment(&self.shared)
    }

    /// Removes one reference, destroying the value when it was the last.
    pub fn decrement(&self) -> Result<(), HandleError> {
        decrement(&self.shared)
    }

    /// Increments and wraps the new reference in a scoped handle.
    pub fn track(&self) -> Result<TrackedHandle<T>, HandleError> {
        increment(&self.shared)?;
        Ok(TrackedHandle {
            shared: self.shared.clone(),
        })
    }

    /// Read access while the value is alive.
    pub fn try_get(&self) -> Option<TrackedRef<'_, T>> {
        try_get(&self.shared)
    }

    /// Current number of references.
    pub fn count(&self) -> usize {
        self.shared.count.load(Ordering::Acquire)
    }

    /// True once the final reference was released.
    pub fn is_destroyed(&self) -> bool {
        self.count() == 0
    }
}

impl<T: Send + Sync + 'static> TrackedHandle<T> {
    /// Read access while the value is alive.
    pub fn try_get(&self) -> Option<TrackedRef<'_, T>> {
        try_get(&self.shared)
    }

    /// Tracks the same value once more.
    pub fn track(&self) -> Result<TrackedHandle<T>, HandleError> {
        increment(&self.shared)?;
        Ok(TrackedHandle {
            shared: self.shared.clone(),
        })
    }

    /// Explicit release; equivalent to dropping the handle.
    pub fn release(self) {}
}

impl<T: Send + Sync + 'static> Drop for TrackedHandle<T> {
    fn drop(&mut self) {
        if let Err(error) = decrement(&self.shared) {
            log::error!("Tracked handle released twice: {error}");
        }
    }
}

impl<T> Deref for TrackedRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.guard.as_ref() {
            Some(value) => value,
            None => unreachable!("tracked reference outlived its value"),
        }
    }
}

fn increment<T>(shared: &Shared<T>) -> Result<(), HandleError> {
    shared
        .count
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            (count > 0).then_some(count + 1)
        })
        .map(|_| ())
        .map_err(|_| HandleError::Destroyed)
}

fn decrement<T>(shared: &Shared<T>) -> Result<(), HandleError> {
    let previous = shared
        .count
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            count.checked_sub(1)
        })
        .map_err(|_| HandleError::Destroyed)?;

    if previous == 1 {
        let value = shared
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let disposer = shared
            .disposer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(value), Some(disposer)) = (value, disposer) {
            disposer(value);
        }
    }
    Ok(())
}

fn try_get<T>(shared: &Shared<T>) -> Option<TrackedRef<'_, T>> {
    let guard = shared.value.read().unwrap_or_else(PoisonError::into_inner);
    guard.is_some().then_some(TrackedRef { guard })
}

#[cfg(test)]
#[path = "tracked_test.rs"]
mod tracked_test;
