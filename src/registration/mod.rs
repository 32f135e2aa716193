//! Cancellable registrations.
//!
//! Every subscribe-style operation in the broker returns a [`Registration`].
//! Cancelling is idempotent: the first successful cancel reports `true`,
//! every later call reports `false` without touching the registration table
//! again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type CancelFn = Box<dyn FnOnce() -> bool + Send>;

/// Handle to a live subscription.
///
/// Dropping a registration does not cancel it; the subscription stays
/// alive until [`Registration::cancel`] is called.
pub struct Registration {
    cancel: Mutex<Option<CancelFn>>,
}

impl Registration {
    /// Wraps a cancel action. The action runs at most once.
    pub fn new(cancel: impl FnOnce() -> bool + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A registration with nothing to cancel.
    pub fn noop() -> Self {
        Self::new(|| false)
    }

    /// Combines registrations into one.
    ///
    /// Cancelling the result cancels every part, and reports success only
    /// if every part reported success.
    pub fn all(parts: impl IntoIterator<Item = Registration>) -> Self {
        let parts: Vec<Registration> = parts.into_iter().collect();
        Self::new(move || {
            parts
                .iter()
                .map(Registration::cancel)
                .fold(true, |all, cancelled| all && cancelled)
        })
    }

    /// Cancels the subscription.
    ///
    /// Returns whether this call actually removed something.
    pub fn cancel(&self) -> bool {
        let action = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match action {
            Some(action) => action(),
            None => false,
        }
    }

    /// Whether `cancel` has already been called on this handle.
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type Entries<T> = RwLock<Vec<(u64, Arc<T>)>>;

/// Ordered list of subscribers, each removable through its [`Registration`].
pub struct Subscribers<T: ?Sized> {
    entries: Arc<Entries<T>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + Send + Sync + 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Adds a subscriber. Cancelling the registration removes it again.
    pub fn add(&self, subscriber: Arc<T>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));

        let entries = Arc::downgrade(&self.entries);
        Registration::new(move || {
            let Some(entries) = entries.upgrade() else {
                return false;
            };
            let mut entries = entries.write().unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            entries.len() != before
        })
    }

    /// The current subscribers, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}
