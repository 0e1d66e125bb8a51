//! Listener types shared by the store and the subscription tree.
//!
//! A listener is any zero-argument callback that wants to hear about state
//! changes. Both the store's flat listener list and the per-node listener
//! collections hand out an [`Unsubscribe`] handle when a listener is added.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// A zero-argument change callback.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Key of one registration in the store's listener map.
///
/// Registrations are keyed, not callbacks, so adding the same callback twice
/// gives two entries and two independent [`Unsubscribe`] handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Handle returned by every `subscribe`-style call.
///
/// Calling [`Unsubscribe::unsubscribe`] more than once is a no-op. The store's
/// handle refuses to run from inside a reducer and reports that as an error.
pub struct Unsubscribe {
    release: Box<dyn Fn() -> Result<()> + Send + Sync>,
}

impl Unsubscribe {
    pub(crate) fn new<F>(release: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Self {
            release: Box::new(release),
        }
    }

    /// A handle that releases nothing.
    pub fn noop() -> Self {
        Self::new(|| Ok(()))
    }

    /// Release the registration this handle was created for.
    pub fn unsubscribe(&self) -> Result<()> {
        (self.release)()
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Unsubscribe")
    }
}
