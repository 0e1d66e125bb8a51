//! Provider Binding
//!
//! The provider owns the root node of a consumer tree. Its change callback
//! only relays to nested subscriptions, so every top-level consumer hears a
//! dispatch in the order it subscribed.
//!
//! Consumers attach below the provider before the provider is mounted. On
//! [`Provider::mount`] the root subscribes to the store and, if the state
//! moved since the provider was created, replays one notification so those
//! consumers catch up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::subscription::{Subscription, SubscriptionTree};

/// Root binding between a store and the consumers beneath it.
pub struct Provider<S>
where
    S: Send + Sync + 'static,
{
    subscription: Subscription<S>,

    /// State seen at creation. Taken by the first `mount`.
    created_with: Mutex<Option<Arc<S>>>,

    closed: AtomicBool,
}

impl<S> Provider<S>
where
    S: Send + Sync + 'static,
{
    /// Create the root node and remember the current state.
    pub fn new(tree: &SubscriptionTree<S>) -> Result<Self> {
        let created_with = tree.store().get_state()?;
        let subscription = tree.root();
        subscription.set_on_change(Some(subscription.nested_relay()))?;
        debug!(node = subscription.id().raw(), "provider created");

        Ok(Self {
            subscription,
            created_with: Mutex::new(Some(created_with)),
            closed: AtomicBool::new(false),
        })
    }

    /// The node top-level consumers attach under.
    pub fn subscription(&self) -> &Subscription<S> {
        &self.subscription
    }

    /// Subscribe the root and catch nested consumers up with any dispatch
    /// since [`Provider::new`]. Mounting again is a no-op.
    pub fn mount(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::IllegalState("provider has been closed".into()));
        }
        self.subscription.try_subscribe()?;

        let Some(created_with) = self.created_with.lock().take() else {
            return Ok(());
        };
        let current = self.subscription.store().get_state()?;
        if !Arc::ptr_eq(&created_with, &current) {
            debug!(node = self.subscription.id().raw(), "state moved before mount, notifying consumers");
            self.subscription.notify_nested_subs();
        }
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_subscribed()
    }

    /// Unsubscribe from the store and discard the root node. Consumers below
    /// stop hearing dispatches until they resubscribe.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.subscription.remove()?;
        debug!(node = self.subscription.id().raw(), "provider closed");
        Ok(())
    }
}

impl<S> Drop for Provider<S>
where
    S: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(node = self.subscription.id().raw(), error = %err, "provider dropped without closing");
        }
    }
}

impl<S> std::fmt::Debug for Provider<S>
where
    S: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("subscription", &self.subscription)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
