//! Consumer Binding
//!
//! A consumer ties a [`PropsSelector`] to a node of the subscription tree and
//! tells its host when the selected props change. Rendering belongs to the
//! host: it is told about new props through `on_update` and reports back with
//! [`Consumer::commit`] once it has applied them.
//!
//! # How Updates Flow
//!
//! 1. A dispatch reaches the consumer's node and runs the update check.
//!
//! 2. The check reselects. If the props are the same `Arc` as before (or the
//!    same error), nothing is re-rendered and the change is passed straight
//!    on to nested consumers.
//!
//! 3. Otherwise the new props are stored, an update is marked pending and
//!    `on_update` runs. Nested consumers stay quiet.
//!
//! 4. On `commit`, nested consumers are notified, so they only ever select
//!    against props their ancestor has already applied.
//!
//! A store update that arrives while an update is already pending replaces
//! the pending props and calls `on_update` again. `commit` still notifies
//! nested consumers once.
//!
//! A mapper may dispatch. The update check that dispatch triggers finds the
//! selector busy and leaves a recheck flag, and the running pass selects
//! again against the newer state before reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Result, SelectorError, StoreError};
use crate::selector::PropsSelector;
use crate::subscription::Subscription;

/// Props selected for a consumer, or the selector failure that replaced them.
pub type PropsOutcome<MP> = std::result::Result<Arc<MP>, SelectorError>;

type UpdateFn<MP> = dyn Fn(&PropsOutcome<MP>) + Send + Sync;

fn same_outcome<MP>(a: &PropsOutcome<MP>, b: &PropsOutcome<MP>) -> bool {
    match (a, b) {
        (Ok(a), Ok(b)) => Arc::ptr_eq(a, b),
        (Err(a), Err(b)) => a == b,
        _ => false,
    }
}

/// Result of one reselection pass.
enum Reselect<MP> {
    Unchanged,
    Changed(PropsOutcome<MP>),

    /// Another pass holds the selector and will pick up the new inputs.
    Deferred,
}

struct ConsumerInner<S, OP, MP> {
    subscription: Subscription<S>,
    selector: Mutex<Box<dyn PropsSelector<S, OP, MP>>>,
    own_props: Mutex<Arc<OP>>,
    last: Mutex<PropsOutcome<MP>>,

    /// `on_update` ran and the host has not committed yet.
    render_pending: AtomicBool,

    /// The pending props came from a store update.
    from_store: AtomicBool,

    /// Inputs changed while a pass held the selector.
    recheck: AtomicBool,

    /// `false` for consumers attached with [`Consumer::attach_static`]. They
    /// borrow their context node instead of owning one.
    handles_state_changes: bool,

    detached: AtomicBool,
    on_update: Arc<UpdateFn<MP>>,
}

impl<S, OP, MP> ConsumerInner<S, OP, MP>
where
    S: Send + Sync + 'static,
    OP: Send + Sync + 'static,
    MP: Send + Sync + 'static,
{
    /// Reselect until the inputs stop moving and store the result.
    ///
    /// `recheck` is raised before trying the selector lock and cleared by the
    /// holder before it reads state, so a pass that loses the race always
    /// leaves work the holder will see.
    fn reselect(&self) -> Reselect<MP> {
        let mut changed = None;
        loop {
            self.recheck.store(true, Ordering::SeqCst);
            let Some(mut selector) = self.selector.try_lock() else {
                debug!(node = self.subscription.id().raw(), "selector busy, update check deferred");
                return match changed {
                    Some(next) => Reselect::Changed(next),
                    None => Reselect::Deferred,
                };
            };
            self.recheck.store(false, Ordering::SeqCst);

            let state = match self.subscription.store().get_state() {
                Ok(state) => state,
                Err(err) => {
                    warn!(node = self.subscription.id().raw(), error = %err, "cannot read state for update check");
                    break;
                }
            };
            let own_props = Arc::clone(&*self.own_props.lock());
            let next = selector.select(state, own_props);

            let mut last = self.last.lock();
            if !same_outcome(&*last, &next) {
                *last = next.clone();
                changed = Some(next);
            }
            drop(last);
            drop(selector);

            if !self.recheck.load(Ordering::SeqCst) {
                break;
            }
            trace!(node = self.subscription.id().raw(), "inputs moved during selection, reselecting");
        }

        match changed {
            Some(next) => Reselect::Changed(next),
            None => Reselect::Unchanged,
        }
    }

    fn check_for_updates(&self) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }

        match self.reselect() {
            Reselect::Deferred => {}
            Reselect::Unchanged => {
                if self.handles_state_changes && !self.render_pending.load(Ordering::SeqCst) {
                    self.subscription.notify_nested_subs();
                }
            }
            Reselect::Changed(next) => {
                self.render_pending.store(true, Ordering::SeqCst);
                self.from_store.store(self.handles_state_changes, Ordering::SeqCst);
                trace!(node = self.subscription.id().raw(), "consumer props changed");
                (self.on_update)(&next);
            }
        }
    }

    fn release_node(&self) -> Result<()> {
        if self.handles_state_changes {
            self.subscription.remove()
        } else {
            Ok(())
        }
    }
}

/// A subscribed consumer of derived props.
pub struct Consumer<S, OP, MP>
where
    S: Send + Sync + 'static,
    OP: Send + Sync + 'static,
    MP: Send + Sync + 'static,
{
    inner: Arc<ConsumerInner<S, OP, MP>>,
}

impl<S, OP, MP> Consumer<S, OP, MP>
where
    S: Send + Sync + 'static,
    OP: Send + Sync + 'static,
    MP: Send + Sync + 'static,
{
    fn build<P, F>(
        subscription: Subscription<S>,
        selector: P,
        own_props: OP,
        on_update: F,
        handles_state_changes: bool,
    ) -> Result<Arc<ConsumerInner<S, OP, MP>>>
    where
        P: PropsSelector<S, OP, MP> + 'static,
        F: Fn(&PropsOutcome<MP>) + Send + Sync + 'static,
    {
        let own_props = Arc::new(own_props);
        let mut selector: Box<dyn PropsSelector<S, OP, MP>> = Box::new(selector);
        let initial = selector.select(subscription.store().get_state()?, Arc::clone(&own_props));

        Ok(Arc::new(ConsumerInner {
            subscription,
            selector: Mutex::new(selector),
            own_props: Mutex::new(own_props),
            last: Mutex::new(initial),
            render_pending: AtomicBool::new(false),
            from_store: AtomicBool::new(false),
            recheck: AtomicBool::new(false),
            handles_state_changes,
            detached: AtomicBool::new(false),
            on_update: Arc::new(on_update),
        }))
    }

    /// Select initial props, subscribe `subscription`, and catch up with any
    /// change made before the subscription was in place.
    ///
    /// `on_update` is not called for the initial props.
    pub fn attach<P, F>(subscription: Subscription<S>, selector: P, own_props: OP, on_update: F) -> Result<Self>
    where
        P: PropsSelector<S, OP, MP> + 'static,
        F: Fn(&PropsOutcome<MP>) + Send + Sync + 'static,
    {
        let inner = Self::build(subscription.clone(), selector, own_props, on_update, true)?;

        let weak = Arc::downgrade(&inner);
        subscription.set_on_change(Some(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.check_for_updates();
            }
        })))?;
        subscription.try_subscribe()?;
        debug!(node = subscription.id().raw(), "consumer attached");

        inner.check_for_updates();
        Ok(Self { inner })
    }

    /// Select initial props without ever listening to the store.
    ///
    /// For consumers whose props do not depend on state. Props change only
    /// through [`Consumer::set_own_props`]. `context` is left untouched and is
    /// handed on by [`Consumer::subscription`], so nested consumers attach to
    /// the nearest ancestor that does listen.
    pub fn attach_static<P, F>(context: Subscription<S>, selector: P, own_props: OP, on_update: F) -> Result<Self>
    where
        P: PropsSelector<S, OP, MP> + 'static,
        F: Fn(&PropsOutcome<MP>) + Send + Sync + 'static,
    {
        let inner = Self::build(context, selector, own_props, on_update, false)?;
        debug!(context = inner.subscription.id().raw(), "static consumer attached");
        Ok(Self { inner })
    }

    /// The node nested consumers should be created under. For a static
    /// consumer this is the context it was attached with.
    pub fn subscription(&self) -> &Subscription<S> {
        &self.inner.subscription
    }

    /// The most recently selected props.
    pub fn props(&self) -> PropsOutcome<MP> {
        self.inner.last.lock().clone()
    }

    pub fn own_props(&self) -> Arc<OP> {
        Arc::clone(&*self.inner.own_props.lock())
    }

    pub fn is_pending(&self) -> bool {
        self.inner.render_pending.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Run an update check now, as a store notification would. A static
    /// consumer never passes the check on to nested consumers.
    pub fn check_for_updates(&self) {
        self.inner.check_for_updates()
    }

    /// The host applied the pending props.
    pub fn commit(&self) {
        if !self.inner.render_pending.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.inner.from_store.swap(false, Ordering::SeqCst) && !self.is_detached() {
            self.inner.subscription.notify_nested_subs();
        }
    }

    /// Replace the own props and reselect. The resulting update does not
    /// notify nested consumers when committed.
    pub fn set_own_props(&self, own_props: OP) -> Result<()> {
        if self.is_detached() {
            return Err(StoreError::IllegalState("consumer has been detached".into()));
        }

        *self.inner.own_props.lock() = Arc::new(own_props);
        if let Reselect::Changed(next) = self.inner.reselect() {
            self.inner.render_pending.store(true, Ordering::SeqCst);
            (self.inner.on_update)(&next);
        }
        Ok(())
    }

    /// Stop receiving updates and remove the subscription node, unless the
    /// consumer is static. Returns the last selector failure, if the props
    /// ended in one.
    pub fn detach(&self) -> Result<()> {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.release_node()?;
        debug!(node = self.inner.subscription.id().raw(), "consumer detached");

        match &*self.inner.last.lock() {
            Ok(_) => Ok(()),
            Err(err) => Err(StoreError::Selector(err.clone())),
        }
    }
}

impl<S, OP, MP> Drop for Consumer<S, OP, MP>
where
    S: Send + Sync + 'static,
    OP: Send + Sync + 'static,
    MP: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.inner.release_node() {
            warn!(node = self.inner.subscription.id().raw(), error = %err, "consumer dropped without detaching");
        }
    }
}

impl<S, OP, MP> std::fmt::Debug for Consumer<S, OP, MP>
where
    S: Send + Sync + 'static,
    OP: Send + Sync + 'static,
    MP: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("subscription", &self.inner.subscription)
            .field("pending", &self.is_pending())
            .field("detached", &self.is_detached())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
