//! Store Implementation
//!
//! # How Dispatch Works
//!
//! 1. The dispatching flag is claimed. If it is already held, a reducer is
//!    trying to dispatch and the call fails.
//!
//! 2. The reducer runs against the current snapshot and its result replaces
//!    it. The flag is released by a guard, so a failing (or panicking)
//!    reducer leaves the store usable.
//!
//! 3. The listener list is snapshotted and every listener in the snapshot is
//!    called in registration order.
//!
//! # Listener Snapshots
//!
//! Listeners live in an `Arc<IndexMap>`. A notification pass clones the
//! `Arc`; `subscribe` and unsubscribe go through `Arc::make_mut`, which copies
//! the map only while a pass still holds the old one. Changes made from inside
//! a listener therefore only affect the next dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::action::{Action, ActionType};
use crate::error::{Result, StoreError};
use crate::subscriber::{Listener, ListenerId, Unsubscribe};

/// Pure state transition. `None` stands for "no state yet" on the first call.
pub type Reducer<S> = Arc<dyn Fn(Option<Arc<S>>, &Action) -> Result<Arc<S>> + Send + Sync>;

/// A dispatch function: the raw store dispatch or a middleware-wrapped one.
pub type Dispatch = Arc<dyn Fn(Action) -> Result<Action> + Send + Sync>;

/// Store constructor as seen by enhancers.
pub type StoreCreator<S> = Box<dyn FnOnce(Reducer<S>, Option<Arc<S>>) -> Result<Store<S>>>;

/// Wraps a store constructor to add behavior without the store knowing.
pub type Enhancer<S> = Box<dyn FnOnce(StoreCreator<S>) -> StoreCreator<S>>;

type ListenerMap = IndexMap<ListenerId, Listener>;

/// Holds the dispatching flag for the lifetime of a reducer call.
struct DispatchGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DispatchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| StoreError::Reentrancy("reducers may not dispatch actions".into()))?;
        Ok(Self { flag })
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct StoreCore<S> {
    reducer: RwLock<Reducer<S>>,
    state: RwLock<Option<Arc<S>>>,
    listeners: Mutex<Arc<ListenerMap>>,
    dispatching: AtomicBool,
}

impl<S> StoreCore<S>
where
    S: Send + Sync + 'static,
{
    fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    fn get_state(&self) -> Result<Arc<S>> {
        if self.is_dispatching() {
            return Err(StoreError::IllegalState(
                "get_state may not be called while the reducer is executing; \
                 the reducer has already received the state as an argument"
                    .into(),
            ));
        }

        self.state
            .read()
            .clone()
            .ok_or_else(|| StoreError::IllegalState("store has not been initialized".into()))
    }

    fn dispatch(&self, action: Action) -> Result<Action> {
        {
            let _guard = DispatchGuard::acquire(&self.dispatching)?;

            let reducer = Arc::clone(&*self.reducer.read());
            let previous = self.state.read().clone();
            let next = reducer(previous, &action).map_err(|err| {
                warn!(action = %action.kind(), error = %err, "reducer failed");
                err
            })?;

            *self.state.write() = Some(next);
        }

        // Snapshot; subscribe/unsubscribe from a listener copy-on-write.
        let listeners = Arc::clone(&*self.listeners.lock());
        trace!(action = %action.kind(), listeners = listeners.len(), "notifying listeners");

        for listener in listeners.values() {
            listener();
        }

        Ok(action)
    }

    fn subscribe(self: &Arc<Self>, listener: Listener) -> Result<Unsubscribe> {
        if self.is_dispatching() {
            return Err(StoreError::Reentrancy(
                "subscribe may not be called while the reducer is executing; \
                 subscribe from a listener and read state there instead"
                    .into(),
            ));
        }

        let id = ListenerId::next();
        Arc::make_mut(&mut *self.listeners.lock()).insert(id, listener);
        debug!(%id, "store listener subscribed");

        let core: Weak<Self> = Arc::downgrade(self);
        let subscribed = AtomicBool::new(true);

        Ok(Unsubscribe::new(move || {
            if !subscribed.load(Ordering::SeqCst) {
                return Ok(());
            }

            let Some(core) = core.upgrade() else {
                subscribed.store(false, Ordering::SeqCst);
                return Ok(());
            };

            if core.is_dispatching() {
                return Err(StoreError::Reentrancy(
                    "may not unsubscribe from a store listener while the reducer is executing"
                        .into(),
                ));
            }

            if subscribed.swap(false, Ordering::SeqCst) {
                Arc::make_mut(&mut *core.listeners.lock()).shift_remove(&id);
                debug!(%id, "store listener unsubscribed");
            }
            Ok(())
        }))
    }

    fn replace_reducer(&self, next: Reducer<S>) -> Result<()> {
        if self.is_dispatching() {
            return Err(StoreError::Reentrancy(
                "the reducer may not be replaced while it is executing".into(),
            ));
        }

        *self.reducer.write() = next;
        debug!("reducer replaced");
        self.dispatch(Action::new(ActionType::REPLACE)).map(|_| ())
    }
}

/// The state container.
///
/// Cloning a store is cheap and yields another handle to the same state.
///
/// # Example
///
/// ```rust,ignore
/// let store = Store::new(|state: Option<Arc<i64>>, action: &Action| {
///     let count = state.map_or(0, |s| *s);
///     Ok(Arc::new(if action.is("INC") { count + 1 } else { count }))
/// })?;
///
/// store.dispatch(Action::new("INC"))?;
/// assert_eq!(*store.get_state()?, 1);
/// ```
pub struct Store<S> {
    core: Arc<StoreCore<S>>,
    dispatch: Dispatch,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            dispatch: Arc::clone(&self.dispatch),
        }
    }
}

impl<S> Store<S>
where
    S: Send + Sync + 'static,
{
    /// Create a store with no preloaded state.
    pub fn new<R>(reducer: R) -> Result<Self>
    where
        R: Fn(Option<Arc<S>>, &Action) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self::create(Arc::new(reducer), None)
    }

    /// Create a store whose reducer sees `state` on the INIT dispatch.
    pub fn with_state<R>(reducer: R, state: S) -> Result<Self>
    where
        R: Fn(Option<Arc<S>>, &Action) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self::create(Arc::new(reducer), Some(Arc::new(state)))
    }

    /// Start building a store with an optional preloaded state and enhancer.
    pub fn builder() -> StoreBuilder<S> {
        StoreBuilder::default()
    }

    /// The base constructor handed to enhancers.
    ///
    /// Runs the INIT dispatch, so the resulting state is
    /// `reducer(preloaded, INIT)`.
    pub fn create(reducer: Reducer<S>, preloaded: Option<Arc<S>>) -> Result<Self> {
        let core = Arc::new(StoreCore {
            reducer: RwLock::new(reducer),
            state: RwLock::new(preloaded),
            listeners: Mutex::new(Arc::new(IndexMap::new())),
            dispatching: AtomicBool::new(false),
        });

        let raw = Arc::clone(&core);
        let dispatch: Dispatch = Arc::new(move |action: Action| raw.dispatch(action));

        core.dispatch(Action::new(ActionType::INIT))?;
        debug!("store created");

        Ok(Self { core, dispatch })
    }

    /// The current state snapshot.
    pub fn get_state(&self) -> Result<Arc<S>> {
        self.core.get_state()
    }

    /// Dispatch an action through the (possibly enhanced) dispatch chain.
    pub fn dispatch(&self, action: Action) -> Result<Action> {
        (self.dispatch)(action)
    }

    /// Validate an untyped value as an action, then dispatch it.
    pub fn dispatch_value(&self, value: Value) -> Result<Action> {
        let action = Action::try_from(value)?;
        self.dispatch(action)
    }

    /// A shareable handle to this store's dispatch chain.
    pub fn dispatcher(&self) -> Dispatch {
        Arc::clone(&self.dispatch)
    }

    /// Register a listener called after every dispatch.
    pub fn subscribe<F>(&self, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.core.subscribe(Arc::new(listener))
    }

    /// Register an already shared listener.
    pub fn subscribe_listener(&self, listener: Listener) -> Result<Unsubscribe> {
        self.core.subscribe(listener)
    }

    /// Swap the reducer and re-derive state with a REPLACE dispatch.
    pub fn replace_reducer<R>(&self, next: R) -> Result<()>
    where
        R: Fn(Option<Arc<S>>, &Action) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        self.core.replace_reducer(Arc::new(next))
    }

    /// Replace the dispatch chain, keeping state, listeners and reducer.
    ///
    /// Enhancers use this to return a store whose `dispatch` is wrapped.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Call `observer` with the current state now and after every dispatch.
    pub fn observe<F>(&self, observer: F) -> Result<Unsubscribe>
    where
        F: Fn(Arc<S>) + Send + Sync + 'static,
    {
        observer(self.get_state()?);

        let core = Arc::downgrade(&self.core);
        self.subscribe(move || {
            if let Some(state) = core.upgrade().and_then(|core| core.get_state().ok()) {
                observer(state);
            }
        })
    }

    /// Expose state changes as a `tokio` watch channel.
    pub fn watch(&self) -> Result<StateWatch<S>> {
        let (sender, receiver) = watch::channel(self.get_state()?);

        let core = Arc::downgrade(&self.core);
        let unsubscribe = self.subscribe(move || {
            if let Some(state) = core.upgrade().and_then(|core| core.get_state().ok()) {
                sender.send_replace(state);
            }
        })?;

        Ok(StateWatch {
            receiver,
            unsubscribe,
        })
    }

    /// Whether a reducer is currently executing.
    pub fn is_dispatching(&self) -> bool {
        self.core.is_dispatching()
    }

    /// Number of listeners registered directly with the store.
    pub fn listener_count(&self) -> usize {
        self.core.listeners.lock().len()
    }
}

impl<S> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("listener_count", &self.core.listeners.lock().len())
            .field("dispatching", &self.core.dispatching.load(Ordering::SeqCst))
            .finish()
    }
}

/// A state stream backed by a store subscription.
pub struct StateWatch<S> {
    receiver: watch::Receiver<Arc<S>>,
    unsubscribe: Unsubscribe,
}

impl<S> StateWatch<S> {
    /// The most recently published snapshot.
    pub fn current(&self) -> Arc<S> {
        Arc::clone(&*self.receiver.borrow())
    }

    /// Another receiver on the same stream.
    pub fn receiver(&self) -> watch::Receiver<Arc<S>> {
        self.receiver.clone()
    }

    /// Wait for the next published snapshot. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Arc<S>> {
        self.receiver.changed().await.ok()?;
        Some(Arc::clone(&*self.receiver.borrow_and_update()))
    }

    /// Stop publishing.
    pub fn unsubscribe(&self) -> Result<()> {
        self.unsubscribe.unsubscribe()
    }
}

/// Builder for stores that need preloaded state or an enhancer.
pub struct StoreBuilder<S> {
    reducer: Option<Reducer<S>>,
    preloaded_state: Option<Arc<S>>,
    enhancer: Option<Enhancer<S>>,
}

impl<S> Default for StoreBuilder<S> {
    fn default() -> Self {
        Self {
            reducer: None,
            preloaded_state: None,
            enhancer: None,
        }
    }
}

impl<S> StoreBuilder<S>
where
    S: Send + Sync + 'static,
{
    pub fn reducer<R>(mut self, reducer: R) -> Self
    where
        R: Fn(Option<Arc<S>>, &Action) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    pub fn preloaded_state(mut self, state: S) -> Self {
        self.preloaded_state = Some(Arc::new(state));
        self
    }

    pub fn enhancer(mut self, enhancer: Enhancer<S>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Construct the store, delegating to the enhancer when one is set.
    pub fn build(self) -> Result<Store<S>> {
        let reducer = self
            .reducer
            .ok_or_else(|| StoreError::Config("expected the reducer to be set".into()))?;

        match self.enhancer {
            Some(enhancer) => enhancer(Box::new(Store::create))(reducer, self.preloaded_state),
            None => Store::create(reducer, self.preloaded_state),
        }
    }
}

/// Compose enhancers right to left: the first one ends up outermost.
pub fn compose_enhancers<S>(enhancers: Vec<Enhancer<S>>) -> Enhancer<S>
where
    S: Send + Sync + 'static,
{
    Box::new(move |create: StoreCreator<S>| {
        enhancers
            .into_iter()
            .rev()
            .fold(create, |create, enhancer| enhancer(create))
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
