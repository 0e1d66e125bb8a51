//! Subscription Nodes
//!
//! Nodes live in an arena owned by a [`SubscriptionTree`] and refer to their
//! parent by [`NodeId`]. A node registers upstream exactly once: with the
//! store when it has no parent, otherwise as a listener in its parent's
//! collection. Because a parent must be subscribed before a child can
//! register with it, a dispatch always reaches the parent's change handler
//! first, and the child only runs when the parent propagates.
//!
//! Arena entries are only borrowed long enough to copy out what a call needs.
//! No borrow is held while user callbacks run, so callbacks may freely
//! subscribe, unsubscribe or notify other nodes of the same tree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use super::batch::{self, Batch};
use super::listeners::ListenerCollection;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::subscriber::{Listener, Unsubscribe};

/// Arena key of a subscription node. Never reused, even across trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

struct SubscriptionNode {
    parent: Option<NodeId>,

    /// `None` is the shared no-op collection used while unsubscribed.
    listeners: Option<ListenerCollection>,

    on_change: Option<Listener>,

    /// Releases the single upstream registration. `Some` iff subscribed.
    upstream: Option<Unsubscribe>,
}

impl SubscriptionNode {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            listeners: None,
            on_change: None,
            upstream: None,
        }
    }
}

struct TreeShared<S> {
    store: Store<S>,
    nodes: DashMap<NodeId, SubscriptionNode>,
    batch: Batch,
}

fn removed(id: NodeId) -> StoreError {
    StoreError::IllegalState(format!("subscription node {} has been removed", id.raw()))
}

impl<S> TreeShared<S>
where
    S: Send + Sync + 'static,
{
    fn insert(self: &Arc<Self>, parent: Option<NodeId>) -> Subscription<S> {
        let id = NodeId::next();
        self.nodes.insert(id, SubscriptionNode::new(parent));
        trace!(node = id.raw(), parent = ?parent.map(|p| p.raw()), "subscription node created");

        Subscription {
            shared: Arc::clone(self),
            id,
        }
    }

    /// The callback registered upstream on behalf of `id`.
    fn change_handler(self: &Arc<Self>, id: NodeId) -> Listener {
        let tree = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(tree) = tree.upgrade() {
                tree.handle_change(id);
            }
        })
    }

    fn handle_change(&self, id: NodeId) {
        let on_change = self.nodes.get(&id).and_then(|node| node.on_change.clone());
        if let Some(on_change) = on_change {
            on_change();
        }
    }

    fn try_subscribe(self: &Arc<Self>, id: NodeId) -> Result<()> {
        let parent = {
            let node = self.nodes.get(&id).ok_or_else(|| removed(id))?;
            if node.upstream.is_some() {
                return Ok(());
            }
            node.parent
        };

        let handler = self.change_handler(id);
        let upstream = match parent {
            Some(parent) => self.add_nested_sub(parent, handler)?,
            None => self.store.subscribe_listener(handler)?,
        };

        let Some(mut node) = self.nodes.get_mut(&id) else {
            upstream.unsubscribe()?;
            return Err(removed(id));
        };
        if node.upstream.is_some() {
            drop(node);
            return upstream.unsubscribe();
        }
        node.upstream = Some(upstream);
        node.listeners = Some(ListenerCollection::new());
        drop(node);

        debug!(node = id.raw(), parent = ?parent.map(|p| p.raw()), "subscription attached");
        Ok(())
    }

    fn try_unsubscribe(&self, id: NodeId) -> Result<()> {
        let upstream = {
            let mut node = self.nodes.get_mut(&id).ok_or_else(|| removed(id))?;
            match node.upstream.take() {
                Some(upstream) => upstream,
                None => return Ok(()),
            }
        };

        if let Err(err) = upstream.unsubscribe() {
            if let Some(mut node) = self.nodes.get_mut(&id) {
                node.upstream = Some(upstream);
            }
            return Err(err);
        }

        if let Some(mut node) = self.nodes.get_mut(&id) {
            if let Some(mut listeners) = node.listeners.take() {
                listeners.clear();
            }
            node.on_change = None;
        }
        self.detach_children(id);

        debug!(node = id.raw(), "subscription detached");
        Ok(())
    }

    /// Mark every subscribed descendant of `id` as unsubscribed.
    ///
    /// Their registrations lived in collections that were just cleared, so
    /// the handles are dropped without running. Change callbacks stay so a
    /// later `try_subscribe` reattaches the descendant as it was.
    fn detach_children(&self, id: NodeId) {
        let children: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.parent == Some(id))
            .map(|node| *node.key())
            .collect();

        for child in children {
            let was_subscribed = match self.nodes.get_mut(&child) {
                Some(mut node) => {
                    if let Some(mut listeners) = node.listeners.take() {
                        listeners.clear();
                    }
                    node.upstream.take().is_some()
                }
                None => false,
            };
            if was_subscribed {
                trace!(node = child.raw(), parent = id.raw(), "subscription detached with its parent");
                self.detach_children(child);
            }
        }
    }

    fn add_nested_sub(self: &Arc<Self>, id: NodeId, listener: Listener) -> Result<Unsubscribe> {
        self.try_subscribe(id)?;

        let key = {
            let mut node = self.nodes.get_mut(&id).ok_or_else(|| removed(id))?;
            let listeners = node.listeners.as_mut().ok_or_else(|| {
                StoreError::IllegalState(format!(
                    "subscription node {} lost its subscription while adding a listener",
                    id.raw()
                ))
            })?;
            listeners.subscribe(listener)
        };

        let tree = Arc::downgrade(self);
        Ok(Unsubscribe::new(move || {
            let Some(tree) = tree.upgrade() else {
                return Ok(());
            };
            if let Some(mut node) = tree.nodes.get_mut(&id) {
                if let Some(listeners) = node.listeners.as_mut() {
                    listeners.remove(key);
                }
            }
            Ok(())
        }))
    }

    fn notify_nested_subs(&self, id: NodeId) {
        let chain = match self.nodes.get(&id) {
            Some(node) => node.listeners.as_ref().map(|l| l.chain()).unwrap_or_default(),
            None => return,
        };
        if chain.is_empty() {
            return;
        }

        trace!(node = id.raw(), listeners = chain.len(), "notifying nested subscriptions");
        self.batch.run(&mut || {
            for listener in &chain {
                listener();
            }
        });
    }

    fn remove(&self, id: NodeId) -> Result<()> {
        self.try_unsubscribe(id)?;
        self.nodes.remove(&id);
        trace!(node = id.raw(), "subscription node removed");
        Ok(())
    }
}

/// Arena of subscription nodes sharing one store and one batch function.
pub struct SubscriptionTree<S> {
    shared: Arc<TreeShared<S>>,
}

impl<S> Clone for SubscriptionTree<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> SubscriptionTree<S>
where
    S: Send + Sync + 'static,
{
    /// A tree using the process-wide batch function.
    pub fn new(store: Store<S>) -> Self {
        Self::with_batch(store, batch::batch())
    }

    /// A tree using an injected batch function.
    pub fn with_batch(store: Store<S>, batch: Batch) -> Self {
        Self {
            shared: Arc::new(TreeShared {
                store,
                nodes: DashMap::new(),
                batch,
            }),
        }
    }

    /// Create a node that subscribes directly to the store.
    pub fn root(&self) -> Subscription<S> {
        self.shared.insert(None)
    }

    /// Handle for an existing node.
    pub fn get(&self, id: NodeId) -> Option<Subscription<S>> {
        self.shared.nodes.contains_key(&id).then(|| Subscription {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    pub fn store(&self) -> &Store<S> {
        &self.shared.store
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.shared.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.nodes.is_empty()
    }
}

/// Handle to one node of a [`SubscriptionTree`].
///
/// Cloning the handle does not clone the node.
pub struct Subscription<S> {
    shared: Arc<TreeShared<S>>,
    id: NodeId,
}

impl<S> Clone for Subscription<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            id: self.id,
        }
    }
}

impl<S> Subscription<S>
where
    S: Send + Sync + 'static,
{
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn store(&self) -> &Store<S> {
        &self.shared.store
    }

    /// The tree this node belongs to.
    pub fn tree(&self) -> SubscriptionTree<S> {
        SubscriptionTree {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.shared.nodes.get(&self.id).and_then(|node| node.parent)
    }

    /// Create a node whose upstream is this node.
    pub fn child(&self) -> Result<Subscription<S>> {
        if !self.shared.nodes.contains_key(&self.id) {
            return Err(removed(self.id));
        }
        Ok(self.shared.insert(Some(self.id)))
    }

    /// Register upstream if not already registered, subscribing ancestors
    /// first.
    pub fn try_subscribe(&self) -> Result<()> {
        self.shared.try_subscribe(self.id)
    }

    /// Release the upstream registration, drop nested listeners and the
    /// change callback. Subscribed descendants become unsubscribed too.
    /// No-op when not subscribed.
    pub fn try_unsubscribe(&self) -> Result<()> {
        self.shared.try_unsubscribe(self.id)
    }

    /// Subscribe this node if needed, then add `listener` to its collection.
    pub fn add_nested_sub<F>(&self, listener: F) -> Result<Unsubscribe>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.add_nested_sub(self.id, Arc::new(listener))
    }

    pub fn add_nested_listener(&self, listener: Listener) -> Result<Unsubscribe> {
        self.shared.add_nested_sub(self.id, listener)
    }

    /// Call every nested listener inside the tree's batch.
    pub fn notify_nested_subs(&self) {
        self.shared.notify_nested_subs(self.id)
    }

    /// A listener that forwards to this node's nested listeners. It holds the
    /// tree weakly, so it can be installed as this node's own change callback.
    pub fn nested_relay(&self) -> Listener {
        let tree = Arc::downgrade(&self.shared);
        let id = self.id;
        Arc::new(move || {
            if let Some(tree) = tree.upgrade() {
                tree.notify_nested_subs(id);
            }
        })
    }

    /// Run the change callback, if one is assigned.
    pub fn handle_change(&self) {
        self.shared.handle_change(self.id)
    }

    /// Assign or clear the change callback.
    pub fn set_on_change(&self, on_change: Option<Listener>) -> Result<()> {
        let mut node = self.shared.nodes.get_mut(&self.id).ok_or_else(|| removed(self.id))?;
        node.on_change = on_change;
        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared
            .nodes
            .get(&self.id)
            .map_or(false, |node| node.upstream.is_some())
    }

    /// Number of nested listeners.
    pub fn listener_count(&self) -> usize {
        self.shared
            .nodes
            .get(&self.id)
            .and_then(|node| node.listeners.as_ref().map(|l| l.len()))
            .unwrap_or(0)
    }

    /// Unsubscribe and discard the node.
    pub fn remove(&self) -> Result<()> {
        self.shared.remove(self.id)
    }
}

impl<S> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
