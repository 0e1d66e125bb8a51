//! Subscription Tree
//!
//! Consumers of the store are nested, and a nested consumer must never react
//! to a state change before its ancestors have. The subscription tree gives
//! that guarantee: only root nodes subscribe to the store; every other node
//! registers with its parent's listener collection and hears about a change
//! only when the parent decides to propagate it.
//!
//! # Ordering
//!
//! A node becomes reachable only after its ancestors have subscribed, and
//! subscription always proceeds root-first. A dispatch therefore runs a
//! parent's change handler to completion, including any synchronous work it
//! does, before the first child handler runs.
//!
//! # Cancellation
//!
//! Unsubscribing during a notification pass does not change the listeners
//! captured for that pass, but it clears the node's change callback, so a
//! late delivery to a detached node does nothing.

mod batch;
mod listeners;
mod node;

pub use batch::{batch, set_batch, Batch};
pub use listeners::{ListenerChain, ListenerCollection, ListenerKey};
pub use node::{NodeId, Subscription, SubscriptionTree};
