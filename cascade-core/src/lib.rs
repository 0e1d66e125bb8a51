//! Cascade Core
//!
//! This crate provides a predictable state container and the plumbing that
//! lets nested consumers react to it in a well-defined order.
//! It implements:
//!
//! - A store holding one immutable state snapshot, changed only by
//!   dispatching actions through a reducer
//! - Store enhancers and a middleware pipeline around dispatch
//! - A subscription tree that delivers change notifications parent-first
//! - A memoizing selector that derives consumer props and reports "no
//!   change" by returning the same `Arc`
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `store`: actions, the store itself, enhancers and middleware
//! - `subscription`: listener collections, the subscription tree and batching
//! - `selector`: memoized props selection and equality helpers
//! - `provider`: the root node a tree of consumers hangs from
//! - `consumer`: binds a selector to a subscription node for a host
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::store::{Action, Store};
//! use std::sync::Arc;
//!
//! let store = Store::new(|state: Option<Arc<i64>>, action: &Action| {
//!     let count = state.map_or(0, |s| *s);
//!     Ok(Arc::new(if action.is("INC") { count + 1 } else { count }))
//! })?;
//!
//! let unsubscribe = store.subscribe(|| println!("state changed"))?;
//! store.dispatch(Action::new("INC"))?;
//! assert_eq!(*store.get_state()?, 1);
//! unsubscribe.unsubscribe()?;
//! ```

pub mod consumer;
pub mod error;
pub mod provider;
pub mod selector;
pub mod store;
pub mod subscriber;
pub mod subscription;

pub use consumer::{Consumer, PropsOutcome};
pub use error::{Result, SelectorError, StoreError};
pub use provider::Provider;
pub use store::{Action, ActionType, Store};
pub use subscriber::{Listener, Unsubscribe};
pub use subscription::{Subscription, SubscriptionTree};
