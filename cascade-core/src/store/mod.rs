//! State Store
//!
//! The store is the single owner of application state. State only changes by
//! dispatching an action through the reducer; every dispatch is followed by a
//! notification pass over the listeners registered at the time the pass
//! started.
//!
//! # Concepts
//!
//! ## Reducer
//!
//! A pure function from the previous state snapshot and an action to the next
//! snapshot. Returning the same `Arc` signals "nothing changed" to identity
//! based comparisons downstream.
//!
//! ## Enhancer
//!
//! A function that wraps store construction. [`apply_middleware`] is the
//! enhancer that ships with the crate: it rebuilds `dispatch` as a chain of
//! interceptors ending in the raw store dispatch.
//!
//! # Reentrancy
//!
//! While a reducer runs the store is locked against `get_state`, `subscribe`,
//! `dispatch`, `replace_reducer` and unsubscribing. Listeners run after the
//! lock is released and may do any of these.

mod action;
mod container;
mod middleware;

pub use action::{Action, ActionType};
pub use container::{
    compose_enhancers, Dispatch, Enhancer, Reducer, StateWatch, Store, StoreBuilder,
    StoreCreator,
};
pub use middleware::{apply_middleware, Middleware, MiddlewareApi};
