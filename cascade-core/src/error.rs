//! Error types for the Cascade runtime.

use thiserror::Error;

/// Errors raised by the store, the subscription tree and consumers.
///
/// Every variant is a programmer-visible fault: nothing in this crate retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A required piece of construction input is missing or was set twice.
    #[error("configuration error: {0}")]
    Config(String),

    /// The dispatched value is not a plain record or has no `type`.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// The store was re-entered from inside a reducer, or a middleware chain
    /// was used before it finished building.
    #[error("reentrancy error: {0}")]
    Reentrancy(String),

    /// An operation was attempted on a store or node in the wrong state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A reducer rejected the action.
    #[error("reducer failed: {0}")]
    Reducer(String),

    /// A mapping function failed while computing derived props.
    #[error(transparent)]
    Selector(#[from] SelectorError),
}

impl StoreError {
    /// Build a reducer failure. Reducers return this to abort a dispatch.
    pub fn reducer(message: impl Into<String>) -> Self {
        Self::Reducer(message.into())
    }
}

/// Failure of a state mapper, dispatch mapper or merge function.
///
/// Cloneable so the selector can cache it as the outcome for a given input
/// pair and hand it back to the consumer on every read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("selector failed: {message}")]
pub struct SelectorError {
    message: String,
}

impl SelectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
