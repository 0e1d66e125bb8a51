//! Selector Memoizer
//!
//! Derives a consumer's props from the store state and the consumer's own
//! props, recomputing only what a change can actually affect and handing back
//! the previous `Arc` when nothing observable changed.

mod equality;
mod memo;

pub use equality::{shallow_equal, strict_equal, Equality, PropValue, ShallowEq};
pub use memo::{
    MapDispatchToProps, MapStateToProps, MergeProps, PropsSelector, Selector, SelectorOptions,
};
