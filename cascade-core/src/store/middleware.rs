//! Middleware
//!
//! Middleware intercepts actions on their way to the reducer. Each link
//! receives a [`MiddlewareApi`] and the next dispatch in the chain and returns
//! its own dispatch; the innermost `next` is the raw store dispatch.
//!
//! The API's `dispatch` is a proxy for the fully composed chain. It only
//! starts working once the chain has been built; calling it from inside
//! `wrap` fails, since other middleware would not see that action.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use super::action::Action;
use super::container::{Dispatch, Enhancer, Reducer, Store, StoreCreator};
use crate::error::{Result, StoreError};

type DispatchFn = dyn Fn(Action) -> Result<Action> + Send + Sync;

/// A dispatch-chain interceptor.
pub trait Middleware<S>: Send + Sync {
    /// Build this link of the chain around `next`.
    fn wrap(&self, api: MiddlewareApi<S>, next: Dispatch) -> Dispatch;
}

impl<S, F> Middleware<S> for F
where
    F: Fn(MiddlewareApi<S>, Dispatch) -> Dispatch + Send + Sync,
{
    fn wrap(&self, api: MiddlewareApi<S>, next: Dispatch) -> Dispatch {
        self(api, next)
    }
}

/// What a middleware may touch: state reads and the composed dispatch.
pub struct MiddlewareApi<S> {
    store: Store<S>,
    dispatch: Dispatch,
}

impl<S> Clone for MiddlewareApi<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dispatch: Arc::clone(&self.dispatch),
        }
    }
}

impl<S> MiddlewareApi<S>
where
    S: Send + Sync + 'static,
{
    pub fn get_state(&self) -> Result<Arc<S>> {
        self.store.get_state()
    }

    /// Dispatch through the whole chain, starting at the outermost link.
    pub fn dispatch(&self, action: Action) -> Result<Action> {
        (self.dispatch)(action)
    }
}

/// Build an enhancer that routes `dispatch` through `middlewares`.
///
/// The first middleware is the outermost link.
pub fn apply_middleware<S>(middlewares: Vec<Arc<dyn Middleware<S>>>) -> Enhancer<S>
where
    S: Send + Sync + 'static,
{
    Box::new(move |create: StoreCreator<S>| -> StoreCreator<S> {
        Box::new(move |reducer: Reducer<S>, preloaded: Option<Arc<S>>| {
            let store = create(reducer, preloaded)?;

            // Weak: the composed chain holds the proxy through each api.
            let slot: Arc<RwLock<Option<Weak<DispatchFn>>>> = Arc::new(RwLock::new(None));
            let target = Arc::clone(&slot);
            let proxy: Dispatch = Arc::new(move |action: Action| {
                let composed = target.read().as_ref().map(|weak| weak.upgrade());
                match composed {
                    None => Err(StoreError::Reentrancy(
                        "dispatching while constructing middleware is not allowed; \
                         other middleware would not be applied to this dispatch"
                            .into(),
                    )),
                    Some(None) => Err(StoreError::IllegalState(
                        "the store behind this middleware has been dropped".into(),
                    )),
                    Some(Some(dispatch)) => dispatch(action),
                }
            });

            let api = MiddlewareApi {
                store: store.clone(),
                dispatch: proxy,
            };

            let composed = middlewares
                .iter()
                .rev()
                .fold(store.dispatcher(), |next, middleware| {
                    middleware.wrap(api.clone(), next)
                });

            *slot.write() = Some(Arc::downgrade(&composed));
            debug!(links = middlewares.len(), "middleware chain applied");

            Ok(store.with_dispatch(composed))
        })
    })
}
