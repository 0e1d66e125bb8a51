//! Memoized Props Selector
//!
//! A selector turns `(state, own_props)` into merged props in three steps:
//! map state to props, map dispatch to props, then merge both with the own
//! props.
//!
//! # How Pure Selection Works
//!
//! 1. The first call runs all three steps and caches every intermediate.
//!
//! 2. Later calls compare the new state and own props against the cached
//!    ones and redo only the steps that can have changed:
//!
//!    - both changed: remap state, remap dispatch if it reads own props, merge
//!    - own props changed: remap whichever mappers read own props, merge
//!    - state changed: remap state, and merge only if the state props differ
//!      under the state props comparator
//!    - nothing changed: return the cached merged props
//!
//! 3. Whenever the merge step is skipped, the caller gets back the very same
//!    `Arc`, so downstream code can detect "no change" by pointer identity.
//!
//! A failing mapper is cached as the outcome for its inputs. Repeating the
//! same inputs returns the same error; any change recomputes from scratch.
//!
//! Impure selectors skip all of this and recompute on every call.

use std::sync::Arc;

use tracing::{debug, trace};

use super::equality::{shallow_equal, strict_equal, Equality, ShallowEq};
use crate::error::SelectorError;
use crate::store::Dispatch;

type SelectorResult<T> = std::result::Result<T, SelectorError>;

/// The seam consumers select through.
pub trait PropsSelector<S, OP, MP>: Send {
    fn select(&mut self, state: Arc<S>, own_props: Arc<OP>) -> SelectorResult<Arc<MP>>;
}

impl<S, OP, MP, F> PropsSelector<S, OP, MP> for F
where
    F: FnMut(Arc<S>, Arc<OP>) -> SelectorResult<Arc<MP>> + Send,
{
    fn select(&mut self, state: Arc<S>, own_props: Arc<OP>) -> SelectorResult<Arc<MP>> {
        self(state, own_props)
    }
}

type MapStateFn<S, OP, SP> = dyn Fn(&S, &OP) -> SelectorResult<SP> + Send + Sync;
type MapDispatchFn<OP, DP> = dyn Fn(&Dispatch, &OP) -> SelectorResult<DP> + Send + Sync;
type MergeFn<SP, DP, OP, MP> = dyn Fn(&SP, &DP, &OP) -> SelectorResult<MP> + Send + Sync;

/// Maps the store state to state props.
pub struct MapStateToProps<S, OP, SP> {
    map: Arc<MapStateFn<S, OP, SP>>,
    depends_on_own_props: bool,
}

impl<S, OP, SP> MapStateToProps<S, OP, SP>
where
    S: 'static,
    OP: 'static,
    SP: 'static,
{
    /// A mapper that reads state only.
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&S) -> SelectorResult<SP> + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(move |state: &S, _: &OP| map(state)),
            depends_on_own_props: false,
        }
    }

    /// A mapper that also reads own props, and reruns when they change.
    pub fn with_own_props<F>(map: F) -> Self
    where
        F: Fn(&S, &OP) -> SelectorResult<SP> + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(map),
            depends_on_own_props: true,
        }
    }

    pub fn depends_on_own_props(&self) -> bool {
        self.depends_on_own_props
    }
}

impl<S, OP, SP> Clone for MapStateToProps<S, OP, SP> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
            depends_on_own_props: self.depends_on_own_props,
        }
    }
}

/// Maps the store's dispatch function to dispatch props.
pub struct MapDispatchToProps<OP, DP> {
    map: Arc<MapDispatchFn<OP, DP>>,
    depends_on_own_props: bool,
}

impl<OP, DP> MapDispatchToProps<OP, DP>
where
    OP: 'static,
    DP: 'static,
{
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&Dispatch) -> SelectorResult<DP> + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(move |dispatch: &Dispatch, _: &OP| map(dispatch)),
            depends_on_own_props: false,
        }
    }

    pub fn with_own_props<F>(map: F) -> Self
    where
        F: Fn(&Dispatch, &OP) -> SelectorResult<DP> + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(map),
            depends_on_own_props: true,
        }
    }

    pub fn depends_on_own_props(&self) -> bool {
        self.depends_on_own_props
    }
}

impl<OP: 'static> MapDispatchToProps<OP, Dispatch> {
    /// Hand the dispatch function itself through as the dispatch props.
    pub fn passthrough() -> Self {
        Self::new(|dispatch: &Dispatch| Ok(Arc::clone(dispatch)))
    }
}

impl<OP, DP> Clone for MapDispatchToProps<OP, DP> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
            depends_on_own_props: self.depends_on_own_props,
        }
    }
}

/// Combines state props, dispatch props and own props.
pub struct MergeProps<SP, DP, OP, MP> {
    merge: Arc<MergeFn<SP, DP, OP, MP>>,
}

impl<SP, DP, OP, MP> MergeProps<SP, DP, OP, MP> {
    pub fn new<F>(merge: F) -> Self
    where
        F: Fn(&SP, &DP, &OP) -> SelectorResult<MP> + Send + Sync + 'static,
    {
        Self {
            merge: Arc::new(merge),
        }
    }
}

type JsonProps = serde_json::Map<String, serde_json::Value>;

impl<DP, OP> MergeProps<JsonProps, DP, OP, JsonProps>
where
    DP: 'static,
    OP: serde::Serialize + 'static,
{
    /// Own props overlaid with state props. Dispatch props are not data and
    /// are left out. Own props that do not serialize to an object contribute
    /// nothing.
    pub fn overlay() -> Self {
        Self::new(|state_props, _dispatch_props, own_props: &OP| {
            let mut merged = match serde_json::to_value(own_props) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => serde_json::Map::new(),
                Err(err) => return Err(SelectorError::new(err.to_string())),
            };
            for (key, value) in state_props {
                merged.insert(key.clone(), value.clone());
            }
            Ok(merged)
        })
    }
}

impl<SP, DP, OP, MP> Clone for MergeProps<SP, DP, OP, MP> {
    fn clone(&self) -> Self {
        Self {
            merge: Arc::clone(&self.merge),
        }
    }
}

/// Memoization switches and comparators.
pub struct SelectorOptions<S, OP, SP> {
    pub pure: bool,
    pub are_states_equal: Equality<S>,
    pub are_own_props_equal: Equality<OP>,
    pub are_state_props_equal: Equality<SP>,
}

impl<S, OP, SP> SelectorOptions<S, OP, SP>
where
    S: Send + Sync + 'static,
    OP: Send + Sync + 'static,
    SP: Send + Sync + 'static,
{
    /// Pure, with identity comparison everywhere. For props types that do
    /// not implement [`ShallowEq`].
    pub fn strict() -> Self {
        Self {
            pure: true,
            are_states_equal: strict_equal(),
            are_own_props_equal: strict_equal(),
            are_state_props_equal: strict_equal(),
        }
    }

    pub fn with_pure(mut self, pure: bool) -> Self {
        self.pure = pure;
        self
    }

    pub fn with_states_equal<F>(mut self, eq: F) -> Self
    where
        F: Fn(&Arc<S>, &Arc<S>) -> bool + Send + Sync + 'static,
    {
        self.are_states_equal = Arc::new(eq);
        self
    }

    pub fn with_own_props_equal<F>(mut self, eq: F) -> Self
    where
        F: Fn(&Arc<OP>, &Arc<OP>) -> bool + Send + Sync + 'static,
    {
        self.are_own_props_equal = Arc::new(eq);
        self
    }

    pub fn with_state_props_equal<F>(mut self, eq: F) -> Self
    where
        F: Fn(&Arc<SP>, &Arc<SP>) -> bool + Send + Sync + 'static,
    {
        self.are_state_props_equal = Arc::new(eq);
        self
    }
}

impl<S, OP, SP> Default for SelectorOptions<S, OP, SP>
where
    S: Send + Sync + 'static,
    OP: ShallowEq + Send + Sync + 'static,
    SP: ShallowEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            pure: true,
            are_states_equal: strict_equal(),
            are_own_props_equal: shallow_equal(),
            are_state_props_equal: shallow_equal(),
        }
    }
}

impl<S, OP, SP> Clone for SelectorOptions<S, OP, SP> {
    fn clone(&self) -> Self {
        Self {
            pure: self.pure,
            are_states_equal: Arc::clone(&self.are_states_equal),
            are_own_props_equal: Arc::clone(&self.are_own_props_equal),
            are_state_props_equal: Arc::clone(&self.are_state_props_equal),
        }
    }
}

struct Mappers<S, OP, SP, DP, MP> {
    dispatch: Dispatch,
    map_state: MapStateToProps<S, OP, SP>,
    map_dispatch: MapDispatchToProps<OP, DP>,
    merge: MergeProps<SP, DP, OP, MP>,
}

impl<S, OP, SP, DP, MP> Mappers<S, OP, SP, DP, MP> {
    fn state_props(&self, state: &S, own_props: &OP) -> SelectorResult<Arc<SP>> {
        (self.map_state.map)(state, own_props).map(Arc::new)
    }

    fn dispatch_props(&self, own_props: &OP) -> SelectorResult<Arc<DP>> {
        (self.map_dispatch.map)(&self.dispatch, own_props).map(Arc::new)
    }

    fn merged(&self, state_props: &SP, dispatch_props: &DP, own_props: &OP) -> SelectorResult<Arc<MP>> {
        (self.merge.merge)(state_props, dispatch_props, own_props).map(Arc::new)
    }

    fn compute(&self, state: &S, own_props: &OP) -> Outcome<SP, DP, MP> {
        let computed = (|| -> SelectorResult<(Arc<SP>, Arc<DP>, Arc<MP>)> {
            let state_props = self.state_props(state, own_props)?;
            let dispatch_props = self.dispatch_props(own_props)?;
            let merged = self.merged(&state_props, &dispatch_props, own_props)?;
            Ok((state_props, dispatch_props, merged))
        })();
        Outcome::from(computed)
    }
}

enum Outcome<SP, DP, MP> {
    Ready {
        state_props: Arc<SP>,
        dispatch_props: Arc<DP>,
        merged: Arc<MP>,
    },
    Failed(SelectorError),
}

impl<SP, DP, MP> Outcome<SP, DP, MP> {
    fn result(&self) -> SelectorResult<Arc<MP>> {
        match self {
            Outcome::Ready { merged, .. } => Ok(Arc::clone(merged)),
            Outcome::Failed(err) => Err(err.clone()),
        }
    }
}

impl<SP, DP, MP> From<SelectorResult<(Arc<SP>, Arc<DP>, Arc<MP>)>> for Outcome<SP, DP, MP> {
    fn from(result: SelectorResult<(Arc<SP>, Arc<DP>, Arc<MP>)>) -> Self {
        match result {
            Ok((state_props, dispatch_props, merged)) => Outcome::Ready {
                state_props,
                dispatch_props,
                merged,
            },
            Err(err) => Outcome::Failed(err),
        }
    }
}

struct Cache<S, OP, SP, DP, MP> {
    state: Arc<S>,
    own_props: Arc<OP>,
    outcome: Outcome<SP, DP, MP>,
}

/// Derives merged props from state and own props.
pub struct Selector<S, OP, SP, DP, MP> {
    mappers: Mappers<S, OP, SP, DP, MP>,
    options: SelectorOptions<S, OP, SP>,
    cache: Option<Cache<S, OP, SP, DP, MP>>,
}

impl<S, OP, SP, DP, MP> Selector<S, OP, SP, DP, MP> {
    pub fn new(
        dispatch: Dispatch,
        map_state: MapStateToProps<S, OP, SP>,
        map_dispatch: MapDispatchToProps<OP, DP>,
        merge: MergeProps<SP, DP, OP, MP>,
        options: SelectorOptions<S, OP, SP>,
    ) -> Self {
        Self {
            mappers: Mappers {
                dispatch,
                map_state,
                map_dispatch,
                merge,
            },
            options,
            cache: None,
        }
    }

    pub fn is_pure(&self) -> bool {
        self.options.pure
    }

    /// True once a pure selector has run at least once.
    pub fn has_run(&self) -> bool {
        self.cache.is_some()
    }

    /// Select merged props for `state` and `own_props`.
    pub fn select(&mut self, state: Arc<S>, own_props: Arc<OP>) -> SelectorResult<Arc<MP>> {
        if !self.options.pure {
            return self.mappers.compute(&state, &own_props).result();
        }

        let Some(cache) = self.cache.as_mut() else {
            let outcome = self.mappers.compute(&state, &own_props);
            let result = outcome.result();
            self.cache = Some(Cache {
                state,
                own_props,
                outcome,
            });
            return result;
        };

        let props_changed = !(self.options.are_own_props_equal)(&own_props, &cache.own_props);
        let state_changed = !(self.options.are_states_equal)(&state, &cache.state);
        cache.state = state;
        cache.own_props = own_props;

        if !props_changed && !state_changed {
            return cache.outcome.result();
        }

        let previous = match &cache.outcome {
            Outcome::Ready {
                state_props,
                dispatch_props,
                merged,
            } => Some((
                Arc::clone(state_props),
                Arc::clone(dispatch_props),
                Arc::clone(merged),
            )),
            Outcome::Failed(_) => None,
        };
        let Some((state_props, dispatch_props, merged)) = previous else {
            trace!("recomputing selector after a failed pass");
            cache.outcome = self.mappers.compute(&cache.state, &cache.own_props);
            return cache.outcome.result();
        };

        let mappers = &self.mappers;
        let state = &*cache.state;
        let own_props = &*cache.own_props;
        let updated = (|| -> SelectorResult<(Arc<SP>, Arc<DP>, Arc<MP>)> {
            if props_changed && state_changed {
                let state_props = mappers.state_props(state, own_props)?;
                let dispatch_props = if mappers.map_dispatch.depends_on_own_props {
                    mappers.dispatch_props(own_props)?
                } else {
                    dispatch_props
                };
                let merged = mappers.merged(&state_props, &dispatch_props, own_props)?;
                Ok((state_props, dispatch_props, merged))
            } else if props_changed {
                let state_props = if mappers.map_state.depends_on_own_props {
                    mappers.state_props(state, own_props)?
                } else {
                    state_props
                };
                let dispatch_props = if mappers.map_dispatch.depends_on_own_props {
                    mappers.dispatch_props(own_props)?
                } else {
                    dispatch_props
                };
                let merged = mappers.merged(&state_props, &dispatch_props, own_props)?;
                Ok((state_props, dispatch_props, merged))
            } else {
                let next_state_props = mappers.state_props(state, own_props)?;
                let changed = !(self.options.are_state_props_equal)(&next_state_props, &state_props);
                let merged = if changed {
                    mappers.merged(&next_state_props, &dispatch_props, own_props)?
                } else {
                    debug!("state props unchanged, keeping merged props");
                    merged
                };
                Ok((next_state_props, dispatch_props, merged))
            }
        })();

        cache.outcome = Outcome::from(updated);
        cache.outcome.result()
    }
}

impl<S, OP, SP, DP, MP> PropsSelector<S, OP, MP> for Selector<S, OP, SP, DP, MP>
where
    Self: Send,
{
    fn select(&mut self, state: Arc<S>, own_props: Arc<OP>) -> SelectorResult<Arc<MP>> {
        Selector::select(self, state, own_props)
    }
}

impl<S, OP, SP, DP, MP> std::fmt::Debug for Selector<S, OP, SP, DP, MP> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("pure", &self.options.pure)
            .field("has_run", &self.cache.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
