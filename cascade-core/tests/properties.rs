//! Property-based tests for the store and listener collection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use cascade_core::selector::{MapDispatchToProps, MapStateToProps, MergeProps, Selector, SelectorOptions};
use cascade_core::store::{Action, Dispatch, Store};
use cascade_core::subscription::{ListenerCollection, ListenerKey};

fn apply(count: i64, action: &Action) -> i64 {
    match action.name() {
        Some("INC") => count + 1,
        Some("DEC") => count - 1,
        Some("ADD") => count + action.get("by").and_then(Value::as_i64).unwrap_or(0),
        _ => count,
    }
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::new("INC")),
        Just(Action::new("DEC")),
        (-100i64..100).prop_map(|by| Action::new("ADD").with("by", json!(by))),
        "[a-z]{1,8}".prop_map(Action::new),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Subscribe,
    Remove(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Subscribe), (0usize..16).prop_map(Op::Remove)]
}

proptest! {
    /// State after every dispatch equals the reducer folded over the actions.
    #[test]
    fn state_is_fold_of_reducer(actions in prop::collection::vec(action_strategy(), 0..40)) {
        let store = Store::new(|state: Option<Arc<i64>>, action: &Action| {
            Ok(Arc::new(apply(state.as_deref().copied().unwrap_or(0), action)))
        })
        .unwrap();

        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        store
            .subscribe(move || {
                notified_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let mut expected = 0;
        for action in &actions {
            expected = apply(expected, action);
            store.dispatch(action.clone()).unwrap();
            prop_assert_eq!(*store.get_state().unwrap(), expected);
        }
        prop_assert_eq!(notified.load(Ordering::SeqCst), actions.len());
    }

    /// The chain always matches a plain vector model of the same operations.
    #[test]
    fn listener_chain_matches_model(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = ListenerCollection::new();
        let mut model: Vec<(usize, ListenerKey)> = Vec::new();
        let mut next_label = 0usize;

        for op in ops {
            match op {
                Op::Subscribe => {
                    let label = next_label;
                    next_label += 1;
                    let log = log.clone();
                    let key = listeners.subscribe(Arc::new(move || log.lock().push(label)));
                    model.push((label, key));
                }
                Op::Remove(index) if !model.is_empty() => {
                    let (_, key) = model.remove(index % model.len());
                    prop_assert!(listeners.remove(key));
                    prop_assert!(!listeners.remove(key));
                }
                Op::Remove(_) => {}
            }
        }

        log.lock().clear();
        for listener in listeners.chain() {
            listener();
        }
        let expected: Vec<usize> = model.iter().map(|(label, _)| *label).collect();
        prop_assert_eq!(&*log.lock(), &expected);
        prop_assert_eq!(listeners.len(), model.len());
    }

    /// Repeating the same inputs always yields the cached props.
    #[test]
    fn pure_selector_is_identity_stable(
        state in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..8),
        repeats in 1usize..5,
    ) {
        type Props = Map<String, Value>;
        let state: Arc<Props> = Arc::new(state.into_iter().map(|(k, v)| (k, json!(v))).collect());

        let mut selector: Selector<Props, Props, Props, (), Props> = Selector::new(
            Arc::new(|action: Action| Ok(action)) as Dispatch,
            MapStateToProps::new(|state: &Props| Ok(state.clone())),
            MapDispatchToProps::new(|_: &Dispatch| Ok(())),
            MergeProps::new(|state_props: &Props, _: &(), _: &Props| Ok(state_props.clone())),
            SelectorOptions::default(),
        );

        let first = selector.select(state.clone(), Arc::new(Props::new())).unwrap();
        for _ in 0..repeats {
            let again = selector.select(state.clone(), Arc::new(Props::new())).unwrap();
            prop_assert!(Arc::ptr_eq(&first, &again));
        }

        let copied = Arc::new((*state).clone());
        let after_copy = selector.select(copied, Arc::new(Props::new())).unwrap();
        prop_assert!(Arc::ptr_eq(&first, &after_copy));
    }
}
