//! Integration Tests for the State Container
//!
//! These tests drive the store, the subscription tree and consumers together
//! through the public API.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use cascade_core::selector::{MapDispatchToProps, MapStateToProps, MergeProps, Selector, SelectorOptions};
use cascade_core::store::{apply_middleware, Action, ActionType, Dispatch, Middleware, MiddlewareApi, Store};
use cascade_core::subscription::{Batch, SubscriptionTree};
use cascade_core::{Consumer, PropsOutcome, StoreError};

fn counter(state: Option<Arc<i64>>, action: &Action) -> cascade_core::Result<Arc<i64>> {
    let count = state.as_deref().copied().unwrap_or(0);
    Ok(Arc::new(if action.is("INC") { count + 1 } else { count }))
}

/// Test the basic counter scenario: three increments, three notifications.
#[test]
fn counter_reaches_three_after_three_increments() {
    let store = Store::new(counter).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let calls_clone = calls.clone();

    store
        .subscribe(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    for _ in 0..3 {
        store.dispatch(Action::new("INC")).unwrap();
    }

    assert_eq!(*store.get_state().unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Test that initial state comes from the reducer's INIT pass.
#[test]
fn initial_state_comes_from_init_action() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();

    let store = Store::new(move |state: Option<Arc<i64>>, action: &Action| {
        seen_clone.lock().push(action.name().unwrap_or_default().to_string());
        Ok(Arc::new(state.map_or(42, |s| *s)))
    })
    .unwrap();

    assert_eq!(*store.get_state().unwrap(), 42);
    assert_eq!(*seen.lock(), vec![ActionType::INIT.to_string()]);
}

/// Test that malformed actions are rejected before reaching the reducer.
#[test]
fn malformed_actions_are_rejected() {
    let store = Store::new(counter).unwrap();

    assert!(matches!(store.dispatch_value(json!({})), Err(StoreError::InvalidAction(_))));
    assert!(matches!(store.dispatch_value(Value::Null), Err(StoreError::InvalidAction(_))));
    assert!(matches!(store.dispatch_value(json!([1, 2])), Err(StoreError::InvalidAction(_))));

    store.dispatch_value(json!({ "type": "INC" })).unwrap();
    assert_eq!(*store.get_state().unwrap(), 1);
}

/// Test that a listener removed before any dispatch is never called.
#[test]
fn unsubscribed_listener_is_never_called() {
    let store = Store::new(counter).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let calls_clone = calls.clone();

    let unsubscribe = store
        .subscribe(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    unsubscribe.unsubscribe().unwrap();

    store.dispatch(Action::new("INC")).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test that a listener unsubscribing itself still completes its current call.
#[test]
fn self_unsubscribing_listener_runs_once() {
    let store = Store::new(counter).unwrap();
    let calls = Arc::new(AtomicI32::new(0));
    let handle: Arc<Mutex<Option<cascade_core::Unsubscribe>>> = Arc::new(Mutex::new(None));

    let calls_clone = calls.clone();
    let handle_clone = handle.clone();
    let unsubscribe = store
        .subscribe(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(unsubscribe) = handle_clone.lock().take() {
                unsubscribe.unsubscribe().unwrap();
            }
        })
        .unwrap();
    *handle.lock() = Some(unsubscribe);

    store.dispatch(Action::new("INC")).unwrap();
    store.dispatch(Action::new("INC")).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test the root/child ordering scenario, before and after the child leaves.
#[test]
fn root_then_child_until_child_unsubscribes() {
    let store = Store::new(counter).unwrap();
    let tree = SubscriptionTree::new(store.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let root = tree.root();
    let root_log = log.clone();
    let root_handle = root.clone();
    root.set_on_change(Some(Arc::new(move || {
        root_log.lock().push("R");
        root_handle.notify_nested_subs();
    })))
    .unwrap();
    root.try_subscribe().unwrap();

    let child = root.child().unwrap();
    let child_log = log.clone();
    child
        .set_on_change(Some(Arc::new(move || child_log.lock().push("C"))))
        .unwrap();
    child.try_subscribe().unwrap();

    store.dispatch(Action::new("INC")).unwrap();
    assert_eq!(*log.lock(), vec!["R", "C"]);

    log.lock().clear();
    child.try_unsubscribe().unwrap();
    store.dispatch(Action::new("INC")).unwrap();
    assert_eq!(*log.lock(), vec!["R"]);
}

/// Test that a deep chain fires strictly top-down within one dispatch.
#[test]
fn deep_chain_fires_top_down() {
    let store = Store::new(counter).unwrap();
    let tree = SubscriptionTree::with_batch(store.clone(), Batch::immediate());
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut nodes = vec![tree.root()];
    for _ in 0..4 {
        let next = nodes[nodes.len() - 1].child().unwrap();
        nodes.push(next);
    }

    for (depth, node) in nodes.iter().enumerate() {
        let log = log.clone();
        let handle = node.clone();
        node.set_on_change(Some(Arc::new(move || {
            log.lock().push(depth);
            handle.notify_nested_subs();
        })))
        .unwrap();
    }
    nodes[4].try_subscribe().unwrap();

    store.dispatch(Action::new("INC")).unwrap();
    assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
}

/// Test middleware and consumers sharing one store.
#[test]
fn middleware_store_drives_consumers() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let logger: Arc<dyn Middleware<i64>> = Arc::new(move |_api: MiddlewareApi<i64>, next: Dispatch| -> Dispatch {
        let seen = seen_clone.clone();
        Arc::new(move |action: Action| {
            seen.lock().push(action.name().unwrap_or_default().to_string());
            next(action)
        })
    });

    let store = Store::builder()
        .reducer(counter)
        .enhancer(apply_middleware(vec![logger]))
        .build()
        .unwrap();
    let tree = SubscriptionTree::new(store.clone());

    type Props = Map<String, Value>;
    let selector: Selector<i64, Props, Props, (), Props> = Selector::new(
        store.dispatcher(),
        MapStateToProps::new(|count: &i64| {
            let mut props = Props::new();
            props.insert("count".into(), json!(count));
            Ok(props)
        }),
        MapDispatchToProps::new(|_: &Dispatch| Ok(())),
        MergeProps::new(|state_props: &Props, _: &(), own_props: &Props| {
            let mut merged = own_props.clone();
            merged.extend(state_props.clone());
            Ok(merged)
        }),
        SelectorOptions::default(),
    );

    let rendered = Arc::new(Mutex::new(Vec::new()));
    let rendered_clone = rendered.clone();
    let consumer = Consumer::attach(tree.root(), selector, Props::new(), move |props: &PropsOutcome<Props>| {
        if let Ok(props) = props {
            rendered_clone.lock().push(props.get("count").cloned());
        }
    })
    .unwrap();

    store.dispatch(Action::new("INC")).unwrap();
    consumer.commit();
    store.dispatch(Action::new("NOOP")).unwrap();

    assert_eq!(*seen.lock(), vec!["INC".to_string(), "NOOP".to_string()]);
    assert_eq!(*rendered.lock(), vec![Some(json!(1))]);
    consumer.detach().unwrap();
}

/// Test the state watch channel from async code.
#[tokio::test]
async fn watch_sees_dispatched_state() {
    let store = Store::new(counter).unwrap();
    let mut watch = store.watch().unwrap();

    let dispatcher = store.clone();
    let handle = tokio::spawn(async move {
        dispatcher.dispatch(Action::new("INC")).unwrap();
    });
    handle.await.unwrap();

    watch.changed().await.unwrap();
    assert_eq!(*watch.current(), 1);
    watch.unsubscribe().unwrap();
}
