//! Deferred contributions: priority ordering across the async boundary,
//! shared-handle caching, and async materialization.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use strata::{merge, ConfigValue, MergeError, Resolved};

use super::support::{init_tracing, single};

#[tokio::test]
async fn test_prev_is_settled_before_later_overrides() {
    init_tracing();
    let config = merge(vec![
        single("a", ConfigValue::deferred(async { Ok(ConfigValue::from(5)) })),
        single(
            "a",
            ConfigValue::async_override(|_, cx| async move {
                Ok(ConfigValue::from(cx.prev.as_i64().unwrap_or(0) + 2))
            }),
        ),
    ])
    .unwrap();

    assert_eq!(config.resolve("a").await.unwrap().as_i64(), Some(7));
}

#[tokio::test]
async fn test_sync_merges_with_async() {
    let config = merge(vec![
        single(
            "a",
            ConfigValue::deferred(async { Ok(ConfigValue::from(json!({"b": true}))) }),
        ),
        ConfigValue::from(json!({"a": {"c": false}})),
    ])
    .unwrap();

    let a = config.resolve("a").await.unwrap();
    assert_eq!(
        a.as_object().unwrap().materialize().unwrap(),
        json!({"b": true, "c": false})
    );
}

#[tokio::test]
async fn test_async_override_return_merges_with_sync() {
    let config = merge(vec![
        single(
            "a",
            ConfigValue::async_override(|_, _| async {
                Ok(ConfigValue::from(json!({"b": true})))
            }),
        ),
        ConfigValue::from(json!({"a": {"c": false}})),
    ])
    .unwrap();

    let a = config.resolve("a").await.unwrap();
    assert_eq!(
        a.as_object().unwrap().materialize().unwrap(),
        json!({"b": true, "c": false})
    );
}

#[tokio::test]
async fn test_deferred_slot_caches_the_same_handle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let spy = {
        let calls = Arc::clone(&calls);
        ConfigValue::async_override(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(ConfigValue::from(9)) }
        })
    };
    let config = merge(vec![single("a", spy)]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let first = config.get("a").unwrap();
    let second = config.get("a").unwrap();
    match (&first, &second) {
        (Resolved::Deferred(f1), Resolved::Deferred(f2)) => {
            assert!(f1.same_handle(f2));
        }
        other => panic!("expected deferred results, got {other:?}"),
    }

    assert_eq!(first.wait().await.unwrap().as_i64(), Some(9));
    assert_eq!(second.wait().await.unwrap().as_i64(), Some(9));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deferred_resolving_to_deferred_flattens() {
    let config = merge(vec![single(
        "a",
        ConfigValue::deferred(async {
            Ok(ConfigValue::deferred(async { Ok(ConfigValue::from(3)) }))
        }),
    )])
    .unwrap();

    assert_eq!(config.resolve("a").await.unwrap().as_i64(), Some(3));
}

#[tokio::test]
async fn test_rejected_deferred_carries_the_path() {
    let config = merge(vec![single(
        "a",
        ConfigValue::deferred(async { Err(MergeError::custom("boom")) }),
    )])
    .unwrap();

    let err = config.resolve("a").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains('a'), "unexpected message: {message}");
    assert!(message.contains("boom"), "unexpected message: {message}");
}

#[tokio::test]
async fn test_later_sync_contribution_applies_after_earlier_deferred() {
    // The deferred mapping arrives first in priority order, so the later
    // plain scalar still wins even though it was ready immediately.
    let config = merge(vec![
        single(
            "a",
            ConfigValue::deferred(async { Ok(ConfigValue::from(json!({"x": 1}))) }),
        ),
        ConfigValue::from(json!({"a": 2})),
    ])
    .unwrap();

    assert_eq!(config.resolve("a").await.unwrap().as_i64(), Some(2));
}

#[tokio::test]
async fn test_materialize_async_awaits_everything() {
    let config = merge(vec![
        ConfigValue::from(json!({"sync": 1})),
        single(
            "slow",
            ConfigValue::deferred(async { Ok(ConfigValue::from(json!({"inner": true}))) }),
        ),
    ])
    .unwrap();

    assert_eq!(
        config.materialize_async().await.unwrap(),
        json!({"sync": 1, "slow": {"inner": true}})
    );
}
