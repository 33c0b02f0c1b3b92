//! Failure behavior: cycle detection, path-qualified messages, and the
//! Rust-specific read errors.

use serde_json::json;
use strata::{merge, ConfigMap, ConfigValue, MergeError};

use super::support::{init_tracing, single};

/// `{a: {meep: <override>}}`
fn nested_single(inner: ConfigValue) -> ConfigValue {
    ConfigValue::Mapping(
        ConfigMap::new().with("a", ConfigMap::new().with("meep", inner)),
    )
}

#[test]
fn test_self_referential_cycle() {
    init_tracing();
    let config = merge(vec![nested_single(ConfigValue::override_with(|root, _| {
        let a = root.value("a")?;
        let nested = a.as_object().expect("nested object");
        Ok(nested.value("meep")?.into())
    }))])
    .unwrap();

    let a = config.value("a").unwrap();
    let err = a.as_object().unwrap().value("meep").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cycle"), "unexpected message: {message}");
    assert!(message.contains("a.meep"), "unexpected message: {message}");
}

#[test]
fn test_mutual_cycle() {
    let inner = ConfigMap::new()
        .with(
            "b",
            ConfigValue::override_with(|root, _| {
                let a = root.value("a")?;
                Ok(a.as_object().expect("nested object").value("c")?.into())
            }),
        )
        .with(
            "c",
            ConfigValue::override_with(|root, _| {
                let a = root.value("a")?;
                Ok(a.as_object().expect("nested object").value("b")?.into())
            }),
        );
    let config = merge(vec![single("a", inner)]).unwrap();

    let a = config.value("a").unwrap();
    let err = a.as_object().unwrap().value("b").unwrap_err();
    assert!(err.to_string().contains("cycle"), "unexpected: {err}");
}

#[test]
fn test_error_messages_carry_the_dotted_path() {
    let config = merge(vec![nested_single(ConfigValue::override_with(|_, _| {
        Err(MergeError::custom("foo"))
    }))])
    .unwrap();

    let a = config.value("a").unwrap();
    let err = a.as_object().unwrap().value("meep").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("a.meep"), "unexpected message: {message}");
    assert!(message.contains("foo"), "unexpected message: {message}");
}

#[test]
fn test_failed_key_does_not_poison_siblings() {
    let config = merge(vec![
        ConfigValue::from(json!({"ok": 1})),
        single("bad", ConfigValue::override_with(|_, _| Err(MergeError::custom("boom")))),
    ])
    .unwrap();

    assert!(config.value("bad").is_err());
    assert_eq!(config.value("ok").unwrap().as_i64(), Some(1));
    // Failures are not cached; a re-read re-attempts and re-fails.
    assert!(config.value("bad").is_err());
}

#[test]
fn test_unknown_key() {
    let config = merge(vec![ConfigValue::from(json!({"a": 1}))]).unwrap();
    let err = config.value("zzz").unwrap_err();
    assert!(matches!(err, MergeError::UnknownKey { ref path } if path == "zzz"));
}

#[test]
fn test_sync_read_of_deferred_slot_is_pending() {
    let config = merge(vec![single(
        "a",
        ConfigValue::deferred(async { Ok(ConfigValue::from(5)) }),
    )])
    .unwrap();

    let err = config.value("a").unwrap_err();
    assert!(matches!(err, MergeError::Pending { ref path } if path == "a"));
}

#[test]
fn test_detached_nested_handle_after_root_dropped() {
    let config = merge(vec![nested_single(ConfigValue::override_with(|_, _| {
        Ok(ConfigValue::from(5))
    }))])
    .unwrap();

    let a = config.value("a").unwrap();
    let nested = a.as_object().unwrap().clone();
    drop(a);
    drop(config);

    // The unresolved override needs the root, which no longer exists.
    let err = nested.value("meep").unwrap_err();
    assert!(
        err.to_string().contains("root was dropped"),
        "unexpected: {err}"
    );
}

#[test]
fn test_materialize_rejects_function_terminals() {
    // An override returned by an override is a terminal function value.
    let config = merge(vec![single(
        "a",
        ConfigValue::override_with(|_, _| {
            Ok(ConfigValue::override_with(|_, _| Ok(ConfigValue::from(1))))
        }),
    )])
    .unwrap();

    assert!(config.value("a").unwrap().as_function().is_some());
    assert!(config.materialize().is_err());
}
