use std::fs;
use std::time::Duration;

use kestrel_script_runtime::{RuntimeConfig, RuntimeConfigOverrides};
use tempfile::tempdir;

#[test]
fn defaults_match_runtime_limits() {
    let config = RuntimeConfig::default();
    assert_eq!(config.context.tick_budget(), Duration::from_millis(100));
    assert_eq!(config.context.max_call_depth, 100);
    assert_eq!(config.context.max_eval_polls, 100);
    assert_eq!(config.scripts.max_operations, 0);
    assert_eq!(config.console.capacity, 512);
}

#[test]
fn partial_file_keeps_defaults_for_missing_fields() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("runtime.json");
    fs::write(&path, r#"{ "context": { "tick_budget_ms": 25 }, "console": { "capacity": 8 } }"#)
        .expect("write config");

    let config = RuntimeConfig::load(&path).expect("load config");
    assert_eq!(config.context.tick_budget_ms, 25);
    assert_eq!(config.context.max_call_depth, 100);
    assert_eq!(config.console.capacity, 8);
    assert_eq!(config.scripts, RuntimeConfig::default().scripts);
}

#[test]
fn malformed_file_falls_back_to_defaults() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("runtime.json");
    fs::write(&path, "{ not json").expect("write config");

    let err = RuntimeConfig::load(&path).expect_err("malformed config");
    assert!(format!("{err:?}").contains("runtime.json"));
    assert_eq!(RuntimeConfig::load_or_default(&path), RuntimeConfig::default());
    assert_eq!(RuntimeConfig::load_or_default(dir.path().join("missing.json")), RuntimeConfig::default());
}

#[test]
fn overrides_replace_only_the_given_fields() {
    let mut config = RuntimeConfig::default();
    let overrides = RuntimeConfigOverrides { tick_budget_ms: Some(5), max_eval_polls: Some(10), ..Default::default() };
    assert!(!overrides.is_empty());
    assert_eq!(overrides.applied_fields(), vec!["tick_budget_ms", "max_eval_polls"]);

    config.apply_overrides(&overrides);
    assert_eq!(config.context.tick_budget_ms, 5);
    assert_eq!(config.context.max_eval_polls, 10);
    assert_eq!(config.context.max_call_depth, 100);
    assert!(RuntimeConfigOverrides::default().is_empty());
}
