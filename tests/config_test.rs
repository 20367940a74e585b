use std::time::Duration;

use strikeq::{Error, QueueConfig, Strikes};

const VARS: [&str; 5] = [
    "STRIKEQ_PATH",
    "STRIKEQ_THROTTLE_MS",
    "STRIKEQ_STRIKES",
    "STRIKEQ_BLOCK_ON_FAIL",
    "STRIKEQ_AUTOSTART",
];

fn clear_env() {
    for var in VARS {
        unsafe {
            std::env::remove_var(var);
        }
    }
}

// Environment variables are process-global, so every env scenario lives in
// one test to keep them from racing each other.
#[test]
fn config_from_env() {
    clear_env();
    assert!(matches!(QueueConfig::from_env(), Err(Error::Config(_))));

    unsafe {
        std::env::set_var("STRIKEQ_PATH", "/tmp/strikeq-test/queue.db");
    }
    assert!(
        matches!(QueueConfig::from_env(), Err(Error::Config(_))),
        "throttle is required"
    );

    unsafe {
        std::env::set_var("STRIKEQ_THROTTLE_MS", "50");
    }
    let config = QueueConfig::from_env().unwrap();
    assert_eq!(config.throttle(), Duration::from_millis(50));
    assert_eq!(config.strikes, Strikes::Limit(3));
    assert!(!config.block_on_fail);
    assert!(config.autostart);

    unsafe {
        std::env::set_var("STRIKEQ_STRIKES", "false");
        std::env::set_var("STRIKEQ_BLOCK_ON_FAIL", "true");
        std::env::set_var("STRIKEQ_AUTOSTART", "false");
    }
    let config = QueueConfig::from_env().unwrap();
    assert_eq!(config.strikes, Strikes::Disabled);
    assert!(config.block_on_fail);
    assert!(!config.autostart);

    unsafe {
        std::env::set_var("STRIKEQ_THROTTLE_MS", "soon");
    }
    assert!(matches!(QueueConfig::from_env(), Err(Error::Config(_))));

    unsafe {
        std::env::set_var("STRIKEQ_THROTTLE_MS", "50");
        std::env::set_var("STRIKEQ_STRIKES", "0");
    }
    assert!(matches!(QueueConfig::from_env(), Err(Error::Config(_))));

    clear_env();
}

#[test]
fn config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.toml");
    std::fs::write(
        &path,
        r#"
        path = "data/jobs.db"
        throttle_ms = 1000
        strikes = 5
        block_on_fail = true
        "#,
    )
    .unwrap();

    let config = QueueConfig::from_file(&path).unwrap();
    assert_eq!(config.path.to_str(), Some("data/jobs.db"));
    assert_eq!(config.strikes, Strikes::Limit(5));
    assert!(config.block_on_fail);
    assert!(config.autostart);
}

#[test]
fn config_from_missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = QueueConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn strikes_can_be_disabled_in_toml() {
    let config = QueueConfig::from_toml_str(
        r#"
        path = "q.db"
        throttle_ms = 0
        strikes = false
        "#,
    )
    .unwrap();
    assert_eq!(config.strikes, Strikes::Disabled);
}
