use super::settings::Settings;
use super::{load_config, load_config_from};

use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.server.password, None);
    assert_eq!(settings.server.keepalive_secs, 60);
    assert_eq!(settings.broker.max_queue_size, 1024);
    assert_eq!(settings.broker.message_timeout_secs, 3600);
    assert_eq!(settings.broker.route_idle_secs, 300);
    assert_eq!(settings.store.driver, "memory");
    assert_eq!(settings.log.level, "info");
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config reads config/default.* relative to the working directory.
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000
        password = "secret"

        [broker]
        max_queue_size = 10
        message_timeout_secs = 60

        [store]
        driver = "sled"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.password.as_deref(), Some("secret"));
    assert_eq!(cfg.broker.max_queue_size, 10);
    assert_eq!(cfg.broker.message_timeout_secs, 60);
    assert_eq!(cfg.broker.ack_timeout_secs, 60);
    assert_eq!(cfg.store.driver, "sled");
    assert_eq!(cfg.store.path, "routemq_db");
}

#[test]
#[serial]
fn environment_overrides_nested_keys() {
    temp_env::with_vars(
        [
            ("ROUTEMQ__SERVER__PORT", Some("7001")),
            ("ROUTEMQ__BROKER__MAX_QUEUE_SIZE", Some("5")),
        ],
        || {
            let cfg = load_config_from("does/not/exist").expect("load_config failed");
            assert_eq!(cfg.server.port, 7001);
            assert_eq!(cfg.broker.max_queue_size, 5);
            assert_eq!(cfg.server.host, "127.0.0.1");
        },
    );
}

#[test]
#[serial]
fn keepalive_above_limit_is_rejected() {
    temp_env::with_var("ROUTEMQ__SERVER__KEEPALIVE_SECS", Some("601"), || {
        assert!(load_config_from("does/not/exist").is_err());
    });
}

#[test]
#[serial]
fn zero_grace_periods_are_rejected() {
    temp_env::with_var("ROUTEMQ__BROKER__ACK_TIMEOUT_SECS", Some("0"), || {
        assert!(load_config_from("does/not/exist").is_err());
    });
    temp_env::with_var("ROUTEMQ__BROKER__ROUTE_IDLE_SECS", Some("0"), || {
        assert!(load_config_from("does/not/exist").is_err());
    });
    temp_env::with_var("ROUTEMQ__BROKER__ACK_TIMEOUT_SECS", Some("1"), || {
        let cfg = load_config_from("does/not/exist").expect("load_config failed");
        assert_eq!(cfg.broker.ack_timeout_secs, 1);
    });
}
