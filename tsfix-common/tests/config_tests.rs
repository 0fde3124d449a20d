//! Configuration loading and priority resolution
//!
//! Uses serial_test to prevent ENV variable race conditions: tests that set
//! TSFIX_* variables are marked #[serial].

use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tsfix_common::config::{
    load_config, load_toml_config, resolve_config_path, resolve_directory, resolve_flag,
    TomlConfig, CONFIG_PATH_ENV,
};
use tsfix_common::Error;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let config = load_toml_config(&temp.path().join("absent.toml")).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_invalid_config_file_is_a_config_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[fixer\ndry_run = ").unwrap();

    match load_toml_config(&path) {
        Err(Error::Config(msg)) => assert!(msg.contains("Parse")),
        other => panic!("Expected Config error, got {:?}", other),
    }
}

#[test]
fn test_serialized_config_loads_back() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");

    let mut config = TomlConfig::default();
    config.fixer.workers = Some(2);
    config.harness.index_url = "http://localhost:9/".to_string();
    config.logging.level = "debug".to_string();

    std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
#[serial]
fn test_config_path_priority() {
    env::remove_var(CONFIG_PATH_ENV);

    let cli = Path::new("/tmp/tsfix-cli.toml");
    assert_eq!(resolve_config_path(Some(cli)), Some(cli.to_path_buf()));

    env::set_var(CONFIG_PATH_ENV, "/tmp/tsfix-env.toml");
    assert_eq!(
        resolve_config_path(None),
        Some(PathBuf::from("/tmp/tsfix-env.toml"))
    );
    assert_eq!(resolve_config_path(Some(cli)), Some(cli.to_path_buf()));

    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_load_config_from_env_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[harness]\narchive_limit = 7\n").unwrap();

    env::set_var(CONFIG_PATH_ENV, &path);
    let config = load_config(None).unwrap();
    env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(config.harness.archive_limit, 7);
}

#[test]
#[serial]
fn test_flag_resolution() {
    let var = "TSFIX_TEST_FLAG";
    env::remove_var(var);

    assert!(resolve_flag(true, var, false));
    assert!(!resolve_flag(false, var, false));
    assert!(resolve_flag(false, var, true));

    env::set_var(var, "yes");
    assert!(resolve_flag(false, var, false));

    env::set_var(var, "off");
    assert!(!resolve_flag(false, var, true));

    // Unrecognized values fall through to the config value
    env::set_var(var, "maybe");
    assert!(resolve_flag(false, var, true));

    env::remove_var(var);
}

#[test]
#[serial]
fn test_directory_resolution() {
    let var = "TSFIX_TEST_DIR";
    env::remove_var(var);

    let default = || PathBuf::from("/default");
    let configured = Path::new("/configured");

    assert_eq!(
        resolve_directory(None, var, None, default),
        PathBuf::from("/default")
    );
    assert_eq!(
        resolve_directory(None, var, Some(configured), default),
        PathBuf::from("/configured")
    );

    env::set_var(var, "/from-env");
    assert_eq!(
        resolve_directory(None, var, Some(configured), default),
        PathBuf::from("/from-env")
    );
    assert_eq!(
        resolve_directory(Some(Path::new("/cli")), var, Some(configured), default),
        PathBuf::from("/cli")
    );

    env::remove_var(var);
}
