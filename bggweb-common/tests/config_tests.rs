//! Root folder resolution and config file parsing

use bggweb_common::config::{database_path, resolve_root_folder, TomlConfig};
use serial_test::serial;
use std::path::PathBuf;

const TEST_ENV: &str = "BGGWEB_TEST_ROOT_FOLDER";

#[test]
#[serial]
fn cli_argument_wins_over_everything() {
    std::env::set_var(TEST_ENV, "/from/env");
    let toml = TomlConfig {
        root_folder: Some("/from/toml".into()),
        ..Default::default()
    };

    let root = resolve_root_folder(Some("/from/cli"), TEST_ENV, &toml);
    assert_eq!(root, PathBuf::from("/from/cli"));

    std::env::remove_var(TEST_ENV);
}

#[test]
#[serial]
fn env_var_wins_over_toml() {
    std::env::set_var(TEST_ENV, "/from/env");
    let toml = TomlConfig {
        root_folder: Some("/from/toml".into()),
        ..Default::default()
    };

    let root = resolve_root_folder(None, TEST_ENV, &toml);
    assert_eq!(root, PathBuf::from("/from/env"));

    std::env::remove_var(TEST_ENV);
}

#[test]
#[serial]
fn toml_used_when_no_cli_or_env() {
    std::env::remove_var(TEST_ENV);
    let toml = TomlConfig {
        root_folder: Some("/from/toml".into()),
        ..Default::default()
    };

    let root = resolve_root_folder(None, TEST_ENV, &toml);
    assert_eq!(root, PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn falls_back_to_default_folder() {
    std::env::remove_var(TEST_ENV);
    let root = resolve_root_folder(None, TEST_ENV, &TomlConfig::default());
    assert!(root.ends_with("bggweb") || root.ends_with("bggweb_data"));
}

#[test]
fn parses_server_and_pipeline_sections() {
    let config = TomlConfig::from_toml_str(
        r#"
        root_folder = "/srv/bggweb"

        [server]
        host = "0.0.0.0"
        port = 9000

        [pipeline]
        batch_size = 10
        base_url = "http://localhost:1234"
        split_failed_batches = false
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder.as_deref(), Some("/srv/bggweb"));
    assert_eq!(config.server.host.as_deref(), Some("0.0.0.0"));
    assert_eq!(config.server.port, Some(9000));
    assert_eq!(config.pipeline_value("batch_size").as_deref(), Some("10"));
    assert_eq!(
        config.pipeline_value("base_url").as_deref(),
        Some("http://localhost:1234")
    );
    assert_eq!(
        config.pipeline_value("split_failed_batches").as_deref(),
        Some("false")
    );
    assert_eq!(config.pipeline_value("missing"), None);
}

#[test]
fn empty_document_gives_defaults() {
    let config = TomlConfig::from_toml_str("").unwrap();
    assert!(config.root_folder.is_none());
    assert!(config.server.port.is_none());
    assert!(config.pipeline.is_empty());
}

#[test]
fn malformed_document_is_config_error() {
    let err = TomlConfig::from_toml_str("[server\nport = ").unwrap_err();
    assert!(matches!(err, bggweb_common::Error::Config(_)));
}

#[test]
fn load_from_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[server]\nport = 8123\n").unwrap();

    let config = TomlConfig::load_from(&path).unwrap();
    assert_eq!(config.server.port, Some(8123));
}

#[test]
fn database_lives_in_root_folder() {
    let root = PathBuf::from("/data/bggweb");
    assert_eq!(database_path(&root), PathBuf::from("/data/bggweb/bggweb.db"));
}
