//! Integration tests for patchy-config

use patchy_config::*;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use temp_env::with_vars;

const ALL_VARS: [&str; 7] = [
    "PATCHY_DATABASE_URL",
    "PATCHY_CONNECTION_TIMEOUT",
    "PATCHY_PATCH_DIR",
    "PATCHY_PROPERTY_TABLE",
    "PATCHY_PATCH_KEY",
    "PATCHY_LOG_LEVEL",
    "PATCHY_LOG_FORMAT",
];

fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
    ALL_VARS.iter().map(|name| (*name, None)).collect()
}

fn with_overrides(overrides: &[(&'static str, &'static str)]) -> Vec<(&'static str, Option<&'static str>)> {
    let mut vars = cleared();
    for (name, value) in overrides {
        vars.retain(|(existing, _)| existing != name);
        vars.push((*name, Some(*value)));
    }
    vars
}

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_default_config_validation() {
    let config = PatchyConfig::default();
    assert!(config.validate_all().is_ok());
    assert_eq!(config.database.url, "sqlite://patchy.db");
    assert_eq!(config.database.connection_timeout, Duration::from_secs(30));
    assert_eq!(config.patches.directory, PathBuf::from("."));
    assert_eq!(config.patches.table, "property");
    assert_eq!(config.patches.key, "patch");
    assert_eq!(config.logging.level, LogLevel::Info);
    assert_eq!(config.logging.format, LogFormat::Text);
}

#[test]
fn test_config_loader_from_env() {
    let vars = with_overrides(&[
        ("PATCHY_DATABASE_URL", "postgres://app@localhost/app"),
        ("PATCHY_CONNECTION_TIMEOUT", "5"),
        ("PATCHY_PATCH_DIR", "/srv/patches"),
        ("PATCHY_PROPERTY_TABLE", "schema_meta"),
        ("PATCHY_PATCH_KEY", "app"),
        ("PATCHY_LOG_LEVEL", "debug"),
        ("PATCHY_LOG_FORMAT", "json"),
    ]);

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.database.url, "postgres://app@localhost/app");
        assert_eq!(config.database.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.patches.directory, PathBuf::from("/srv/patches"));
        assert_eq!(config.patches.table, "schema_meta");
        assert_eq!(config.patches.key, "app");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_invalid_env_values_are_rejected() {
    with_vars(with_overrides(&[("PATCHY_CONNECTION_TIMEOUT", "soon")]), || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
    });

    with_vars(with_overrides(&[("PATCHY_LOG_LEVEL", "loud")]), || {
        assert!(ConfigLoader::new().from_env().is_err());
    });

    with_vars(with_overrides(&[("PATCHY_PROPERTY_TABLE", "drop table")]), || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::DomainError { ref domain, .. } if domain == "patches"));
    });
}

#[test]
fn test_yaml_file_with_env_override() {
    let file = write_config(
        r#"
database:
  url: "sqlite://from-file.db"
  connection_timeout: 10

patches:
  directory: "db/patches"
  table: "levels"

logging:
  level: warn
  format: compact
"#,
    );

    with_vars(with_overrides(&[("PATCHY_DATABASE_URL", "sqlite::memory:")]), || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.patches.directory, PathBuf::from("db/patches"));
        assert_eq!(config.patches.table, "levels");
        assert_eq!(config.patches.key, "patch");
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
    });
}

#[test]
fn test_invalid_file_values_are_rejected() {
    let bad_url = write_config("database:\n  url: \"mysql://localhost/app\"\n");
    let zero_timeout = write_config("database:\n  connection_timeout: 0\n");
    let empty_key = write_config("patches:\n  key: \"\"\n");
    let not_yaml = write_config("database: [unclosed\n");

    with_vars(cleared(), || {
        let loader = ConfigLoader::new();
        assert!(loader.from_file(bad_url.path()).is_err());
        assert!(loader.from_file(zero_timeout.path()).is_err());
        assert!(loader.from_file(empty_key.path()).is_err());
        assert!(matches!(
            loader.from_file(not_yaml.path()),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            loader.from_file("/definitely/not/here.yaml"),
            Err(ConfigError::FileReadError(_))
        ));
    });
}

#[test]
fn test_load_without_file_uses_env() {
    with_vars(with_overrides(&[("PATCHY_PATCH_DIR", "migrations")]), || {
        let config = ConfigLoader::new().load(None::<&str>).unwrap();
        assert_eq!(config.patches.directory, PathBuf::from("migrations"));
    });
}

#[test]
fn test_generated_sample_round_trips() {
    let yaml = PatchyConfig::generate_sample();
    assert!(yaml.contains("connection_timeout: 30"));
    assert!(yaml.contains("table: property"));

    let parsed: PatchyConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed, PatchyConfig::default());
}
