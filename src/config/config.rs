use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::client::{ClientConfig, NavigationConfig};
use super::logging::LoggingConfig;
use super::store::StoreConfig;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

/// Environment variables with this prefix override file values,
/// `__` separating nested keys (`ATMS_CLIENT__BASE_URL`).
pub const ENV_PREFIX: &str = "ATMS_";

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub client: ClientConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
}

/// Extracts the configuration from an already assembled figment.
pub fn extract_config(figment: Figment) -> Result<ConfigV1, figment::Error> {
    match figment.extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Loads the YAML file at `path`, then applies `ATMS_` environment overrides.
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigV1, figment::Error> {
    let figment = Figment::new()
        .merge(Yaml::file(path.as_ref()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    extract_config(figment)
}

/// Renders the JSON schema for the configuration.
pub fn config_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schema_for!(Config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const MINIMAL: &str = r#"
version: "1.0.0"
client:
  base_url: "http://localhost:8080/api"
"#;

    #[test]
    fn test_defaults_are_filled_in() {
        let config = extract_config(Figment::new().merge(Yaml::string(MINIMAL)))
            .expect("minimal config should parse");

        assert_eq!(config.client.base_url, "http://localhost:8080/api");
        assert_eq!(config.client.timeout_in_ms, 10_000);
        assert_eq!(config.client.refresh_attempt_ceiling, 2);
        assert_eq!(config.client.expiry_warning_seconds, 300);
        assert_eq!(config.client.refresh_path, "/auth/refresh");
        assert_eq!(config.client.auth_path_marker, "/auth/");
        assert!(matches!(config.store, StoreConfig::Memory));
        assert_eq!(config.navigation.base_path, "");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_store_and_overrides() {
        let yaml = r#"
version: "1.0.0"
logging:
  level: "debug"
  format: "json"
client:
  base_url: "https://atms.example.org"
  timeout_in_ms: 2500
  refresh_attempt_ceiling: 3
store:
  type: file
  path: /tmp/atms-session.json
navigation:
  base_path: /atms
"#;
        let config = extract_config(Figment::new().merge(Yaml::string(yaml))).unwrap();
        assert_eq!(config.client.timeout_in_ms, 2500);
        assert_eq!(config.client.refresh_attempt_ceiling, 3);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.navigation.base_path, "/atms");
        match config.store {
            StoreConfig::File(file) => {
                assert_eq!(file.path, std::path::PathBuf::from("/tmp/atms-session.json"))
            }
            other => panic!("expected file store, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let yaml = r#"
version: "0.9.0"
client:
  base_url: "http://localhost"
"#;
        assert!(extract_config(Figment::new().merge(Yaml::string(yaml))).is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", MINIMAL)?;
            jail.set_env("ATMS_CLIENT__BASE_URL", "http://override:9000");
            jail.set_env("ATMS_CLIENT__TIMEOUT_IN_MS", "1500");

            let config = load_config("config.yaml")?;
            assert_eq!(config.client.base_url, "http://override:9000");
            assert_eq!(config.client.timeout_in_ms, 1500);
            Ok(())
        });
    }

    #[test]
    fn test_schema_mentions_client_section() {
        let schema = config_schema().expect("schema renders");
        assert!(schema.contains("refresh_attempt_ceiling"));
    }
}
