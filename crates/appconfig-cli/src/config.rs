//! Configuration loading

use anyhow::{Context, Result};
use appconfig_core::FacadeOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Prefix of environment overrides, e.g. `APPCONFIG__STORE__REGION`
const ENV_PREFIX: &str = "APPCONFIG";
const ENV_SEPARATOR: &str = "__";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Store coordinates and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub environment: Option<String>,
    /// Endpoint override, e.g. a local emulator
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_deployment_strategy")]
    pub deployment_strategy: String,
    /// Accept invalid TLS certificates from the endpoint
    #[serde(default)]
    pub skip_tls_verify: bool,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            application: String::new(),
            environment: None,
            endpoint: None,
            auth_token: None,
            timeout_secs: default_timeout_secs(),
            deployment_strategy: default_deployment_strategy(),
            skip_tls_verify: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            capacity: default_capacity(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_timeout_secs() -> u64 {
    10
}

fn default_deployment_strategy() -> String {
    "AllAtOnceNotBake".to_string()
}

fn default_cache_enabled() -> bool {
    true
}

fn default_capacity() -> usize {
    500
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file plus `APPCONFIG__*`
    /// environment overrides
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with(path, ::config::Environment::default())
    }

    fn load_with(path: &str, env: ::config::Environment) -> Result<Self> {
        if Path::new(path).exists() {
            info!("Loading configuration from {}", path);
        } else {
            info!("Config file not found at {}, using defaults", path);
        }

        let env = env
            .prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);

        let config: Config = ::config::Config::builder()
            .add_source(::config::File::new(path, ::config::FileFormat::Toml).required(false))
            .add_source(env)
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from {}", path))?;

        Ok(config)
    }

    /// Effective configuration as TOML, credentials omitted
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")
    }

    pub fn facade_options(&self) -> FacadeOptions {
        let mut options = FacadeOptions::new(self.store.application.clone());
        options.region = self.store.region.clone();
        options.environment = self.store.environment.clone();
        options.endpoint = self.store.endpoint.clone();
        options.auth_token = self.store.auth_token.clone();
        options.timeout_secs = self.store.timeout_secs;
        options.deployment_strategy = self.store.deployment_strategy.clone();
        options.skip_tls_verify = self.store.skip_tls_verify;
        options.cache_enabled = self.cache.enabled;
        options.cache_capacity = self.cache.capacity;
        options.refresh_interval_secs = self.cache.refresh_interval_secs;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> ::config::Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ::config::Environment::default().source(Some(vars.into_iter().collect()))
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = Config::load_with(path.to_str().unwrap(), env(&[])).unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 500);
        assert_eq!(config.cache.refresh_interval_secs, 300);
        assert_eq!(config.store.timeout_secs, 10);
        assert!(!config.store.skip_tls_verify);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[store]
region = "eu-west-1"
application = "app1"
environment = "Test"
timeout_secs = 3
skip_tls_verify = true

[cache]
enabled = false
capacity = 20

[logging]
format = "json"
"#,
        );

        let config = Config::load_with(file.path().to_str().unwrap(), env(&[])).unwrap();

        assert_eq!(config.store.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.store.application, "app1");
        assert_eq!(config.store.timeout_secs, 3);
        assert!(config.store.skip_tls_verify);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.capacity, 20);
        assert_eq!(config.cache.refresh_interval_secs, 300);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(
            r#"
[store]
region = "eu-west-1"
application = "app1"

[cache]
capacity = 20
"#,
        );

        let config = Config::load_with(
            file.path().to_str().unwrap(),
            env(&[
                ("APPCONFIG__STORE__REGION", "us-west-2"),
                ("APPCONFIG__CACHE__CAPACITY", "64"),
                ("APPCONFIG__CACHE__ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.store.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.store.application, "app1");
        assert_eq!(config.cache.capacity, 64);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_facade_options() {
        let mut config = Config::default();
        config.store.application = "app1".to_string();
        config.store.region = Some("us-east-1".to_string());
        config.store.environment = Some("Test".to_string());
        config.store.endpoint = Some("https://localhost:4566".to_string());
        config.store.skip_tls_verify = true;
        config.cache.capacity = 7;
        config.cache.refresh_interval_secs = 60;

        let options = config.facade_options();
        let target = options.validate().unwrap();

        assert_eq!(target.application, "app1");
        assert_eq!(target.environment, "Test");
        assert_eq!(options.endpoint.as_deref(), Some("https://localhost:4566"));
        assert!(options.skip_tls_verify);
        assert_eq!(options.cache_capacity, 7);
        assert_eq!(options.refresh_interval_secs, 60);
    }

    #[test]
    fn test_to_toml_omits_token() {
        let mut config = Config::default();
        config.store.auth_token = Some("secret".to_string());

        let rendered = config.to_toml().unwrap();

        assert!(rendered.contains("[cache]"));
        assert!(!rendered.contains("secret"));
    }
}
