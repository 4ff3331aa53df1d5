//! Facade options
//!
//! Named options with documented defaults, applied when the facade is
//! constructed. Knobs that can change on a live facade (caching on/off,
//! capacity, refresh interval, timeout) have explicit setters on
//! `ConfigurationFacade` instead of being re-applied from this struct.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// Environment variable holding the store region
pub const REGION_ENV: &str = "AWS_REGION";

/// Environment variable holding the environment name
pub const ENVIRONMENT_ENV: &str = "APPCONFIG_ENVIRONMENT";

/// Options for a `ConfigurationFacade`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeOptions {
    /// Region of the store; falls back to `AWS_REGION`
    #[serde(default)]
    pub region: Option<String>,
    /// Application name
    #[serde(default)]
    pub application: String,
    /// Environment name; falls back to `APPCONFIG_ENVIRONMENT`
    #[serde(default)]
    pub environment: Option<String>,
    /// Client id sent with every fetch, random per instance by default
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Whether fetched configurations are cached and refreshed
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// Maximum number of cached configurations
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Seconds between background refresh sweeps
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Per-call timeout for store requests, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Deployment strategy used when publishing versions
    #[serde(default = "default_deployment_strategy")]
    pub deployment_strategy: String,
    /// Endpoint override for the store
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token for gateways in front of the store
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    /// Accept invalid TLS certificates, for local emulators only
    #[serde(default)]
    pub skip_tls_verify: bool,
}

/// Validated store coordinates for one facade instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub region: String,
    pub application: String,
    pub environment: String,
    pub client_id: String,
}

impl FacadeOptions {
    /// Options for an application with every other field at its default
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Fill region and environment from the process environment when unset
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Fill region and environment from a variable lookup when unset
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.region.as_deref().is_none_or(str::is_empty) {
            self.region = lookup(REGION_ENV).filter(|v| !v.is_empty());
        }
        if self.environment.as_deref().is_none_or(str::is_empty) {
            self.environment = lookup(ENVIRONMENT_ENV).filter(|v| !v.is_empty());
        }
    }

    /// Check required fields and knob ranges
    pub fn validate(&self) -> Result<StoreTarget, CoreError> {
        let region = self
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                CoreError::Config(format!(
                    "missing required field: region (or set {} env)",
                    REGION_ENV
                ))
            })?;

        if self.application.is_empty() {
            return Err(CoreError::Config(
                "missing required field: application".to_string(),
            ));
        }

        let environment = self
            .environment
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                CoreError::Config(format!(
                    "missing required field: environment (or set {} env)",
                    ENVIRONMENT_ENV
                ))
            })?;

        if self.cache_capacity == 0 {
            return Err(CoreError::Config("cache_capacity must be at least 1".to_string()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(CoreError::Config(
                "refresh_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(CoreError::Config("timeout_secs must be at least 1".to_string()));
        }

        Ok(StoreTarget {
            region,
            application: self.application.clone(),
            environment,
            client_id: self.client_id.clone(),
        })
    }
}

impl Default for FacadeOptions {
    fn default() -> Self {
        Self {
            region: None,
            application: String::new(),
            environment: None,
            client_id: default_client_id(),
            cache_enabled: default_cache_enabled(),
            cache_capacity: default_cache_capacity(),
            refresh_interval_secs: default_refresh_interval_secs(),
            timeout_secs: default_timeout_secs(),
            deployment_strategy: default_deployment_strategy(),
            endpoint: None,
            auth_token: None,
            skip_tls_verify: false,
        }
    }
}

fn default_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    500
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_deployment_strategy() -> String {
    "AllAtOnceNotBake".to_string()
}
