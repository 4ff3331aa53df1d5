//! Deadline-bound access to the configuration store

use appconfig_client::{ConfigStore, FetchedConfiguration, GetConfigurationRequest, StoreError};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::StoreTarget;
use crate::error::CoreError;

/// Per-call deadline shared by every component talking to the store.
///
/// Cloning shares the underlying value, so a change made through the
/// facade applies to in-flight refresh sweeps as well.
#[derive(Clone, Debug)]
pub struct CallTimeout {
    duration: Arc<RwLock<Duration>>,
}

impl CallTimeout {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: Arc::new(RwLock::new(duration)),
        }
    }

    pub fn get(&self) -> Duration {
        *self.duration.read()
    }

    /// Replace the deadline, returning the previous one
    pub fn set(&self, duration: Duration) -> Duration {
        std::mem::replace(&mut *self.duration.write(), duration)
    }

    /// Run a store call under the deadline.
    ///
    /// Expiry becomes `CoreError::Transient`; a store "not found" becomes
    /// `CoreError::NotFound`; every other store error is passed through.
    pub async fn run<T, F>(&self, operation: &str, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let duration = self.get();
        match tokio::time::timeout(duration, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(StoreError::NotFound(message))) => Err(CoreError::NotFound(message)),
            Ok(Err(e)) => Err(CoreError::Store(e)),
            Err(_) => Err(CoreError::Transient(format!(
                "{} timed out after {:?}",
                operation, duration
            ))),
        }
    }
}

/// The store plus the coordinates of one application/environment pair
pub struct ConfigurationSource {
    store: Arc<dyn ConfigStore>,
    target: StoreTarget,
    timeout: CallTimeout,
}

impl ConfigurationSource {
    pub fn new(store: Arc<dyn ConfigStore>, target: StoreTarget, timeout: CallTimeout) -> Self {
        Self {
            store,
            target,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn target(&self) -> &StoreTarget {
        &self.target
    }

    pub fn timeout(&self) -> &CallTimeout {
        &self.timeout
    }

    /// Fetch a configuration, conditionally when `version` is given
    pub async fn fetch(
        &self,
        configuration: &str,
        version: Option<&str>,
    ) -> Result<FetchedConfiguration, CoreError> {
        let request = GetConfigurationRequest {
            application: self.target.application.clone(),
            environment: self.target.environment.clone(),
            client_id: self.target.client_id.clone(),
            configuration: configuration.to_string(),
            client_version: version.map(str::to_string),
        };

        let started = Instant::now();
        let fetched = self
            .timeout
            .run("get_configuration", self.store.get_configuration(&request))
            .await?;

        debug!(
            "Fetched configuration {} from store ({} bytes, type {:?}, version {:?}, cost {:?})",
            configuration,
            fetched.content.len(),
            fetched.content_type,
            fetched.version,
            started.elapsed()
        );

        Ok(fetched)
    }
}
