//! Configuration facade
//!
//! Entry point for reading and publishing configurations of one
//! application/environment pair. Reads are cache-first when caching is
//! enabled; create, update and delete resolve names through the
//! `NameResolver` and write their result through to the cache.
//!
//! The store itself is eventually consistent: a read issued right after a
//! publish may briefly observe the previous version when it bypasses the
//! cache. That window belongs to the store and is not masked here.

use appconfig_client::{ConfigStore, HttpConfigStore, HttpConfigStoreConfig, StartDeploymentRequest};
use bytes::Bytes;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CachedConfiguration, EntryOrigin};
use crate::config::{FacadeOptions, StoreTarget};
use crate::error::CoreError;
use crate::refresh::{CacheRefresher, ConfigurationCache, RefreshScheduler, SweepReport};
use crate::resolver::{NameResolver, ResourceKind};
use crate::source::{CallTimeout, ConfigurationSource};

/// Location type of profiles whose versions are hosted by the store
const HOSTED_LOCATION: &str = "hosted";

/// Cache knobs that survive toggling caching off and on
#[derive(Debug, Clone, Copy)]
struct CacheSettings {
    capacity: NonZeroUsize,
    refresh_interval: Duration,
}

/// A live cache and the timer refreshing it
struct CacheState {
    cache: Arc<ConfigurationCache>,
    scheduler: RefreshScheduler,
}

/// Cached access to the configurations of one application/environment pair
pub struct ConfigurationFacade {
    source: Arc<ConfigurationSource>,
    resolver: NameResolver,
    application_id: String,
    environment_id: String,
    deployment_strategy: String,
    settings: RwLock<CacheSettings>,
    caching: RwLock<Option<CacheState>>,
}

impl ConfigurationFacade {
    /// Connect to the store over HTTP and build a facade
    pub async fn connect(options: FacadeOptions) -> Result<Self, CoreError> {
        let mut options = options;
        options.apply_env();
        let target = options.validate()?;

        let store = HttpConfigStore::new(http_store_config(&options, &target))?;

        Self::new(options, Arc::new(store)).await
    }

    /// Build a facade over an existing store.
    ///
    /// Region and environment fall back to the process environment when
    /// unset. Lists applications and deployment strategies, resolves the
    /// application and environment ids, then lists configuration profiles.
    /// Starts the refresh timer when caching is enabled, so this must run
    /// inside a tokio runtime.
    pub async fn new(options: FacadeOptions, store: Arc<dyn ConfigStore>) -> Result<Self, CoreError> {
        let mut options = options;
        options.apply_env();
        let target = options.validate()?;

        let timeout = CallTimeout::new(options.timeout());
        let resolver = NameResolver::new(store.clone(), timeout.clone());

        resolver.refresh(ResourceKind::Application).await?;
        resolver.refresh(ResourceKind::DeploymentStrategy).await?;

        let application_id = resolver
            .lookup(ResourceKind::Application, &target.application)
            .ok_or_else(|| CoreError::NotFound(format!("application {}", target.application)))?;
        resolver.bind_application(application_id.clone());

        let environment_id = resolver
            .resolve(ResourceKind::Environment, &target.environment)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "environment {} in application {}",
                    target.environment, target.application
                ))
            })?;

        resolver.refresh(ResourceKind::ConfigurationProfile).await?;

        info!(
            "Configuration facade ready (application: {} [{}], environment: {} [{}], client id: {})",
            target.application, application_id, target.environment, environment_id, target.client_id
        );

        let settings = CacheSettings {
            // validate() rejects a zero capacity
            capacity: NonZeroUsize::new(options.cache_capacity).unwrap_or(NonZeroUsize::MIN),
            refresh_interval: options.refresh_interval(),
        };

        let facade = Self {
            source: Arc::new(ConfigurationSource::new(store, target, timeout)),
            resolver,
            application_id,
            environment_id,
            deployment_strategy: options.deployment_strategy.clone(),
            settings: RwLock::new(settings),
            caching: RwLock::new(None),
        };

        if options.cache_enabled {
            facade.set_cache_enabled(true);
        } else {
            warn!(
                "Cache is off (application: {}, environment: {})",
                facade.source.target().application,
                facade.source.target().environment
            );
        }

        Ok(facade)
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    pub fn client_id(&self) -> &str {
        &self.source.target().client_id
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    /// The live cache, if caching is enabled
    pub fn cache(&self) -> Option<Arc<ConfigurationCache>> {
        self.caching.read().as_ref().map(|state| state.cache.clone())
    }

    // ==================== Reads ====================

    /// Get a configuration, serving it from the cache when possible
    pub async fn get_configuration(&self, name: &str) -> Result<Bytes, CoreError> {
        let cache = self.cache();

        if let Some(cache) = &cache {
            match cache.get(&name.to_string()) {
                Some(CachedConfiguration {
                    content: Some(content),
                    ..
                }) => {
                    debug!("Cache hit for configuration: {}", name);
                    metrics::counter!("appconfig_cache_hits_total").increment(1);
                    return Ok(content);
                }
                Some(_) => warn!("Cached configuration {} has no content, fetching", name),
                None => {}
            }
            metrics::counter!("appconfig_cache_misses_total").increment(1);
        }

        let fetched = self.source.fetch(name, None).await?;
        if fetched.is_empty() {
            return Err(CoreError::EmptyConfiguration(name.to_string()));
        }

        if let Some(cache) = &cache {
            debug!("Caching configuration: {}", name);
            self.store_in_cache(
                cache,
                name,
                CachedConfiguration::new(
                    Some(fetched.content.clone()),
                    fetched.version,
                    EntryOrigin::CacheFill,
                ),
            );
        }

        Ok(fetched.content)
    }

    /// Get a configuration as text, replacing invalid UTF-8
    pub async fn get_configuration_string(&self, name: &str) -> Result<String, CoreError> {
        let content = self.get_configuration(name).await?;
        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    /// Get a configuration straight from the store. Neither reads nor
    /// writes the cache.
    pub async fn get_configuration_ignoring_cache(&self, name: &str) -> Result<Bytes, CoreError> {
        let fetched = self.source.fetch(name, None).await?;
        if fetched.is_empty() {
            return Err(CoreError::EmptyConfiguration(name.to_string()));
        }
        Ok(fetched.content)
    }

    // ==================== Writes ====================

    /// Create a configuration profile and deploy `content` as its first
    /// version. Returns the new profile id.
    pub async fn create_configuration(
        &self,
        name: &str,
        content: impl Into<Bytes>,
    ) -> Result<String, CoreError> {
        let content = content.into();

        if self
            .resolver
            .resolve(ResourceKind::ConfigurationProfile, name)
            .await?
            .is_some()
        {
            return Err(CoreError::AlreadyExists(self.describe(name)));
        }

        let strategy_id = self.deployment_strategy_id().await?;

        let profile = self
            .source
            .timeout()
            .run(
                "create_configuration_profile",
                self.source.store().create_configuration_profile(
                    &self.application_id,
                    name,
                    HOSTED_LOCATION,
                ),
            )
            .await?;
        info!("Created configuration profile {} ({})", name, profile.id);

        self.publish(&profile.id, content.clone(), &strategy_id).await?;

        self.resolver
            .register(ResourceKind::ConfigurationProfile, name, profile.id.clone());
        self.write_through(name, content);

        Ok(profile.id)
    }

    /// Deploy `content` as a new version of an existing configuration
    pub async fn update_configuration(
        &self,
        name: &str,
        content: impl Into<Bytes>,
    ) -> Result<(), CoreError> {
        let content = content.into();
        let profile_id = self.profile_id(name).await?;
        let strategy_id = self.deployment_strategy_id().await?;

        self.publish(&profile_id, content.clone(), &strategy_id).await?;
        self.write_through(name, content);

        Ok(())
    }

    /// Delete every hosted version of a configuration, then its profile
    pub async fn delete_configuration(&self, name: &str) -> Result<(), CoreError> {
        let profile_id = self.profile_id(name).await?;

        let deleted = self.delete_all_versions(&profile_id).await?;
        self.source
            .timeout()
            .run(
                "delete_configuration_profile",
                self.source
                    .store()
                    .delete_configuration_profile(&self.application_id, &profile_id),
            )
            .await?;

        info!(
            "Deleted configuration profile {} ({}) and {} version(s)",
            name, profile_id, deleted
        );

        self.resolver.forget(ResourceKind::ConfigurationProfile, name);
        if let Some(cache) = self.cache() {
            cache.delete(&name.to_string());
        }

        Ok(())
    }

    // ==================== Live reconfiguration ====================

    pub fn is_cache_enabled(&self) -> bool {
        self.caching.read().is_some()
    }

    /// Turn caching on or off, returning the previous state.
    ///
    /// Turning it on creates an empty cache and starts the refresh timer
    /// (requires a tokio runtime); turning it off stops the timer and drops
    /// every cached entry.
    pub fn set_cache_enabled(&self, enabled: bool) -> bool {
        let mut caching = self.caching.write();
        let was_enabled = caching.is_some();

        match (was_enabled, enabled) {
            (false, true) => {
                let settings = *self.settings.read();
                info!(
                    "Starting cache (capacity: {}, refresh interval: {:?})",
                    settings.capacity, settings.refresh_interval
                );

                let cache = Arc::new(ConfigurationCache::new(settings.capacity));
                let refresher = Arc::new(CacheRefresher::new(cache.clone(), self.source.clone()));
                let scheduler = RefreshScheduler::new(refresher, settings.refresh_interval);
                scheduler.start();

                *caching = Some(CacheState { cache, scheduler });
            }
            (true, false) => {
                if let Some(state) = caching.take() {
                    state.scheduler.stop();
                }
                warn!("Refresh timer stopped and cache shut down");
            }
            _ => {}
        }

        was_enabled
    }

    /// Change the cache capacity, returning the previous one.
    ///
    /// A smaller capacity takes effect on the next insert of a new key.
    pub fn set_cache_capacity(&self, capacity: usize) -> Result<usize, CoreError> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| CoreError::Config("cache capacity must be at least 1".to_string()))?;

        let previous = std::mem::replace(&mut self.settings.write().capacity, capacity);
        if let Some(state) = self.caching.read().as_ref() {
            state.cache.set_capacity(capacity);
        }

        warn!("Reset cache capacity from {} to {}", previous, capacity);
        Ok(previous.get())
    }

    /// Change the refresh interval, returning the previous one. Does not
    /// trigger a refresh.
    pub fn set_refresh_interval(&self, interval: Duration) -> Result<Duration, CoreError> {
        if interval.is_zero() {
            return Err(CoreError::Config(
                "refresh interval must be greater than zero".to_string(),
            ));
        }

        let previous = std::mem::replace(&mut self.settings.write().refresh_interval, interval);
        if let Some(state) = self.caching.read().as_ref() {
            state.scheduler.reset(interval);
        }

        Ok(previous)
    }

    /// Change the per-call store timeout, returning the previous one
    pub fn set_timeout(&self, timeout: Duration) -> Result<Duration, CoreError> {
        if timeout.is_zero() {
            return Err(CoreError::Config("timeout must be greater than zero".to_string()));
        }

        let previous = self.source.timeout().set(timeout);
        info!("Reset store timeout from {:?} to {:?}", previous, timeout);
        Ok(previous)
    }

    /// Run one refresh sweep now, if caching is enabled
    pub async fn refresh_now(&self) -> Option<SweepReport> {
        let refresher = self
            .caching
            .read()
            .as_ref()
            .map(|state| state.scheduler.refresher().clone())?;
        Some(refresher.sweep().await)
    }

    /// Stop the refresh timer. Cached entries stay readable.
    pub fn shutdown(&self) {
        if let Some(state) = self.caching.read().as_ref() {
            state.scheduler.stop();
        }
    }

    // ==================== Internals ====================

    fn describe(&self, name: &str) -> String {
        let target = self.source.target();
        format!(
            "configuration {} in environment {} of application {}",
            name, target.environment, target.application
        )
    }

    async fn profile_id(&self, name: &str) -> Result<String, CoreError> {
        self.resolver
            .resolve(ResourceKind::ConfigurationProfile, name)
            .await?
            .ok_or_else(|| CoreError::NotFound(self.describe(name)))
    }

    async fn deployment_strategy_id(&self) -> Result<String, CoreError> {
        self.resolver
            .resolve(ResourceKind::DeploymentStrategy, &self.deployment_strategy)
            .await?
            .ok_or_else(|| {
                CoreError::DeploymentStrategyMissing(format!(
                    "deployment strategy {} does not exist",
                    self.deployment_strategy
                ))
            })
    }

    /// Create a hosted version and deploy it to the environment
    async fn publish(
        &self,
        profile_id: &str,
        content: Bytes,
        strategy_id: &str,
    ) -> Result<i32, CoreError> {
        let store = self.source.store();
        let timeout = self.source.timeout();
        let content_type = sniff_content_type(&content);

        let version = timeout
            .run(
                "create_hosted_configuration_version",
                store.create_hosted_configuration_version(
                    &self.application_id,
                    profile_id,
                    content,
                    content_type,
                ),
            )
            .await?;

        let request = StartDeploymentRequest {
            application_id: self.application_id.clone(),
            environment_id: self.environment_id.clone(),
            configuration_profile_id: profile_id.to_string(),
            configuration_version: version.to_string(),
            deployment_strategy_id: strategy_id.to_string(),
        };
        let deployment = timeout
            .run("start_deployment", store.start_deployment(&request))
            .await?;

        info!(
            "Deployed version {} of profile {} (deployment {})",
            version, profile_id, deployment
        );
        Ok(version)
    }

    /// Delete hosted versions page by page until the listing is exhausted
    async fn delete_all_versions(&self, profile_id: &str) -> Result<usize, CoreError> {
        let store = self.source.store();
        let timeout = self.source.timeout();
        let mut deleted = 0;
        let mut next_token: Option<String> = None;

        loop {
            let page = timeout
                .run(
                    "list_hosted_configuration_versions",
                    store.list_hosted_configuration_versions(
                        &self.application_id,
                        profile_id,
                        next_token.as_deref(),
                    ),
                )
                .await?;

            for version in page.items {
                timeout
                    .run(
                        "delete_hosted_configuration_version",
                        store.delete_hosted_configuration_version(
                            &self.application_id,
                            profile_id,
                            version,
                        ),
                    )
                    .await?;
                deleted += 1;
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(deleted)
    }

    fn write_through(&self, name: &str, content: Bytes) {
        if let Some(cache) = self.cache() {
            self.store_in_cache(
                &cache,
                name,
                CachedConfiguration::new(Some(content), None, EntryOrigin::WriteThrough),
            );
        }
    }

    fn store_in_cache(&self, cache: &ConfigurationCache, name: &str, entry: CachedConfiguration) {
        let evicted = cache.add(name.to_string(), entry);
        for (key, _) in &evicted {
            debug!("Evicted configuration {} to make room for {}", key, name);
        }
        if !evicted.is_empty() {
            metrics::counter!("appconfig_cache_evictions_total").increment(evicted.len() as u64);
        }
    }
}

/// HTTP client settings for a facade.
///
/// The transport gets no timeout of its own: `CallTimeout` is the only
/// deadline, so `set_timeout` applies to HTTP calls and expiry surfaces as
/// `CoreError::Transient`.
fn http_store_config(options: &FacadeOptions, target: &StoreTarget) -> HttpConfigStoreConfig {
    HttpConfigStoreConfig {
        region: target.region.clone(),
        endpoint: options.endpoint.clone(),
        auth_token: options.auth_token.clone(),
        timeout: None,
        skip_tls_verify: options.skip_tls_verify,
    }
}

/// Content type for a hosted version: text when the payload is UTF-8
fn sniff_content_type(content: &[u8]) -> &'static str {
    if std::str::from_utf8(content).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}
