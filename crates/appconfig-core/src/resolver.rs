//! Resource name resolution
//!
//! Maps human-readable names of applications, environments, configuration
//! profiles and deployment strategies to store identifiers. Mappings come
//! from bulk listings only; a lookup miss triggers exactly one re-listing of
//! that resource kind before the name is reported as absent.

use appconfig_client::{ConfigStore, Page, ResourceSummary};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::source::CallTimeout;

/// Kinds of named resources in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Application,
    Environment,
    ConfigurationProfile,
    DeploymentStrategy,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Application => "application",
            ResourceKind::Environment => "environment",
            ResourceKind::ConfigurationProfile => "configuration profile",
            ResourceKind::DeploymentStrategy => "deployment strategy",
        }
    }

    /// Whether listings of this kind are scoped to an application
    pub fn is_application_scoped(&self) -> bool {
        matches!(
            self,
            ResourceKind::Environment | ResourceKind::ConfigurationProfile
        )
    }

    fn index(&self) -> usize {
        match self {
            ResourceKind::Application => 0,
            ResourceKind::Environment => 1,
            ResourceKind::ConfigurationProfile => 2,
            ResourceKind::DeploymentStrategy => 3,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lazily populated name-to-id maps for one facade instance
pub struct NameResolver {
    store: Arc<dyn ConfigStore>,
    timeout: CallTimeout,
    mappings: RwLock<HashMap<ResourceKind, HashMap<String, String>>>,
    /// Scope for environment and configuration profile listings
    application_id: RwLock<Option<String>>,
    listings: [AtomicU64; 4],
}

impl NameResolver {
    /// Create an empty resolver
    pub fn new(store: Arc<dyn ConfigStore>, timeout: CallTimeout) -> Self {
        Self {
            store,
            timeout,
            mappings: RwLock::new(HashMap::new()),
            application_id: RwLock::new(None),
            listings: Default::default(),
        }
    }

    /// Scope application-level listings to `application_id`
    pub fn bind_application(&self, application_id: impl Into<String>) {
        *self.application_id.write() = Some(application_id.into());
    }

    pub fn application_id(&self) -> Option<String> {
        self.application_id.read().clone()
    }

    /// Look up a mapping without contacting the store
    pub fn lookup(&self, kind: ResourceKind, name: &str) -> Option<String> {
        self.mappings
            .read()
            .get(&kind)
            .and_then(|names| names.get(name))
            .cloned()
    }

    /// Resolve a name, re-listing its kind once on a miss.
    ///
    /// `Ok(None)` means the resource does not exist; callers should not retry.
    pub async fn resolve(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<String>, CoreError> {
        if let Some(id) = self.lookup(kind, name) {
            return Ok(Some(id));
        }

        debug!("Resolver miss for {} {}, re-listing", kind, name);
        self.refresh(kind).await?;

        let id = self.lookup(kind, name);
        if id.is_none() {
            debug!("{} {} does not exist", kind, name);
        }
        Ok(id)
    }

    /// Re-list every resource of `kind` and merge the result into the map.
    ///
    /// The map is only updated once the whole listing has succeeded. Returns
    /// the number of resources listed.
    pub async fn refresh(&self, kind: ResourceKind) -> Result<usize, CoreError> {
        self.listings[kind.index()].fetch_add(1, Ordering::Relaxed);

        let mut listed: Vec<ResourceSummary> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self.list_page(kind, next_token.as_deref()).await?;
            listed.extend(page.items);

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        let count = listed.len();
        {
            let mut mappings = self.mappings.write();
            let names = mappings.entry(kind).or_default();
            for resource in listed {
                names.insert(resource.name, resource.id);
            }
        }

        info!("Listed {} {} resource(s)", count, kind);
        Ok(count)
    }

    /// Record a mapping for a resource whose creation has succeeded
    pub fn register(&self, kind: ResourceKind, name: impl Into<String>, id: impl Into<String>) {
        self.mappings
            .write()
            .entry(kind)
            .or_default()
            .insert(name.into(), id.into());
    }

    /// Drop a mapping after the resource has been deleted
    pub fn forget(&self, kind: ResourceKind, name: &str) -> Option<String> {
        self.mappings
            .write()
            .get_mut(&kind)
            .and_then(|names| names.remove(name))
    }

    /// Number of bulk listings performed for `kind`
    pub fn listing_count(&self, kind: ResourceKind) -> u64 {
        self.listings[kind.index()].load(Ordering::Relaxed)
    }

    async fn list_page(
        &self,
        kind: ResourceKind,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, CoreError> {
        let application_id = if kind.is_application_scoped() {
            Some(self.application_id().ok_or_else(|| {
                CoreError::Config(format!("cannot list {} before the application is resolved", kind))
            })?)
        } else {
            None
        };

        let store = &self.store;
        match kind {
            ResourceKind::Application => {
                self.timeout
                    .run("list_applications", store.list_applications(next_token))
                    .await
            }
            ResourceKind::DeploymentStrategy => {
                self.timeout
                    .run(
                        "list_deployment_strategies",
                        store.list_deployment_strategies(next_token),
                    )
                    .await
            }
            ResourceKind::Environment => {
                let application_id = application_id.unwrap_or_default();
                self.timeout
                    .run(
                        "list_environments",
                        store.list_environments(&application_id, next_token),
                    )
                    .await
            }
            ResourceKind::ConfigurationProfile => {
                let application_id = application_id.unwrap_or_default();
                self.timeout
                    .run(
                        "list_configuration_profiles",
                        store.list_configuration_profiles(&application_id, next_token),
                    )
                    .await
            }
        }
    }
}
