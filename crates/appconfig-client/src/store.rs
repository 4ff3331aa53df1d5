//! Configuration store trait

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Parameters for fetching one configuration
#[derive(Debug, Clone)]
pub struct GetConfigurationRequest {
    pub application: String,
    pub environment: String,
    pub client_id: String,
    pub configuration: String,
    /// Version token from a previous fetch. When set, the store answers with
    /// empty content if nothing changed since that version.
    pub client_version: Option<String>,
}

/// Result of a configuration fetch
#[derive(Debug, Clone, Default)]
pub struct FetchedConfiguration {
    /// Empty when unchanged since the requested version, or when the
    /// configuration exists but has no content.
    pub content: Bytes,
    pub version: Option<String>,
    pub content_type: Option<String>,
}

impl FetchedConfiguration {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A named resource and its store identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

impl ResourceSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One page of a listing. Absence of `next_token` ends pagination.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Parameters for deploying a configuration version
#[derive(Debug, Clone)]
pub struct StartDeploymentRequest {
    pub application_id: String,
    pub environment_id: String,
    pub configuration_profile_id: String,
    pub configuration_version: String,
    pub deployment_strategy_id: String,
}

/// Remote configuration store
///
/// Implementations talk to a versioned configuration service. The cache
/// layer only relies on this contract, so tests can substitute an
/// in-memory store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch a configuration, conditionally when `client_version` is set
    async fn get_configuration(
        &self,
        request: &GetConfigurationRequest,
    ) -> Result<FetchedConfiguration, StoreError>;

    /// List applications in the account
    async fn list_applications(
        &self,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError>;

    /// List environments of an application
    async fn list_environments(
        &self,
        application_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError>;

    /// List configuration profiles of an application
    async fn list_configuration_profiles(
        &self,
        application_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError>;

    /// List deployment strategies in the account
    async fn list_deployment_strategies(
        &self,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError>;

    /// Create a configuration profile
    async fn create_configuration_profile(
        &self,
        application_id: &str,
        name: &str,
        location_uri: &str,
    ) -> Result<ResourceSummary, StoreError>;

    /// Create a hosted configuration version, returns its version number
    async fn create_hosted_configuration_version(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<i32, StoreError>;

    /// List version numbers of hosted configuration versions
    async fn list_hosted_configuration_versions(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<i32>, StoreError>;

    /// Delete one hosted configuration version
    async fn delete_hosted_configuration_version(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
        version_number: i32,
    ) -> Result<(), StoreError>;

    /// Delete a configuration profile (all versions must be deleted first)
    async fn delete_configuration_profile(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
    ) -> Result<(), StoreError>;

    /// Start a deployment, returns the deployment number
    async fn start_deployment(&self, request: &StartDeploymentRequest)
        -> Result<u32, StoreError>;
}
