//! HTTP configuration store client

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::StoreError;
use crate::store::{
    ConfigStore, FetchedConfiguration, GetConfigurationRequest, Page, ResourceSummary,
    StartDeploymentRequest,
};

const CONFIGURATION_VERSION_HEADER: &str = "configuration-version";
const VERSION_NUMBER_HEADER: &str = "version-number";

/// HTTP store client configuration
#[derive(Clone, Debug)]
pub struct HttpConfigStoreConfig {
    /// Region the store lives in, used to derive the default endpoint
    pub region: String,
    /// Endpoint override (e.g. a local emulator or signing gateway)
    pub endpoint: Option<String>,
    /// Bearer token sent as `Authorization` when set
    pub auth_token: Option<String>,
    /// Transport-level timeout for each request. Callers that enforce
    /// their own per-call deadline leave this unset.
    pub timeout: Option<Duration>,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
}

impl HttpConfigStoreConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            auth_token: None,
            timeout: None,
            skip_tls_verify: false,
        }
    }

    /// Endpoint URL requests are sent to
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://appconfig.{}.amazonaws.com", self.region),
        }
    }
}

/// Listing response body
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(rename = "Items", default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "NextToken", default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostedVersionSummary {
    #[serde(rename = "VersionNumber")]
    version_number: i32,
}

#[derive(Debug, Deserialize)]
struct DeploymentResponse {
    #[serde(rename = "DeploymentNumber")]
    deployment_number: u32,
}

/// Configuration store client over the AppConfig REST interface
pub struct HttpConfigStore {
    config: HttpConfigStoreConfig,
    base: Url,
    client: Client,
}

impl HttpConfigStore {
    /// Create a new store client
    pub fn new(config: HttpConfigStoreConfig) -> Result<Self, StoreError> {
        let mut builder = Client::builder();

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let base = Url::parse(&config.endpoint_url())?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidEndpoint(format!(
                "{} cannot carry request paths",
                base
            )));
        }

        let client = builder.build()?;

        info!("Created configuration store client for {}", base);

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Build a URL from escaped path segments
    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidEndpoint(format!("{} cannot carry request paths", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_next_token(mut url: Url, next_token: Option<&str>) -> Url {
        if let Some(token) = next_token {
            url.query_pairs_mut().append_pair("next_token", token);
        }
        url
    }

    /// Attach authentication and send
    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let request = match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        Self::check_status(response).await
    }

    /// Map non-success statuses to store errors
    async fn check_status(response: Response) -> Result<Response, StoreError> {
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::NotFound(message));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Unauthorized);
        }

        if !status.is_success() {
            return Err(StoreError::Upstream {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response)
    }

    async fn list<T: DeserializeOwned>(&self, url: Url) -> Result<Page<T>, StoreError> {
        debug!("Listing: {}", url);

        let response = self.send(self.client.get(url)).await?;
        let body = response.bytes().await?;
        parse_list_page(&body)
    }
}

/// Parse a listing response body into a page
fn parse_list_page<T: DeserializeOwned>(body: &[u8]) -> Result<Page<T>, StoreError> {
    let list: ListResponse<T> = serde_json::from_slice(body)
        .map_err(|e| StoreError::InvalidResponse(format!("Malformed listing: {}", e)))?;

    Ok(Page {
        items: list.items,
        next_token: list.next_token.filter(|t| !t.is_empty()),
    })
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    async fn get_configuration(
        &self,
        request: &GetConfigurationRequest,
    ) -> Result<FetchedConfiguration, StoreError> {
        let mut url = self.url(&[
            "applications",
            &request.application,
            "environments",
            &request.environment,
            "configurations",
            &request.configuration,
        ])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &request.client_id);
            if let Some(version) = &request.client_version {
                query.append_pair("client_configuration_version", version);
            }
        }

        debug!("Fetching configuration: {}", url);

        let response = self.send(self.client.get(url)).await.map_err(|e| match e {
            StoreError::NotFound(_) => StoreError::NotFound(format!(
                "Configuration {} could not be found for application {} environment {}",
                request.configuration, request.application, request.environment
            )),
            other => other,
        })?;

        let version = header_string(&response, CONFIGURATION_VERSION_HEADER);
        let content_type = header_string(&response, reqwest::header::CONTENT_TYPE.as_str());
        let content = response.bytes().await?;

        Ok(FetchedConfiguration {
            content,
            version,
            content_type,
        })
    }

    async fn list_applications(
        &self,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        let url = Self::with_next_token(self.url(&["applications"])?, next_token);
        self.list(url).await
    }

    async fn list_environments(
        &self,
        application_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        let url = self.url(&["applications", application_id, "environments"])?;
        self.list(Self::with_next_token(url, next_token)).await
    }

    async fn list_configuration_profiles(
        &self,
        application_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        let url = self.url(&["applications", application_id, "configurationprofiles"])?;
        self.list(Self::with_next_token(url, next_token)).await
    }

    async fn list_deployment_strategies(
        &self,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        let url = Self::with_next_token(self.url(&["deploymentstrategies"])?, next_token);
        self.list(url).await
    }

    async fn create_configuration_profile(
        &self,
        application_id: &str,
        name: &str,
        location_uri: &str,
    ) -> Result<ResourceSummary, StoreError> {
        let url = self.url(&["applications", application_id, "configurationprofiles"])?;

        debug!("Creating configuration profile {} at {}", name, url);

        let request = self
            .client
            .post(url)
            .json(&json!({ "Name": name, "LocationUri": location_uri }));
        let response = self.send(request).await?;

        Ok(response.json::<ResourceSummary>().await?)
    }

    async fn create_hosted_configuration_version(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<i32, StoreError> {
        let url = self.url(&[
            "applications",
            application_id,
            "configurationprofiles",
            configuration_profile_id,
            "hostedconfigurationversions",
        ])?;

        debug!("Creating hosted configuration version ({} bytes): {}", content.len(), url);

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(content);
        let response = self.send(request).await?;

        header_string(&response, VERSION_NUMBER_HEADER)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StoreError::InvalidResponse("Missing Version-Number header".to_string()))
    }

    async fn list_hosted_configuration_versions(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<i32>, StoreError> {
        let url = self.url(&[
            "applications",
            application_id,
            "configurationprofiles",
            configuration_profile_id,
            "hostedconfigurationversions",
        ])?;

        let page: Page<HostedVersionSummary> =
            self.list(Self::with_next_token(url, next_token)).await?;

        Ok(Page {
            items: page.items.into_iter().map(|v| v.version_number).collect(),
            next_token: page.next_token,
        })
    }

    async fn delete_hosted_configuration_version(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
        version_number: i32,
    ) -> Result<(), StoreError> {
        let version = version_number.to_string();
        let url = self.url(&[
            "applications",
            application_id,
            "configurationprofiles",
            configuration_profile_id,
            "hostedconfigurationversions",
            &version,
        ])?;

        debug!("Deleting hosted configuration version: {}", url);

        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn delete_configuration_profile(
        &self,
        application_id: &str,
        configuration_profile_id: &str,
    ) -> Result<(), StoreError> {
        let url = self.url(&[
            "applications",
            application_id,
            "configurationprofiles",
            configuration_profile_id,
        ])?;

        debug!("Deleting configuration profile: {}", url);

        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn start_deployment(
        &self,
        request: &StartDeploymentRequest,
    ) -> Result<u32, StoreError> {
        let url = self.url(&[
            "applications",
            &request.application_id,
            "environments",
            &request.environment_id,
            "deployments",
        ])?;

        debug!(
            "Starting deployment of profile {} version {}",
            request.configuration_profile_id, request.configuration_version
        );

        let body = json!({
            "ConfigurationProfileId": request.configuration_profile_id,
            "ConfigurationVersion": request.configuration_version,
            "DeploymentStrategyId": request.deployment_strategy_id,
        });
        let response = self.send(self.client.post(url).json(&body)).await?;
        let deployment: DeploymentResponse = response.json().await?;

        Ok(deployment.deployment_number)
    }
}
