//! In-memory configuration store for tests

use appconfig_client::{
    ConfigStore, FetchedConfiguration, GetConfigurationRequest, Page, ResourceSummary,
    StartDeploymentRequest, StoreError,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::config::{FacadeOptions, StoreTarget};

pub const APP_ID: &str = "app-0001";
pub const ENV_ID: &str = "env-0001";
pub const STRATEGY_ID: &str = "strategy-0001";

#[derive(Default)]
struct Profile {
    id: String,
    versions: Vec<(i32, Bytes)>,
    next_version: i32,
    deployed: Option<(String, Bytes)>,
}

#[derive(Default)]
struct State {
    applications: Vec<ResourceSummary>,
    environments: Vec<ResourceSummary>,
    strategies: Vec<ResourceSummary>,
    profiles: Vec<(String, Profile)>,
    next_profile: usize,
}

#[derive(Default)]
pub struct Counters {
    pub gets: AtomicUsize,
    pub conditional_gets: AtomicUsize,
    pub application_listings: AtomicUsize,
    pub environment_listings: AtomicUsize,
    pub profile_listings: AtomicUsize,
    pub strategy_listings: AtomicUsize,
    pub version_deletes: AtomicUsize,
    pub deployments: AtomicUsize,
}

/// Store fake holding one application with one environment
pub struct MemoryStore {
    state: Mutex<State>,
    pub counters: Counters,
    /// `next_token` of every hosted version listing, in call order
    pub version_tokens: Mutex<Vec<Option<String>>>,
    page_size: usize,
    versioned: bool,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    /// Store with application `app1`, environment `Test` and the default
    /// deployment strategy
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let state = State {
            applications: vec![ResourceSummary::new(APP_ID, "app1")],
            environments: vec![ResourceSummary::new(ENV_ID, "Test")],
            strategies: vec![ResourceSummary::new(STRATEGY_ID, "AllAtOnceNotBake")],
            ..State::default()
        };

        Self {
            state: Mutex::new(state),
            counters: Counters::default(),
            version_tokens: Mutex::new(Vec::new()),
            page_size,
            versioned: true,
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn without_strategies(self) -> Self {
        self.state.lock().strategies.clear();
        self
    }

    /// Omit version tokens from reads, so every read returns full content
    pub fn without_versions(mut self) -> Self {
        self.versioned = false;
        self
    }

    pub fn add_application(&self, id: &str, name: &str) {
        self.state.lock().applications.push(ResourceSummary::new(id, name));
    }

    /// Create a profile and deploy `content` as its first version
    pub fn seed(&self, name: &str, content: &str) {
        let mut state = self.state.lock();
        let id = Self::insert_profile(&mut state, name);
        let profile = Self::profile_by_id(&mut state, &id).unwrap();
        profile.next_version = 1;
        profile.versions.push((1, Bytes::from(content.to_string())));
        profile.deployed = Some(("1".to_string(), Bytes::from(content.to_string())));
    }

    /// Create a profile whose deployed configuration is empty
    pub fn seed_empty(&self, name: &str) {
        let mut state = self.state.lock();
        let id = Self::insert_profile(&mut state, name);
        let profile = Self::profile_by_id(&mut state, &id).unwrap();
        profile.deployed = Some(("1".to_string(), Bytes::new()));
    }

    /// Deploy new content out of band, bumping the version
    pub fn publish(&self, name: &str, content: &str) {
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
            .unwrap();
        profile.next_version += 1;
        let version = profile.next_version;
        let bytes = Bytes::from(content.to_string());
        profile.versions.push((version, bytes.clone()));
        profile.deployed = Some((version.to_string(), bytes));
    }

    /// Remove a profile out of band
    pub fn remove(&self, name: &str) {
        self.state.lock().profiles.retain(|(n, _)| n != name);
    }

    pub fn fail_gets_for(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn panic_on_get(&self, name: &str) {
        self.panicking.lock().insert(name.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.state.lock().profiles.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn version_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .profiles
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.versions.len())
            .unwrap_or(0)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn insert_profile(state: &mut State, name: &str) -> String {
        state.next_profile += 1;
        let id = format!("profile-{:04}", state.next_profile);
        state.profiles.push((
            name.to_string(),
            Profile {
                id: id.clone(),
                ..Profile::default()
            },
        ));
        id
    }

    fn profile_by_id<'a>(state: &'a mut State, id: &str) -> Option<&'a mut Profile> {
        state
            .profiles
            .iter_mut()
            .map(|(_, p)| p)
            .find(|p| p.id == id)
    }

    fn paginate<T: Clone>(&self, items: &[T], next_token: Option<&str>) -> Page<T> {
        let start: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        let page = items.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < items.len()).then(|| end.to_string());
        Page {
            items: page,
            next_token,
        }
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_configuration(
        &self,
        request: &GetConfigurationRequest,
    ) -> Result<FetchedConfiguration, StoreError> {
        self.pause().await;
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        if request.client_version.is_some() {
            self.counters.conditional_gets.fetch_add(1, Ordering::SeqCst);
        }

        if self.panicking.lock().contains(&request.configuration) {
            panic!("store fault for {}", request.configuration);
        }
        if self.failing.lock().contains(&request.configuration) {
            return Err(StoreError::Upstream {
                status: 500,
                message: "internal failure".to_string(),
            });
        }

        let state = self.state.lock();
        let deployed = state
            .profiles
            .iter()
            .find(|(n, _)| *n == request.configuration)
            .and_then(|(_, p)| p.deployed.clone());

        let (version, content) = deployed.ok_or_else(|| {
            StoreError::NotFound(format!(
                "Configuration Profile Id {} could not be found for account",
                request.configuration
            ))
        })?;

        if !self.versioned {
            return Ok(FetchedConfiguration {
                content,
                version: None,
                content_type: Some("text/plain".to_string()),
            });
        }

        if request.client_version.as_deref() == Some(version.as_str()) {
            return Ok(FetchedConfiguration {
                content: Bytes::new(),
                version: Some(version),
                content_type: None,
            });
        }

        Ok(FetchedConfiguration {
            content,
            version: Some(version),
            content_type: Some("text/plain".to_string()),
        })
    }

    async fn list_applications(
        &self,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        self.pause().await;
        self.counters.application_listings.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Ok(self.paginate(&state.applications, next_token))
    }

    async fn list_environments(
        &self,
        application_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        self.counters.environment_listings.fetch_add(1, Ordering::SeqCst);
        if application_id != APP_ID {
            return Ok(Page::last(vec![]));
        }
        let state = self.state.lock();
        Ok(self.paginate(&state.environments, next_token))
    }

    async fn list_configuration_profiles(
        &self,
        application_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        self.counters.profile_listings.fetch_add(1, Ordering::SeqCst);
        if application_id != APP_ID {
            return Ok(Page::last(vec![]));
        }
        let state = self.state.lock();
        let profiles: Vec<ResourceSummary> = state
            .profiles
            .iter()
            .map(|(n, p)| ResourceSummary::new(p.id.clone(), n.clone()))
            .collect();
        Ok(self.paginate(&profiles, next_token))
    }

    async fn list_deployment_strategies(
        &self,
        next_token: Option<&str>,
    ) -> Result<Page<ResourceSummary>, StoreError> {
        self.counters.strategy_listings.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Ok(self.paginate(&state.strategies, next_token))
    }

    async fn create_configuration_profile(
        &self,
        _application_id: &str,
        name: &str,
        _location_uri: &str,
    ) -> Result<ResourceSummary, StoreError> {
        let mut state = self.state.lock();
        let id = Self::insert_profile(&mut state, name);
        Ok(ResourceSummary::new(id, name))
    }

    async fn create_hosted_configuration_version(
        &self,
        _application_id: &str,
        configuration_profile_id: &str,
        content: Bytes,
        _content_type: &str,
    ) -> Result<i32, StoreError> {
        let mut state = self.state.lock();
        let profile = Self::profile_by_id(&mut state, configuration_profile_id)
            .ok_or_else(|| StoreError::NotFound(configuration_profile_id.to_string()))?;
        profile.next_version += 1;
        let version = profile.next_version;
        profile.versions.push((version, content));
        Ok(version)
    }

    async fn list_hosted_configuration_versions(
        &self,
        _application_id: &str,
        configuration_profile_id: &str,
        next_token: Option<&str>,
    ) -> Result<Page<i32>, StoreError> {
        self.version_tokens.lock().push(next_token.map(str::to_string));

        let mut state = self.state.lock();
        let profile = Self::profile_by_id(&mut state, configuration_profile_id)
            .ok_or_else(|| StoreError::NotFound(configuration_profile_id.to_string()))?;

        // The token is the last version listed, so deleting listed versions
        // does not shift later pages
        let after: i32 = match next_token {
            Some(token) => token
                .parse()
                .map_err(|_| StoreError::InvalidResponse(format!("bad token {}", token)))?,
            None => 0,
        };
        let remaining: Vec<i32> = profile
            .versions
            .iter()
            .map(|(v, _)| *v)
            .filter(|v| *v > after)
            .collect();
        let items: Vec<i32> = remaining.iter().take(self.page_size).copied().collect();
        let next_token = (remaining.len() > items.len())
            .then(|| items.last().map(|v| v.to_string()))
            .flatten();

        Ok(Page { items, next_token })
    }

    async fn delete_hosted_configuration_version(
        &self,
        _application_id: &str,
        configuration_profile_id: &str,
        version_number: i32,
    ) -> Result<(), StoreError> {
        self.counters.version_deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let profile = Self::profile_by_id(&mut state, configuration_profile_id)
            .ok_or_else(|| StoreError::NotFound(configuration_profile_id.to_string()))?;
        profile.versions.retain(|(v, _)| *v != version_number);
        Ok(())
    }

    async fn delete_configuration_profile(
        &self,
        _application_id: &str,
        configuration_profile_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let before = state.profiles.len();
        state.profiles.retain(|(_, p)| p.id != configuration_profile_id);
        if state.profiles.len() == before {
            return Err(StoreError::NotFound(configuration_profile_id.to_string()));
        }
        Ok(())
    }

    async fn start_deployment(
        &self,
        request: &StartDeploymentRequest,
    ) -> Result<u32, StoreError> {
        self.counters.deployments.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let profile = Self::profile_by_id(&mut state, &request.configuration_profile_id)
            .ok_or_else(|| StoreError::NotFound(request.configuration_profile_id.clone()))?;
        let content = profile
            .versions
            .iter()
            .find(|(v, _)| v.to_string() == request.configuration_version)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| StoreError::NotFound(request.configuration_version.clone()))?;
        profile.deployed = Some((request.configuration_version.clone(), content));
        Ok(1)
    }
}

/// Serve every request on a local port, answering with `body` as version
/// `1` after `delay`. Returns the endpoint URL.
pub async fn serve_slowly(body: &'static str, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                tokio::time::sleep(delay).await;

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConfiguration-Version: 1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    endpoint
}

pub fn options() -> FacadeOptions {
    FacadeOptions::new("app1")
        .with_region("us-east-1")
        .with_environment("Test")
}

pub fn target() -> StoreTarget {
    options().validate().unwrap()
}
