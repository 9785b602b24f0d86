//! Cloud Foundry v2 API discovery client.

use super::PlatformClient;
use crate::core::config::PlatformConfig;
use crate::core::{ExporterError, Result, Workload, WorkloadGuid, WorkloadKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const APPS_PATH: &str = "/v2/apps?inline-relations-depth=2&results-per-page=100";
const SERVICES_PATH: &str = "/v2/service_instances?inline-relations-depth=2&results-per-page=100";

#[derive(Debug, Deserialize)]
struct Info {
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next_url: Option<String>,
    #[serde(default = "Vec::new")]
    resources: Vec<Resource<T>>,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    metadata: Metadata,
    entity: T,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct Inline<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct AppEntity {
    name: String,
    #[serde(default)]
    instances: u32,
    #[serde(default)]
    state: String,
    #[serde(default)]
    space: Option<Inline<SpaceEntity>>,
}

#[derive(Debug, Deserialize)]
struct ServiceInstanceEntity {
    name: String,
    #[serde(default)]
    space: Option<Inline<SpaceEntity>>,
}

#[derive(Debug, Deserialize)]
struct SpaceEntity {
    name: String,
    #[serde(default)]
    organization: Option<Inline<OrganizationEntity>>,
}

#[derive(Debug, Deserialize)]
struct OrganizationEntity {
    name: String,
}

/// Organisation and space names of an inlined space, empty when not inlined.
fn placement(space: Option<&Inline<SpaceEntity>>) -> (String, String) {
    match space {
        Some(space) => {
            let organisation = space
                .entity
                .organization
                .as_ref()
                .map(|org| org.entity.name.clone())
                .unwrap_or_default();
            (organisation, space.entity.name.clone())
        }
        None => (String::new(), String::new()),
    }
}

/// Discovers started applications (and optionally service instances) through
/// the v2 API, authenticating against UAA.
pub struct CloudFoundryClient {
    http: reqwest::Client,
    api_endpoint: String,
    username: String,
    password: String,
    client_id: String,
    client_secret: String,
}

impl CloudFoundryClient {
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .build()?;

        Ok(Self {
            http,
            api_endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    async fn token_endpoint(&self) -> Result<String> {
        let url = format!("{}/v2/info", self.api_endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExporterError::auth(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ExporterError::auth(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let info: Info = response.json().await?;
        Ok(info.token_endpoint.trim_end_matches('/').to_string())
    }

    async fn get_page<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<Page<T>> {
        let url = format!("{}{}", self.api_endpoint, path);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| ExporterError::discovery(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED || body.contains("invalid_token") {
                return Err(ExporterError::auth(format!("GET {} returned {}", url, status)));
            }
            return Err(ExporterError::discovery(format!(
                "GET {} returned {}: {}",
                url, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ExporterError::discovery(format!("invalid response from {}: {}", url, e)))
    }

    /// Follow `next_url` until every page of `path` has been read.
    async fn list_all<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<Vec<Resource<T>>> {
        let mut resources = Vec::new();
        let mut next = Some(path.to_string());

        while let Some(path) = next {
            let page: Page<T> = self.get_page(token, &path).await?;
            resources.extend(page.resources);
            next = page.next_url.filter(|url| !url.is_empty());
        }

        Ok(resources)
    }
}

#[async_trait]
impl PlatformClient for CloudFoundryClient {
    async fn authenticate(&self) -> Result<String> {
        let token_endpoint = self.token_endpoint().await?;
        let url = format!("{}/oauth/token", token_endpoint);

        let form: Vec<(&str, &str)> = if self.username.is_empty() {
            vec![("grant_type", "client_credentials")]
        } else {
            vec![
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ]
        };

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ExporterError::auth(format!("POST {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ExporterError::auth(format!(
                "POST {} returned {}",
                url,
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(format!("{} {}", token.token_type, token.access_token))
    }

    async fn list_workloads(&self, token: &str) -> Result<Vec<Workload>> {
        let apps: Vec<Resource<AppEntity>> = self.list_all(token, APPS_PATH).await?;
        let mut workloads = Vec::with_capacity(apps.len());

        for app in apps {
            if app.entity.state != "STARTED" {
                continue;
            }
            let (organisation, space) = placement(app.entity.space.as_ref());
            workloads.push(Workload {
                guid: WorkloadGuid::new(app.metadata.guid)?,
                name: app.entity.name,
                organisation,
                space,
                instances: app.entity.instances,
                kind: WorkloadKind::App,
            });
        }

        tracing::debug!("Discovered {} started applications", workloads.len());
        Ok(workloads)
    }

    async fn list_services(&self, token: &str) -> Result<Vec<Workload>> {
        let services: Vec<Resource<ServiceInstanceEntity>> =
            self.list_all(token, SERVICES_PATH).await?;

        services
            .into_iter()
            .map(|service| {
                let (organisation, space) = placement(service.entity.space.as_ref());
                Ok(Workload {
                    guid: WorkloadGuid::new(service.metadata.guid)?,
                    name: service.entity.name,
                    organisation,
                    space,
                    instances: 1,
                    kind: WorkloadKind::Service,
                })
            })
            .collect()
    }
}
