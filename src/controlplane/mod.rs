//! Control-plane internal data API client
//!
//! Every call goes through the bounded [`WorkerPool`] and the fixed-delay retry
//! loop. Outcomes:
//!
//! - 2xx with a body is data, 204 (or an empty 2xx body on artifact calls) is "nothing there"
//! - 4xx is terminal and returned to the caller
//! - transport errors and 5xx are retried up to `max_retries` attempts, then returned once

pub mod pool;
pub mod types;

use std::sync::Arc;

use base64::Engine;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::config::ControlPlaneConfig;
use crate::retry::{retry_while, RetryConfig};
use crate::{Error, Result};

pub use pool::WorkerPool;

/// Path prefix of the internal data API
pub const INTERNAL_DATA_PATH: &str = "internal/data/v1/";

const TENANT_HEADER: &str = "x-wso2-tenant";
const POLICY_TENANT_HEADER: &str = "xWSO2Tenant";
const ALL_TENANTS: &str = "ALL";

/// What to fetch from the control plane
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    /// All applications
    Applications,
    /// All subscriptions
    Subscriptions,
    /// All application key mappings
    ApplicationKeyMappings,
    /// API throttling policies, optionally one by name, for a tenant or all
    ApiPolicies {
        /// Policy name filter
        name: Option<String>,
        /// Tenant domain, `None` for all tenants
        tenant: Option<String>,
    },
    /// Subscription throttling policies, optionally one by name
    SubscriptionPolicies {
        /// Policy name filter
        name: Option<String>,
        /// Tenant domain, `None` for all tenants
        tenant: Option<String>,
    },
    /// All key managers
    KeyManagers,
    /// LLM providers, for a tenant or all
    AiProviders {
        /// Tenant domain, `None` for all tenants
        tenant: Option<String>,
    },
    /// Metadata of APIs deployed to the gateway labels
    Apis {
        /// Gateway labels
        labels: Vec<String>,
    },
    /// API project archive(s) for the given APIs and gateway labels
    RuntimeArtifacts {
        /// API UUIDs; empty means every API of the labels
        api_ids: Vec<String>,
        /// Gateway labels
        labels: Vec<String>,
    },
}

impl Resource {
    fn path(&self) -> &'static str {
        match self {
            Self::Applications => "applications",
            Self::Subscriptions => "subscriptions",
            Self::ApplicationKeyMappings => "application-key-mappings",
            Self::ApiPolicies { .. } => "api-policies",
            Self::SubscriptionPolicies { .. } => "subscription-policies",
            Self::KeyManagers => "keymanagers",
            Self::AiProviders { .. } => "llm-providers",
            Self::Apis { .. } => "apis",
            Self::RuntimeArtifacts { api_ids, .. } if api_ids.len() > 1 => "retrieve-api-artifacts",
            Self::RuntimeArtifacts { .. } => "runtime-artifacts",
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::ApiPolicies { name: Some(n), .. } | Self::SubscriptionPolicies { name: Some(n), .. } => {
                vec![("policyName", n.clone())]
            }
            Self::Apis { labels } => vec![("gatewayLabel", encode_labels(labels))],
            Self::RuntimeArtifacts { api_ids, labels } => {
                let mut q = Vec::new();
                if let [id] = api_ids.as_slice() {
                    q.push(("apiId", id.clone()));
                }
                q.push(("gatewayLabel", encode_labels(labels)));
                q.push(("type", "Envoy".to_string()));
                q
            }
            _ => Vec::new(),
        }
    }

    fn tenant_header(&self) -> (&'static str, String) {
        match self {
            Self::ApiPolicies { tenant, .. }
            | Self::SubscriptionPolicies { tenant, .. }
            | Self::AiProviders { tenant } => (
                POLICY_TENANT_HEADER,
                tenant.clone().unwrap_or_else(|| ALL_TENANTS.to_string()),
            ),
            _ => (TENANT_HEADER, ALL_TENANTS.to_string()),
        }
    }

    fn body(&self) -> Option<serde_json::Value> {
        match self {
            Self::RuntimeArtifacts { api_ids, .. } if api_ids.len() > 1 => {
                Some(serde_json::json!({ "uuids": api_ids }))
            }
            _ => None,
        }
    }

    fn is_archive(&self) -> bool {
        matches!(self, Self::RuntimeArtifacts { .. })
    }
}

/// Gateway labels as the control plane expects them: joined by `|`, base64
pub fn encode_labels(labels: &[String]) -> String {
    base64::engine::general_purpose::STANDARD.encode(labels.join("|"))
}

/// Result of a successful fetch
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// Response body
    Data(Vec<u8>),
    /// Nothing available for the request
    NoContent,
}

impl FetchOutcome {
    /// Body bytes, if any
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            Self::Data(d) => Some(d),
            Self::NoContent => None,
        }
    }
}

/// Client for the control-plane internal data API
#[derive(Clone)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    retry: RetryConfig,
    pool: Arc<WorkerPool>,
}

impl ControlPlaneClient {
    /// Build a client and its worker pool from configuration
    pub fn new(config: &ControlPlaneConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.skip_ssl_verification);

        if let Some(path) = &config.trust_store_path {
            let pem = std::fs::read(path).map_err(|e| {
                Error::config(format!("cannot read trust store {}: {e}", path.display()))
            })?;
            for cert in reqwest::Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(Self {
            http: builder.build()?,
            base_url: internal_base_url(&config.service_url),
            username: config.username.clone(),
            password: config.password.clone(),
            retry: RetryConfig::fixed(config.max_retries, config.retry_interval()),
            pool: Arc::new(WorkerPool::new(config.worker_pool_size, config.queue_size)),
        })
    }

    /// Base URL all resource paths are joined to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One HTTP call, no retry
    async fn fetch_once(&self, resource: &Resource) -> Result<FetchOutcome> {
        let url = format!("{}{}", self.base_url, resource.path());
        let (header, tenant) = resource.tenant_header();

        let request = match resource.body() {
            Some(body) => self.http.post(&url).json(&body),
            None => self.http.get(&url),
        };
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .header(header, tenant)
            .query(&resource.query())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(FetchOutcome::NoContent);
        }

        let body = response.bytes().await?;
        if status.is_success() {
            if body.is_empty() {
                if resource.is_archive() {
                    return Ok(FetchOutcome::NoContent);
                }
                return Err(Error::control_plane(
                    status.as_u16(),
                    resource.path(),
                    "empty response body",
                ));
            }
            return Ok(FetchOutcome::Data(body.to_vec()));
        }

        Err(Error::control_plane(
            status.as_u16(),
            resource.path(),
            String::from_utf8_lossy(&body).into_owned(),
        ))
    }

    /// Fetch a resource through the worker pool with bounded retry
    #[instrument(skip(self), fields(endpoint = resource.path()))]
    pub async fn fetch(&self, resource: Resource) -> Result<FetchOutcome> {
        let this = self.clone();
        let rx = self
            .pool
            .run(async move {
                let op = format!("fetch {}", resource.path());
                retry_while(&this.retry, &op, Error::is_retryable, || this.fetch_once(&resource))
                    .await
            })
            .await?;

        let outcome = rx
            .await
            .map_err(|_| Error::internal_with_context("fetch job dropped", "pool"))??;
        match &outcome {
            FetchOutcome::Data(body) => debug!(bytes = body.len(), "Fetched"),
            FetchOutcome::NoContent => info!("No data available"),
        }
        Ok(outcome)
    }

    /// Fetch and decode a JSON resource; `None` when the control plane has no data
    pub async fn fetch_json<T: DeserializeOwned>(&self, resource: Resource) -> Result<Option<T>> {
        let kind = resource.path();
        match self.fetch(resource).await? {
            FetchOutcome::Data(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| Error::serialization_for(kind, e.to_string())),
            FetchOutcome::NoContent => Ok(None),
        }
    }
}

/// `<serviceUrl>/internal/data/v1/`, tolerating a missing trailing slash
fn internal_base_url(service_url: &str) -> String {
    let mut base = service_url.trim_end_matches('/').to_string();
    base.push('/');
    base.push_str(INTERNAL_DATA_PATH);
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use self::types::ApplicationList;

    fn client_for(server: &MockServer, max_retries: u32) -> ControlPlaneClient {
        let config = ControlPlaneConfig {
            service_url: server.uri(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            retry_interval_secs: 0,
            max_retries,
            ..Default::default()
        };
        ControlPlaneClient::new(&config).unwrap()
    }

    #[test]
    fn test_base_url_with_and_without_slash() {
        assert_eq!(
            internal_base_url("https://apim:9443"),
            "https://apim:9443/internal/data/v1/"
        );
        assert_eq!(
            internal_base_url("https://apim:9443/"),
            "https://apim:9443/internal/data/v1/"
        );
    }

    #[test]
    fn test_labels_encoded() {
        let labels = vec!["test1.gw.wso2.com".to_string(), "test2.gw.wso2.com".to_string()];
        assert_eq!(
            encode_labels(&labels),
            "dGVzdDEuZ3cud3NvMi5jb218dGVzdDIuZ3cud3NvMi5jb20="
        );
    }

    #[tokio::test]
    async fn test_fetch_json_with_auth_and_tenant_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/applications"))
            .and(header("x-wso2-tenant", "ALL"))
            .and(header("authorization", "Basic YWRtaW46YWRtaW4="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [{"uuid": "app-1", "name": "shop", "subName": "alice"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let apps: ApplicationList = client
            .fetch_json(Resource::Applications)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(apps.list.len(), 1);
        assert_eq!(apps.list[0].sub_name, "alice");
    }

    #[tokio::test]
    async fn test_no_content_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/runtime-artifacts"))
            .and(query_param("apiId", "api-1"))
            .and(query_param("type", "Envoy"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let outcome = client
            .fetch(Resource::RuntimeArtifacts {
                api_ids: vec!["api-1".to_string()],
                labels: vec!["Default".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::NoContent);
    }

    #[tokio::test]
    async fn test_always_503_attempted_exactly_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/subscriptions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let client = client_for(&server, 4);
        let err = client.fetch(Resource::Subscriptions).await.unwrap_err();
        assert!(matches!(err, Error::ControlPlane { status: 503, .. }));

        // no stray retries after the error was reported
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_4xx_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/keymanagers"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 5);
        let err = client.fetch(Resource::KeyManagers).await.unwrap_err();
        match err {
            Error::ControlPlane { status, message, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "unauthorized");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/api-policies"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/api-policies"))
            .and(header("xWSO2Tenant", "acme"))
            .and(query_param("policyName", "Gold"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"list":[]}"#))
            .mount(&server)
            .await;

        let client = client_for(&server, 5);
        let outcome = client
            .fetch(Resource::ApiPolicies {
                name: Some("Gold".to_string()),
                tenant: Some("acme".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Data(br#"{"list":[]}"#.to_vec()));
    }

    #[tokio::test]
    async fn test_multiple_artifacts_posted_as_uuid_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/data/v1/retrieve-api-artifacts"))
            .and(body_json(serde_json::json!({"uuids": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 1);
        let outcome = client
            .fetch(Resource::RuntimeArtifacts {
                api_ids: vec!["a".to_string(), "b".to_string()],
                labels: vec!["Default".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(outcome.into_data(), Some(vec![1, 2, 3]));
    }
}
