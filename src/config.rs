//! Agent configuration
//!
//! Loaded from a TOML file; every field has a default so a minimal file only
//! names the control plane. Command-line flags and environment variables are
//! layered on top by the binary through [`Overrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::tenant::TenantPolicy;
use crate::{Error, Result};

/// Complete agent configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Control-plane connection settings
    pub control_plane: ControlPlaneConfig,
    /// Data-plane (Kubernetes) settings
    pub data_plane: DataPlaneConfig,
    /// Locally exposed servers
    pub server: ServerConfig,
    /// Inbound event tenant filter
    pub tenant: TenantConfig,
}

/// Control-plane connection settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane (e.g. `https://apim:9443/`)
    pub service_url: String,
    /// Basic-auth user name
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// Gateway labels this agent deploys for
    pub environment_labels: Vec<String>,
    /// Skip TLS verification of the control plane
    pub skip_ssl_verification: bool,
    /// PEM bundle trusted for the control plane
    pub trust_store_path: Option<PathBuf>,
    /// Pause after a failed call, in seconds
    pub retry_interval_secs: u64,
    /// Attempts per call, including the first
    pub max_retries: u32,
    /// Per-request timeout, in seconds
    pub request_timeout_secs: u64,
    /// Concurrent fetch workers
    pub worker_pool_size: usize,
    /// Capacity of the fetch job queue
    pub queue_size: usize,
    /// AMQP URL of the event broker; events are not consumed when unset
    pub broker_url: Option<String>,
    /// Issuer used for internal API keys
    pub internal_key_issuer: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            username: String::new(),
            password: String::new(),
            environment_labels: vec![crate::DEFAULT_GATEWAY_LABEL.to_string()],
            skip_ssl_verification: false,
            trust_store_path: None,
            retry_interval_secs: crate::DEFAULT_RETRY_INTERVAL_SECS,
            max_retries: crate::DEFAULT_MAX_RETRIES,
            request_timeout_secs: crate::DEFAULT_REQUEST_TIMEOUT_SECS,
            worker_pool_size: crate::DEFAULT_WORKER_POOL_SIZE,
            queue_size: crate::DEFAULT_QUEUE_SIZE,
            broker_url: None,
            internal_key_issuer: crate::DEFAULT_INTERNAL_KEY_ISSUER.to_string(),
        }
    }
}

impl ControlPlaneConfig {
    /// Pause after a failed call
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Tenant domain of the configured user (`user@tenant`), super tenant otherwise
    pub fn tenant_domain(&self) -> &str {
        match self.username.rsplit_once('@') {
            Some((_, domain)) if !domain.is_empty() => domain,
            _ => crate::SUPER_TENANT_DOMAIN,
        }
    }
}

/// Data-plane settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DataPlaneConfig {
    /// Namespace CRs are written to
    pub namespace: String,
    /// URL of the CR generation service
    pub cr_generation_endpoint: String,
    /// Gateway every policy targets
    pub gateway_name: String,
    /// Backend URL of the shared interceptor service
    pub interceptor_url: String,
    /// Claim carrying the consumer key in issued tokens
    pub consumer_key_claim: String,
    /// Secret holding the internal-key signing certificate
    pub internal_key_secret: String,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            namespace: crate::DEFAULT_NAMESPACE.to_string(),
            cr_generation_endpoint: "https://apk-config-deployer:9443/api/configurator/1.2.0/apis/generate-k8s-resources".to_string(),
            gateway_name: crate::DEFAULT_GATEWAY_NAME.to_string(),
            interceptor_url: crate::DEFAULT_INTERCEPTOR_URL.to_string(),
            consumer_key_claim: "azp".to_string(),
            internal_key_secret: "apk-test-setup-wso2-apk-enforcer-truststore-secret".to_string(),
        }
    }
}

/// Locally exposed servers
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port of the enforcer gRPC stream
    pub grpc_port: u16,
    /// Port of the HTTPS query surface
    pub http_port: u16,
    /// PEM certificate of the agent
    pub tls_cert_path: PathBuf,
    /// PEM private key of the agent
    pub tls_key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_port: crate::DEFAULT_GRPC_PORT,
            http_port: crate::DEFAULT_HTTP_PORT,
            tls_cert_path: PathBuf::from("/home/wso2/security/keystore/agent.crt"),
            tls_key_path: PathBuf::from("/home/wso2/security/keystore/agent.key"),
        }
    }
}

/// Inbound event tenant filter
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TenantConfig {
    /// `permissive` passes everything, `strict` only the agent's tenant
    pub policy: TenantPolicyKind,
    /// Tenant compared against in strict mode; derived from the user name when unset
    pub tenant_domain: Option<String>,
}

/// Tenant filter mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TenantPolicyKind {
    /// Accept every tenant
    #[default]
    Permissive,
    /// Accept only the agent's tenant
    Strict,
}

/// Values supplied on the command line or environment that win over the file
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    /// Control-plane base URL
    pub service_url: Option<String>,
    /// Basic-auth user name
    pub username: Option<String>,
    /// Basic-auth password
    pub password: Option<String>,
    /// AMQP URL
    pub broker_url: Option<String>,
    /// Data-plane namespace
    pub namespace: Option<String>,
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(format!("invalid configuration: {e}")))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Apply command-line/environment overrides
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.service_url {
            self.control_plane.service_url = v;
        }
        if let Some(v) = overrides.username {
            self.control_plane.username = v;
        }
        if let Some(v) = overrides.password {
            self.control_plane.password = v;
        }
        if let Some(v) = overrides.broker_url {
            self.control_plane.broker_url = Some(v);
        }
        if let Some(v) = overrides.namespace {
            self.data_plane.namespace = v;
        }
    }

    /// Check the settings the agent cannot start without
    pub fn validate(&self) -> Result<()> {
        let cp = &self.control_plane;
        if cp.service_url.is_empty() {
            return Err(Error::config("controlPlane.serviceUrl is required"));
        }
        if !cp.service_url.starts_with("http://") && !cp.service_url.starts_with("https://") {
            return Err(Error::config(format!(
                "controlPlane.serviceUrl must be an http(s) URL, got {}",
                cp.service_url
            )));
        }
        if cp.username.is_empty() {
            return Err(Error::config("controlPlane.username is required"));
        }
        if cp.max_retries == 0 {
            return Err(Error::config("controlPlane.maxRetries must be at least 1"));
        }
        if cp.worker_pool_size == 0 || cp.queue_size == 0 {
            return Err(Error::config(
                "controlPlane.workerPoolSize and queueSize must be at least 1",
            ));
        }
        if self.data_plane.namespace.is_empty() {
            return Err(Error::config("dataPlane.namespace is required"));
        }
        Ok(())
    }

    /// Gateway labels, falling back to the default label
    pub fn environment_labels(&self) -> Vec<String> {
        if self.control_plane.environment_labels.is_empty() {
            vec![crate::DEFAULT_GATEWAY_LABEL.to_string()]
        } else {
            self.control_plane.environment_labels.clone()
        }
    }

    /// Tenant filter built from the `tenant` section
    pub fn tenant_policy(&self) -> TenantPolicy {
        match self.tenant.policy {
            TenantPolicyKind::Permissive => TenantPolicy::Permissive,
            TenantPolicyKind::Strict => TenantPolicy::Strict {
                tenant_domain: self
                    .tenant
                    .tenant_domain
                    .clone()
                    .unwrap_or_else(|| self.control_plane.tenant_domain().to_string()),
            },
        }
    }
}
