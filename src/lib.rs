//! APK agent - keeps a Kubernetes APK gateway data plane in sync with an API-management control plane
//!
//! The agent pulls state from the control plane's internal data API and listens to its
//! change notifications, turning both into Kubernetes custom resources and into a live
//! application/subscription view streamed to enforcers.
//!
//! # Architecture
//!
//! - Control-plane events arrive over AMQP, are ordered per entity and dispatched
//! - API deployments are fetched as archives, transformed into CRs and reconciled leaf-first
//! - Key managers, rate-limit policies and AI providers are reconciled as a three-way diff
//! - Applications and subscriptions live in memory and are fanned out over gRPC
//!
//! # Modules
//!
//! - [`config`] - Agent configuration (TOML file plus CLI/env overrides)
//! - [`context`] - Shared agent state handed to start-up load and event handlers
//! - [`controlplane`] - Control-plane REST client, DTOs and bounded worker pool
//! - [`crd`] - Typed APK custom resources
//! - [`events`] - Broker consumption, envelope decoding, ordering guard and dispatch
//! - [`fanout`] - Enforcer client registry and gRPC event stream
//! - [`http`] - Local read-only HTTPS query surface
//! - [`proto`] - gRPC message and service definitions
//! - [`reconcile`] - Cluster client, artifact reconciliation and singleton three-way diff
//! - [`retry`] - Fixed-delay retry loop
//! - [`store`] - In-memory application/subscription state
//! - [`sync`] - Control-plane derived resources and start-up load
//! - [`telemetry`] - Structured logging setup
//! - [`transformer`] - API archive to CR transformation pipeline
//! - [`error`] - Error types for the agent

#![deny(missing_docs)]

pub mod config;
pub mod context;
pub mod controlplane;
pub mod crd;
pub mod error;
pub mod events;
pub mod fanout;
pub mod http;
pub mod proto;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod transformer;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default port for the enforcer gRPC event stream
pub const DEFAULT_GRPC_PORT: u16 = 18000;

/// Default port for the local HTTPS query surface
pub const DEFAULT_HTTP_PORT: u16 = 18001;

/// Default namespace the data-plane CRs are written to
pub const DEFAULT_NAMESPACE: &str = "apk";

/// Default pause between failed control-plane calls, in seconds
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 5;

/// Default number of attempts for one control-plane call
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default per-request timeout for control-plane calls, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent fetch workers
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Default capacity of the fetch job queue
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Gateway label used when none is configured
pub const DEFAULT_GATEWAY_LABEL: &str = "Default";

/// Tenant domain of the super tenant
pub const SUPER_TENANT_DOMAIN: &str = "carbon.super";

/// Name of the gateway every policy targets
pub const DEFAULT_GATEWAY_NAME: &str = "wso2-apk-default";

/// Backend URL of the shared interceptor service
pub const DEFAULT_INTERCEPTOR_URL: &str = "https://interceptor-service:8443";

/// Issuer of internal API keys
pub const DEFAULT_INTERNAL_KEY_ISSUER: &str = "https://localhost:9443/oauth2/token";

// =============================================================================
// Cluster Labels
// =============================================================================

/// Label marking resources owned by control-plane reconciliation
pub const INITIATE_FROM_LABEL: &str = "InitiateFrom";

/// Value of [`INITIATE_FROM_LABEL`] for control-plane owned resources
pub const INITIATE_FROM_CP: &str = "CP";

/// Label holding the hashed organization
pub const ORGANIZATION_LABEL: &str = "organization";

/// Label holding the control-plane API UUID
pub const API_UUID_LABEL: &str = "apiUUID";

/// Label holding the deployed API revision
pub const REVISION_LABEL: &str = "revisionID";

/// Label holding the hashed rate-limit policy name
pub const RATE_LIMIT_POLICY_NAME_LABEL: &str = "rateLimitPolicyName";

/// Label holding a hashed resource name
pub const NAME_LABEL: &str = "name";
