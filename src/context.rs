//! Shared agent state
//!
//! Everything the start-up load and the event handlers touch is owned here
//! and handed around as `Arc<AgentContext>`.

use std::sync::Arc;

use crate::config::Config;
use crate::controlplane::ControlPlaneClient;
use crate::events::ordering::TimestampGuard;
use crate::events::tenant::TenantPolicy;
use crate::reconcile::ClusterClient;
use crate::store::StateStore;
use crate::sync::keymanager::IssuerSettings;
use crate::transformer::{CrGenerator, MappingSettings, Transformer};
use crate::Result;

/// Process-wide state of one agent
pub struct AgentContext {
    /// Effective configuration
    pub config: Config,
    /// Application and subscription state
    pub store: Arc<StateStore>,
    /// Last-applied timestamps of inbound events
    pub guard: TimestampGuard,
    /// Tenant filter for inbound events
    pub tenant: TenantPolicy,
    /// Control-plane client
    pub control_plane: ControlPlaneClient,
    /// Cluster the CRs are written to
    pub cluster: Arc<dyn ClusterClient>,
    /// Archive to CR pipeline
    pub transformer: Transformer,
    /// Settings for generated token issuers
    pub issuers: IssuerSettings,
}

impl AgentContext {
    /// Build the context from configuration
    pub fn new(config: Config, store: Arc<StateStore>, cluster: Arc<dyn ClusterClient>) -> Result<Self> {
        let control_plane = ControlPlaneClient::new(&config.control_plane)?;
        let generator = CrGenerator::new(
            config.data_plane.cr_generation_endpoint.clone(),
            config.control_plane.request_timeout(),
        )?;
        let transformer = Transformer::new(
            generator,
            MappingSettings {
                interceptor_url: config.data_plane.interceptor_url.clone(),
            },
        );

        Ok(Self {
            tenant: config.tenant_policy(),
            issuers: IssuerSettings::from(&config),
            guard: TimestampGuard::new(),
            control_plane,
            transformer,
            store,
            cluster,
            config,
        })
    }

    /// Gateway labels this agent deploys for
    pub fn environment_labels(&self) -> Vec<String> {
        self.config.environment_labels()
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("control_plane", &self.control_plane.base_url())
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}
