//! Tenant filter for inbound events

/// Decides whether an event's tenant domain belongs to this agent
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TenantPolicy {
    /// Every tenant is accepted
    #[default]
    Permissive,
    /// Only events of this tenant domain are accepted
    Strict {
        /// Tenant domain the agent is authenticated as
        tenant_domain: String,
    },
}

impl TenantPolicy {
    /// Whether an event from `tenant_domain` should be processed
    pub fn accepts(&self, tenant_domain: &str) -> bool {
        match self {
            Self::Permissive => true,
            Self::Strict { tenant_domain: own } => own.eq_ignore_ascii_case(tenant_domain),
        }
    }
}
