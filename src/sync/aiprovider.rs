//! LLM providers as AIProvider resources

use kube::api::{ApiResource, ObjectMeta};
use tracing::{instrument, warn};

use crate::controlplane::types::{AiProviderConfigurations, AiProviderList, CpAiProvider};
use crate::controlplane::{ControlPlaneClient, Resource};
use crate::crd::{sha1_hex, AiProvider, AiProviderSpec, RateLimitFields, ValueDetails};
use crate::reconcile::artifact::to_dynamic;
use crate::reconcile::client::ClusterClient;
use crate::reconcile::{three_way, ThreeWayReport};
use crate::{Error, Result, INITIATE_FROM_CP, INITIATE_FROM_LABEL, NAME_LABEL, ORGANIZATION_LABEL};

const MODEL: &str = "model";
const PROMPT_TOKENS: &str = "promptTokenCount";
const COMPLETION_TOKENS: &str = "completionTokenCount";
const TOTAL_TOKENS: &str = "totalTokenCount";

/// AIProvider resource of one LLM provider, named after its id
pub fn ai_provider(provider: &CpAiProvider) -> Result<AiProvider> {
    let configurations: AiProviderConfigurations = if provider.configurations.trim().is_empty() {
        AiProviderConfigurations::default()
    } else {
        serde_json::from_str(&provider.configurations)
            .map_err(|e| Error::serialization_for("AIProvider", e.to_string()))?
    };

    let mut spec = AiProviderSpec {
        provider_name: provider.name.clone(),
        provider_api_version: provider.api_version.clone(),
        organization: provider.organization.clone(),
        model: ValueDetails::default(),
        rate_limit_fields: RateLimitFields::default(),
    };
    for meta in configurations.metadata {
        let details = ValueDetails {
            r#in: meta.input_source,
            value: meta.attribute_identifier,
        };
        match meta.attribute_name.as_str() {
            MODEL => spec.model = details,
            PROMPT_TOKENS => spec.rate_limit_fields.prompt_tokens = details,
            COMPLETION_TOKENS => spec.rate_limit_fields.completion_token = details,
            TOTAL_TOKENS => spec.rate_limit_fields.total_token = details,
            _ => {}
        }
    }

    Ok(AiProvider {
        metadata: ObjectMeta {
            name: Some(provider.id.clone()),
            labels: Some(
                [
                    (NAME_LABEL.to_string(), sha1_hex(&provider.name)),
                    (ORGANIZATION_LABEL.to_string(), sha1_hex(&provider.organization)),
                    (INITIATE_FROM_LABEL.to_string(), INITIATE_FROM_CP.to_string()),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec,
    })
}

/// Reconcile every AIProvider against the control plane
#[instrument(skip_all)]
pub async fn sync_all(control_plane: &ControlPlaneClient, cluster: &dyn ClusterClient) -> Result<ThreeWayReport> {
    let providers = control_plane
        .fetch_json::<AiProviderList>(Resource::AiProviders { tenant: None })
        .await?
        .unwrap_or_default()
        .apis;
    let mut desired = Vec::with_capacity(providers.len());
    for provider in &providers {
        match ai_provider(provider) {
            Ok(cr) => desired.push(to_dynamic(&cr)?.1),
            Err(e) => warn!(provider = %provider.name, error = %e, "Skipping AI provider"),
        }
    }
    three_way(cluster, &ApiResource::erase::<AiProvider>(&()), desired).await
}
