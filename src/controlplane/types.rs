//! Control-plane internal data API DTOs
//!
//! Only the fields the agent reads are modelled; everything else in the
//! payloads is ignored. Field names follow the control plane's JSON.

#![allow(missing_docs)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `GET applications`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ApplicationList {
    /// Applications
    #[serde(default)]
    pub list: Vec<CpApplication>,
}

/// One application
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpApplication {
    pub uuid: String,
    #[serde(alias = "applicationId")]
    pub id: i64,
    #[serde(alias = "applicationName")]
    pub name: String,
    #[serde(alias = "subscriber")]
    pub sub_name: String,
    #[serde(alias = "applicationPolicy")]
    pub policy: String,
    pub token_type: String,
    pub attributes: HashMap<String, String>,
    #[serde(alias = "tenanDomain")]
    pub tenant_domain: String,
    pub time_stamp: i64,
}

/// `GET subscriptions`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubscriptionList {
    /// Subscriptions
    #[serde(default)]
    pub list: Vec<CpSubscription>,
}

/// One subscription
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpSubscription {
    pub subscription_id: i64,
    #[serde(rename = "subscriptionUUID")]
    pub subscription_uuid: String,
    pub policy_id: String,
    pub api_id: i64,
    #[serde(rename = "apiUUID")]
    pub api_uuid: String,
    pub api_name: String,
    pub api_version: String,
    #[serde(alias = "applicationId")]
    pub app_id: i64,
    #[serde(rename = "applicationUUID")]
    pub application_uuid: String,
    pub subscription_state: String,
    #[serde(alias = "tenanDomain")]
    pub tenant_domain: String,
    pub time_stamp: i64,
}

/// `GET application-key-mappings`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ApplicationKeyMappingList {
    /// Key mappings
    #[serde(default)]
    pub list: Vec<CpApplicationKeyMapping>,
}

/// One consumer key issued to an application
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpApplicationKeyMapping {
    pub application_id: i64,
    #[serde(rename = "applicationUUID")]
    pub application_uuid: String,
    pub consumer_key: String,
    pub key_type: String,
    pub key_manager: String,
    #[serde(alias = "tenanDomain")]
    pub tenant_domain: String,
    pub time_stamp: i64,
}

/// `GET apis`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ApiList {
    /// API metadata
    #[serde(default)]
    pub list: Vec<CpApiMetadata>,
}

/// API metadata entry, only the UUID matters for start-up deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpApiMetadata {
    pub uuid: String,
    pub name: String,
    pub version: String,
}

/// One key manager, as listed by `GET keymanagers` and in key-manager events
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpKeyManager {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub km_type: String,
    pub enabled: bool,
    pub tenant_domain: String,
    pub token_type: String,
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

/// Remote → local claim mapping
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimMapping {
    pub remote_claim: String,
    pub local_claim: String,
}

/// Key manager normalized for token-issuer generation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedKeyManager {
    pub uuid: String,
    pub name: String,
    pub enabled: bool,
    pub km_type: String,
    pub tenant_domain: String,
    pub issuer: String,
    pub claim_mappings: Vec<ClaimMapping>,
    pub certificate_type: String,
    pub certificate_value: String,
    pub consumer_key_claim: String,
    pub scopes_claim: String,
    pub token_endpoint: String,
    pub revoke_endpoint: String,
}

impl From<&CpKeyManager> for ResolvedKeyManager {
    fn from(km: &CpKeyManager) -> Self {
        let text = |key: &str| {
            km.configuration
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let claim_mappings = km
            .configuration
            .get("claim_mappings")
            .and_then(|v| serde_json::from_value::<Vec<ClaimMapping>>(v.clone()).ok())
            .unwrap_or_default();

        Self {
            uuid: km.uuid.clone(),
            name: km.name.clone(),
            enabled: km.enabled,
            km_type: km.km_type.clone(),
            tenant_domain: km.tenant_domain.clone(),
            issuer: text("issuer"),
            claim_mappings,
            certificate_type: text("certificate_type"),
            certificate_value: text("certificate_value"),
            consumer_key_claim: text("consumer_key_claim"),
            scopes_claim: text("scopes_claim"),
            token_endpoint: text("token_endpoint"),
            revoke_endpoint: text("revoke_endpoint"),
        }
    }
}

/// `GET api-policies`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RateLimitPolicyList {
    /// Policies
    #[serde(default)]
    pub list: Vec<CpRateLimitPolicy>,
}

/// API-level throttling policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpRateLimitPolicy {
    pub id: i64,
    pub name: String,
    pub tenant_domain: String,
    pub quota_type: String,
    pub default_limit: DefaultLimit,
}

impl CpRateLimitPolicy {
    /// Normalize into the data-plane shape; `None` without a usable request count
    pub fn resolve(&self) -> Option<ResolvedRateLimitPolicy> {
        let count = self.default_limit.request_count.as_ref()?;
        let unit = RateUnit::from_control_plane(&count.time_unit)?;
        Some(ResolvedRateLimitPolicy {
            name: self.name.clone(),
            tenant_domain: self.tenant_domain.clone(),
            requests_per_unit: count.request_count,
            unit,
        })
    }
}

/// API throttling policy as the data plane consumes it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRateLimitPolicy {
    pub name: String,
    pub tenant_domain: String,
    pub requests_per_unit: i64,
    pub unit: RateUnit,
}

/// Default limit block shared by API and subscription policies
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultLimit {
    pub quota_type: String,
    pub request_count: Option<RequestCountLimit>,
    pub ai_api_quota: Option<AiApiQuota>,
}

/// Request-count quota
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestCountLimit {
    pub time_unit: String,
    pub unit_time: i64,
    pub request_count: i64,
}

/// Token quota of AI APIs
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AiApiQuota {
    pub time_unit: String,
    pub unit_time: i64,
    pub prompt_token_count: Option<i64>,
    pub completion_token_count: Option<i64>,
    pub total_token_count: Option<i64>,
    pub request_count: Option<i64>,
}

/// `GET subscription-policies`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SubscriptionPolicyList {
    /// Policies
    #[serde(default)]
    pub list: Vec<CpSubscriptionPolicy>,
}

/// Subscription throttling tier
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpSubscriptionPolicy {
    pub id: i64,
    pub name: String,
    pub tenant_domain: String,
    pub quota_type: String,
    pub stop_on_quota_reach: bool,
    pub default_limit: DefaultLimit,
}

/// `GET llm-providers`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AiProviderList {
    /// Providers
    #[serde(default)]
    pub apis: Vec<CpAiProvider>,
}

/// One LLM provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpAiProvider {
    pub id: String,
    pub name: String,
    pub api_version: String,
    pub organization: String,
    /// JSON document, as a string
    pub configurations: String,
}

/// Parsed `configurations` of an LLM provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AiProviderConfigurations {
    pub metadata: Vec<AiProviderMetadata>,
}

/// Where the provider reports one value
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AiProviderMetadata {
    pub attribute_name: String,
    pub input_source: String,
    pub attribute_identifier: String,
}

/// Rate-limit time units understood by the data plane
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateUnit {
    /// per minute
    Minute,
    /// per hour
    Hour,
    /// per day
    Day,
}

impl RateUnit {
    /// Normalize a control-plane unit; `None` for units the data plane lacks
    pub fn from_control_plane(unit: &str) -> Option<Self> {
        match unit.to_ascii_lowercase().as_str() {
            "min" | "mins" | "minute" | "minutes" => Some(Self::Minute),
            "hour" | "hours" => Some(Self::Hour),
            "day" | "days" => Some(Self::Day),
            _ => None,
        }
    }

    /// Data-plane spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "Minute",
            Self::Hour => "Hour",
            Self::Day => "Day",
        }
    }
}

impl std::fmt::Display for RateUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
