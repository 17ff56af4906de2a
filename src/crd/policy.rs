//! Rate-limit, token-issuer and AI-provider resources
//!
//! API-level rate limits arrive from the CR generation service; the
//! subscription/AI variants, token issuers and AI providers are built by the
//! agent from control-plane state.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::TargetRef;

type Extra = BTreeMap<String, serde_json::Value>;

/// Request quota per time unit
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestCount {
    pub requests_per_unit: i64,
    pub unit: String,
}

/// API or resource level limit
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiRateLimit {
    pub requests_per_unit: i64,
    pub unit: String,
}

/// Subscription level limit
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRateLimit {
    pub stop_on_quota_reach: bool,
    pub organization: String,
    pub request_count: RequestCount,
}

/// `default` or `override` block of a RateLimitPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiRateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionRateLimit>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Rate limit attached to an API, a resource or the subscription layer
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha3",
    kind = "RateLimitPolicy",
    plural = "ratelimitpolicies",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<RateLimitSettings>,
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_: Option<RateLimitSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<TargetRef>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Token quotas of an AI subscription policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    pub unit: String,
    pub request_token_count: i64,
    pub response_token_count: i64,
    pub total_token_count: i64,
}

/// Override block of an AIRateLimitPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiRateLimit {
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<TokenCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_count: Option<RequestCount>,
}

/// Token and request limits for AI APIs
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha3",
    kind = "AIRateLimitPolicy",
    plural = "airatelimitpolicies",
    root = "AiRateLimitPolicy",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AiRateLimitPolicySpec {
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_: Option<AiRateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<TargetRef>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// JWKS endpoint used to verify token signatures
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct JwksConfig {
    pub url: String,
}

/// Secret key reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

/// Certificate used to verify token signatures
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_inline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,
}

/// Either a JWKS URL or a certificate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SignatureValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<JwksConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateConfig>,
}

/// Mapping of a remote claim onto a local one
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMappingSpec {
    pub remote_claim: String,
    pub local_claim: String,
}

/// Issuer of tokens accepted by the gateway
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha2",
    kind = "TokenIssuer",
    plural = "tokenissuers",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct TokenIssuerSpec {
    pub name: String,
    pub organization: String,
    pub issuer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub consumer_key_claim: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scopes_claim: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_validation: Option<SignatureValidation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claim_mappings: Vec<ClaimMappingSpec>,
    pub target_ref: TargetRef,
}

/// Where a value is read from in an AI request or response
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ValueDetails {
    #[serde(rename = "in")]
    pub r#in: String,
    pub value: String,
}

/// Token count locations of an AI provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitFields {
    pub prompt_tokens: ValueDetails,
    pub completion_token: ValueDetails,
    pub total_token: ValueDetails,
}

/// LLM provider definition
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha4",
    kind = "AIProvider",
    plural = "aiproviders",
    root = "AiProvider",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AiProviderSpec {
    pub provider_name: String,
    #[serde(rename = "providerAPIVersion")]
    pub provider_api_version: String,
    pub organization: String,
    pub model: ValueDetails,
    pub rate_limit_fields: RateLimitFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_rate_limit_from_generated_yaml() {
        let yaml = r#"
apiVersion: dp.wso2.com/v1alpha3
kind: RateLimitPolicy
metadata:
  name: api-ratelimit-1
spec:
  default:
    api:
      requestsPerUnit: 10
      unit: Minute
  targetRef:
    group: gateway.networking.k8s.io
    kind: Resource
    name: petstore-api
"#;
        let rlp: RateLimitPolicy = serde_yaml::from_str(yaml).unwrap();
        let api = rlp.spec.default.as_ref().and_then(|d| d.api.as_ref()).unwrap();
        assert_eq!(api.requests_per_unit, 10);
        assert_eq!(api.unit, "Minute");
        assert!(rlp.spec.override_.is_none());
        assert_eq!(rlp.spec.target_ref.unwrap().kind, "Resource");
    }

    #[test]
    fn test_override_serializes_under_keyword_name() {
        let spec = RateLimitPolicySpec {
            override_: Some(RateLimitSettings {
                subscription: Some(SubscriptionRateLimit {
                    stop_on_quota_reach: true,
                    organization: "carbon.super".to_string(),
                    request_count: RequestCount {
                        requests_per_unit: 5,
                        unit: "Hour".to_string(),
                    },
                }),
                ..Default::default()
            }),
            target_ref: Some(TargetRef::subscription()),
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["override"]["subscription"]["stopOnQuotaReach"], true);
        assert_eq!(
            value["override"]["subscription"]["requestCount"]["requestsPerUnit"],
            5
        );
        assert!(value.get("default").is_none());
    }

    #[test]
    fn test_token_issuer_jwks_shape() {
        let spec = TokenIssuerSpec {
            name: "Resident Key Manager".to_string(),
            organization: "carbon.super".to_string(),
            issuer: "https://idp/token".to_string(),
            consumer_key_claim: "azp".to_string(),
            scopes_claim: "scope".to_string(),
            signature_validation: Some(SignatureValidation {
                jwks: Some(JwksConfig {
                    url: "https://idp/jwks".to_string(),
                }),
                certificate: None,
            }),
            claim_mappings: vec![],
            target_ref: TargetRef::gateway("wso2-apk-default"),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["signatureValidation"]["jwks"]["url"], "https://idp/jwks");
        assert!(value.get("claimMappings").is_none());
        assert_eq!(value["targetRef"]["kind"], "Gateway");
    }

    #[test]
    fn test_ai_provider_field_names() {
        let spec = AiProviderSpec {
            provider_name: "OpenAI".to_string(),
            provider_api_version: "v1".to_string(),
            organization: "carbon.super".to_string(),
            model: ValueDetails {
                r#in: "payload".to_string(),
                value: "model".to_string(),
            },
            rate_limit_fields: RateLimitFields::default(),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["providerAPIVersion"], "v1");
        assert_eq!(value["model"]["in"], "payload");
        assert!(value["rateLimitFields"]["promptTokens"].is_object());
    }
}
