//! Custom Resource Definitions the agent writes
//!
//! Only the fields the agent reads or rewrites are typed. Everything else the
//! CR generation service emits is carried through untouched in a flattened
//! `extra` map so an update never drops data the agent does not understand.

mod api;
mod policy;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

pub use api::{
    ApiPolicy, ApiPolicySpec, ApiSpec, ApkApi, Authentication, AuthenticationSpec, Backend,
    BackendJwt, BackendJwtSpec, BackendSpec, EnvConfig, GqlRoute, GqlRouteSpec, HttpRoute,
    HttpRouteSpec, InterceptorService, InterceptorServiceSpec, Scope, ScopeSpec,
};
pub use policy::{
    AiProvider, AiProviderSpec, AiRateLimit, AiRateLimitPolicy, AiRateLimitPolicySpec,
    ApiRateLimit, CertificateConfig, ClaimMappingSpec, JwksConfig, RateLimitFields,
    RateLimitPolicy, RateLimitPolicySpec, RateLimitSettings, RequestCount, SecretRef,
    SignatureValidation, SubscriptionRateLimit, TokenCount, TokenIssuer, TokenIssuerSpec,
    ValueDetails,
};

/// API group of the APK data-plane CRDs
pub const DP_GROUP: &str = "dp.wso2.com";

/// API group of the Gateway API
pub const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

/// Kind targeted by gateway-wide policies
pub const GATEWAY_KIND: &str = "Gateway";

/// Policy attachment reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    /// API group of the target
    pub group: String,
    /// Kind of the target
    pub kind: String,
    /// Name of the target
    pub name: String,
}

impl TargetRef {
    /// Reference to the named gateway
    pub fn gateway(name: impl Into<String>) -> Self {
        Self {
            group: GATEWAY_GROUP.to_string(),
            kind: GATEWAY_KIND.to_string(),
            name: name.into(),
        }
    }

    /// Reference used by subscription-level rate limits
    pub fn subscription() -> Self {
        Self {
            group: GATEWAY_GROUP.to_string(),
            kind: "Subscription".to_string(),
            name: "default".to_string(),
        }
    }
}

/// Lowercase hex SHA-1 of `input`
///
/// Label values are limited to 63 characters, so organization names, policy
/// names and other free-form identifiers are hashed before use.
pub fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}
