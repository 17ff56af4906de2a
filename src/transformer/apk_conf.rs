//! API descriptor to APK configuration mapping
//!
//! The APK configuration is the YAML document the CR generation service turns
//! into custom resources. Mapping is a pure projection of the decoded archive
//! plus the cached throttling policies of the API's organization.

#![allow(missing_docs)]

use serde::Serialize;
use tracing::{debug, warn};

use super::archive::ApiArtifact;
use super::model::{ApiOperation, CorsConfiguration, MediationPolicies, MediationPolicy};
use crate::crd::sha1_hex;
use crate::store::RateLimitPolicyCache;
use crate::Result;

/// Path the CR generation service stores the definition under
pub const DEFINITION_PATH: &str = "/definition";

/// Header enforcers read internal keys from
pub const INTERNAL_KEY_HEADER: &str = "internal-key";

/// Secret holding the interceptor service's TLS certificate
pub const INTERCEPTOR_TLS_SECRET: &str = "interceptor-tls-secret";

const INTERCEPTOR_POLICY: &str = "Interceptor";
const BACKEND_JWT_POLICY: &str = "BackendJwt";
const POLICY_VERSION: &str = "v1";
const TLS_KEY: &str = "tls.crt";

// Control-plane policy and security-scheme names
const CP_INTERCEPTOR_POLICY: &str = "ccCallInterceptorService";
const CP_BACKEND_JWT_POLICY: &str = "BackEndJWT";
const OAUTH2_SCHEME: &str = "oauth2";
const APP_SECURITY_MANDATORY: &str = "oauth_basic_auth_api_key_mandatory";
const MUTUAL_SSL: &str = "mutualssl";
const MUTUAL_SSL_MANDATORY: &str = "mutualssl_mandatory";

/// Settings the mapping takes from agent configuration
#[derive(Clone, Debug)]
pub struct MappingSettings {
    /// Backend URL of the shared interceptor service
    pub interceptor_url: String,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            interceptor_url: crate::DEFAULT_INTERCEPTOR_URL.to_string(),
        }
    }
}

/// The `.apk-conf` document
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApkConf {
    pub name: String,
    pub base_path: String,
    pub version: String,
    #[serde(rename = "type")]
    pub api_type: String,
    pub default_version: bool,
    pub definition_path: String,
    pub subscription_validation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_configurations: Option<EndpointConfigurations>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_policies: Option<OperationPolicies>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<AuthConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_configuration: Option<CorsConfiguration>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_properties: Vec<Property>,
}

impl ApkConf {
    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct EndpointConfigurations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production: Option<EndpointConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<EndpointConfiguration>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfiguration {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<EndpointCertificate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_security: Option<EndpointSecurity>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointCertificate {
    pub secret_name: String,
    pub secret_key: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSecurity {
    pub enabled: bool,
    pub security_type: SecretInfo,
}

/// Where basic-auth credentials of an endpoint live
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretInfo {
    pub secret_name: String,
    pub user_name_key: String,
    pub password_key: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub target: String,
    pub verb: String,
    pub scopes: Vec<String>,
    pub secured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_policies: Option<OperationPolicies>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct OperationPolicies {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub request: Vec<OperationPolicy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<OperationPolicy>,
}

impl OperationPolicies {
    fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationPolicy {
    pub policy_name: String,
    pub policy_version: String,
    pub parameters: PolicyParameters,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PolicyParameters {
    Interceptor(InterceptorParameters),
    BackendJwt(BackendJwtParameters),
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InterceptorParameters {
    pub backend_url: String,
    pub headers_enabled: bool,
    pub body_enabled: bool,
    pub trailers_enabled: bool,
    pub context_enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_secret_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_secret_key: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendJwtParameters {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub encoding: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub header: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signing_algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_ttl: Option<i64>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests_per_unit: i64,
    pub unit: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfiguration {
    pub auth_type: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub required: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub header_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<Certificate>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Certificate {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: String,
}

/// Throttling policies the configuration references, by attachment level
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitPolicyNames {
    /// Policy applied to the whole API
    pub api: Option<String>,
    /// Policy applied to individual resources
    pub resource: Option<String>,
}

/// Result of mapping one API
#[derive(Clone, Debug, PartialEq)]
pub struct MappedApi {
    pub conf: ApkConf,
    /// Stable identity of the API across revisions
    pub api_unique_id: String,
    pub revision_id: u32,
    pub revisioned_api_id: String,
    pub rate_limit_policy_names: RateLimitPolicyNames,
}

/// Identity derived from organization, name and version
pub fn api_unique_id(organization: &str, name: &str, version: &str) -> String {
    sha1_hex(&format!("{organization}{name}{version}"))
}

/// Project an API artifact into its APK configuration
pub fn map(artifact: &ApiArtifact, policies: &RateLimitPolicyCache, settings: &MappingSettings) -> MappedApi {
    let api = &artifact.descriptor;
    let organization = artifact.organization();
    let unique_id = api_unique_id(organization, &api.name, &api.version);
    let mut names = RateLimitPolicyNames::default();

    let rate_limit = if api.api_throttling_policy.is_empty() {
        None
    } else {
        let limit = resolve_rate_limit(policies, &api.api_throttling_policy, organization);
        if limit.is_some() {
            names.api = Some(api.api_throttling_policy.clone());
        }
        limit
    };

    let operations = api
        .operations
        .iter()
        .map(|op| {
            let op_rate_limit = if api.api_throttling_policy.is_empty() && !op.throttling_policy.is_empty() {
                let limit = resolve_rate_limit(policies, &op.throttling_policy, organization);
                if limit.is_some() {
                    names.resource = Some(op.throttling_policy.clone());
                }
                limit
            } else {
                None
            };
            map_operation(op, op_rate_limit, settings)
        })
        .collect();

    let api_policies = map_policies(&api.api_policies, settings);

    let conf = ApkConf {
        name: api.name.clone(),
        base_path: api.context.clone(),
        version: api.version.clone(),
        api_type: api_type(&api.api_type),
        default_version: api.is_default_version,
        definition_path: DEFINITION_PATH.to_string(),
        subscription_validation: true,
        endpoint_configurations: endpoint_configurations(artifact, &unique_id),
        operations,
        api_policies: (!api_policies.is_empty()).then_some(api_policies),
        rate_limit,
        authentication: authentication(artifact, &unique_id),
        cors_configuration: api
            .cors_configuration
            .cors_configuration_enabled
            .then(|| api.cors_configuration.clone()),
        additional_properties: api
            .additional_properties
            .iter()
            .map(|p| Property {
                name: p.name.clone(),
                value: p.value.clone(),
            })
            .collect(),
    };
    debug!(api = %api.name, version = %api.version, unique_id = %unique_id, "Mapped APK configuration");

    MappedApi {
        conf,
        api_unique_id: unique_id,
        revision_id: api.revision_id,
        revisioned_api_id: api.revisioned_api_id.clone(),
        rate_limit_policy_names: names,
    }
}

fn api_type(protocol: &str) -> String {
    match protocol.to_ascii_uppercase().as_str() {
        "HTTP" | "HTTPS" | "REST" => "REST".to_string(),
        "GRAPHQL" => "GRAPHQL".to_string(),
        other => {
            warn!(api_type = %other, "Unmapped API type, passing through");
            other.to_string()
        }
    }
}

fn resolve_rate_limit(policies: &RateLimitPolicyCache, name: &str, organization: &str) -> Option<RateLimit> {
    match policies.get(name, organization) {
        Some(policy) => Some(RateLimit {
            requests_per_unit: policy.requests_per_unit,
            unit: policy.unit.as_str().to_string(),
        }),
        None => {
            warn!(policy = %name, organization = %organization, "Throttling policy not cached, rate limit skipped");
            None
        }
    }
}

fn map_operation(op: &ApiOperation, rate_limit: Option<RateLimit>, settings: &MappingSettings) -> Operation {
    let policies = map_policies(&op.operation_policies, settings);
    Operation {
        target: op.target.clone(),
        verb: op.verb.clone(),
        scopes: op.scopes.clone(),
        secured: true,
        operation_policies: (!policies.is_empty()).then_some(policies),
        rate_limit,
    }
}

/// Translate control-plane mediation policies
///
/// Backend JWT maps to `BackendJwt`. Any other policy in a direction routes
/// that direction through one interceptor: the one a `ccCallInterceptorService`
/// policy names, otherwise the shared interceptor service.
fn map_policies(policies: &MediationPolicies, settings: &MappingSettings) -> OperationPolicies {
    let mut mapped = OperationPolicies::default();

    if let Some(interceptor) = interceptor_for(&policies.request, "request", settings) {
        mapped.request.push(interceptor);
    }
    mapped.request.extend(
        policies
            .request
            .iter()
            .filter(|p| p.policy_name == CP_BACKEND_JWT_POLICY)
            .take(1)
            .map(backend_jwt),
    );
    if let Some(interceptor) = interceptor_for(&policies.response, "response", settings) {
        mapped.response.push(interceptor);
    }
    mapped
}

fn interceptor_for(policies: &[MediationPolicy], flow: &str, settings: &MappingSettings) -> Option<OperationPolicy> {
    if let Some(explicit) = policies.iter().find(|p| p.policy_name == CP_INTERCEPTOR_POLICY) {
        let url = explicit.text("interceptorServiceURL");
        let includes = explicit.text("includes");
        let has = |part: &str| includes.split(',').any(|s| s.trim().contains(part));
        let (tls_secret_name, tls_secret_key) = tls_secret(url, &format!("{}{flow}-{INTERCEPTOR_TLS_SECRET}", explicit.policy_id));
        return Some(interceptor_policy(InterceptorParameters {
            backend_url: url.to_string(),
            headers_enabled: has(&format!("{flow}_header")),
            body_enabled: has(&format!("{flow}_body")),
            trailers_enabled: has(&format!("{flow}_trailers")),
            context_enabled: has(&format!("{flow}_context")),
            tls_secret_name,
            tls_secret_key,
        }));
    }

    if !policies.iter().any(|p| p.policy_name != CP_BACKEND_JWT_POLICY) {
        return None;
    }
    let url = &settings.interceptor_url;
    let (tls_secret_name, tls_secret_key) = tls_secret(url, INTERCEPTOR_TLS_SECRET);
    Some(interceptor_policy(InterceptorParameters {
        backend_url: url.clone(),
        headers_enabled: true,
        body_enabled: true,
        trailers_enabled: true,
        context_enabled: true,
        tls_secret_name,
        tls_secret_key,
    }))
}

fn tls_secret(url: &str, name: &str) -> (String, String) {
    if url.starts_with("https") {
        (name.to_string(), TLS_KEY.to_string())
    } else {
        (String::new(), String::new())
    }
}

fn interceptor_policy(parameters: InterceptorParameters) -> OperationPolicy {
    OperationPolicy {
        policy_name: INTERCEPTOR_POLICY.to_string(),
        policy_version: POLICY_VERSION.to_string(),
        parameters: PolicyParameters::Interceptor(parameters),
    }
}

fn backend_jwt(policy: &MediationPolicy) -> OperationPolicy {
    let encoding = match policy.text("encoding") {
        "Base64Url" => "Base64url",
        other => other,
    };
    let token_ttl = match policy.parameters.get("tokenTTL") {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => match s.trim().parse() {
            Ok(ttl) => Some(ttl),
            Err(_) => {
                warn!(token_ttl = %s, "Ignoring non-numeric backend JWT TTL");
                None
            }
        },
        _ => None,
    };
    OperationPolicy {
        policy_name: BACKEND_JWT_POLICY.to_string(),
        policy_version: POLICY_VERSION.to_string(),
        parameters: PolicyParameters::BackendJwt(BackendJwtParameters {
            encoding: encoding.to_string(),
            header: policy.text("header").to_string(),
            signing_algorithm: policy.text("signingAlgorithm").to_string(),
            token_ttl,
        }),
    }
}

fn endpoint_configurations(artifact: &ApiArtifact, unique_id: &str) -> Option<EndpointConfigurations> {
    let endpoints = &artifact.descriptor.endpoint_config;
    let security = &endpoints.endpoint_security;

    let configure = |url: &str, env: &str, secured: bool| -> Option<EndpointConfiguration> {
        if url.is_empty() {
            return None;
        }
        let certificate = artifact
            .endpoint_certificates
            .as_ref()
            .and_then(|certs| certs.data.iter().find(|c| c.endpoint == url))
            .map(|cert| EndpointCertificate {
                secret_name: cert.alias.clone(),
                secret_key: cert.certificate.clone(),
            });
        let endpoint_security = secured.then(|| EndpointSecurity {
            enabled: true,
            security_type: SecretInfo {
                secret_name: endpoint_secret_name(unique_id, env),
                user_name_key: "username".to_string(),
                password_key: "password".to_string(),
            },
        });
        Some(EndpointConfiguration {
            endpoint: url.to_string(),
            certificate,
            endpoint_security,
        })
    };

    let production = configure(endpoints.production_url(), "production", security.production.enabled);
    let sandbox = configure(endpoints.sandbox_url(), "sandbox", security.sandbox.enabled);
    if production.is_none() && sandbox.is_none() {
        return None;
    }
    Some(EndpointConfigurations { production, sandbox })
}

/// Name of the Secret holding an environment's endpoint credentials
pub fn endpoint_secret_name(unique_id: &str, env: &str) -> String {
    format!("{unique_id}-{env}-secret")
}

fn authentication(artifact: &ApiArtifact, unique_id: &str) -> Vec<AuthConfiguration> {
    let api = &artifact.descriptor;
    let has = |scheme: &str| api.security_scheme.iter().any(|s| s == scheme);
    let required = |mandatory: bool| (if mandatory { "mandatory" } else { "optional" }).to_string();
    let mut configs = Vec::new();

    if has(OAUTH2_SCHEME) {
        configs.push(AuthConfiguration {
            auth_type: "OAuth2".to_string(),
            enabled: true,
            required: required(has(APP_SECURITY_MANDATORY)),
            header_name: api.authorization_header.clone(),
            ..Default::default()
        });
    }

    if has(MUTUAL_SSL) {
        if let Some(certs) = &artifact.client_certificates {
            configs.push(AuthConfiguration {
                auth_type: "mTLS".to_string(),
                enabled: true,
                required: required(has(MUTUAL_SSL_MANDATORY)),
                certificates: certs
                    .data
                    .iter()
                    .map(|c| Certificate {
                        name: format!("{unique_id}-{}", c.alias),
                        key: c.certificate.clone(),
                    })
                    .collect(),
                ..Default::default()
            });
        }
    }

    configs.push(AuthConfiguration {
        auth_type: "JWT".to_string(),
        enabled: true,
        header_name: INTERNAL_KEY_HEADER.to_string(),
        audience: vec![api.id.clone()],
        ..Default::default()
    });
    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::types::{RateUnit, ResolvedRateLimitPolicy};
    use crate::transformer::model::{
        ApiDescriptor, ApiDeployment, ClientCertificate, ClientCertificates, EndpointCertificate as CpEndpointCertificate,
        EndpointCertificates, EndpointConfig, EndpointUrl,
    };
    use rstest::rstest;

    fn policy(name: &str, params: serde_json::Value) -> MediationPolicy {
        MediationPolicy {
            policy_name: name.to_string(),
            policy_version: "v1".to_string(),
            policy_id: "p1".to_string(),
            parameters: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn artifact() -> ApiArtifact {
        ApiArtifact {
            descriptor: ApiDescriptor {
                id: "api-uuid".to_string(),
                name: "Petstore".to_string(),
                version: "1.0.0".to_string(),
                context: "/petstore".to_string(),
                api_type: "HTTP".to_string(),
                authorization_header: "Authorization".to_string(),
                security_scheme: vec!["oauth2".to_string(), "oauth_basic_auth_api_key_mandatory".to_string()],
                endpoint_config: EndpointConfig {
                    production_endpoints: Some(EndpointUrl {
                        url: "https://backend.prod".to_string(),
                    }),
                    ..Default::default()
                },
                operations: vec![ApiOperation {
                    target: "/pets".to_string(),
                    verb: "GET".to_string(),
                    ..Default::default()
                }],
                organization_id: "acme".to_string(),
                revision_id: 3,
                ..Default::default()
            },
            deployment: ApiDeployment {
                organization_id: "acme".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn gold() -> RateLimitPolicyCache {
        let cache = RateLimitPolicyCache::new();
        cache.upsert(ResolvedRateLimitPolicy {
            name: "Gold".to_string(),
            tenant_domain: "acme".to_string(),
            requests_per_unit: 5000,
            unit: RateUnit::Minute,
        });
        cache
    }

    #[rstest]
    #[case::http("HTTP", "REST")]
    #[case::https("HTTPS", "REST")]
    #[case::graphql("GRAPHQL", "GRAPHQL")]
    fn test_api_type_mapping(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(api_type(input), expected);
    }

    /// Story: A plain OAuth2 REST API maps to a minimal configuration
    #[test]
    fn story_basic_api_maps_to_conf() {
        let mapped = map(&artifact(), &RateLimitPolicyCache::new(), &MappingSettings::default());
        let conf = &mapped.conf;

        assert_eq!(conf.name, "Petstore");
        assert_eq!(conf.base_path, "/petstore");
        assert_eq!(conf.api_type, "REST");
        assert_eq!(conf.definition_path, DEFINITION_PATH);
        assert!(conf.subscription_validation);
        assert_eq!(mapped.revision_id, 3);
        assert_eq!(mapped.api_unique_id, api_unique_id("acme", "Petstore", "1.0.0"));

        let endpoints = conf.endpoint_configurations.as_ref().unwrap();
        assert_eq!(endpoints.production.as_ref().unwrap().endpoint, "https://backend.prod");
        assert!(endpoints.sandbox.is_none());

        assert_eq!(conf.authentication.len(), 2);
        assert_eq!(conf.authentication[0].auth_type, "OAuth2");
        assert_eq!(conf.authentication[0].required, "mandatory");
        let internal = &conf.authentication[1];
        assert_eq!(internal.auth_type, "JWT");
        assert_eq!(internal.header_name, INTERNAL_KEY_HEADER);
        assert_eq!(internal.audience, vec!["api-uuid".to_string()]);

        assert!(conf.operations[0].secured);
        assert!(conf.operations[0].operation_policies.is_none());
        assert!(conf.cors_configuration.is_none());
    }

    #[test]
    fn test_api_rate_limit_resolved_from_cache() {
        let mut artifact = artifact();
        artifact.descriptor.api_throttling_policy = "Gold".to_string();
        artifact.descriptor.operations[0].throttling_policy = "Bronze".to_string();

        let mapped = map(&artifact, &gold(), &MappingSettings::default());
        let limit = mapped.conf.rate_limit.unwrap();
        assert_eq!(limit.requests_per_unit, 5000);
        assert_eq!(limit.unit, "Minute");
        assert_eq!(mapped.rate_limit_policy_names.api.as_deref(), Some("Gold"));
        // API-level policy wins over resource-level ones
        assert!(mapped.conf.operations[0].rate_limit.is_none());
        assert!(mapped.rate_limit_policy_names.resource.is_none());
    }

    #[test]
    fn test_resource_rate_limit_when_no_api_policy() {
        let mut artifact = artifact();
        artifact.descriptor.operations[0].throttling_policy = "Gold".to_string();

        let mapped = map(&artifact, &gold(), &MappingSettings::default());
        assert!(mapped.conf.rate_limit.is_none());
        assert_eq!(mapped.conf.operations[0].rate_limit.as_ref().unwrap().requests_per_unit, 5000);
        assert_eq!(mapped.rate_limit_policy_names.resource.as_deref(), Some("Gold"));
    }

    #[test]
    fn test_unknown_rate_limit_policy_skipped() {
        let mut artifact = artifact();
        artifact.descriptor.api_throttling_policy = "Platinum".to_string();
        let mapped = map(&artifact, &gold(), &MappingSettings::default());
        assert!(mapped.conf.rate_limit.is_none());
        assert!(mapped.rate_limit_policy_names.api.is_none());
    }

    /// Story: Mediation policies route the operation through an interceptor
    #[test]
    fn story_mediation_policies_attach_shared_interceptor() {
        let mut artifact = artifact();
        artifact.descriptor.operations[0].operation_policies = MediationPolicies {
            request: vec![
                policy("addHeader", serde_json::json!({"headerName": "x-a"})),
                policy(
                    "BackEndJWT",
                    serde_json::json!({"encoding": "Base64Url", "header": "X-JWT", "signingAlgorithm": "SHA256withRSA", "tokenTTL": "3600"}),
                ),
            ],
            response: vec![policy("removeHeader", serde_json::json!({}))],
            fault: vec![],
        };

        let mapped = map(&artifact, &RateLimitPolicyCache::new(), &MappingSettings::default());
        let policies = mapped.conf.operations[0].operation_policies.as_ref().unwrap();

        assert_eq!(policies.request.len(), 2);
        assert_eq!(policies.request[0].policy_name, "Interceptor");
        match &policies.request[0].parameters {
            PolicyParameters::Interceptor(p) => {
                assert_eq!(p.backend_url, crate::DEFAULT_INTERCEPTOR_URL);
                assert!(p.headers_enabled && p.body_enabled && p.trailers_enabled && p.context_enabled);
                assert_eq!(p.tls_secret_name, INTERCEPTOR_TLS_SECRET);
                assert_eq!(p.tls_secret_key, "tls.crt");
            }
            other => panic!("unexpected parameters {other:?}"),
        }
        match &policies.request[1].parameters {
            PolicyParameters::BackendJwt(p) => {
                assert_eq!(p.encoding, "Base64url");
                assert_eq!(p.token_ttl, Some(3600));
            }
            other => panic!("unexpected parameters {other:?}"),
        }
        assert_eq!(policies.response.len(), 1);
    }

    #[test]
    fn test_backend_jwt_alone_adds_no_interceptor() {
        let mut artifact = artifact();
        artifact.descriptor.operations[0].operation_policies.request =
            vec![policy("BackEndJWT", serde_json::json!({"tokenTTL": 60}))];
        let mapped = map(&artifact, &RateLimitPolicyCache::new(), &MappingSettings::default());
        let policies = mapped.conf.operations[0].operation_policies.as_ref().unwrap();
        assert_eq!(policies.request.len(), 1);
        assert_eq!(policies.request[0].policy_name, "BackendJwt");
    }

    #[test]
    fn test_explicit_interceptor_uses_its_own_parameters() {
        let mut artifact = artifact();
        artifact.descriptor.api_policies.request = vec![policy(
            "ccCallInterceptorService",
            serde_json::json!({"interceptorServiceURL": "http://custom:8080", "includes": "request_header,request_body"}),
        )];
        let mapped = map(&artifact, &RateLimitPolicyCache::new(), &MappingSettings::default());
        let api_policies = mapped.conf.api_policies.unwrap();
        match &api_policies.request[0].parameters {
            PolicyParameters::Interceptor(p) => {
                assert_eq!(p.backend_url, "http://custom:8080");
                assert!(p.headers_enabled && p.body_enabled);
                assert!(!p.trailers_enabled && !p.context_enabled);
                assert!(p.tls_secret_name.is_empty());
            }
            other => panic!("unexpected parameters {other:?}"),
        }
    }

    #[test]
    fn test_mtls_and_endpoint_security() {
        let mut artifact = artifact();
        artifact.descriptor.security_scheme = vec!["mutualssl".to_string(), "mutualssl_mandatory".to_string()];
        artifact.client_certificates = Some(ClientCertificates {
            data: vec![ClientCertificate {
                alias: "client1".to_string(),
                certificate: "client1.crt".to_string(),
                ..Default::default()
            }],
        });
        artifact.endpoint_certificates = Some(EndpointCertificates {
            data: vec![CpEndpointCertificate {
                alias: "backend-cert".to_string(),
                endpoint: "https://backend.prod".to_string(),
                certificate: "backend.crt".to_string(),
            }],
        });
        artifact.descriptor.endpoint_config.endpoint_security.production.enabled = true;

        let mapped = map(&artifact, &RateLimitPolicyCache::new(), &MappingSettings::default());
        let mtls = &mapped.conf.authentication[0];
        assert_eq!(mtls.auth_type, "mTLS");
        assert_eq!(mtls.required, "mandatory");
        assert_eq!(mtls.certificates[0].name, format!("{}-client1", mapped.api_unique_id));

        let production = mapped.conf.endpoint_configurations.unwrap().production.unwrap();
        assert_eq!(production.certificate.unwrap().secret_name, "backend-cert");
        assert_eq!(
            production.endpoint_security.unwrap().security_type.secret_name,
            endpoint_secret_name(&mapped.api_unique_id, "production")
        );
    }

    #[test]
    fn test_yaml_uses_conf_field_names() {
        let yaml = map(&artifact(), &RateLimitPolicyCache::new(), &MappingSettings::default())
            .conf
            .to_yaml()
            .unwrap();
        assert!(yaml.contains("basePath: /petstore"));
        assert!(yaml.contains("type: REST"));
        assert!(yaml.contains("definitionPath: /definition"));
        assert!(yaml.contains("endpointConfigurations:"));
        assert!(!yaml.contains("corsConfiguration"));
    }
}
