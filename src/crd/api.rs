//! API-scoped resources produced by the CR generation service

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fields of a resource the agent does not interpret
type Extra = BTreeMap<String, serde_json::Value>;

/// Routes serving one environment of an API
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    /// Names of the HTTPRoute/GQLRoute resources of this environment
    #[serde(default)]
    pub route_refs: Vec<String>,
}

/// Desired state of the API resource
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha3",
    kind = "API",
    plural = "apis",
    root = "ApkApi",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    /// API display name
    #[serde(default)]
    pub api_name: String,
    /// API version
    #[serde(default)]
    pub api_version: String,
    /// Context path
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_path: String,
    /// Owning organization (raw, not hashed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    /// Production routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production: Option<Vec<EnvConfig>>,
    /// Sandbox routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Vec<EnvConfig>>,
    /// Everything else
    #[serde(flatten)]
    pub extra: Extra,
}

impl ApiSpec {
    /// Route names of the production environment
    pub fn production_routes(&self) -> Vec<String> {
        route_names(self.production.as_deref())
    }

    /// Route names of the sandbox environment
    pub fn sandbox_routes(&self) -> Vec<String> {
        route_names(self.sandbox.as_deref())
    }
}

fn route_names(envs: Option<&[EnvConfig]>) -> Vec<String> {
    envs.unwrap_or_default()
        .iter()
        .flat_map(|env| env.route_refs.iter().cloned())
        .collect()
}

/// Gateway API HTTPRoute
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "HTTPRoute",
    plural = "httproutes",
    root = "HttpRoute",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Hostnames the route matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostnames: Option<Vec<String>>,
    /// Parent refs, rules, ...
    #[serde(flatten)]
    pub extra: Extra,
}

/// GraphQL route
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha2",
    kind = "GQLRoute",
    plural = "gqlroutes",
    root = "GqlRoute",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct GqlRouteSpec {
    /// Hostnames the route matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostnames: Option<Vec<String>>,
    /// Parent refs, rules, ...
    #[serde(flatten)]
    pub extra: Extra,
}

/// Upstream backend
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha2",
    kind = "Backend",
    plural = "backends",
    namespaced,
    derive = "PartialEq"
)]
pub struct BackendSpec {
    /// Services, protocol, TLS and security settings
    #[serde(flatten)]
    pub extra: Extra,
}

/// OAuth2 scope definition
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha1",
    kind = "Scope",
    plural = "scopes",
    namespaced,
    derive = "PartialEq"
)]
pub struct ScopeSpec {
    /// Scope names
    #[serde(flatten)]
    pub extra: Extra,
}

/// Authentication settings of an API or resource
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha2",
    kind = "Authentication",
    plural = "authentications",
    namespaced,
    derive = "PartialEq"
)]
pub struct AuthenticationSpec {
    /// Default/override auth configuration and target
    #[serde(flatten)]
    pub extra: Extra,
}

/// Request/response policies of an API
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha4",
    kind = "APIPolicy",
    plural = "apipolicies",
    root = "ApiPolicy",
    namespaced,
    derive = "PartialEq"
)]
pub struct ApiPolicySpec {
    /// Policy configuration and target
    #[serde(flatten)]
    pub extra: Extra,
}

/// External interceptor service
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha1",
    kind = "InterceptorService",
    plural = "interceptorservices",
    namespaced,
    derive = "PartialEq"
)]
pub struct InterceptorServiceSpec {
    /// Backend ref and included request parts
    #[serde(flatten)]
    pub extra: Extra,
}

/// JWT forwarded to the backend
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dp.wso2.com",
    version = "v1alpha1",
    kind = "BackendJWT",
    plural = "backendjwts",
    root = "BackendJwt",
    namespaced,
    derive = "PartialEq"
)]
pub struct BackendJwtSpec {
    /// Encoding, header, signing algorithm and TTL
    #[serde(flatten)]
    pub extra: Extra,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_api_round_trips_unknown_fields() {
        let yaml = r#"
apiVersion: dp.wso2.com/v1alpha3
kind: API
metadata:
  name: petstore-api
  labels:
    managed-by: apk
spec:
  apiName: Petstore
  apiVersion: "1.0"
  basePath: /petstore/1.0
  isDefaultVersion: true
  definitionFileRef: petstore-definition
  production:
    - routeRefs: [petstore-prod-route]
  sandbox:
    - routeRefs: [petstore-sand-route]
"#;
        let api: ApkApi = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(api.spec.api_name, "Petstore");
        assert_eq!(api.spec.production_routes(), vec!["petstore-prod-route"]);
        assert_eq!(api.spec.sandbox_routes(), vec!["petstore-sand-route"]);
        assert_eq!(
            api.spec.extra.get("definitionFileRef"),
            Some(&serde_json::json!("petstore-definition"))
        );

        let value = serde_json::to_value(&api).unwrap();
        assert_eq!(value["kind"], "API");
        assert_eq!(value["apiVersion"], "dp.wso2.com/v1alpha3");
        assert_eq!(value["spec"]["isDefaultVersion"], true);
    }

    #[test]
    fn test_route_kinds_and_versions() {
        assert_eq!(HttpRoute::kind(&()), "HTTPRoute");
        assert_eq!(HttpRoute::api_version(&()), "gateway.networking.k8s.io/v1");
        assert_eq!(GqlRoute::api_version(&()), "dp.wso2.com/v1alpha2");
        assert_eq!(ApiPolicy::plural(&()), "apipolicies");
    }
}
