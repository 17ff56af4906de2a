//! API project documents
//!
//! Shapes of the JSON files inside an API project archive: the API descriptor
//! (`api.json`), the deployment descriptor (`deployments.json`) and the
//! certificate bundles. Unknown fields are ignored.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// `api.json` / `api.yaml`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApiDescriptorFile {
    pub data: ApiDescriptor,
}

/// API as exported by the control plane
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub context: String,
    pub is_default_version: bool,
    #[serde(rename = "type")]
    pub api_type: String,
    pub authorization_header: String,
    pub api_key_header: String,
    pub security_scheme: Vec<String>,
    pub additional_properties: Vec<AdditionalProperty>,
    pub cors_configuration: CorsConfiguration,
    pub endpoint_config: EndpointConfig,
    pub operations: Vec<ApiOperation>,
    pub organization_id: String,
    pub revision_id: u32,
    pub revisioned_api_id: String,
    pub api_throttling_policy: String,
    pub api_policies: MediationPolicies,
}

/// Free-form property of an API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdditionalProperty {
    pub name: String,
    pub value: String,
    pub display: bool,
}

/// CORS settings, copied to the APK configuration as-is when enabled
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsConfiguration {
    pub cors_configuration_enabled: bool,
    pub access_control_allow_origins: Vec<String>,
    pub access_control_allow_credentials: bool,
    pub access_control_allow_headers: Vec<String>,
    pub access_control_allow_methods: Vec<String>,
}

/// Backend endpoints; the control plane uses snake_case here
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub endpoint_type: String,
    pub sandbox_endpoints: Option<EndpointUrl>,
    pub production_endpoints: Option<EndpointUrl>,
    pub endpoint_security: EndpointSecurity,
}

impl EndpointConfig {
    /// Production URL, empty when not configured
    pub fn production_url(&self) -> &str {
        self.production_endpoints.as_ref().map_or("", |e| e.url.as_str())
    }

    /// Sandbox URL, empty when not configured
    pub fn sandbox_url(&self) -> &str {
        self.sandbox_endpoints.as_ref().map_or("", |e| e.url.as_str())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointUrl {
    pub url: String,
}

/// Per-environment backend credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointSecurity {
    pub production: SecurityCredentials,
    pub sandbox: SecurityCredentials,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityCredentials {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub security_type: String,
    pub username: String,
    pub password: String,
}

/// One resource of the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiOperation {
    pub target: String,
    pub verb: String,
    pub scopes: Vec<String>,
    pub operation_policies: MediationPolicies,
    pub throttling_policy: String,
    pub auth_type: String,
}

/// Request/response/fault policy chains
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MediationPolicies {
    pub request: Vec<MediationPolicy>,
    pub response: Vec<MediationPolicy>,
    pub fault: Vec<MediationPolicy>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MediationPolicy {
    pub policy_name: String,
    pub policy_version: String,
    pub policy_id: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl MediationPolicy {
    /// String parameter, empty when absent or not a string
    pub fn text(&self, key: &str) -> &str {
        self.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }
}

/// `deployments.json`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DeploymentDescriptor {
    pub data: DeploymentData,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DeploymentData {
    pub deployments: Vec<ApiDeployment>,
}

/// Where one API archive is deployed
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiDeployment {
    /// Member name of the inner archive in the root archive
    pub api_file: String,
    pub environments: Vec<DeploymentEnvironment>,
    pub organization_id: String,
}

/// Gateway environment with its virtual host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeploymentEnvironment {
    pub name: String,
    pub vhost: String,
    /// `hybrid`, `production` or `sandbox`
    #[serde(rename = "type")]
    pub deployment_type: String,
}

/// `client_certificates.json`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientCertificates {
    pub data: Vec<ClientCertificate>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientCertificate {
    pub alias: String,
    /// File name of the `.crt` member
    pub certificate: String,
    pub key_type: String,
}

/// `endpoint_certificates.json`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointCertificates {
    pub data: Vec<EndpointCertificate>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointCertificate {
    pub alias: String,
    /// Endpoint URL the certificate belongs to
    pub endpoint: String,
    /// File name of the `.crt` member
    pub certificate: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_reads_control_plane_field_names() {
        let json = serde_json::json!({
            "data": {
                "id": "api-1",
                "name": "Petstore",
                "version": "1.0.0",
                "context": "/petstore/1.0.0",
                "isDefaultVersion": true,
                "type": "HTTP",
                "securityScheme": ["oauth2", "oauth_basic_auth_api_key_mandatory"],
                "endpointConfig": {
                    "endpoint_type": "http",
                    "production_endpoints": {"url": "https://backend"},
                    "endpoint_security": {
                        "production": {"enabled": true, "type": "BASIC", "username": "u", "password": "p"}
                    }
                },
                "operations": [{
                    "target": "/pets",
                    "verb": "GET",
                    "throttlingPolicy": "Unlimited",
                    "operationPolicies": {"request": [{"policyName": "BackEndJWT", "parameters": {"tokenTTL": "3600"}}]}
                }],
                "revisionId": 3,
                "unknownField": {"ignored": true}
            }
        });
        let file: ApiDescriptorFile = serde_json::from_value(json).unwrap();
        let api = file.data;
        assert_eq!(api.api_type, "HTTP");
        assert!(api.is_default_version);
        assert_eq!(api.revision_id, 3);
        assert_eq!(api.endpoint_config.production_url(), "https://backend");
        assert_eq!(api.endpoint_config.sandbox_url(), "");
        assert!(api.endpoint_config.endpoint_security.production.enabled);
        assert_eq!(
            api.operations[0].operation_policies.request[0].text("tokenTTL"),
            "3600"
        );
    }

    #[test]
    fn test_deployment_descriptor() {
        let descriptor: DeploymentDescriptor = serde_json::from_str(
            r#"{"type":"deployments","data":{"deployments":[{"apiFile":"petstore.zip","organizationId":"carbon.super","environments":[{"name":"Default","vhost":"gw.wso2.com","type":"hybrid"}]}]}}"#,
        )
        .unwrap();
        let deployment = &descriptor.data.deployments[0];
        assert_eq!(deployment.api_file, "petstore.zip");
        assert_eq!(deployment.environments[0].deployment_type, "hybrid");
    }
}
