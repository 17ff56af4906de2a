//! Generated CR bundle parsing
//!
//! The CR generation service answers with a zip of YAML manifests, sometimes
//! with nested zips. Each manifest is dispatched on its `kind` into a typed
//! resource. A manifest that fails to decode is skipped with a warning; the
//! rest of the bundle still deploys.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::Deserialize;
use tracing::{debug, warn};

use super::apk_conf::endpoint_secret_name;
use super::archive::{read_members, ApiArtifact};
use super::K8sArtifactSet;
use crate::crd::{
    AiRateLimitPolicy, ApiPolicy, ApkApi, Authentication, Backend, BackendJwt, GqlRoute,
    HttpRoute, InterceptorService, RateLimitPolicy, Scope,
};
use crate::{Error, Result};

/// One manifest of the bundle, by kind
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum CrDocument {
    Api(Box<ApkApi>),
    HttpRoute(HttpRoute),
    GqlRoute(GqlRoute),
    Backend(Backend),
    Scope(Scope),
    Authentication(Authentication),
    ApiPolicy(ApiPolicy),
    InterceptorService(InterceptorService),
    BackendJwt(BackendJwt),
    RateLimitPolicy(RateLimitPolicy),
    AiRateLimitPolicy(AiRateLimitPolicy),
    ConfigMap(ConfigMap),
    Secret(Secret),
    /// Kind the agent does not deploy
    Unknown(String),
}

#[derive(Deserialize)]
struct KindHeader {
    #[serde(default)]
    kind: String,
}

impl CrDocument {
    /// Decode one manifest by its `kind`
    pub fn from_value(value: serde_yaml::Value) -> Result<Self> {
        let KindHeader { kind } = serde_yaml::from_value(value.clone())?;
        let typed = |e: serde_yaml::Error| Error::serialization_for(kind.as_str(), e.to_string());

        Ok(match kind.as_str() {
            "API" => Self::Api(Box::new(serde_yaml::from_value(value).map_err(typed)?)),
            "HTTPRoute" => Self::HttpRoute(serde_yaml::from_value(value).map_err(typed)?),
            "GQLRoute" => Self::GqlRoute(serde_yaml::from_value(value).map_err(typed)?),
            "Backend" => Self::Backend(serde_yaml::from_value(value).map_err(typed)?),
            "Scope" => Self::Scope(serde_yaml::from_value(value).map_err(typed)?),
            "Authentication" => Self::Authentication(serde_yaml::from_value(value).map_err(typed)?),
            "APIPolicy" => Self::ApiPolicy(serde_yaml::from_value(value).map_err(typed)?),
            "InterceptorService" => {
                Self::InterceptorService(serde_yaml::from_value(value).map_err(typed)?)
            }
            "BackendJWT" => Self::BackendJwt(serde_yaml::from_value(value).map_err(typed)?),
            "RateLimitPolicy" => Self::RateLimitPolicy(serde_yaml::from_value(value).map_err(typed)?),
            "AIRateLimitPolicy" => {
                Self::AiRateLimitPolicy(serde_yaml::from_value(value).map_err(typed)?)
            }
            "ConfigMap" => Self::ConfigMap(serde_yaml::from_value(value).map_err(typed)?),
            "Secret" => Self::Secret(serde_yaml::from_value(value).map_err(typed)?),
            _ => Self::Unknown(kind.clone()),
        })
    }
}

/// Decode every manifest in `bundle`, including nested zips
pub fn documents(bundle: &[u8]) -> Result<Vec<CrDocument>> {
    let mut docs = Vec::new();
    for (name, content) in read_members(bundle)? {
        if name.ends_with(".zip") {
            match documents(&content) {
                Ok(nested) => docs.extend(nested),
                Err(e) => warn!(member = %name, error = %e, "Skipping unreadable nested bundle"),
            }
            continue;
        }
        let text = match std::str::from_utf8(&content) {
            Ok(text) => text,
            Err(e) => {
                warn!(member = %name, error = %e, "Skipping non UTF-8 member");
                continue;
            }
        };
        for (index, manifest) in manifests(text).enumerate() {
            let value = match serde_yaml::from_str::<serde_yaml::Value>(manifest) {
                Ok(serde_yaml::Value::Null) => continue,
                Ok(value) => value,
                Err(e) => {
                    warn!(member = %name, index, error = %e, "Skipping malformed manifest");
                    continue;
                }
            };
            match CrDocument::from_value(value) {
                Ok(CrDocument::Unknown(kind)) => {
                    warn!(member = %name, kind = %kind, "Skipping manifest of unknown kind")
                }
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(member = %name, error = %e, "Skipping undecodable manifest"),
            }
        }
    }
    Ok(docs)
}

/// Split a multi-document YAML stream on its `---` separators
///
/// Each document is parsed on its own, so a syntax error in one cannot
/// swallow the documents after it.
fn manifests(text: &str) -> impl Iterator<Item = &str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            documents.push(&text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&text[start..]);
    documents.into_iter().filter(|doc| !doc.trim().is_empty())
}

/// Build the artifact set of one API from its generated bundle
///
/// Certificate ConfigMaps and endpoint credential Secrets come from the
/// decoded archive rather than from the generation service.
pub fn parse(bundle: &[u8], artifact: &ApiArtifact, api_unique_id: &str) -> Result<K8sArtifactSet> {
    let mut set = K8sArtifactSet::default();
    for doc in documents(bundle)? {
        set.insert(doc);
    }
    debug!(resources = set.len(), "Parsed generated CRs");

    let api_name = set
        .api
        .as_ref()
        .and_then(|api| api.metadata.name.clone())
        .unwrap_or_else(|| api_unique_id.to_string());
    for (file, content) in artifact
        .client_cert_files
        .iter()
        .chain(artifact.endpoint_cert_files.iter())
    {
        let cm = certificate_config_map(&api_name, file, content);
        if let Some(name) = cm.metadata.name.clone() {
            set.config_maps.insert(name, cm);
        }
    }

    let security = &artifact.descriptor.endpoint_config.endpoint_security;
    for (env, credentials) in [("production", &security.production), ("sandbox", &security.sandbox)] {
        if credentials.enabled {
            let secret = endpoint_secret(
                &endpoint_secret_name(api_unique_id, env),
                &credentials.username,
                &credentials.password,
            );
            if let Some(name) = secret.metadata.name.clone() {
                set.secrets.insert(name, secret);
            }
        }
    }
    Ok(set)
}

/// ConfigMap `<api>-<stem>` holding the decoded certificate under its file name
fn certificate_config_map(api_name: &str, file: &str, content: &str) -> ConfigMap {
    let stem = file.split('.').next().unwrap_or(file);
    let body: String = content
        .replace("-----BEGIN CERTIFICATE-----", "")
        .replace("-----END CERTIFICATE-----", "")
        .split_whitespace()
        .collect();

    let mut cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("{api_name}-{stem}")),
            labels: Some(BTreeMap::new()),
            ..Default::default()
        },
        ..Default::default()
    };
    match STANDARD.decode(body.as_bytes()) {
        Ok(decoded) => match String::from_utf8(decoded) {
            Ok(text) => cm.data = Some(BTreeMap::from([(file.to_string(), text)])),
            Err(e) => {
                cm.binary_data = Some(BTreeMap::from([(file.to_string(), ByteString(e.into_bytes()))]))
            }
        },
        Err(e) => {
            warn!(file = %file, error = %e, "Certificate is not base64, storing as-is");
            cm.data = Some(BTreeMap::from([(file.to_string(), content.to_string())]));
        }
    }
    cm
}

fn endpoint_secret(name: &str, username: &str, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::new()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("username".to_string(), ByteString(username.as_bytes().to_vec())),
            ("password".to_string(), ByteString(password.as_bytes().to_vec())),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::testing::zip_of;

    const API_YAML: &str = r#"
apiVersion: dp.wso2.com/v1alpha3
kind: API
metadata:
  name: petstore-api
spec:
  apiName: Petstore
  apiVersion: "1.0.0"
  production:
    - routeRefs: [petstore-prod]
"#;

    const ROUTES_YAML: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: petstore-prod
spec:
  hostnames: [default.gw.wso2.com]
---
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: petstore-sand
spec:
  hostnames: [sandbox.gw.wso2.com]
"#;

    /// Story: A generated bundle becomes a typed artifact set
    #[test]
    fn story_bundle_parsed_by_kind() {
        let nested = zip_of(&[("scope.yaml", b"apiVersion: dp.wso2.com/v1alpha1\nkind: Scope\nmetadata:\n  name: read\nspec:\n  names: [read]\n")]);
        let bundle = zip_of(&[
            ("api.yaml", API_YAML.as_bytes()),
            ("routes.yaml", ROUTES_YAML.as_bytes()),
            ("gateway.yaml", b"apiVersion: gateway.networking.k8s.io/v1\nkind: Gateway\nmetadata:\n  name: gw\n"),
            ("extra.zip", &nested),
        ]);

        let set = parse(&bundle, &ApiArtifact::default(), "uid").unwrap();
        assert_eq!(set.api.as_ref().unwrap().spec.api_name, "Petstore");
        assert_eq!(set.http_routes.len(), 2);
        assert!(set.http_routes.contains_key("petstore-sand"));
        assert!(set.scopes.contains_key("read"));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_bad_document_skipped() {
        let bundle = zip_of(&[
            ("api.yaml", API_YAML.as_bytes()),
            ("broken.yaml", b"apiVersion: dp.wso2.com/v1alpha2\nkind: Backend\nmetadata: 12\n"),
        ]);
        let set = parse(&bundle, &ApiArtifact::default(), "uid").unwrap();
        assert!(set.api.is_some());
        assert!(set.backends.is_empty());
    }

    #[test]
    fn test_malformed_manifest_does_not_hide_later_ones() {
        let routes = format!(
            "{}---\nkind: HTTPRoute\nmetadata: {{name: [unclosed\n---{}",
            "apiVersion: gateway.networking.k8s.io/v1\nkind: HTTPRoute\nmetadata:\n  name: first\nspec:\n  hostnames: [a.example.com]\n",
            ROUTES_YAML
        );
        let bundle = zip_of(&[("routes.yaml", routes.as_bytes())]);

        let docs = documents(&bundle).unwrap();
        let names: Vec<_> = docs
            .iter()
            .map(|doc| match doc {
                CrDocument::HttpRoute(route) => route.metadata.name.clone().unwrap_or_default(),
                other => panic!("unexpected document {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["first", "petstore-prod", "petstore-sand"]);
    }

    #[test]
    fn test_manifests_split_on_separators() {
        let text = "---\na: 1\n--- # trailing comment\nb: 2\n---\n\n";
        assert_eq!(manifests(text).collect::<Vec<_>>(), vec!["a: 1\n", "b: 2\n"]);
    }

    #[test]
    fn test_unknown_kind_is_explicit() {
        let value: serde_yaml::Value = serde_yaml::from_str("kind: Gateway\nmetadata: {name: gw}").unwrap();
        assert_eq!(CrDocument::from_value(value).unwrap(), CrDocument::Unknown("Gateway".to_string()));
    }

    #[test]
    fn test_certificate_config_maps_and_secrets_added() {
        let mut artifact = ApiArtifact::default();
        let pem = format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            STANDARD.encode("cert-body")
        );
        artifact.client_cert_files.insert("client1.crt".to_string(), pem);
        let security = &mut artifact.descriptor.endpoint_config.endpoint_security;
        security.production.enabled = true;
        security.production.username = "admin".to_string();
        security.production.password = "secret".to_string();

        let bundle = zip_of(&[("api.yaml", API_YAML.as_bytes())]);
        let set = parse(&bundle, &artifact, "uid").unwrap();

        let cm = set.config_maps.get("petstore-api-client1").unwrap();
        assert_eq!(cm.data.as_ref().unwrap()["client1.crt"], "cert-body");

        let secret = set.secrets.get("uid-production-secret").unwrap();
        assert_eq!(secret.data.as_ref().unwrap()["username"], ByteString(b"admin".to_vec()));
        assert!(!set.secrets.contains_key("uid-sandbox-secret"));
    }

    #[test]
    fn test_binary_certificate_kept_binary() {
        let content = STANDARD.encode([0xff_u8, 0xfe, 0x00]);
        let cm = certificate_config_map("api", "ep.crt", &content);
        assert!(cm.data.is_none());
        assert_eq!(cm.binary_data.unwrap()["ep.crt"], ByteString(vec![0xff, 0xfe, 0x00]));
    }

    #[test]
    fn test_not_a_zip_is_archive_error() {
        assert!(matches!(
            parse(b"nope", &ApiArtifact::default(), "uid"),
            Err(Error::Archive { .. })
        ));
    }
}
