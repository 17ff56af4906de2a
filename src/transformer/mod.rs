//! API archive to custom resource pipeline
//!
//! `decode` (archive) → `map` (apk_conf) → `generate` (crgen) → `parse`.
//! Each API of a runtime-artifact archive runs through the pipeline on its
//! own; one failing API does not hold back the rest of the batch.

pub mod apk_conf;
pub mod archive;
pub mod crgen;
pub mod model;
pub mod parse;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use tracing::{info, instrument, warn};

use crate::crd::{
    AiRateLimitPolicy, ApiPolicy, ApkApi, Authentication, Backend, BackendJwt, GqlRoute,
    HttpRoute, InterceptorService, RateLimitPolicy, Scope,
};
use crate::store::RateLimitPolicyCache;
use crate::Result;

pub use apk_conf::{MappedApi, MappingSettings, RateLimitPolicyNames};
pub use archive::ApiArtifact;
pub use crgen::CrGenerator;
pub use model::DeploymentEnvironment;
pub use parse::CrDocument;

/// Every resource derived from one API, by kind and name
#[derive(Clone, Debug, Default, PartialEq)]
#[allow(missing_docs)]
pub struct K8sArtifactSet {
    pub api: Option<ApkApi>,
    pub http_routes: BTreeMap<String, HttpRoute>,
    pub gql_routes: BTreeMap<String, GqlRoute>,
    pub backends: BTreeMap<String, Backend>,
    pub scopes: BTreeMap<String, Scope>,
    pub authentications: BTreeMap<String, Authentication>,
    pub api_policies: BTreeMap<String, ApiPolicy>,
    pub interceptor_services: BTreeMap<String, InterceptorService>,
    pub backend_jwts: BTreeMap<String, BackendJwt>,
    pub rate_limit_policies: BTreeMap<String, RateLimitPolicy>,
    pub ai_rate_limit_policies: BTreeMap<String, AiRateLimitPolicy>,
    pub config_maps: BTreeMap<String, ConfigMap>,
    pub secrets: BTreeMap<String, Secret>,
}

fn named<K: kube::ResourceExt>(map: &mut BTreeMap<String, K>, resource: K) {
    map.insert(resource.name_any(), resource);
}

impl K8sArtifactSet {
    /// Add one decoded manifest; unknown kinds are ignored
    pub fn insert(&mut self, doc: CrDocument) {
        match doc {
            CrDocument::Api(api) => {
                if self.api.is_some() {
                    warn!(name = %api.metadata.name.as_deref().unwrap_or_default(), "Bundle has more than one API, keeping the last");
                }
                self.api = Some(*api);
            }
            CrDocument::HttpRoute(r) => named(&mut self.http_routes, r),
            CrDocument::GqlRoute(r) => named(&mut self.gql_routes, r),
            CrDocument::Backend(r) => named(&mut self.backends, r),
            CrDocument::Scope(r) => named(&mut self.scopes, r),
            CrDocument::Authentication(r) => named(&mut self.authentications, r),
            CrDocument::ApiPolicy(r) => named(&mut self.api_policies, r),
            CrDocument::InterceptorService(r) => named(&mut self.interceptor_services, r),
            CrDocument::BackendJwt(r) => named(&mut self.backend_jwts, r),
            CrDocument::RateLimitPolicy(r) => named(&mut self.rate_limit_policies, r),
            CrDocument::AiRateLimitPolicy(r) => named(&mut self.ai_rate_limit_policies, r),
            CrDocument::ConfigMap(r) => named(&mut self.config_maps, r),
            CrDocument::Secret(r) => named(&mut self.secrets, r),
            CrDocument::Unknown(_) => {}
        }
    }

    /// Number of resources in the set
    pub fn len(&self) -> usize {
        usize::from(self.api.is_some())
            + self.http_routes.len()
            + self.gql_routes.len()
            + self.backends.len()
            + self.scopes.len()
            + self.authentications.len()
            + self.api_policies.len()
            + self.interceptor_services.len()
            + self.backend_jwts.len()
            + self.rate_limit_policies.len()
            + self.ai_rate_limit_policies.len()
            + self.config_maps.len()
            + self.secrets.len()
    }

    /// Whether the set has no resources
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One API ready for reconciliation
#[derive(Clone, Debug, PartialEq)]
pub struct TransformedApi {
    /// Control-plane API UUID
    pub api_uuid: String,
    /// Deployed revision
    pub revision_id: String,
    /// Owning organization
    pub organization: String,
    /// Gateway environments the API is deployed to
    pub environments: Vec<DeploymentEnvironment>,
    /// Throttling policies the API references
    pub rate_limit_policy_names: RateLimitPolicyNames,
    /// Generated resources
    pub set: K8sArtifactSet,
}

/// Runs the archive to CR pipeline
#[derive(Clone, Debug)]
pub struct Transformer {
    generator: CrGenerator,
    settings: MappingSettings,
}

impl Transformer {
    /// Pipeline generating CRs through `generator`
    pub fn new(generator: CrGenerator, settings: MappingSettings) -> Self {
        Self { generator, settings }
    }

    /// Transform one decoded API
    #[instrument(skip_all, fields(api = %artifact.descriptor.name, version = %artifact.descriptor.version))]
    pub async fn transform(&self, artifact: &ApiArtifact, policies: &RateLimitPolicyCache) -> Result<TransformedApi> {
        let mapped = apk_conf::map(artifact, policies, &self.settings);
        let conf = mapped.conf.to_yaml()?;
        let organization = artifact.organization().to_string();

        let bundle = self
            .generator
            .generate(&conf, &artifact.definition, &organization)
            .await?;
        let set = parse::parse(&bundle, artifact, &mapped.api_unique_id)?;
        info!(resources = set.len(), "Transformed API");

        Ok(TransformedApi {
            api_uuid: artifact.descriptor.id.clone(),
            revision_id: mapped.revision_id.to_string(),
            organization,
            environments: artifact.deployment.environments.clone(),
            rate_limit_policy_names: mapped.rate_limit_policy_names,
            set,
        })
    }

    /// Decode a runtime-artifact archive and transform every API in it
    ///
    /// APIs that fail are logged and left out of the result.
    pub async fn transform_archive(
        &self,
        bytes: &[u8],
        policies: &RateLimitPolicyCache,
    ) -> Result<Vec<TransformedApi>> {
        let mut transformed = Vec::new();
        for artifact in archive::decode(bytes)? {
            match self.transform(&artifact, policies).await {
                Ok(api) => transformed.push(api),
                Err(e) => warn!(api_file = %artifact.file_name, error = %e, "Failed to transform API"),
            }
        }
        Ok(transformed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// In-memory zip of `(name, content)` members
    pub(crate) fn zip_of(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in members {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Runtime-artifact archive holding one API deployed to a hybrid gateway
    pub(crate) fn runtime_archive() -> Vec<u8> {
        let api_json = serde_json::json!({"data": {
            "id": "api-uuid", "name": "Petstore", "version": "1.0.0", "context": "/petstore",
            "type": "HTTP", "revisionId": 2, "organizationId": "acme",
            "endpointConfig": {"production_endpoints": {"url": "http://backend"}}
        }})
        .to_string();
        let inner = zip_of(&[
            ("Petstore/api.json", api_json.as_bytes()),
            ("Petstore/Definitions/swagger.json", b"{\"openapi\":\"3.0.1\"}"),
        ]);
        let deployments = serde_json::json!({"data": {"deployments": [{
            "apiFile": "Petstore.zip", "organizationId": "acme",
            "environments": [{"name": "Default", "vhost": "gw.acme.com", "type": "hybrid"}]
        }]}})
        .to_string();
        zip_of(&[("deployments.json", deployments.as_bytes()), ("Petstore.zip", &inner)])
    }

    /// CR bundle as the generation service answers for that API
    pub(crate) fn generated_bundle() -> Vec<u8> {
        zip_of(&[(
            "api.yaml",
            b"apiVersion: dp.wso2.com/v1alpha3\nkind: API\nmetadata:\n  name: petstore\nspec:\n  apiName: Petstore\n  apiVersion: 1.0.0\n",
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{generated_bundle, runtime_archive};
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_insert_and_len() {
        let mut set = K8sArtifactSet::default();
        assert!(set.is_empty());
        set.insert(CrDocument::Unknown("Gateway".to_string()));
        assert!(set.is_empty());
        set.insert(CrDocument::HttpRoute(HttpRoute::new("r1", Default::default())));
        set.insert(CrDocument::HttpRoute(HttpRoute::new("r1", Default::default())));
        set.insert(CrDocument::Scope(Scope::new("s1", Default::default())));
        assert_eq!(set.len(), 2);
    }

    /// Story: A runtime archive runs the whole pipeline to a typed set
    #[tokio::test]
    async fn story_archive_to_artifact_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("organization", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(generated_bundle()))
            .expect(1)
            .mount(&server)
            .await;

        let transformer = Transformer::new(
            CrGenerator::new(server.uri(), Duration::from_secs(5)).unwrap(),
            MappingSettings::default(),
        );
        let apis = transformer
            .transform_archive(&runtime_archive(), &RateLimitPolicyCache::new())
            .await
            .unwrap();

        assert_eq!(apis.len(), 1);
        let api = &apis[0];
        assert_eq!(api.api_uuid, "api-uuid");
        assert_eq!(api.revision_id, "2");
        assert_eq!(api.organization, "acme");
        assert_eq!(api.environments[0].vhost, "gw.acme.com");
        assert_eq!(api.set.api.as_ref().unwrap().spec.api_name, "Petstore");
    }

    #[tokio::test]
    async fn test_generation_failure_drops_only_that_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transformer = Transformer::new(
            CrGenerator::new(server.uri(), Duration::from_secs(5)).unwrap(),
            MappingSettings::default(),
        );
        let apis = transformer
            .transform_archive(&runtime_archive(), &RateLimitPolicyCache::new())
            .await
            .unwrap();
        assert!(apis.is_empty());
    }
}
