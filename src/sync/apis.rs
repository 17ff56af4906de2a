//! API deployment: fetch the runtime artifact, transform it, reconcile it

use tracing::{error, info, instrument};

use crate::context::AgentContext;
use crate::controlplane::types::ApiList;
use crate::controlplane::{FetchOutcome, Resource};
use crate::reconcile::reconcile_artifact;
use crate::Result;

/// Counts of one deployment pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeployReport {
    /// APIs written to the cluster
    pub deployed: usize,
    /// APIs whose reconciliation failed
    pub failed: usize,
}

async fn deploy_archive(ctx: &AgentContext, archive: &[u8]) -> Result<DeployReport> {
    let apis = ctx
        .transformer
        .transform_archive(archive, ctx.store.rate_limit_policies())
        .await?;

    let mut report = DeployReport::default();
    for api in apis {
        let api_uuid = api.api_uuid.clone();
        match reconcile_artifact(ctx.cluster.as_ref(), api).await {
            Ok(_) => report.deployed += 1,
            Err(e) => {
                error!(%api_uuid, error = %e, "Failed to reconcile API");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Deploy one API revision for the given gateway labels
#[instrument(skip(ctx))]
pub async fn deploy_api(ctx: &AgentContext, api_uuid: &str, labels: Vec<String>) -> Result<DeployReport> {
    let outcome = ctx
        .control_plane
        .fetch(Resource::RuntimeArtifacts {
            api_ids: vec![api_uuid.to_string()],
            labels,
        })
        .await?;
    match outcome {
        FetchOutcome::Data(archive) => deploy_archive(ctx, &archive).await,
        FetchOutcome::NoContent => {
            info!("No runtime artifact for API");
            Ok(DeployReport::default())
        }
    }
}

/// Deploy every API the control plane lists for this agent's gateway labels
#[instrument(skip(ctx))]
pub async fn deploy_all(ctx: &AgentContext) -> Result<DeployReport> {
    let labels = ctx.environment_labels();
    let list: ApiList = ctx
        .control_plane
        .fetch_json(Resource::Apis {
            labels: labels.clone(),
        })
        .await?
        .unwrap_or_default();
    if list.list.is_empty() {
        info!("No APIs to deploy");
        return Ok(DeployReport::default());
    }

    let api_ids = list.list.into_iter().map(|api| api.uuid).collect();
    let report = match ctx
        .control_plane
        .fetch(Resource::RuntimeArtifacts { api_ids, labels })
        .await?
    {
        FetchOutcome::Data(archive) => deploy_archive(ctx, &archive).await?,
        FetchOutcome::NoContent => DeployReport::default(),
    };
    info!(deployed = report.deployed, failed = report.failed, "Deployed APIs");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::crd::ApkApi;
    use crate::transformer::testing::{generated_bundle, runtime_archive};
    use crate::API_UUID_LABEL;
    use kube::api::ApiResource;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_generator(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(generated_bundle()))
            .mount(server)
            .await;
    }

    /// Story: A deploy event lands the API in the cluster labelled with its UUID
    #[tokio::test]
    async fn story_deploy_single_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/runtime-artifacts"))
            .and(query_param("apiId", "api-uuid"))
            .and(query_param("type", "Envoy"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(runtime_archive()))
            .expect(1)
            .mount(&server)
            .await;
        mount_generator(&server).await;

        let (ctx, cluster) = context(&server.uri());
        let report = deploy_api(&ctx, "api-uuid", vec!["Default".to_string()]).await.unwrap();
        assert_eq!(report, DeployReport { deployed: 1, failed: 0 });

        let api = cluster
            .object(&ApiResource::erase::<ApkApi>(&()), "petstore")
            .unwrap();
        assert_eq!(api.metadata.labels.unwrap()[API_UUID_LABEL], "api-uuid");
        assert_eq!(api.data["spec"]["organization"], "acme");
    }

    #[tokio::test]
    async fn test_no_content_deploys_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/runtime-artifacts"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let (ctx, cluster) = context(&server.uri());
        let report = deploy_api(&ctx, "api-uuid", vec!["Default".to_string()]).await.unwrap();
        assert_eq!(report, DeployReport::default());
        assert!(cluster.is_empty());
    }

    #[tokio::test]
    async fn test_deploy_all_without_apis_skips_artifact_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/apis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"list": []})))
            .mount(&server)
            .await;
        Mock::given(path("/internal/data/v1/runtime-artifacts"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (ctx, _) = context(&server.uri());
        assert_eq!(deploy_all(&ctx).await.unwrap(), DeployReport::default());
    }
}
