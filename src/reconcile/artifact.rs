//! Reconcile the resources of one API against the cluster
//!
//! Leaf resources are written before the API that references them, so the
//! gateway never sees an API pointing at a missing route or backend. A
//! failure stops the pass; whatever was already written stays.

use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ApiResource, DynamicObject, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::client::{list_all, selector, ClusterClient};
use super::{labels, vhost};
use crate::crd::{
    AiRateLimitPolicy, ApiPolicy, ApkApi, Authentication, Backend, BackendJwt, GqlRoute,
    HttpRoute, InterceptorService, RateLimitPolicy, Scope,
};
use crate::retry::{retry_while, RetryConfig};
use crate::transformer::{K8sArtifactSet, TransformedApi};
use crate::{Result, API_UUID_LABEL};

/// Top-level fields copied from the desired object onto the observed one
const MUTABLE_FIELDS: [&str; 5] = ["spec", "data", "binaryData", "stringData", "type"];

const CONFLICT_ATTEMPTS: u32 = 3;
const CONFLICT_DELAY: Duration = Duration::from_millis(200);

/// What a reconcile pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Objects that did not exist yet
    pub created: usize,
    /// Existing objects brought up to date
    pub updated: usize,
}

/// Result of one upsert
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The object was created
    Created,
    /// The existing object was replaced
    Updated,
}

/// Every kind an API deployment writes, leaves first
pub fn managed_resources() -> Vec<ApiResource> {
    vec![
        ApiResource::erase::<ConfigMap>(&()),
        ApiResource::erase::<Secret>(&()),
        ApiResource::erase::<Scope>(&()),
        ApiResource::erase::<Backend>(&()),
        ApiResource::erase::<Authentication>(&()),
        ApiResource::erase::<InterceptorService>(&()),
        ApiResource::erase::<BackendJwt>(&()),
        ApiResource::erase::<RateLimitPolicy>(&()),
        ApiResource::erase::<AiRateLimitPolicy>(&()),
        ApiResource::erase::<ApiPolicy>(&()),
        ApiResource::erase::<HttpRoute>(&()),
        ApiResource::erase::<GqlRoute>(&()),
        ApiResource::erase::<ApkApi>(&()),
    ]
}

/// Erase a typed resource into the object the cluster client sends
pub fn to_dynamic<K>(resource: &K) -> Result<(ApiResource, DynamicObject)>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let api_resource = ApiResource::erase::<K>(&());
    let mut object: DynamicObject = serde_json::from_value(serde_json::to_value(resource)?)?;
    if object.types.is_none() {
        object.types = Some(TypeMeta {
            api_version: api_resource.api_version.clone(),
            kind: api_resource.kind.clone(),
        });
    }
    Ok((api_resource, object))
}

fn push_all<'a, K>(
    out: &mut Vec<(ApiResource, DynamicObject)>,
    resources: impl IntoIterator<Item = &'a K>,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Serialize + 'a,
{
    for resource in resources {
        out.push(to_dynamic(resource)?);
    }
    Ok(())
}

/// The objects of `set` in the order they are written
pub fn ordered_objects(set: &K8sArtifactSet) -> Result<Vec<(ApiResource, DynamicObject)>> {
    let mut out = Vec::with_capacity(set.len());
    push_all(&mut out, set.config_maps.values())?;
    push_all(&mut out, set.secrets.values())?;
    push_all(&mut out, set.scopes.values())?;
    push_all(&mut out, set.backends.values())?;
    push_all(&mut out, set.authentications.values())?;
    push_all(&mut out, set.interceptor_services.values())?;
    push_all(&mut out, set.backend_jwts.values())?;
    push_all(&mut out, set.rate_limit_policies.values())?;
    push_all(&mut out, set.ai_rate_limit_policies.values())?;
    push_all(&mut out, set.api_policies.values())?;
    push_all(&mut out, set.http_routes.values())?;
    push_all(&mut out, set.gql_routes.values())?;
    push_all(&mut out, set.api.iter())?;
    Ok(out)
}

/// Copy the desired content onto the observed object, keeping its metadata
fn merge_into(observed: &mut DynamicObject, desired: &DynamicObject) {
    for field in MUTABLE_FIELDS {
        match desired.data.get(field) {
            Some(value) => {
                if let Some(map) = observed.data.as_object_mut() {
                    map.insert(field.to_string(), value.clone());
                }
            }
            None => {
                if let Some(map) = observed.data.as_object_mut() {
                    map.remove(field);
                }
            }
        }
    }
    let labels = desired.labels().clone();
    observed.labels_mut().extend(labels);
}

async fn upsert_once(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    desired: &DynamicObject,
) -> Result<Applied> {
    let name = desired.name_any();
    match client.get(resource, &name).await? {
        None => {
            client.create(resource, desired).await?;
            Ok(Applied::Created)
        }
        Some(mut observed) => {
            merge_into(&mut observed, desired);
            client.replace(resource, &observed).await?;
            Ok(Applied::Updated)
        }
    }
}

/// Create the object, or bring the existing one up to date
///
/// A conflicting concurrent write is retried from a fresh read.
pub async fn upsert(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    desired: &DynamicObject,
) -> Result<Applied> {
    let name = desired.name_any();
    let applied = retry_while(
        &RetryConfig::fixed(CONFLICT_ATTEMPTS, CONFLICT_DELAY),
        &format!("upsert {} {name}", resource.kind),
        |e: &crate::Error| e.is_retryable(),
        || upsert_once(client, resource, desired),
    )
    .await?;
    debug!(kind = %resource.kind, %name, ?applied, "Upserted");
    Ok(applied)
}

/// Write every resource of a transformed API to the cluster
///
/// Labels are stamped and hostnames rewritten for each deployment
/// environment before anything is written.
#[instrument(skip(client, api), fields(api_uuid = %api.api_uuid, revision = %api.revision_id))]
pub async fn reconcile_artifact(client: &dyn ClusterClient, api: TransformedApi) -> Result<ReconcileReport> {
    let TransformedApi {
        api_uuid,
        revision_id,
        organization,
        environments,
        rate_limit_policy_names,
        mut set,
    } = api;

    labels::apply(&mut set, &api_uuid, &revision_id, &organization, &rate_limit_policy_names);
    for env in &environments {
        vhost::rewrite(&mut set, &env.vhost, &env.deployment_type);
    }

    let mut report = ReconcileReport::default();
    for (resource, object) in ordered_objects(&set)? {
        match upsert(client, &resource, &object).await? {
            Applied::Created => report.created += 1,
            Applied::Updated => report.updated += 1,
        }
    }
    info!(created = report.created, updated = report.updated, "Reconciled API");
    Ok(report)
}

/// Delete every resource labelled with `api_uuid`, the API first
#[instrument(skip(client))]
pub async fn undeploy(client: &dyn ClusterClient, api_uuid: &str) -> Result<usize> {
    let label_selector = selector(&[(API_UUID_LABEL, api_uuid)]);
    let mut deleted = 0;
    for resource in managed_resources().iter().rev() {
        for object in list_all(client, resource, &label_selector).await? {
            client.delete(resource, &object.name_any()).await?;
            deleted += 1;
        }
    }
    info!(deleted, "Undeployed API");
    Ok(deleted)
}
