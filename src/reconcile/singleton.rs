//! Three-way reconcile for control-plane owned singletons
//!
//! Token issuers, subscription rate limits and AI providers have no API to
//! hang off. The control plane's full list is the desired state; everything in
//! the cluster labelled `InitiateFrom=CP` is the observed state.

use std::collections::BTreeMap;

use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use super::client::{list_all, selector, ClusterClient};
use crate::{Result, INITIATE_FROM_CP, INITIATE_FROM_LABEL};

/// What a three-way pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreeWayReport {
    /// Desired objects missing from the cluster
    pub created: usize,
    /// Objects present on both sides
    pub updated: usize,
    /// Observed objects no longer desired
    pub deleted: usize,
    /// Creates, replaces and deletes the cluster rejected
    pub failed: usize,
}

impl ThreeWayReport {
    /// True when every issued operation went through
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Mark an object as owned by control-plane reconciliation
pub fn mark_owned(object: &mut DynamicObject) {
    object
        .labels_mut()
        .insert(INITIATE_FROM_LABEL.to_string(), INITIATE_FROM_CP.to_string());
}

/// Bring every control-plane owned object of one kind in line with `desired`
///
/// Identity is the object name. Each create, replace and delete is issued
/// exactly once; a failing operation is logged, counted in
/// [`ThreeWayReport::failed`] and the rest still run.
#[instrument(skip(client, desired), fields(kind = %resource.kind, desired = desired.len()))]
pub async fn three_way(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    desired: Vec<DynamicObject>,
) -> Result<ThreeWayReport> {
    let owned = selector(&[(INITIATE_FROM_LABEL, INITIATE_FROM_CP)]);
    let mut observed: BTreeMap<String, DynamicObject> = list_all(client, resource, &owned)
        .await?
        .into_iter()
        .map(|obj| (obj.name_any(), obj))
        .collect();

    let mut report = ThreeWayReport::default();
    for mut want in desired {
        mark_owned(&mut want);
        let name = want.name_any();
        match observed.remove(&name) {
            Some(mut have) => {
                have.data = want.data;
                have.metadata.labels = want.metadata.labels;
                match client.replace(resource, &have).await {
                    Ok(_) => report.updated += 1,
                    Err(e) => {
                        warn!(%name, error = %e, "Failed to update");
                        report.failed += 1;
                    }
                }
            }
            None => match client.create(resource, &want).await {
                Ok(_) => report.created += 1,
                Err(e) => {
                    warn!(%name, error = %e, "Failed to create");
                    report.failed += 1;
                }
            },
        }
    }

    for name in observed.into_keys() {
        match client.delete(resource, &name).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(%name, error = %e, "Failed to delete");
                report.failed += 1;
            }
        }
    }

    if report.is_clean() {
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            "Three-way reconcile done"
        );
    } else {
        warn!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failed,
            "Three-way reconcile finished with failures"
        );
    }
    Ok(report)
}
