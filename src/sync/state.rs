//! Start-up load of application and subscription state

use tracing::{info, instrument};

use crate::controlplane::types::{
    ApplicationKeyMappingList, ApplicationList, CpApplication, CpApplicationKeyMapping, CpSubscription,
    SubscriptionList,
};
use crate::controlplane::{ControlPlaneClient, Resource};
use crate::store::types::{DEFAULT_ENV_ID, OAUTH2_SCHEME};
use crate::store::{Application, ApplicationKeyMapping, ApplicationMapping, Snapshot, SubscribedApi, Subscription};
use crate::Result;

impl From<&CpApplication> for Application {
    fn from(app: &CpApplication) -> Self {
        Self {
            uuid: app.uuid.clone(),
            name: app.name.clone(),
            owner: app.sub_name.clone(),
            organization: app.tenant_domain.clone(),
            attributes: app.attributes.clone(),
            time_stamp: app.time_stamp,
        }
    }
}

impl From<&CpSubscription> for Subscription {
    fn from(sub: &CpSubscription) -> Self {
        Self {
            sub_status: sub.subscription_state.clone(),
            uuid: sub.subscription_uuid.clone(),
            organization: sub.tenant_domain.clone(),
            subscribed_api: Some(SubscribedApi {
                name: sub.api_name.clone(),
                version: sub.api_version.clone(),
            }),
            time_stamp: sub.time_stamp,
            rate_limit: sub.policy_id.clone(),
        }
    }
}

impl From<&CpApplicationKeyMapping> for ApplicationKeyMapping {
    fn from(mapping: &CpApplicationKeyMapping) -> Self {
        Self {
            application_uuid: mapping.application_uuid.clone(),
            security_scheme: OAUTH2_SCHEME.to_string(),
            application_identifier: mapping.consumer_key.clone(),
            key_type: mapping.key_type.clone(),
            env_id: DEFAULT_ENV_ID.to_string(),
            timestamp: mapping.time_stamp,
            organization: mapping.tenant_domain.clone(),
        }
    }
}

/// Pull applications, subscriptions and key mappings in one pass
///
/// Every subscription also yields the mapping to its application.
#[instrument(skip_all)]
pub async fn load_snapshot(control_plane: &ControlPlaneClient) -> Result<Snapshot> {
    let applications: ApplicationList = control_plane
        .fetch_json(Resource::Applications)
        .await?
        .unwrap_or_default();
    let subscriptions: SubscriptionList = control_plane
        .fetch_json(Resource::Subscriptions)
        .await?
        .unwrap_or_default();
    let key_mappings: ApplicationKeyMappingList = control_plane
        .fetch_json(Resource::ApplicationKeyMappings)
        .await?
        .unwrap_or_default();

    let snapshot = Snapshot {
        applications: applications.list.iter().map(Application::from).collect(),
        subscriptions: subscriptions.list.iter().map(Subscription::from).collect(),
        application_mappings: subscriptions
            .list
            .iter()
            .map(|s| ApplicationMapping::new(&s.application_uuid, &s.subscription_uuid, &s.tenant_domain))
            .collect(),
        key_mappings: key_mappings
            .list
            .iter()
            .map(ApplicationKeyMapping::from)
            .collect(),
    };
    info!(
        applications = snapshot.applications.len(),
        subscriptions = snapshot.subscriptions.len(),
        key_mappings = snapshot.key_mappings.len(),
        "Loaded subscription state"
    );
    Ok(snapshot)
}
