//! Side effects of each change event
//!
//! Store mutations and singleton reconciles run inline. API deployments are
//! spawned so a slow control plane never holds up the consumer.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::envelope::{
    ApiEvent, ApplicationEvent, ApplicationRegistrationEvent, ChangeEvent, PolicyEvent, SubscriptionEvent,
    APPLICATION_REGISTRATION_CREATE, REMOVE_APPLICATION_KEYMAPPING,
};
use super::ordering::EntityKey;
use crate::context::AgentContext;
use crate::reconcile::undeploy;
use crate::store::types::{DEFAULT_ENV_ID, OAUTH2_SCHEME};
use crate::store::{Application, ApplicationKeyMapping, ApplicationMapping, SubscribedApi, Subscription};
use crate::sync::{aiprovider, apis, keymanager, ratelimit};
use crate::Result;

/// API event types
pub const DEPLOY_API_IN_GATEWAY: &str = "DEPLOY_API_IN_GATEWAY";
/// API removal event type
pub const REMOVE_API_FROM_GATEWAY: &str = "REMOVE_API_FROM_GATEWAY";
/// API update event type
pub const API_UPDATE: &str = "API_UPDATE";
/// Action of an API update that changes the default version
pub const DEFAULT_VERSION_ACTION: &str = "DEFAULT_VERSION";

const CREATE_SUFFIX: &str = "_CREATE";
const UPDATE_SUFFIX: &str = "_UPDATE";
const DELETE_SUFFIX: &str = "_DELETE";

const API_POLICY: &str = "API";
const SUBSCRIPTION_POLICY: &str = "SUBSCRIPTION";

/// What handling an event amounted to
#[derive(Debug)]
pub enum Outcome {
    /// Side effects were applied
    Applied,
    /// Nothing was done, for the given reason
    Skipped(&'static str),
    /// The event could not be applied
    Failed,
    /// Work continues in the background
    Spawned(JoinHandle<()>),
}

impl Outcome {
    /// Wait for background work, if any
    pub async fn finish(self) {
        if let Self::Spawned(handle) = self {
            if let Err(e) = handle.await {
                error!(error = %e, "Background event task failed");
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Create,
    Update,
    Delete,
}

fn action_of(event_type: &str) -> Option<Action> {
    let upper = event_type.to_ascii_uppercase();
    if upper.ends_with(CREATE_SUFFIX) {
        Some(Action::Create)
    } else if upper.ends_with(UPDATE_SUFFIX) {
        Some(Action::Update)
    } else if upper.ends_with(DELETE_SUFFIX) {
        Some(Action::Delete)
    } else {
        None
    }
}

/// Tenant domain the event belongs to
pub fn tenant_domain(event: &ChangeEvent) -> Option<&str> {
    Some(match event {
        ChangeEvent::Lifecycle(e) | ChangeEvent::Api(e) => &e.header.tenant_domain,
        ChangeEvent::Application(e) => &e.header.tenant_domain,
        ChangeEvent::ApplicationRegistration(e) => &e.header.tenant_domain,
        ChangeEvent::Subscription(e) => &e.header.tenant_domain,
        ChangeEvent::Policy(e) => &e.header.tenant_domain,
        ChangeEvent::Scope(h) => &h.tenant_domain,
        ChangeEvent::AiProvider(e) => &e.header.tenant_domain,
        ChangeEvent::KeyManager(e) => &e.tenant_domain,
        ChangeEvent::Unknown(_) => return None,
    })
}

fn stamp(event_time: i64, envelope_time: i64) -> i64 {
    if event_time > 0 {
        event_time
    } else {
        envelope_time
    }
}

/// Apply one event; `timestamp` is the envelope's producer timestamp
pub async fn handle(ctx: &Arc<AgentContext>, event: ChangeEvent, timestamp: i64) -> Result<Outcome> {
    match event {
        ChangeEvent::Api(e) => Ok(handle_api(ctx, e, timestamp)),
        ChangeEvent::Lifecycle(e) => Ok(handle_lifecycle(ctx, e)),
        ChangeEvent::Application(e) => Ok(handle_application(ctx, e, timestamp)),
        ChangeEvent::ApplicationRegistration(e) => Ok(handle_registration(ctx, e)),
        ChangeEvent::Subscription(e) => Ok(handle_subscription(ctx, e, timestamp)),
        ChangeEvent::Policy(e) => handle_policy(ctx, e).await,
        ChangeEvent::KeyManager(e) => {
            keymanager::apply_event(ctx.cluster.as_ref(), &e, &ctx.issuers).await?;
            Ok(Outcome::Applied)
        }
        ChangeEvent::AiProvider(e) => {
            info!(provider = %e.name, event_type = %e.header.event_type, "AI provider changed, resyncing");
            aiprovider::sync_all(&ctx.control_plane, ctx.cluster.as_ref()).await?;
            Ok(Outcome::Applied)
        }
        ChangeEvent::Scope(h) => {
            info!(event_type = %h.event_type, "Scope event received");
            Ok(Outcome::Skipped("scope events are informational"))
        }
        ChangeEvent::Unknown(event_type) => {
            debug!(%event_type, "Ignoring event");
            Ok(Outcome::Skipped("unknown event type"))
        }
    }
}

fn spawn_deploy(ctx: &Arc<AgentContext>, api_uuid: String, labels: Vec<String>) -> Outcome {
    let ctx = Arc::clone(ctx);
    Outcome::Spawned(tokio::spawn(async move {
        if let Err(e) = apis::deploy_api(&ctx, &api_uuid, labels).await {
            error!(%api_uuid, error = %e, "Failed to deploy API");
        }
    }))
}

fn spawn_undeploy(ctx: &Arc<AgentContext>, api_uuid: String) -> Outcome {
    let ctx = Arc::clone(ctx);
    Outcome::Spawned(tokio::spawn(async move {
        if let Err(e) = undeploy(ctx.cluster.as_ref(), &api_uuid).await {
            error!(%api_uuid, error = %e, "Failed to undeploy API");
        }
    }))
}

/// Gateway labels of the event that this agent serves and that are not stale
fn admitted_labels(ctx: &AgentContext, event: &ApiEvent, timestamp: i64) -> Vec<String> {
    let configured = ctx.environment_labels();
    event
        .gateway_labels
        .iter()
        .filter(|label| configured.iter().any(|c| c.eq_ignore_ascii_case(label)))
        .filter(|label| {
            ctx.guard.admit(
                EntityKey::Api {
                    uuid: event.uuid.clone(),
                    gateway_label: label.to_string(),
                },
                timestamp,
            )
        })
        .cloned()
        .collect()
}

#[instrument(skip_all, fields(api_uuid = %event.uuid, event_type = %event.header.event_type))]
fn handle_api(ctx: &Arc<AgentContext>, event: ApiEvent, envelope_time: i64) -> Outcome {
    let timestamp = stamp(event.header.time_stamp, envelope_time);
    let event_type = event.header.event_type.to_ascii_uppercase();

    match event_type.as_str() {
        DEPLOY_API_IN_GATEWAY => {
            let labels = admitted_labels(ctx, &event, timestamp);
            if labels.is_empty() {
                return Outcome::Skipped("no current event for a served gateway label");
            }
            info!(?labels, "Deploying API");
            spawn_deploy(ctx, event.uuid, labels)
        }
        REMOVE_API_FROM_GATEWAY => {
            if admitted_labels(ctx, &event, timestamp).is_empty() {
                return Outcome::Skipped("no current event for a served gateway label");
            }
            info!("Removing API");
            spawn_undeploy(ctx, event.uuid)
        }
        API_UPDATE if event.action.eq_ignore_ascii_case(DEFAULT_VERSION_ACTION) => {
            info!("Default version changed, redeploying");
            spawn_deploy(ctx, event.uuid, ctx.environment_labels())
        }
        _ => {
            debug!("API event needs no action");
            Outcome::Skipped("API event needs no action")
        }
    }
}

/// Lifecycle changes can block or retire an API, so its artifact is refreshed
#[instrument(skip_all, fields(api_uuid = %event.uuid, status = %event.api_status))]
fn handle_lifecycle(ctx: &Arc<AgentContext>, event: ApiEvent) -> Outcome {
    info!(api = %event.api_name, version = %event.api_version, "API lifecycle changed");
    spawn_deploy(ctx, event.uuid, ctx.environment_labels())
}

#[instrument(skip_all, fields(application = %event.uuid, event_type = %event.header.event_type))]
fn handle_application(ctx: &AgentContext, event: ApplicationEvent, envelope_time: i64) -> Outcome {
    let timestamp = stamp(event.header.time_stamp, envelope_time);
    if !ctx.guard.admit(EntityKey::Application(event.application_id), timestamp) {
        return Outcome::Skipped("stale application event");
    }

    let Some(action) = action_of(&event.header.event_type) else {
        warn!("Unrecognized application event");
        return Outcome::Skipped("unrecognized application event");
    };
    let app = Application {
        uuid: event.uuid,
        name: event.application_name,
        owner: event.subscriber,
        organization: event.header.tenant_domain,
        attributes: event.attributes,
        time_stamp: timestamp,
    };
    match action {
        Action::Create => ctx.store.add_application(app),
        Action::Update => ctx.store.update_application(app),
        Action::Delete => {
            if ctx.store.delete_application(&app.uuid).is_none() {
                debug!("Application was not in the store");
            }
        }
    }
    Outcome::Applied
}

#[instrument(skip_all, fields(application = %event.application_uuid, key_type = %event.key_type))]
fn handle_registration(ctx: &AgentContext, event: ApplicationRegistrationEvent) -> Outcome {
    let mapping = ApplicationKeyMapping {
        application_uuid: event.application_uuid,
        security_scheme: OAUTH2_SCHEME.to_string(),
        application_identifier: event.consumer_key,
        key_type: event.key_type,
        env_id: DEFAULT_ENV_ID.to_string(),
        timestamp: event.header.time_stamp,
        organization: event.header.tenant_domain,
    };
    let event_type = event.header.event_type.as_str();
    if event_type.eq_ignore_ascii_case(APPLICATION_REGISTRATION_CREATE) || event_type.is_empty() {
        ctx.store.add_key_mapping(mapping);
    } else if event_type.eq_ignore_ascii_case(REMOVE_APPLICATION_KEYMAPPING) {
        ctx.store.delete_key_mapping(&mapping);
    } else {
        return Outcome::Skipped("unrecognized registration event");
    }
    Outcome::Applied
}

#[instrument(skip_all, fields(subscription = %event.subscription_uuid, event_type = %event.header.event_type))]
fn handle_subscription(ctx: &AgentContext, event: SubscriptionEvent, envelope_time: i64) -> Outcome {
    let timestamp = stamp(event.header.time_stamp, envelope_time);
    if !ctx.guard.admit(EntityKey::Subscription(event.subscription_id), timestamp) {
        return Outcome::Skipped("stale subscription event");
    }
    let Some(action) = action_of(&event.header.event_type) else {
        warn!("Unrecognized subscription event");
        return Outcome::Skipped("unrecognized subscription event");
    };

    let organization = event.header.tenant_domain;
    let mapping = ApplicationMapping::new(&event.application_uuid, &event.subscription_uuid, &organization);
    let subscription = Subscription {
        sub_status: event.subscription_state,
        uuid: event.subscription_uuid,
        organization,
        subscribed_api: Some(SubscribedApi {
            name: event.api_uuid,
            version: String::new(),
        }),
        time_stamp: timestamp,
        rate_limit: event.policy_id,
    };
    match action {
        Action::Create => {
            ctx.store.add_subscription(subscription);
            ctx.store.add_application_mapping(mapping);
        }
        Action::Update => {
            ctx.store.update_subscription(subscription);
            ctx.store.update_application_mapping(mapping);
        }
        Action::Delete => {
            ctx.store.delete_subscription(&subscription.uuid);
            ctx.store.delete_application_mapping(&mapping.uuid);
        }
    }
    Outcome::Applied
}

#[instrument(skip_all, fields(policy = %event.policy_name, policy_type = %event.policy_type))]
async fn handle_policy(ctx: &AgentContext, event: PolicyEvent) -> Result<Outcome> {
    let tenant = event.header.tenant_domain.as_str();
    let action = action_of(&event.header.event_type);
    match event.policy_type.to_ascii_uppercase().as_str() {
        API_POLICY if action == Some(Action::Delete) => {
            ctx.store
                .rate_limit_policies()
                .remove(&event.policy_name, tenant);
            info!("API policy removed from cache");
        }
        API_POLICY => {
            ratelimit::apply_api_policy(
                &ctx.control_plane,
                ctx.store.rate_limit_policies(),
                ctx.cluster.as_ref(),
                &event.policy_name,
                tenant,
            )
            .await?;
        }
        SUBSCRIPTION_POLICY => {
            ratelimit::sync_subscription_policies(&ctx.control_plane, ctx.cluster.as_ref()).await?;
        }
        _ => {
            info!("Policy event needs no action");
            return Ok(Outcome::Skipped("policy type not handled"));
        }
    }
    Ok(Outcome::Applied)
}
