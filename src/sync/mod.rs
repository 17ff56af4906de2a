//! Control-plane derived state
//!
//! - [`state`] pulls applications, subscriptions and key mappings into the store
//! - [`ratelimit`] caches API policies and writes subscription rate limits
//! - [`keymanager`] writes token issuers
//! - [`aiprovider`] writes AI providers
//! - [`apis`] deploys APIs
//!
//! [`bootstrap`] runs all of them once, in that order, before events are consumed.

pub mod aiprovider;
pub mod apis;
pub mod keymanager;
pub mod ratelimit;
pub mod state;

use tracing::{error, info, instrument};

use crate::context::AgentContext;
use crate::Result;

/// Initial load from the control plane
///
/// The subscription state must load, since enforcers resync from it.
/// Cluster-side steps are independent: a failing one is logged and the
/// rest still run.
#[instrument(skip_all)]
pub async fn bootstrap(ctx: &AgentContext) -> Result<()> {
    let snapshot = state::load_snapshot(&ctx.control_plane).await?;
    ctx.store.replace_all(snapshot);

    let cluster = ctx.cluster.as_ref();
    if let Err(e) =
        ratelimit::load_api_policies(&ctx.control_plane, ctx.store.rate_limit_policies(), None, None).await
    {
        error!(error = %e, "Failed to load API policies");
    }
    if let Err(e) = ratelimit::sync_subscription_policies(&ctx.control_plane, cluster).await {
        error!(error = %e, "Failed to reconcile subscription policies");
    }
    if let Err(e) = keymanager::sync_all(&ctx.control_plane, cluster, &ctx.issuers).await {
        error!(error = %e, "Failed to reconcile key managers");
    }
    if let Err(e) = aiprovider::sync_all(&ctx.control_plane, cluster).await {
        error!(error = %e, "Failed to reconcile AI providers");
    }
    match apis::deploy_all(ctx).await {
        Ok(report) => info!(deployed = report.deployed, failed = report.failed, "Initial load complete"),
        Err(e) => error!(error = %e, "Failed to deploy APIs"),
    }
    Ok(())
}
