//! Hostname rewrite for the gateway environment an API is deployed to
//!
//! Generated routes carry a placeholder host. The deployment descriptor names
//! the real virtual host and whether the environment serves production
//! traffic, sandbox traffic or both.

use tracing::debug;

use crate::transformer::K8sArtifactSet;

/// Deployment type serving production and sandbox traffic
pub const HYBRID: &str = "hybrid";

/// Deployment type serving only sandbox traffic
pub const SANDBOX: &str = "sandbox";

/// Prefix of the sandbox host in a hybrid deployment
pub const SANDBOX_HOST_PREFIX: &str = "sandbox.";

fn set_hostnames(set: &mut K8sArtifactSet, routes: &[String], host: &str) {
    for route in routes {
        if let Some(http) = set.http_routes.get_mut(route) {
            http.spec.hostnames = Some(vec![host.to_string()]);
        }
        if let Some(gql) = set.gql_routes.get_mut(route) {
            gql.spec.hostnames = Some(vec![host.to_string()]);
        }
    }
}

fn drop_routes(set: &mut K8sArtifactSet, routes: &[String]) {
    for route in routes {
        set.http_routes.remove(route);
        set.gql_routes.remove(route);
    }
}

/// Point the API's routes at `vhost`
///
/// Anything other than `hybrid` or `sandbox` is treated as production-only.
/// Without an API resource there are no route lists to follow and the set is
/// left as is.
pub fn rewrite(set: &mut K8sArtifactSet, vhost: &str, deployment_type: &str) {
    let Some(api) = set.api.as_ref() else {
        return;
    };
    let production = api.spec.production_routes();
    let sandbox = api.spec.sandbox_routes();
    debug!(vhost, deployment_type, "Rewriting route hostnames");

    match deployment_type {
        HYBRID => {
            set_hostnames(set, &production, vhost);
            set_hostnames(set, &sandbox, &format!("{SANDBOX_HOST_PREFIX}{vhost}"));
        }
        SANDBOX => {
            set_hostnames(set, &sandbox, vhost);
            drop_routes(set, &production);
            if let Some(api) = set.api.as_mut() {
                if api.spec.production.is_some() {
                    api.spec.production = Some(Vec::new());
                }
            }
        }
        _ => {
            set_hostnames(set, &production, vhost);
            drop_routes(set, &sandbox);
            if let Some(api) = set.api.as_mut() {
                if api.spec.sandbox.is_some() {
                    api.spec.sandbox = Some(Vec::new());
                }
            }
        }
    }
}
