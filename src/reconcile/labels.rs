//! Ownership labels stamped on generated resources
//!
//! Every resource of an API carries the hashed organization and the API UUID
//! so the whole set can be found (and removed) by label. The API itself also
//! carries its revision, and rate-limit policies carry the hashed name of the
//! control-plane policy they were resolved from so policy updates can find
//! them later.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::sha1_hex;
use crate::transformer::{K8sArtifactSet, RateLimitPolicyNames};
use crate::{API_UUID_LABEL, ORGANIZATION_LABEL, RATE_LIMIT_POLICY_NAME_LABEL, REVISION_LABEL};

const API_POLICY_MARKER: &str = "api-";
const RESOURCE_POLICY_MARKER: &str = "resource-";

fn stamp<K: ResourceExt>(resource: &mut K, labels: &[(&str, &str)]) {
    let existing = resource.labels_mut();
    for (key, value) in labels {
        existing.insert(key.to_string(), value.to_string());
    }
}

fn stamp_all<K: ResourceExt>(map: &mut BTreeMap<String, K>, labels: &[(&str, &str)]) {
    for resource in map.values_mut() {
        stamp(resource, labels);
    }
}

/// Stamp ownership labels on every resource of `set`
pub fn apply(
    set: &mut K8sArtifactSet,
    api_uuid: &str,
    revision_id: &str,
    organization: &str,
    policy_names: &RateLimitPolicyNames,
) {
    let hashed_org = sha1_hex(organization);
    let common = [(ORGANIZATION_LABEL, hashed_org.as_str()), (API_UUID_LABEL, api_uuid)];

    if let Some(api) = set.api.as_mut() {
        api.spec.organization = organization.to_string();
        stamp(api, &common);
        stamp(api, &[(REVISION_LABEL, revision_id)]);
    }

    stamp_all(&mut set.http_routes, &common);
    stamp_all(&mut set.gql_routes, &common);
    stamp_all(&mut set.backends, &common);
    stamp_all(&mut set.scopes, &common);
    stamp_all(&mut set.authentications, &common);
    stamp_all(&mut set.api_policies, &common);
    stamp_all(&mut set.interceptor_services, &common);
    stamp_all(&mut set.backend_jwts, &common);
    stamp_all(&mut set.rate_limit_policies, &common);
    stamp_all(&mut set.ai_rate_limit_policies, &common);
    stamp_all(&mut set.config_maps, &common);
    stamp_all(&mut set.secrets, &common);

    for (name, policy) in set.rate_limit_policies.iter_mut() {
        let source = if name.contains(API_POLICY_MARKER) {
            policy_names.api.as_deref()
        } else if name.contains(RESOURCE_POLICY_MARKER) {
            policy_names.resource.as_deref()
        } else {
            None
        };
        if let Some(source) = source {
            stamp(policy, &[(RATE_LIMIT_POLICY_NAME_LABEL, sha1_hex(source).as_str())]);
        }
    }
}
