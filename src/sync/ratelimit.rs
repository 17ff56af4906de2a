//! Throttling policies
//!
//! API policies are cached for the transformer and patched into the
//! rate-limit resources already generated for APIs. Subscription policies
//! become stand-alone RateLimitPolicy or AIRateLimitPolicy resources targeting
//! the subscription layer.

use kube::api::{ApiResource, ObjectMeta};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::controlplane::types::{
    CpSubscriptionPolicy, RateLimitPolicyList, RateUnit, ResolvedRateLimitPolicy,
    SubscriptionPolicyList,
};
use crate::controlplane::{ControlPlaneClient, Resource};
use crate::crd::{
    sha1_hex, AiRateLimit, AiRateLimitPolicy, AiRateLimitPolicySpec, ApiRateLimit, RateLimitPolicy,
    RateLimitPolicySpec, RateLimitSettings, RequestCount, SubscriptionRateLimit, TargetRef, TokenCount,
};
use crate::reconcile::artifact::to_dynamic;
use crate::reconcile::client::{list_all, selector, ClusterClient};
use crate::reconcile::{three_way, ThreeWayReport};
use crate::store::RateLimitPolicyCache;
use crate::{
    Error, Result, INITIATE_FROM_CP, INITIATE_FROM_LABEL, NAME_LABEL, ORGANIZATION_LABEL,
    RATE_LIMIT_POLICY_NAME_LABEL,
};

/// Quota type of AI subscription policies
pub const AI_API_QUOTA: &str = "aiApiQuota";

/// Load API throttling policies into the cache
///
/// Policies without a request-count quota in a supported unit are skipped.
#[instrument(skip(control_plane, cache))]
pub async fn load_api_policies(
    control_plane: &ControlPlaneClient,
    cache: &RateLimitPolicyCache,
    name: Option<String>,
    tenant: Option<String>,
) -> Result<Vec<ResolvedRateLimitPolicy>> {
    let list: RateLimitPolicyList = control_plane
        .fetch_json(Resource::ApiPolicies { name, tenant })
        .await?
        .unwrap_or_default();

    let mut loaded = Vec::new();
    for policy in &list.list {
        match policy.resolve() {
            Some(resolved) => {
                cache.upsert(resolved.clone());
                loaded.push(resolved);
            }
            None => debug!(policy = %policy.name, "Skipping API policy without request quota"),
        }
    }
    info!(count = loaded.len(), "Loaded API policies");
    Ok(loaded)
}

/// Point every generated rate-limit resource of `policy` at its new quota
#[instrument(skip_all, fields(policy = %policy.name, tenant = %policy.tenant_domain))]
pub async fn update_api_policy_crs(
    cluster: &dyn ClusterClient,
    policy: &ResolvedRateLimitPolicy,
) -> Result<usize> {
    let resource = ApiResource::erase::<RateLimitPolicy>(&());
    let hashed_name = sha1_hex(&policy.name);
    let hashed_org = sha1_hex(&policy.tenant_domain);
    let label_selector = selector(&[
        (RATE_LIMIT_POLICY_NAME_LABEL, &hashed_name),
        (ORGANIZATION_LABEL, &hashed_org),
    ]);

    let mut updated = 0;
    for object in list_all(cluster, &resource, &label_selector).await? {
        let name = object.name_any();
        let mut rlp: RateLimitPolicy = object
            .try_parse()
            .map_err(|e| Error::serialization_for("RateLimitPolicy", e.to_string()))?;
        let default = rlp.spec.default.get_or_insert_with(RateLimitSettings::default);
        default.api = Some(ApiRateLimit {
            requests_per_unit: policy.requests_per_unit,
            unit: policy.unit.to_string(),
        });
        let (_, desired) = to_dynamic(&rlp)?;
        cluster.replace(&resource, &desired).await?;
        debug!(%name, "Updated rate-limit policy");
        updated += 1;
    }
    info!(updated, "Applied API policy to generated rate limits");
    Ok(updated)
}

/// Fetch one API policy, cache it and patch the resources using it
pub async fn apply_api_policy(
    control_plane: &ControlPlaneClient,
    cache: &RateLimitPolicyCache,
    cluster: &dyn ClusterClient,
    name: &str,
    tenant: &str,
) -> Result<()> {
    let loaded = load_api_policies(
        control_plane,
        cache,
        Some(name.to_string()),
        Some(tenant.to_string()),
    )
    .await?;
    for policy in loaded.iter().filter(|p| p.name == name) {
        update_api_policy_crs(cluster, policy).await?;
    }
    Ok(())
}

/// Cluster name of a subscription policy's resource
pub fn subscription_policy_name(name: &str, organization: &str) -> String {
    sha1_hex(&format!("{name}-{organization}"))
}

fn subscription_meta(policy: &CpSubscriptionPolicy) -> ObjectMeta {
    ObjectMeta {
        name: Some(subscription_policy_name(&policy.name, &policy.tenant_domain)),
        labels: Some(
            [
                (NAME_LABEL.to_string(), sha1_hex(&policy.name)),
                (ORGANIZATION_LABEL.to_string(), sha1_hex(&policy.tenant_domain)),
                (INITIATE_FROM_LABEL.to_string(), INITIATE_FROM_CP.to_string()),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    }
}

/// Request-count subscription limit; `None` for other quota types
pub fn subscription_rate_limit(policy: &CpSubscriptionPolicy) -> Option<RateLimitPolicy> {
    let count = policy.default_limit.request_count.as_ref()?;
    let unit = RateUnit::from_control_plane(&count.time_unit)?;
    Some(RateLimitPolicy {
        metadata: subscription_meta(policy),
        spec: RateLimitPolicySpec {
            default: None,
            override_: Some(RateLimitSettings {
                api: None,
                subscription: Some(SubscriptionRateLimit {
                    stop_on_quota_reach: policy.stop_on_quota_reach,
                    organization: policy.tenant_domain.clone(),
                    request_count: RequestCount {
                        requests_per_unit: count.request_count,
                        unit: unit.to_string(),
                    },
                }),
                extra: Default::default(),
            }),
            target_ref: Some(TargetRef::subscription()),
            extra: Default::default(),
        },
    })
}

/// Token and request limits of an AI subscription policy
///
/// A missing prompt or completion count takes the total; a missing total is
/// the sum of the other two.
pub fn ai_rate_limit(policy: &CpSubscriptionPolicy) -> Option<AiRateLimitPolicy> {
    let quota = policy.default_limit.ai_api_quota.as_ref()?;
    let Some(unit) = RateUnit::from_control_plane(&quota.time_unit) else {
        warn!(policy = %policy.name, unit = %quota.time_unit, "Unsupported AI quota unit");
        return None;
    };

    let token_count = match (
        quota.prompt_token_count,
        quota.completion_token_count,
        quota.total_token_count,
    ) {
        (None, None, None) => None,
        (prompt, completion, total) => {
            let total = total.unwrap_or(prompt.unwrap_or_default() + completion.unwrap_or_default());
            Some(TokenCount {
                unit: unit.to_string(),
                request_token_count: prompt.unwrap_or(total),
                response_token_count: completion.unwrap_or(total),
                total_token_count: total,
            })
        }
    };
    let request_count = quota.request_count.map(|requests_per_unit| RequestCount {
        requests_per_unit,
        unit: unit.to_string(),
    });
    if token_count.is_none() && request_count.is_none() {
        return None;
    }

    Some(AiRateLimitPolicy {
        metadata: subscription_meta(policy),
        spec: AiRateLimitPolicySpec {
            override_: Some(AiRateLimit {
                organization: policy.tenant_domain.clone(),
                token_count,
                request_count,
            }),
            target_ref: Some(TargetRef::subscription()),
            extra: Default::default(),
        },
    })
}

/// Resources of one subscription policy, split by kind
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionPolicyResources {
    /// Request-count limits
    pub rate_limits: Vec<RateLimitPolicy>,
    /// AI token limits
    pub ai_rate_limits: Vec<AiRateLimitPolicy>,
}

impl SubscriptionPolicyResources {
    /// Resources for a list of subscription policies
    pub fn from_policies(policies: &[CpSubscriptionPolicy]) -> Self {
        let mut resources = Self::default();
        for policy in policies {
            if policy.quota_type == AI_API_QUOTA || policy.default_limit.quota_type == AI_API_QUOTA {
                resources.ai_rate_limits.extend(ai_rate_limit(policy));
            } else if let Some(rlp) = subscription_rate_limit(policy) {
                resources.rate_limits.push(rlp);
            } else {
                debug!(policy = %policy.name, "Skipping subscription policy without request quota");
            }
        }
        resources
    }
}

/// Reconcile every subscription-level rate limit against the control plane
#[instrument(skip_all)]
pub async fn sync_subscription_policies(
    control_plane: &ControlPlaneClient,
    cluster: &dyn ClusterClient,
) -> Result<(ThreeWayReport, ThreeWayReport)> {
    let list: SubscriptionPolicyList = control_plane
        .fetch_json(Resource::SubscriptionPolicies {
            name: None,
            tenant: None,
        })
        .await?
        .unwrap_or_default();
    let resources = SubscriptionPolicyResources::from_policies(&list.list);

    let mut rate_limits = Vec::with_capacity(resources.rate_limits.len());
    for rlp in &resources.rate_limits {
        rate_limits.push(to_dynamic(rlp)?.1);
    }
    let mut ai_rate_limits = Vec::with_capacity(resources.ai_rate_limits.len());
    for rlp in &resources.ai_rate_limits {
        ai_rate_limits.push(to_dynamic(rlp)?.1);
    }

    let requests = three_way(cluster, &ApiResource::erase::<RateLimitPolicy>(&()), rate_limits).await?;
    let tokens = three_way(cluster, &ApiResource::erase::<AiRateLimitPolicy>(&()), ai_rate_limits).await?;
    Ok((requests, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlPlaneConfig;
    use crate::controlplane::types::{AiApiQuota, DefaultLimit, RequestCountLimit};
    use crate::reconcile::InMemoryClusterClient;
    use rstest::rstest;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn control_plane(server: &MockServer) -> ControlPlaneClient {
        ControlPlaneClient::new(&ControlPlaneConfig {
            service_url: server.uri(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            retry_interval_secs: 0,
            max_retries: 1,
            ..Default::default()
        })
        .unwrap()
    }

    fn request_policy(name: &str, unit: &str, count: i64) -> CpSubscriptionPolicy {
        CpSubscriptionPolicy {
            name: name.to_string(),
            tenant_domain: "carbon.super".to_string(),
            quota_type: "requestCount".to_string(),
            stop_on_quota_reach: true,
            default_limit: DefaultLimit {
                quota_type: "requestCount".to_string(),
                request_count: Some(RequestCountLimit {
                    time_unit: unit.to_string(),
                    unit_time: 1,
                    request_count: count,
                }),
                ai_api_quota: None,
            },
            ..Default::default()
        }
    }

    fn ai_policy(prompt: Option<i64>, completion: Option<i64>, total: Option<i64>) -> CpSubscriptionPolicy {
        CpSubscriptionPolicy {
            name: "Gold".to_string(),
            tenant_domain: "carbon.super".to_string(),
            quota_type: AI_API_QUOTA.to_string(),
            default_limit: DefaultLimit {
                quota_type: AI_API_QUOTA.to_string(),
                request_count: None,
                ai_api_quota: Some(AiApiQuota {
                    time_unit: "min".to_string(),
                    unit_time: 1,
                    prompt_token_count: prompt,
                    completion_token_count: completion,
                    total_token_count: total,
                    request_count: Some(20),
                }),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_subscription_rate_limit() {
        let rlp = subscription_rate_limit(&request_policy("Bronze", "min", 1000)).unwrap();
        assert_eq!(rlp.name_any(), subscription_policy_name("Bronze", "carbon.super"));
        assert_eq!(rlp.labels()[INITIATE_FROM_LABEL], INITIATE_FROM_CP);
        assert_eq!(rlp.spec.target_ref, Some(TargetRef::subscription()));
        let sub = rlp.spec.override_.unwrap().subscription.unwrap();
        assert!(sub.stop_on_quota_reach);
        assert_eq!(sub.organization, "carbon.super");
        assert_eq!(sub.request_count, RequestCount { requests_per_unit: 1000, unit: "Minute".to_string() });
    }

    #[rstest]
    #[case::all_given(Some(10), Some(20), Some(25), (10, 20, 25))]
    #[case::total_only(None, None, Some(50), (50, 50, 50))]
    #[case::no_total(Some(10), Some(20), None, (10, 20, 30))]
    #[case::prompt_only(Some(10), None, None, (10, 10, 10))]
    fn test_ai_token_counts(
        #[case] prompt: Option<i64>,
        #[case] completion: Option<i64>,
        #[case] total: Option<i64>,
        #[case] expected: (i64, i64, i64),
    ) {
        let rlp = ai_rate_limit(&ai_policy(prompt, completion, total)).unwrap();
        let limit = rlp.spec.override_.unwrap();
        let tokens = limit.token_count.unwrap();
        assert_eq!(
            (tokens.request_token_count, tokens.response_token_count, tokens.total_token_count),
            expected
        );
        assert_eq!(tokens.unit, "Minute");
        assert_eq!(limit.request_count.unwrap().requests_per_unit, 20);
    }

    #[test]
    fn test_unsupported_units_skipped() {
        let mut ai = ai_policy(Some(1), Some(1), Some(2));
        if let Some(quota) = ai.default_limit.ai_api_quota.as_mut() {
            quota.time_unit = "month".to_string();
        }
        let resources =
            SubscriptionPolicyResources::from_policies(&[ai, request_policy("Weird", "fortnight", 1)]);
        assert_eq!(resources, SubscriptionPolicyResources::default());
    }

    /// Story: Start-up reconcile writes one resource per policy and prunes the rest
    #[tokio::test]
    async fn story_subscription_policies_reconciled() {
        let server = MockServer::start().await;
        let body = SubscriptionPolicyList {
            list: vec![request_policy("Bronze", "min", 1000), ai_policy(None, None, Some(100))],
        };
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/subscription-policies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let cluster = InMemoryClusterClient::new();
        let stale = subscription_rate_limit(&request_policy("Retired", "hour", 1)).unwrap();
        cluster.create(&ApiResource::erase::<RateLimitPolicy>(&()), &to_dynamic(&stale).unwrap().1)
            .await
            .unwrap();

        let (requests, tokens) = sync_subscription_policies(&control_plane(&server), &cluster)
            .await
            .unwrap();
        assert_eq!(requests, ThreeWayReport { created: 1, updated: 0, deleted: 1, failed: 0 });
        assert_eq!(tokens.created, 1);
        assert_eq!(
            cluster.names(&ApiResource::erase::<AiRateLimitPolicy>(&())),
            vec![subscription_policy_name("Gold", "carbon.super")]
        );
    }

    /// Story: An API policy update rewrites every generated rate limit using it
    #[tokio::test]
    async fn story_api_policy_update_patches_generated_limits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/data/v1/api-policies"))
            .and(query_param("policyName", "10PerMin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [{
                    "name": "10PerMin",
                    "tenantDomain": "carbon.super",
                    "defaultLimit": {"quotaType": "requestCount",
                        "requestCount": {"timeUnit": "hour", "unitTime": 1, "requestCount": 50}}
                }]
            })))
            .mount(&server)
            .await;

        let cluster = InMemoryClusterClient::new();
        let resource = ApiResource::erase::<RateLimitPolicy>(&());
        let mut generated = RateLimitPolicy::new(
            "api-ratelimit-1",
            RateLimitPolicySpec {
                default: Some(RateLimitSettings {
                    api: Some(ApiRateLimit { requests_per_unit: 10, unit: "Minute".to_string() }),
                    ..Default::default()
                }),
                target_ref: Some(TargetRef::gateway("wso2-apk-default")),
                ..Default::default()
            },
        );
        generated.labels_mut().insert(RATE_LIMIT_POLICY_NAME_LABEL.to_string(), sha1_hex("10PerMin"));
        generated.labels_mut().insert(ORGANIZATION_LABEL.to_string(), sha1_hex("carbon.super"));
        cluster.create(&resource, &to_dynamic(&generated).unwrap().1).await.unwrap();

        let cache = RateLimitPolicyCache::new();
        apply_api_policy(&control_plane(&server), &cache, &cluster, "10PerMin", "carbon.super")
            .await
            .unwrap();

        assert_eq!(cache.get("10PerMin", "carbon.super").unwrap().unit, RateUnit::Hour);
        let stored = cluster.object(&resource, "api-ratelimit-1").unwrap();
        assert_eq!(
            stored.data["spec"]["default"]["api"],
            serde_json::json!({"requestsPerUnit": 50, "unit": "Hour"})
        );
        assert_eq!(stored.data["spec"]["targetRef"]["name"], "wso2-apk-default");
    }
}
