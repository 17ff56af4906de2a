//! API throttling policies by name and organization
//!
//! Filled from the control plane at start-up and on policy events; read when
//! an API's configuration names a throttling policy.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::controlplane::types::ResolvedRateLimitPolicy;

/// Cache of resolved API throttling policies
#[derive(Debug, Default)]
pub struct RateLimitPolicyCache {
    policies: RwLock<HashMap<(String, String), ResolvedRateLimitPolicy>>,
}

impl RateLimitPolicyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a policy
    pub fn upsert(&self, policy: ResolvedRateLimitPolicy) {
        let key = (policy.name.clone(), policy.tenant_domain.clone());
        let mut policies = match self.policies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        policies.insert(key, policy);
    }

    /// Policy `name` of `organization`
    pub fn get(&self, name: &str, organization: &str) -> Option<ResolvedRateLimitPolicy> {
        let policies = match self.policies.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        policies
            .get(&(name.to_string(), organization.to_string()))
            .cloned()
    }

    /// Drop policy `name` of `organization`
    pub fn remove(&self, name: &str, organization: &str) -> Option<ResolvedRateLimitPolicy> {
        let mut policies = match self.policies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        policies.remove(&(name.to_string(), organization.to_string()))
    }

    /// Number of cached policies
    pub fn len(&self) -> usize {
        self.policies.read().map(|p| p.len()).unwrap_or_default()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::types::RateUnit;

    fn policy(name: &str, org: &str, count: i64) -> ResolvedRateLimitPolicy {
        ResolvedRateLimitPolicy {
            name: name.to_string(),
            tenant_domain: org.to_string(),
            requests_per_unit: count,
            unit: RateUnit::Minute,
        }
    }

    #[test]
    fn test_lookup_is_per_organization() {
        let cache = RateLimitPolicyCache::new();
        cache.upsert(policy("Gold", "acme", 100));
        cache.upsert(policy("Gold", "globex", 5));

        assert_eq!(cache.get("Gold", "acme").unwrap().requests_per_unit, 100);
        assert_eq!(cache.get("Gold", "globex").unwrap().requests_per_unit, 5);
        assert!(cache.get("Gold", "initech").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_upsert_replaces() {
        let cache = RateLimitPolicyCache::new();
        cache.upsert(policy("Gold", "acme", 100));
        cache.upsert(policy("Gold", "acme", 200));
        assert_eq!(cache.get("Gold", "acme").unwrap().requests_per_unit, 200);
        assert!(cache.remove("Gold", "acme").is_some());
        assert!(cache.is_empty());
    }
}
