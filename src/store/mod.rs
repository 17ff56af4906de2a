//! In-memory application and subscription state
//!
//! The store is the single source the enforcer-facing surfaces read from. Every
//! mutation is broadcast through the owned [`FanOut`] as one gRPC event, so a
//! connected enforcer that resynced on `ALL_EVENTS` stays current.

pub mod policies;
pub mod types;

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::fanout::{new_event, SharedFanOut};
use crate::proto::{self, event_type};

pub use policies::RateLimitPolicyCache;
pub use types::{
    Application, ApplicationKeyMapping, ApplicationMapping, ResolvedApplication, SecurityScheme,
    SubscribedApi, Subscription,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Everything loaded in one start-up pass
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// All applications
    pub applications: Vec<Application>,
    /// All subscriptions
    pub subscriptions: Vec<Subscription>,
    /// All application-subscription links
    pub application_mappings: Vec<ApplicationMapping>,
    /// All consumer keys
    pub key_mappings: Vec<ApplicationKeyMapping>,
}

/// Application and subscription state shared by the agent
#[derive(Debug)]
pub struct StateStore {
    applications: RwLock<HashMap<String, Application>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    application_mappings: RwLock<HashMap<String, ApplicationMapping>>,
    key_mappings: RwLock<HashMap<String, ApplicationKeyMapping>>,
    rate_limit_policies: RateLimitPolicyCache,
    fanout: SharedFanOut,
}

impl StateStore {
    /// Create an empty store emitting through `fanout`
    pub fn new(fanout: SharedFanOut) -> Self {
        Self {
            applications: RwLock::default(),
            subscriptions: RwLock::default(),
            application_mappings: RwLock::default(),
            key_mappings: RwLock::default(),
            rate_limit_policies: RateLimitPolicyCache::new(),
            fanout,
        }
    }

    /// Fan-out registry mutations are broadcast to
    pub fn fanout(&self) -> &SharedFanOut {
        &self.fanout
    }

    /// API throttling policies known to the agent
    pub fn rate_limit_policies(&self) -> &RateLimitPolicyCache {
        &self.rate_limit_policies
    }

    fn emit(&self, event: proto::Event) {
        debug!(event_type = %event.r#type, "Store change");
        self.fanout.broadcast(&event);
    }

    // =========================================================================
    // Applications
    // =========================================================================

    /// Insert an application, replacing one with the same UUID
    pub fn add_application(&self, app: Application) {
        self.put_application(app, event_type::APPLICATION_CREATED);
    }

    /// Replace an application
    pub fn update_application(&self, app: Application) {
        self.put_application(app, event_type::APPLICATION_UPDATED);
    }

    fn put_application(&self, mut app: Application, kind: &str) {
        if app.time_stamp == 0 {
            app.time_stamp = now_millis();
        }
        let mut event = new_event(kind, app.time_stamp);
        event.application = Some((&app).into());
        write(&self.applications).insert(app.uuid.clone(), app);
        self.emit(event);
    }

    /// Remove an application by UUID
    pub fn delete_application(&self, uuid: &str) -> Option<Application> {
        let removed = write(&self.applications).remove(uuid)?;
        let mut event = new_event(event_type::APPLICATION_DELETED, now_millis());
        event.application = Some((&removed).into());
        self.emit(event);
        Some(removed)
    }

    /// Application by UUID
    pub fn application(&self, uuid: &str) -> Option<Application> {
        read(&self.applications).get(uuid).cloned()
    }

    /// All applications
    pub fn applications(&self) -> Vec<Application> {
        read(&self.applications).values().cloned().collect()
    }

    /// Every application joined with its key mappings
    pub fn resolved_applications(&self) -> Vec<ResolvedApplication> {
        let applications = read(&self.applications);
        let key_mappings = read(&self.key_mappings);

        let mut resolved: Vec<ResolvedApplication> = applications
            .values()
            .map(|app| ResolvedApplication {
                uuid: app.uuid.clone(),
                name: app.name.clone(),
                owner: app.owner.clone(),
                organization: app.organization.clone(),
                attributes: app.attributes.clone(),
                time_stamp: app.time_stamp,
                security_schemes: key_mappings
                    .values()
                    .filter(|km| km.application_uuid == app.uuid)
                    .map(|km| SecurityScheme {
                        security_scheme: km.security_scheme.clone(),
                        application_identifier: km.application_identifier.clone(),
                        key_type: km.key_type.clone(),
                        env_id: km.env_id.clone(),
                    })
                    .collect(),
            })
            .collect();
        resolved.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        resolved
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Insert a subscription, replacing one with the same UUID
    pub fn add_subscription(&self, sub: Subscription) {
        self.put_subscription(sub, event_type::SUBSCRIPTION_CREATED);
    }

    /// Replace a subscription
    pub fn update_subscription(&self, sub: Subscription) {
        self.put_subscription(sub, event_type::SUBSCRIPTION_UPDATED);
    }

    fn put_subscription(&self, mut sub: Subscription, kind: &str) {
        if sub.time_stamp == 0 {
            sub.time_stamp = now_millis();
        }
        let mut event = new_event(kind, sub.time_stamp);
        event.subscription = Some((&sub).into());
        write(&self.subscriptions).insert(sub.uuid.clone(), sub);
        self.emit(event);
    }

    /// Remove a subscription by UUID
    pub fn delete_subscription(&self, uuid: &str) -> Option<Subscription> {
        let removed = write(&self.subscriptions).remove(uuid)?;
        let mut event = new_event(event_type::SUBSCRIPTION_DELETED, now_millis());
        event.subscription = Some((&removed).into());
        self.emit(event);
        Some(removed)
    }

    /// Subscription by UUID
    pub fn subscription(&self, uuid: &str) -> Option<Subscription> {
        read(&self.subscriptions).get(uuid).cloned()
    }

    /// All subscriptions
    pub fn subscriptions(&self) -> Vec<Subscription> {
        read(&self.subscriptions).values().cloned().collect()
    }

    // =========================================================================
    // Application mappings
    // =========================================================================

    /// Insert a mapping, replacing one with the same key
    pub fn add_application_mapping(&self, mapping: ApplicationMapping) {
        self.put_application_mapping(mapping, event_type::APPLICATION_MAPPING_CREATED);
    }

    /// Replace a mapping
    pub fn update_application_mapping(&self, mapping: ApplicationMapping) {
        self.put_application_mapping(mapping, event_type::APPLICATION_MAPPING_UPDATED);
    }

    fn put_application_mapping(&self, mapping: ApplicationMapping, kind: &str) {
        let mut event = new_event(kind, now_millis());
        event.application_mapping = Some((&mapping).into());
        write(&self.application_mappings).insert(mapping.uuid.clone(), mapping);
        self.emit(event);
    }

    /// Remove a mapping by key
    pub fn delete_application_mapping(&self, uuid: &str) -> Option<ApplicationMapping> {
        let removed = write(&self.application_mappings).remove(uuid)?;
        let mut event = new_event(event_type::APPLICATION_MAPPING_DELETED, now_millis());
        event.application_mapping = Some((&removed).into());
        self.emit(event);
        Some(removed)
    }

    /// All application mappings
    pub fn application_mappings(&self) -> Vec<ApplicationMapping> {
        read(&self.application_mappings).values().cloned().collect()
    }

    // =========================================================================
    // Key mappings
    // =========================================================================

    /// Insert a key mapping, replacing one with the same identity
    pub fn add_key_mapping(&self, mapping: ApplicationKeyMapping) {
        let mut event = new_event(
            event_type::APPLICATION_KEY_MAPPING_CREATED,
            if mapping.timestamp == 0 { now_millis() } else { mapping.timestamp },
        );
        event.application_key_mapping = Some((&mapping).into());
        write(&self.key_mappings).insert(mapping.key(), mapping);
        self.emit(event);
    }

    /// Remove the key mapping with the same identity as `mapping`
    pub fn delete_key_mapping(&self, mapping: &ApplicationKeyMapping) -> Option<ApplicationKeyMapping> {
        let removed = write(&self.key_mappings).remove(&mapping.key())?;
        let mut event = new_event(event_type::APPLICATION_KEY_MAPPING_DELETED, now_millis());
        event.application_key_mapping = Some((&removed).into());
        self.emit(event);
        Some(removed)
    }

    /// All key mappings
    pub fn key_mappings(&self) -> Vec<ApplicationKeyMapping> {
        read(&self.key_mappings).values().cloned().collect()
    }

    // =========================================================================
    // Bulk
    // =========================================================================

    /// Replace the whole state with `snapshot` and tell enforcers to resync
    pub fn replace_all(&self, snapshot: Snapshot) {
        {
            let mut applications = write(&self.applications);
            *applications = snapshot
                .applications
                .into_iter()
                .map(|a| (a.uuid.clone(), a))
                .collect();
        }
        {
            let mut subscriptions = write(&self.subscriptions);
            *subscriptions = snapshot
                .subscriptions
                .into_iter()
                .map(|s| (s.uuid.clone(), s))
                .collect();
        }
        {
            let mut mappings = write(&self.application_mappings);
            *mappings = snapshot
                .application_mappings
                .into_iter()
                .map(|m| (m.uuid.clone(), m))
                .collect();
        }
        {
            let mut key_mappings = write(&self.key_mappings);
            *key_mappings = snapshot
                .key_mappings
                .into_iter()
                .map(|k| (k.key(), k))
                .collect();
        }
        self.emit(new_event(event_type::ALL_EVENTS, now_millis()));
    }
}
