//! Last-applied timestamp guard
//!
//! Broker delivery is unordered across producers, so every entity remembers
//! the producer timestamp of the last event applied to it. An older event is
//! dropped; an equal one is let through so a replayed initial load is never
//! starved. Entries are never pruned.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

/// Key of an entity in the guard table
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// API deployment, per gateway label
    Api {
        /// API UUID
        uuid: String,
        /// Gateway label
        gateway_label: String,
    },
    /// Application, by control-plane numeric id
    Application(i64),
    /// Subscription, by control-plane numeric id
    Subscription(i64),
    /// Anything else keyed by a string id
    Other(String),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api {
                uuid,
                gateway_label,
            } => write!(f, "api:{uuid}:{gateway_label}"),
            Self::Application(id) => write!(f, "application:{id}"),
            Self::Subscription(id) => write!(f, "subscription:{id}"),
            Self::Other(id) => write!(f, "other:{id}"),
        }
    }
}

/// Process-wide last-applied timestamp table
#[derive(Debug, Default)]
pub struct TimestampGuard {
    last_applied: Mutex<HashMap<EntityKey, i64>>,
}

impl TimestampGuard {
    /// Create an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an event for `key` stamped `timestamp`, recording it when admitted
    ///
    /// Returns false when a later event for the same key was already applied.
    pub fn admit(&self, key: EntityKey, timestamp: i64) -> bool {
        let mut table = match self.last_applied.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(&last) = table.get(&key) {
            if last > timestamp {
                debug!(key = %key, last, timestamp, "Dropping out-of-order event");
                return false;
            }
        }
        table.insert(key, timestamp);
        true
    }

    /// Last applied timestamp for `key`
    pub fn last_applied(&self, key: &EntityKey) -> Option<i64> {
        let table = match self.last_applied.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.get(key).copied()
    }

    /// Number of tracked entities
    pub fn len(&self) -> usize {
        self.last_applied.lock().map(|t| t.len()).unwrap_or_default()
    }

    /// Whether no entity has been seen yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_event_dropped() {
        let guard = TimestampGuard::new();
        let key = EntityKey::Application(7);

        let applied: Vec<i64> = [5, 3, 7]
            .into_iter()
            .filter(|ts| guard.admit(key.clone(), *ts))
            .collect();

        assert_eq!(applied, vec![5, 7]);
        assert_eq!(guard.last_applied(&key), Some(7));
    }

    #[test]
    fn test_equal_timestamp_accepted() {
        let guard = TimestampGuard::new();
        let key = EntityKey::Subscription(1);
        assert!(guard.admit(key.clone(), 10));
        assert!(guard.admit(key.clone(), 10));
        assert_eq!(guard.last_applied(&key), Some(10));
    }

    #[test]
    fn test_keys_are_independent() {
        let guard = TimestampGuard::new();
        let prod = EntityKey::Api {
            uuid: "api-1".to_string(),
            gateway_label: "Default".to_string(),
        };
        let other = EntityKey::Api {
            uuid: "api-1".to_string(),
            gateway_label: "us-east".to_string(),
        };
        assert!(guard.admit(prod.clone(), 100));
        assert!(guard.admit(other, 50));
        assert!(!guard.admit(prod, 99));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_key_display() {
        let key = EntityKey::Api {
            uuid: "u".to_string(),
            gateway_label: "Default".to_string(),
        };
        assert_eq!(key.to_string(), "api:u:Default");
    }
}
