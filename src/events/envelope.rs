//! Broker envelope decoding and event classification
//!
//! Notification messages look like
//! `{"event":{"payloadData":{"eventType":..,"timestamp":..,"event":"<base64 json>"}}}`;
//! key-manager messages carry the base64 document in `payloadData.value`
//! together with `action`, `name` and `tenantDomain`.

use std::collections::HashMap;

use base64::Engine;
use serde::Deserialize;

use crate::{Error, Result};

/// Outer broker message
#[derive(Clone, Debug, Deserialize)]
struct Notification {
    event: NotificationEvent,
}

#[derive(Clone, Debug, Deserialize)]
struct NotificationEvent {
    #[serde(rename = "payloadData")]
    payload_data: PayloadData,
}

/// `payloadData` of a broker message
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PayloadData {
    /// Event type discriminator
    pub event_type: String,
    /// Producer timestamp (ms)
    pub timestamp: i64,
    /// Base64 JSON payload of notification events
    pub event: Option<String>,
    /// Base64 JSON payload of key-manager events
    pub value: Option<String>,
    /// Key-manager action (`add`, `update`, `delete`)
    pub action: Option<String>,
    /// Key-manager name
    pub name: Option<String>,
    /// Tenant of a key-manager event
    pub tenant_domain: Option<String>,
}

/// Envelope with its payload decoded from base64
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedEnvelope {
    /// Envelope metadata
    pub payload: PayloadData,
    /// Decoded inner JSON (empty when the envelope carried none)
    pub body: Vec<u8>,
}

/// Parse the envelope and base64-decode its payload
///
/// Any failure here is a hard decode failure: the message cannot be
/// interpreted at all.
pub fn decode_envelope(bytes: &[u8]) -> Result<DecodedEnvelope> {
    let notification: Notification = serde_json::from_slice(bytes)
        .map_err(|e| Error::envelope(format!("invalid envelope: {e}")))?;
    let payload = notification.event.payload_data;

    let encoded = payload
        .event
        .as_deref()
        .or(payload.value.as_deref())
        .unwrap_or_default();
    let body = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::envelope(format!("invalid base64 payload for {}: {e}", payload.event_type)))?;

    Ok(DecodedEnvelope { payload, body })
}

/// Coarse event class, from a substring of the event type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventClass {
    /// API lifecycle state change
    LifecycleChange,
    /// LLM provider change
    AiProvider,
    /// API deploy/undeploy/update
    Api,
    /// Application or application key mapping
    Application,
    /// Subscription
    Subscription,
    /// Scope
    Scope,
    /// Throttling policy
    Policy,
    /// Key manager configuration
    KeyManager,
    /// Anything else (health checks, token revocations, ...)
    Unknown,
}

/// Event type of key-manager configuration messages
pub const KEY_MANAGER_EVENT_TYPE: &str = "key_manager_configuration";

/// Classify an event type; checked in order, first match wins
pub fn classify(event_type: &str) -> EventClass {
    if event_type.eq_ignore_ascii_case(KEY_MANAGER_EVENT_TYPE) {
        return EventClass::KeyManager;
    }
    const MARKERS: [(&str, EventClass); 7] = [
        ("LIFECYCLE_CHANGE", EventClass::LifecycleChange),
        ("API", EventClass::Api),
        ("APPLICATION", EventClass::Application),
        ("SUBSCRIPTION", EventClass::Subscription),
        ("SCOPE", EventClass::Scope),
        ("LLM_PROVIDER", EventClass::AiProvider),
        ("POLICY", EventClass::Policy),
    ];
    MARKERS
        .iter()
        .find(|(marker, _)| event_type.contains(marker))
        .map(|(_, class)| *class)
        .unwrap_or(EventClass::Unknown)
}

/// Fields every notification payload carries
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventHeader {
    /// Producer event id
    pub event_id: String,
    /// Producer timestamp (ms)
    pub time_stamp: i64,
    /// Concrete event type (e.g. `APPLICATION_CREATE`)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Tenant id
    pub tenant_id: i64,
    /// Tenant domain
    pub tenant_domain: String,
}

/// API deploy/undeploy/update/lifecycle payload
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,
    /// Numeric API id
    pub api_id: i64,
    /// API UUID
    pub uuid: String,
    /// Gateway labels the event applies to
    pub gateway_labels: Vec<String>,
    /// API name
    pub api_name: String,
    /// API version
    pub api_version: String,
    /// API context
    pub api_context: String,
    /// API provider
    pub api_provider: String,
    /// Lifecycle status
    pub api_status: String,
    /// API type (HTTP, GRAPHQL, ...)
    pub api_type: String,
    /// Update action (e.g. `DEFAULT_VERSION`)
    pub action: String,
}

/// Application create/update/delete payload
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,
    /// Application UUID
    pub uuid: String,
    /// Numeric application id
    pub application_id: i64,
    /// Application name
    pub application_name: String,
    /// Token type
    pub token_type: String,
    /// Application throttling policy
    pub application_policy: String,
    /// Free-form attributes
    pub attributes: HashMap<String, String>,
    /// Owner
    pub subscriber: String,
    /// Sharing groups
    pub group_ids: Vec<serde_json::Value>,
}

/// Consumer key registered to or removed from an application
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationRegistrationEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,
    /// Numeric application id
    pub application_id: i64,
    /// Application UUID
    #[serde(rename = "applicationUUID")]
    pub application_uuid: String,
    /// Issued consumer key
    pub consumer_key: String,
    /// PRODUCTION or SANDBOX
    pub key_type: String,
    /// Key manager that issued the key
    pub key_manager: String,
}

/// Subscription create/update/delete payload
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,
    /// Numeric subscription id
    pub subscription_id: i64,
    /// Subscription UUID
    #[serde(rename = "subscriptionUUID")]
    pub subscription_uuid: String,
    /// Numeric API id
    pub api_id: i64,
    /// Subscribed API UUID
    #[serde(rename = "apiUUID")]
    pub api_uuid: String,
    /// Numeric application id
    pub application_id: i64,
    /// Subscribing application UUID
    #[serde(rename = "applicationUUID")]
    pub application_uuid: String,
    /// Subscription tier
    pub policy_id: String,
    /// State (UNBLOCKED, BLOCKED, ...)
    pub subscription_state: String,
}

/// Throttling policy change
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,
    /// Numeric policy id
    pub policy_id: i64,
    /// Policy name
    #[serde(alias = "name")]
    pub policy_name: String,
    /// Quota type
    pub quota_type: String,
    /// API, APPLICATION or SUBSCRIPTION
    pub policy_type: String,
}

/// LLM provider change
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AiProviderEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,
    /// Provider id
    pub id: String,
    /// Provider name
    pub name: String,
    /// Provider API version
    pub api_version: String,
}

/// Key-manager configuration change
#[derive(Clone, Debug, PartialEq)]
pub struct KeyManagerEvent {
    /// `add`, `update` or `delete`
    pub action: String,
    /// Key-manager name
    pub name: String,
    /// Tenant domain
    pub tenant_domain: String,
    /// Decoded configuration document (absent on delete)
    pub key_manager: Option<crate::controlplane::types::CpKeyManager>,
}

/// A classified, decoded change notification
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    /// API lifecycle change
    Lifecycle(ApiEvent),
    /// API deploy/undeploy/update
    Api(ApiEvent),
    /// Application create/update/delete
    Application(ApplicationEvent),
    /// Key mapping create/remove
    ApplicationRegistration(ApplicationRegistrationEvent),
    /// Subscription create/update/delete
    Subscription(SubscriptionEvent),
    /// Throttling policy change
    Policy(PolicyEvent),
    /// Scope change
    Scope(EventHeader),
    /// LLM provider change
    AiProvider(AiProviderEvent),
    /// Key-manager change
    KeyManager(KeyManagerEvent),
    /// Unrecognized event type
    Unknown(String),
}

impl ChangeEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lifecycle(_) => "lifecycle",
            Self::Api(_) => "api",
            Self::Application(_) => "application",
            Self::ApplicationRegistration(_) => "application_registration",
            Self::Subscription(_) => "subscription",
            Self::Policy(_) => "policy",
            Self::Scope(_) => "scope",
            Self::AiProvider(_) => "ai_provider",
            Self::KeyManager(_) => "key_manager",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Application registration event types
pub const APPLICATION_REGISTRATION_CREATE: &str = "APPLICATION_REGISTRATION_CREATE";
/// Key mapping removal event type
pub const REMOVE_APPLICATION_KEYMAPPING: &str = "REMOVE_APPLICATION_KEYMAPPING";

fn json<T: serde::de::DeserializeOwned>(body: &[u8], event_type: &str) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::serialization_for(event_type, format!("invalid event payload: {e}")))
}

/// Turn a decoded envelope into a typed event
pub fn parse_change_event(envelope: &DecodedEnvelope) -> Result<ChangeEvent> {
    let event_type = envelope.payload.event_type.as_str();
    let body = envelope.body.as_slice();

    Ok(match classify(event_type) {
        EventClass::LifecycleChange => ChangeEvent::Lifecycle(json(body, event_type)?),
        EventClass::Api => ChangeEvent::Api(json(body, event_type)?),
        EventClass::Application
            if event_type.eq_ignore_ascii_case(APPLICATION_REGISTRATION_CREATE)
                || event_type.eq_ignore_ascii_case(REMOVE_APPLICATION_KEYMAPPING) =>
        {
            ChangeEvent::ApplicationRegistration(json(body, event_type)?)
        }
        EventClass::Application => ChangeEvent::Application(json(body, event_type)?),
        EventClass::Subscription => ChangeEvent::Subscription(json(body, event_type)?),
        EventClass::Policy => ChangeEvent::Policy(json(body, event_type)?),
        EventClass::Scope => ChangeEvent::Scope(json(body, event_type)?),
        EventClass::AiProvider => ChangeEvent::AiProvider(json(body, event_type)?),
        EventClass::KeyManager => {
            let p = &envelope.payload;
            let key_manager = if body.is_empty() {
                None
            } else {
                Some(json(body, event_type)?)
            };
            ChangeEvent::KeyManager(KeyManagerEvent {
                action: p.action.clone().unwrap_or_default(),
                name: p.name.clone().unwrap_or_default(),
                tenant_domain: p
                    .tenant_domain
                    .clone()
                    .unwrap_or_else(|| crate::SUPER_TENANT_DOMAIN.to_string()),
                key_manager,
            })
        }
        EventClass::Unknown => ChangeEvent::Unknown(event_type.to_string()),
    })
}

/// Build a notification envelope (used by tests and replay tooling)
pub fn encode_envelope(event_type: &str, timestamp: i64, payload: &serde_json::Value) -> Vec<u8> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(payload.to_string());
    serde_json::json!({
        "event": {
            "payloadData": {
                "eventType": event_type,
                "timestamp": timestamp,
                "event": encoded,
            }
        }
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::deploy("DEPLOY_API_IN_GATEWAY", EventClass::Api)]
    #[case::lifecycle("LIFECYCLE_CHANGE", EventClass::LifecycleChange)]
    #[case::app("APPLICATION_CREATE", EventClass::Application)]
    #[case::key_mapping("REMOVE_APPLICATION_KEYMAPPING", EventClass::Application)]
    #[case::subscription("SUBSCRIPTIONS_UPDATE", EventClass::Subscription)]
    #[case::scope("SCOPE_CREATE", EventClass::Scope)]
    #[case::policy("POLICY_UPDATE", EventClass::Policy)]
    #[case::llm("LLM_PROVIDER_UPDATE", EventClass::AiProvider)]
    #[case::km("key_manager_configuration", EventClass::KeyManager)]
    #[case::health("HEALTH_CHECK", EventClass::Unknown)]
    fn test_classify(#[case] event_type: &str, #[case] expected: EventClass) {
        assert_eq!(classify(event_type), expected);
    }

    #[test]
    fn test_decode_and_parse_application_event() {
        let bytes = encode_envelope(
            "APPLICATION_CREATE",
            1700,
            &json!({
                "eventId": "e1",
                "timeStamp": 1700,
                "type": "APPLICATION_CREATE",
                "tenantDomain": "carbon.super",
                "uuid": "app-uuid",
                "applicationId": 12,
                "applicationName": "shop",
                "subscriber": "alice",
                "attributes": {"tier": "gold"}
            }),
        );

        let envelope = decode_envelope(&bytes).unwrap();
        assert_eq!(envelope.payload.timestamp, 1700);

        match parse_change_event(&envelope).unwrap() {
            ChangeEvent::Application(app) => {
                assert_eq!(app.uuid, "app-uuid");
                assert_eq!(app.application_id, 12);
                assert_eq!(app.header.event_type, "APPLICATION_CREATE");
                assert_eq!(app.header.tenant_domain, "carbon.super");
                assert_eq!(app.attributes.get("tier").map(String::as_str), Some("gold"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_registration_routed_separately() {
        let bytes = encode_envelope(
            APPLICATION_REGISTRATION_CREATE,
            1,
            &json!({"applicationUUID": "a", "consumerKey": "ck", "keyType": "PRODUCTION"}),
        );
        let event = parse_change_event(&decode_envelope(&bytes).unwrap()).unwrap();
        assert_eq!(event.kind(), "application_registration");
    }

    #[test]
    fn test_bad_base64_is_envelope_error() {
        let bytes = json!({"event": {"payloadData": {"eventType": "API_UPDATE", "event": "%%%"}}})
            .to_string();
        let err = decode_envelope(bytes.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Envelope { .. }));
    }

    #[test]
    fn test_not_json_is_envelope_error() {
        assert!(matches!(
            decode_envelope(b"not json").unwrap_err(),
            Error::Envelope { .. }
        ));
    }

    #[test]
    fn test_key_manager_event_uses_value() {
        let km = json!({"uuid": "km-1", "name": "IS", "type": "WSO2-IS", "enabled": true,
            "configuration": {"issuer": "https://is/token"}});
        let encoded = base64::engine::general_purpose::STANDARD.encode(km.to_string());
        let bytes = json!({"event": {"payloadData": {
            "eventType": "key_manager_configuration",
            "action": "add",
            "name": "IS",
            "tenantDomain": "acme.com",
            "value": encoded
        }}})
        .to_string();

        let event = parse_change_event(&decode_envelope(bytes.as_bytes()).unwrap()).unwrap();
        match event {
            ChangeEvent::KeyManager(e) => {
                assert_eq!(e.action, "add");
                assert_eq!(e.tenant_domain, "acme.com");
                assert_eq!(e.key_manager.unwrap().uuid, "km-1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_kept() {
        let bytes = encode_envelope("HEALTH_CHECK", 1, &json!({}));
        let event = parse_change_event(&decode_envelope(&bytes).unwrap()).unwrap();
        assert_eq!(event, ChangeEvent::Unknown("HEALTH_CHECK".to_string()));
    }
}
