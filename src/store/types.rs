//! Entities held by the state store
//!
//! These are the shapes served over the local HTTP surface (camelCase JSON,
//! empty fields omitted) and converted into gRPC messages for enforcers.

#![allow(missing_docs)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crd::sha1_hex;
use crate::proto;

/// Security scheme recorded for key mappings created from key-manager events
pub const OAUTH2_SCHEME: &str = "OAuth2";

/// Environment id recorded for key mappings created from key-manager events
pub const DEFAULT_ENV_ID: &str = "Default";

/// `{"list": [...]}` envelope of every list response
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ListResponse<T> {
    pub list: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(list: Vec<T>) -> Self {
        Self { list }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Application {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub organization: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub time_stamp: i64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubscribedApi {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Subscription {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sub_status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub organization: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribed_api: Option<SubscribedApi>,
    #[serde(skip_serializing_if = "is_zero")]
    pub time_stamp: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rate_limit: String,
}

/// Link between an application and one of its subscriptions
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationMapping {
    pub uuid: String,
    pub application_ref: String,
    pub subscription_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub organization: String,
}

impl ApplicationMapping {
    /// Mapping keyed by `sha1hex("<appUUID>:<subUUID>")`
    pub fn new(application_uuid: &str, subscription_uuid: &str, organization: &str) -> Self {
        Self {
            uuid: Self::key(application_uuid, subscription_uuid),
            application_ref: application_uuid.to_string(),
            subscription_ref: subscription_uuid.to_string(),
            organization: organization.to_string(),
        }
    }

    /// Identity of the mapping between `application_uuid` and `subscription_uuid`
    pub fn key(application_uuid: &str, subscription_uuid: &str) -> String {
        sha1_hex(&format!("{application_uuid}:{subscription_uuid}"))
    }
}

/// Consumer key issued to an application
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationKeyMapping {
    #[serde(rename = "applicationUUID")]
    pub application_uuid: String,
    pub security_scheme: String,
    pub application_identifier: String,
    pub key_type: String,
    #[serde(rename = "envID")]
    pub env_id: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub timestamp: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub organization: String,
}

impl ApplicationKeyMapping {
    /// Identity `sha1hex("<appUUID>:<keyType>:<scheme>:<envId>:<org>")`
    pub fn key(&self) -> String {
        sha1_hex(&format!(
            "{}:{}:{}:{}:{}",
            self.application_uuid, self.key_type, self.security_scheme, self.env_id, self.organization
        ))
    }
}

/// Key of an application as seen by enforcers
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityScheme {
    pub security_scheme: String,
    pub application_identifier: String,
    pub key_type: String,
    #[serde(rename = "envID")]
    pub env_id: String,
}

/// Application joined with its key mappings
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolvedApplication {
    pub uuid: String,
    pub name: String,
    pub owner: String,
    pub organization: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub time_stamp: i64,
    pub security_schemes: Vec<SecurityScheme>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl From<&Application> for proto::Application {
    fn from(app: &Application) -> Self {
        Self {
            uuid: app.uuid.clone(),
            name: app.name.clone(),
            owner: app.owner.clone(),
            organization: app.organization.clone(),
            attributes: app.attributes.clone(),
        }
    }
}

impl From<&Subscription> for proto::Subscription {
    fn from(sub: &Subscription) -> Self {
        Self {
            uuid: sub.uuid.clone(),
            sub_status: sub.sub_status.clone(),
            organization: sub.organization.clone(),
            subscribed_api: sub.subscribed_api.as_ref().map(|api| proto::SubscribedApi {
                name: api.name.clone(),
                version: api.version.clone(),
            }),
            rate_limit: sub.rate_limit.clone(),
        }
    }
}

impl From<&ApplicationMapping> for proto::ApplicationMapping {
    fn from(mapping: &ApplicationMapping) -> Self {
        Self {
            uuid: mapping.uuid.clone(),
            application_ref: mapping.application_ref.clone(),
            subscription_ref: mapping.subscription_ref.clone(),
            organization: mapping.organization.clone(),
        }
    }
}

impl From<&ApplicationKeyMapping> for proto::ApplicationKeyMapping {
    fn from(mapping: &ApplicationKeyMapping) -> Self {
        Self {
            application_uuid: mapping.application_uuid.clone(),
            security_scheme: mapping.security_scheme.clone(),
            application_identifier: mapping.application_identifier.clone(),
            key_type: mapping.key_type.clone(),
            env_id: mapping.env_id.clone(),
            organization: mapping.organization.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_key_is_stable_hash() {
        let mapping = ApplicationMapping::new("app-1", "sub-1", "carbon.super");
        assert_eq!(mapping.uuid, sha1_hex("app-1:sub-1"));
        assert_eq!(mapping.uuid, ApplicationMapping::key("app-1", "sub-1"));
        assert_eq!(mapping.application_ref, "app-1");
        assert_eq!(mapping.subscription_ref, "sub-1");
    }

    #[test]
    fn test_empty_fields_omitted_in_json() {
        let sub = Subscription {
            uuid: "sub-1".to_string(),
            sub_status: "UNBLOCKED".to_string(),
            subscribed_api: Some(SubscribedApi {
                name: "api-1".to_string(),
                version: "1.0.0".to_string(),
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&sub).unwrap();
        assert_eq!(value["subStatus"], "UNBLOCKED");
        assert_eq!(value["subscribedApi"]["name"], "api-1");
        assert!(value.get("organization").is_none());
        assert!(value.get("timeStamp").is_none());
    }

    #[test]
    fn test_key_mapping_field_names() {
        let mapping = ApplicationKeyMapping {
            application_uuid: "app-1".to_string(),
            security_scheme: OAUTH2_SCHEME.to_string(),
            application_identifier: "ck".to_string(),
            key_type: "PRODUCTION".to_string(),
            env_id: DEFAULT_ENV_ID.to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&mapping).unwrap();
        assert_eq!(value["applicationUUID"], "app-1");
        assert_eq!(value["envID"], "Default");
        assert_eq!(mapping.key(), sha1_hex("app-1:PRODUCTION:OAuth2:Default:"));
    }
}
