//! gRPC protocol definitions for the enforcer event stream
//!
//! Enforcers connect with a `Request` carrying their client id and receive a
//! server-side stream of `Event`s:
//!
//! - first an `ALL_EVENTS` event telling the client to resync everything
//! - then one event per application/subscription/mapping change
//!
//! # Example
//!
//! ```ignore
//! use apk_agent::proto::event_stream_service_client::EventStreamServiceClient;
//!
//! let mut client = EventStreamServiceClient::connect("http://agent:18000").await?;
//! let mut stream = client
//!     .stream_events(Request { client_id: "enforcer-0".into() })
//!     .await?
//!     .into_inner();
//! while let Some(event) = stream.message().await? { /* ... */ }
//! ```

#![allow(missing_docs)]

use std::collections::HashMap;

/// Client subscription request
#[derive(Clone, PartialEq, prost::Message)]
pub struct Request {
    #[prost(string, tag = "1")]
    pub client_id: String,
}

/// One change notification pushed to enforcers
#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub r#type: String,
    #[prost(int64, tag = "3")]
    pub time_stamp: i64,
    #[prost(message, optional, tag = "4")]
    pub application: Option<Application>,
    #[prost(message, optional, tag = "5")]
    pub subscription: Option<Subscription>,
    #[prost(message, optional, tag = "6")]
    pub application_mapping: Option<ApplicationMapping>,
    #[prost(message, optional, tag = "7")]
    pub application_key_mapping: Option<ApplicationKeyMapping>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Application {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub owner: String,
    #[prost(string, tag = "4")]
    pub organization: String,
    #[prost(map = "string, string", tag = "5")]
    pub attributes: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribedApi {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Subscription {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub sub_status: String,
    #[prost(string, tag = "3")]
    pub organization: String,
    #[prost(message, optional, tag = "4")]
    pub subscribed_api: Option<SubscribedApi>,
    #[prost(string, tag = "5")]
    pub rate_limit: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplicationMapping {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub application_ref: String,
    #[prost(string, tag = "3")]
    pub subscription_ref: String,
    #[prost(string, tag = "4")]
    pub organization: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplicationKeyMapping {
    #[prost(string, tag = "1")]
    pub application_uuid: String,
    #[prost(string, tag = "2")]
    pub security_scheme: String,
    #[prost(string, tag = "3")]
    pub application_identifier: String,
    #[prost(string, tag = "4")]
    pub key_type: String,
    #[prost(string, tag = "5")]
    pub env_id: String,
    #[prost(string, tag = "6")]
    pub organization: String,
}

include!(concat!(env!("OUT_DIR"), "/apkmgt.EventStreamService.rs"));

/// Event type strings carried in `Event::type`
pub mod event_type {
    pub const ALL_EVENTS: &str = "ALL_EVENTS";
    pub const APPLICATION_CREATED: &str = "APPLICATION_CREATED";
    pub const APPLICATION_UPDATED: &str = "APPLICATION_UPDATED";
    pub const APPLICATION_DELETED: &str = "APPLICATION_DELETED";
    pub const SUBSCRIPTION_CREATED: &str = "SUBSCRIPTION_CREATED";
    pub const SUBSCRIPTION_UPDATED: &str = "SUBSCRIPTION_UPDATED";
    pub const SUBSCRIPTION_DELETED: &str = "SUBSCRIPTION_DELETED";
    pub const APPLICATION_MAPPING_CREATED: &str = "APPLICATION_MAPPING_CREATED";
    pub const APPLICATION_MAPPING_UPDATED: &str = "APPLICATION_MAPPING_UPDATED";
    pub const APPLICATION_MAPPING_DELETED: &str = "APPLICATION_MAPPING_DELETED";
    pub const APPLICATION_KEY_MAPPING_CREATED: &str = "APPLICATION_KEY_MAPPING_CREATED";
    pub const APPLICATION_KEY_MAPPING_DELETED: &str = "APPLICATION_KEY_MAPPING_DELETED";
}
