//! Control-plane change notifications
//!
//! - [`broker`] consumes the AMQP exchanges and acknowledges every delivery
//! - [`envelope`] decodes and classifies a delivery
//! - [`tenant`] drops events for other tenants
//! - [`ordering`] drops events older than the last one applied
//! - [`handlers`] applies the side effects
//!
//! [`EventProcessor`] ties the last four together for one delivery.

pub mod broker;
pub mod envelope;
pub mod handlers;
pub mod ordering;
pub mod tenant;

use std::sync::Arc;

use tracing::{debug, error, warn};

pub use envelope::{decode_envelope, parse_change_event, ChangeEvent, DecodedEnvelope};
pub use handlers::Outcome;
pub use ordering::{EntityKey, TimestampGuard};
pub use tenant::TenantPolicy;

use crate::context::AgentContext;

/// Turns raw deliveries into applied changes
#[derive(Clone, Debug)]
pub struct EventProcessor {
    ctx: Arc<AgentContext>,
}

impl EventProcessor {
    /// Processor applying events to `ctx`
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    /// Process one delivery body
    ///
    /// Never fails: the caller acknowledges the delivery whatever the outcome.
    pub async fn process(&self, bytes: &[u8]) -> Outcome {
        let envelope = match decode_envelope(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable delivery");
                return Outcome::Skipped("undecodable envelope");
            }
        };
        let event = match parse_change_event(&envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!(event_type = %envelope.payload.event_type, error = %e, "Dropping malformed event");
                return Outcome::Skipped("malformed payload");
            }
        };

        if let Some(tenant_domain) = handlers::tenant_domain(&event) {
            if !self.ctx.tenant.accepts(tenant_domain) {
                debug!(%tenant_domain, kind = event.kind(), "Event for another tenant");
                return Outcome::Skipped("foreign tenant");
            }
        }

        let kind = event.kind();
        match handlers::handle(&self.ctx, event, envelope.payload.timestamp).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(kind, event_type = %envelope.payload.event_type, error = %e, "Failed to apply event");
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::events::envelope::encode_envelope;
    use crate::proto::event_type;
    use serde_json::json;

    fn application_created(tenant: &str) -> Vec<u8> {
        encode_envelope(
            "APPLICATION_CREATE",
            100,
            &json!({
                "type": "APPLICATION_CREATE",
                "tenantDomain": tenant,
                "uuid": "app-1",
                "applicationId": 1,
                "applicationName": "Shop",
                "subscriber": "alice"
            }),
        )
    }

    /// Story: An application created in the control plane reaches connected enforcers
    #[tokio::test]
    async fn story_application_event_reaches_subscribers() {
        let (ctx, _) = context("http://127.0.0.1:9");
        let mut rx = ctx.store.fanout().connect("enforcer-1");
        assert_eq!(rx.recv().await.unwrap().r#type, event_type::ALL_EVENTS);
        let processor = EventProcessor::new(ctx.clone());

        let outcome = processor.process(&application_created("carbon.super")).await;
        assert!(matches!(outcome, Outcome::Applied));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.r#type, event_type::APPLICATION_CREATED);
        assert_eq!(event.application.unwrap().uuid, "app-1");
        assert_eq!(ctx.store.application("app-1").unwrap().organization, "carbon.super");
    }

    #[tokio::test]
    async fn test_strict_tenant_drops_foreign_events() {
        let (ctx, _) = context("http://127.0.0.1:9");
        let mut ctx = Arc::try_unwrap(ctx).unwrap();
        ctx.tenant = TenantPolicy::Strict {
            tenant_domain: "carbon.super".to_string(),
        };
        let ctx = Arc::new(ctx);
        let processor = EventProcessor::new(ctx.clone());

        let outcome = processor.process(&application_created("acme.com")).await;
        assert!(matches!(outcome, Outcome::Skipped("foreign tenant")));
        assert!(ctx.store.applications().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_is_skipped() {
        let (ctx, _) = context("http://127.0.0.1:9");
        let processor = EventProcessor::new(ctx);
        assert!(matches!(
            processor.process(b"{not json").await,
            Outcome::Skipped("undecodable envelope")
        ));
    }

    #[tokio::test]
    async fn test_health_check_ignored() {
        let (ctx, _) = context("http://127.0.0.1:9");
        let processor = EventProcessor::new(ctx);
        let bytes = encode_envelope("HEALTH_CHECK", 1, &json!({}));
        assert!(matches!(processor.process(&bytes).await, Outcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_handler_failure_reported() {
        let server = wiremock::MockServer::start().await;
        let (ctx, _) = context(&server.uri());
        let processor = EventProcessor::new(ctx);
        let bytes = encode_envelope(
            "POLICY_UPDATE",
            1,
            &json!({"type": "POLICY_UPDATE", "policyName": "10PerMin", "policyType": "API"}),
        );
        assert!(matches!(processor.process(&bytes).await, Outcome::Failed));
    }
}
