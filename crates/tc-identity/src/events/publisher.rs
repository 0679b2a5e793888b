//! Outbound provisioning events
//!
//! Published to the topic exchange after a tenant is committed:
//! - `user.created`: `{tenantId, createdAt, eventType: "user_created", timestamp}`
//! - `widget.provision`: `{tenantId, timestamp}`

use serde_json::json;
use std::sync::Arc;
use tc_common::OutboundMessage;
use tc_queue::QueuePublisher;
use tracing::debug;

use crate::shared::error::Result;
use crate::Tenant;

pub const USER_CREATED_EVENT_TYPE: &str = "user_created";

#[derive(Clone)]
pub struct ProvisioningEvents {
    publisher: Arc<dyn QueuePublisher>,
    provisioning_routing_key: String,
    widget_routing_key: String,
}

impl ProvisioningEvents {
    pub fn new(
        publisher: Arc<dyn QueuePublisher>,
        provisioning_routing_key: impl Into<String>,
        widget_routing_key: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            provisioning_routing_key: provisioning_routing_key.into(),
            widget_routing_key: widget_routing_key.into(),
        }
    }

    /// Routing keys `user.created` and `widget.provision`.
    pub fn with_default_routing(publisher: Arc<dyn QueuePublisher>) -> Self {
        Self::new(publisher, "user.created", "widget.provision")
    }

    pub async fn publish_user_created(&self, tenant: &Tenant) -> Result<String> {
        let payload = json!({
            "tenantId": tenant.id,
            "createdAt": tenant.created_at.to_rfc3339(),
            "eventType": USER_CREATED_EVENT_TYPE,
            "timestamp": crate::shared::now().to_rfc3339(),
        });
        let message_id = self
            .publisher
            .publish(OutboundMessage::new(&self.provisioning_routing_key, payload))
            .await?;
        debug!(
            tenant_id = %tenant.id,
            message_id = %message_id,
            exchange = %self.publisher.identifier(),
            "Published user_created event"
        );
        Ok(message_id)
    }

    pub async fn publish_widget_provision(&self, tenant_id: &str) -> Result<String> {
        let payload = json!({
            "tenantId": tenant_id,
            "timestamp": crate::shared::now().to_rfc3339(),
        });
        let message_id = self
            .publisher
            .publish(OutboundMessage::new(&self.widget_routing_key, payload))
            .await?;
        debug!(
            tenant_id,
            message_id = %message_id,
            exchange = %self.publisher.identifier(),
            "Published widget provisioning signal"
        );
        Ok(message_id)
    }
}
