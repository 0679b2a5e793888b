//! Inbound billing events
//!
//! Applies tenant plan, subscription and logo changes announced by the
//! billing service. Every message is acknowledged once handled: messages
//! that cannot be applied are logged and dropped, never redelivered.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tc_queue::QueueConsumer;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::collaborators::SettingsService;
use crate::shared::error::Result;
use crate::tenant::TenantProvisioningService;

pub const ACTION_SUBSCRIPTION_CREATED: &str = "subscription_created";
pub const ACTION_PLAN_SWITCHED: &str = "plan_switched";
pub const ACTION_LOGO_UPDATED: &str = "logo_updated";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantUpdateEvent {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Applied,
    /// Unknown action
    Ignored,
    /// Malformed, incomplete, or for a tenant that does not exist
    Dropped,
}

pub struct EventBridge {
    provisioning: Arc<TenantProvisioningService>,
    settings: Arc<dyn SettingsService>,
}

impl EventBridge {
    pub fn new(
        provisioning: Arc<TenantProvisioningService>,
        settings: Arc<dyn SettingsService>,
    ) -> Self {
        Self {
            provisioning,
            settings,
        }
    }

    /// Handle one raw message body. Never fails.
    pub async fn handle_message(&self, body: &[u8]) -> HandleOutcome {
        let event: TenantUpdateEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    error = %e,
                    body = %String::from_utf8_lossy(body),
                    "Dropping unparsable tenant update event"
                );
                return dropped();
            }
        };

        match self.apply(&event).await {
            Ok(outcome) => {
                if outcome == HandleOutcome::Dropped {
                    metrics::counter!("events.dropped_total").increment(1);
                }
                outcome
            }
            Err(e) => {
                error!(
                    tenant_id = ?event.tenant_id,
                    action = ?event.action,
                    error = %e,
                    "Failed to apply tenant update event"
                );
                dropped()
            }
        }
    }

    async fn apply(&self, event: &TenantUpdateEvent) -> Result<HandleOutcome> {
        let Some(tenant_id) = non_empty(&event.tenant_id) else {
            error!(action = ?event.action, "Dropping tenant update event without tenantId");
            return Ok(HandleOutcome::Dropped);
        };
        let action = non_empty(&event.action).unwrap_or_default();

        match action {
            ACTION_SUBSCRIPTION_CREATED | ACTION_PLAN_SWITCHED => {
                let Some(plan_id) = non_empty(&event.plan_id) else {
                    error!(tenant_id, action, "Dropping billing event without planId");
                    return Ok(HandleOutcome::Dropped);
                };
                let updated = match non_empty(&event.subscription_id) {
                    Some(subscription_id) => {
                        self.provisioning
                            .update_tenant_subscription(tenant_id, subscription_id, plan_id)
                            .await?
                    }
                    None => self.provisioning.update_tenant_plan(tenant_id, plan_id).await?,
                };
                if !updated {
                    error!(tenant_id, action, "Dropping billing event for unknown tenant");
                    return Ok(HandleOutcome::Dropped);
                }
                info!(tenant_id, action, plan_id, "Applied billing event");
                Ok(HandleOutcome::Applied)
            }
            ACTION_LOGO_UPDATED => {
                let Some(logo_url) = non_empty(&event.logo_url) else {
                    error!(tenant_id, "Dropping logo event without logoUrl");
                    return Ok(HandleOutcome::Dropped);
                };
                if !self.settings.update_tenant_logo(tenant_id, logo_url).await? {
                    error!(tenant_id, "Dropping logo event for tenant without settings");
                    return Ok(HandleOutcome::Dropped);
                }
                info!(tenant_id, "Applied logo update");
                Ok(HandleOutcome::Applied)
            }
            other => {
                warn!(tenant_id, action = other, "Ignoring tenant update event with unknown action");
                Ok(HandleOutcome::Ignored)
            }
        }
    }

    /// Poll `consumer` until `shutdown` fires. Every polled message is
    /// acknowledged after handling. The consumer is stopped on exit.
    pub async fn run(
        &self,
        consumer: Arc<dyn QueueConsumer>,
        mut shutdown: broadcast::Receiver<()>,
        batch_size: u32,
        idle_interval: Duration,
    ) {
        info!(consumer = %consumer.identifier(), "Tenant update bridge started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(consumer = %consumer.identifier(), "Tenant update bridge shutting down");
                    break;
                }
                result = consumer.poll(batch_size) => {
                    match result {
                        Ok(messages) if !messages.is_empty() => {
                            for message in messages {
                                let outcome = self.handle_message(&message.body).await;
                                debug!(
                                    message_id = ?message.broker_message_id,
                                    outcome = ?outcome,
                                    "Handled tenant update event"
                                );
                                if let Err(e) = consumer.ack(&message.receipt_handle).await {
                                    warn!(error = %e, consumer = %consumer.identifier(), "Failed to ack message");
                                }
                            }
                        }
                        Ok(_) => {
                            tokio::time::sleep(idle_interval).await;
                        }
                        Err(e) => {
                            error!(error = %e, consumer = %consumer.identifier(), "Error polling");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        consumer.stop().await;
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn dropped() -> HandleOutcome {
    metrics::counter!("events.dropped_total").increment(1);
    HandleOutcome::Dropped
}
