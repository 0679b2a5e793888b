//! Message bus integration: outbound provisioning events and the inbound
//! billing bridge

pub mod bridge;
pub mod publisher;

pub use bridge::{EventBridge, HandleOutcome, TenantUpdateEvent};
pub use publisher::ProvisioningEvents;
