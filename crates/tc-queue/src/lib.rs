//! Message bus seams shared by the identity core: a consumer for inbound
//! billing events and a publisher for provisioning events.

use async_trait::async_trait;
use tc_common::{OutboundMessage, QueuedMessage};

pub mod error;
pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use error::QueueError;
pub use memory::MemoryQueue;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Pull side of the bus. Messages stay in flight until acked.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    fn identifier(&self) -> &str;

    /// Up to `max_messages`; an empty batch means nothing is ready.
    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedMessage>>;

    async fn ack(&self, receipt_handle: &str) -> Result<()>;


    /// `false` once stopped; readiness reports this.
    fn is_healthy(&self) -> bool;

    async fn stop(&self);
}

/// Push side of the bus.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    fn identifier(&self) -> &str;

    /// Returns the message id assigned on publish.
    async fn publish(&self, message: OutboundMessage) -> Result<String>;
}
