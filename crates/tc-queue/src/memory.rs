//! In-process queue for development and tests.
//!
//! A single `MemoryQueue` acts as both publisher and consumer. Published
//! messages are appended to a FIFO; polled messages stay in flight until
//! acked.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tc_common::{OutboundMessage, QueuedMessage};
use tracing::debug;

use crate::{QueueConsumer, QueueError, QueuePublisher, Result};

#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    routing_key: String,
    body: Vec<u8>,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, Entry>,
    acked: Vec<Entry>,
}

pub struct MemoryQueue {
    name: String,
    state: Mutex<State>,
    running: AtomicBool,
    receipt_counter: AtomicU64,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            running: AtomicBool::new(true),
            receipt_counter: AtomicU64::new(0),
        }
    }

    /// Enqueue a raw body, as an external producer would.
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        let entry = Entry {
            message_id: uuid::Uuid::new_v4().to_string(),
            routing_key: String::new(),
            body: body.into(),
        };
        self.state.lock().ready.push_back(entry);
    }

    /// Messages waiting to be polled.
    pub fn pending(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Messages polled but not yet acked.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Number of messages acknowledged so far.
    pub fn acked_count(&self) -> usize {
        self.state.lock().acked.len()
    }

    /// Snapshot of every message published under `routing_key`, decoded as
    /// JSON. Includes ready, in-flight and acked messages.
    pub fn published(&self, routing_key: &str) -> Vec<serde_json::Value> {
        let state = self.state.lock();
        state
            .acked
            .iter()
            .chain(state.in_flight.values())
            .chain(state.ready.iter())
            .filter(|e| e.routing_key == routing_key)
            .filter_map(|e| serde_json::from_slice(&e.body).ok())
            .collect()
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn poll(&self, max_messages: u32) -> Result<Vec<QueuedMessage>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }

        let mut state = self.state.lock();
        let mut messages = Vec::new();
        while messages.len() < max_messages as usize {
            let Some(entry) = state.ready.pop_front() else {
                break;
            };
            let receipt_handle = format!(
                "{}:{}",
                self.name,
                self.receipt_counter.fetch_add(1, Ordering::SeqCst)
            );
            messages.push(QueuedMessage {
                body: entry.body.clone(),
                receipt_handle: receipt_handle.clone(),
                broker_message_id: Some(entry.message_id.clone()),
                queue_identifier: self.name.clone(),
            });
            state.in_flight.insert(receipt_handle, entry);
        }
        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::NotFound(receipt_handle.to_string()))?;
        state.acked.push(entry);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueuePublisher for MemoryQueue {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: OutboundMessage) -> Result<String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }
        let body = message.body()?;
        debug!(message_id = %message.id, routing_key = %message.routing_key, "Message published to memory queue");
        self.state.lock().ready.push_back(Entry {
            message_id: message.id.clone(),
            routing_key: message.routing_key,
            body,
        });
        Ok(message.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_poll_ack() {
        let queue = MemoryQueue::new("q");
        queue
            .publish(OutboundMessage::new("user.created", json!({"tenantId": "T1"})))
            .await
            .unwrap();

        let polled = queue.poll(10).await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(queue.in_flight(), 1);

        queue.ack(&polled[0].receipt_handle).await.unwrap();
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.acked_count(), 1);
        assert_eq!(queue.published("user.created")[0]["tenantId"], "T1");
    }

    #[tokio::test]
    async fn test_stopped_queue_rejects_poll() {
        let queue = MemoryQueue::new("q");
        queue.stop().await;
        assert!(!queue.is_healthy());
        assert!(matches!(queue.poll(1).await, Err(QueueError::Stopped)));
    }

    #[tokio::test]
    async fn test_ack_unknown_handle() {
        let queue = MemoryQueue::new("q");
        assert!(matches!(queue.ack("nope").await, Err(QueueError::NotFound(_))));
    }
}
