//! In-memory queue transport for testing and local runs.
//!
//! This module provides an in-process broker that:
//! - Supports named work queues and server-named ephemeral reply queues
//! - Enforces a single consumer per queue (exclusive queues reject a second one)
//! - Deletes auto-delete queues when their consumer stream is dropped
//! - Simulates connection loss via [`InMemoryTransport::close`]
//!
//! Deliveries are auto-acknowledged: a message handed to a consumer is gone
//! from the broker.

use crate::error::TransportError;
use crate::message::{Delivery, Message, QueueHandle, QueueName, QueueProperties};
use crate::transport::{DeliveryStream, QueueTransport, TransportType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Shared broker state for all queues
struct BrokerState {
    queues: HashMap<QueueName, InMemoryQueue>,
    next_delivery_tag: u64,
    closed: bool,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            next_delivery_tag: 1,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

/// Internal state for a single queue
struct InMemoryQueue {
    properties: QueueProperties,
    sender: mpsc::UnboundedSender<Delivery>,
    /// Held here until a consumer attaches
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl InMemoryQueue {
    fn new(properties: QueueProperties) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            properties,
            sender,
            receiver: Some(receiver),
        }
    }

    /// Replace the channel after a consumer of a durable-style queue leaves
    fn reset_consumer(&mut self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.sender = sender;
        self.receiver = Some(receiver);
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport implementation
pub struct InMemoryTransport {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryTransport {
    /// Create a new, empty broker
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new())),
        }
    }

    /// Check whether the broker currently holds the named queue
    pub fn queue_exists(&self, name: &QueueName) -> bool {
        lock(&self.state).queues.contains_key(name)
    }

    /// Number of queues currently declared
    pub fn queue_count(&self) -> usize {
        lock(&self.state).queues.len()
    }

    /// Simulate loss of the connection: every consumer stream ends and all
    /// further operations fail with [`TransportError::ConnectionClosed`]
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.queues.clear();
        info!("In-memory transport closed");
    }

    fn declare(
        &self,
        name: QueueName,
        properties: QueueProperties,
    ) -> Result<QueueHandle, TransportError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;

        let queue = state
            .queues
            .entry(name.clone())
            .or_insert_with(|| InMemoryQueue::new(properties));
        let handle = QueueHandle::new(name, queue.properties);

        debug!(
            queue = %handle.name(),
            exclusive = handle.properties().exclusive,
            "Declared queue"
        );
        Ok(handle)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Release broker-side consumer state once a stream is dropped
fn release_consumer(state: &Weak<Mutex<BrokerState>>, name: &QueueName) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = lock(&state);

    let auto_delete = match state.queues.get_mut(name) {
        Some(queue) if queue.properties.auto_delete => true,
        Some(queue) => {
            queue.reset_consumer();
            false
        }
        None => return,
    };

    if auto_delete {
        state.queues.remove(name);
        debug!(queue = %name, "Auto-deleted queue after consumer left");
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn declare_queue(&self, name: &QueueName) -> Result<QueueHandle, TransportError> {
        self.declare(name.clone(), QueueProperties::shared())
    }

    async fn declare_ephemeral_queue(&self) -> Result<QueueHandle, TransportError> {
        self.declare(QueueName::generated(), QueueProperties::ephemeral())
    }

    async fn publish(
        &self,
        destination: &QueueName,
        message: Message,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;

        let delivery_tag = state.next_delivery_tag;
        state.next_delivery_tag += 1;

        let queue = state
            .queues
            .get(destination)
            .ok_or_else(|| TransportError::QueueNotFound {
                queue_name: destination.to_string(),
            })?;

        queue
            .sender
            .send(Delivery::from_message(message, delivery_tag))
            .map_err(|_| TransportError::ChannelClosed {
                queue_name: destination.to_string(),
            })
    }

    async fn consume(&self, queue: &QueueHandle) -> Result<DeliveryStream, TransportError> {
        let mut state = lock(&self.state);
        state.ensure_open()?;

        let name = queue.name().clone();
        let entry = state
            .queues
            .get_mut(&name)
            .ok_or_else(|| TransportError::QueueNotFound {
                queue_name: name.to_string(),
            })?;

        let receiver = entry
            .receiver
            .take()
            .ok_or_else(|| TransportError::QueueInUse {
                queue_name: name.to_string(),
            })?;

        debug!(queue = %name, "Consumer attached");

        let weak = Arc::downgrade(&self.state);
        let hook_name = name.clone();
        Ok(DeliveryStream::new(name, receiver)
            .with_drop_hook(move || release_consumer(&weak, &hook_name)))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::InMemory
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
