//! Transport trait, delivery streams and transport construction.

use crate::error::TransportError;
use crate::message::{Delivery, Message, QueueHandle, QueueName};
use crate::providers::InMemoryTransport;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Kinds of transport the factory knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    InMemory,
    Amqp,
}

impl TransportType {
    /// Resolve the transport type from a URL scheme
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "memory" => Some(Self::InMemory),
            "amqp" | "amqps" => Some(Self::Amqp),
            _ => None,
        }
    }
}

/// Interface the request/reply core uses to reach a message queue
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Declare a named, non-exclusive queue (idempotent)
    async fn declare_queue(&self, name: &QueueName) -> Result<QueueHandle, TransportError>;

    /// Declare a server-named, exclusive, auto-delete, non-durable queue
    async fn declare_ephemeral_queue(&self) -> Result<QueueHandle, TransportError>;

    /// Publish a message to the named destination
    async fn publish(&self, destination: &QueueName, message: Message)
        -> Result<(), TransportError>;

    /// Start consuming a queue. Deliveries are auto-acknowledged.
    async fn consume(&self, queue: &QueueHandle) -> Result<DeliveryStream, TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;
}

/// Lazy, unbounded sequence of deliveries from a single queue
///
/// The stream yields `None` once the underlying channel closes and cannot be
/// restarted afterwards. Dropping the stream cancels the consumer; transports
/// use the drop hook to release broker-side state (auto-delete queues).
pub struct DeliveryStream {
    queue: QueueName,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl DeliveryStream {
    /// Wrap a channel receiver as the delivery stream for `queue`
    pub fn new(queue: QueueName, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            queue,
            receiver,
            on_drop: None,
        }
    }

    /// Run `hook` when the consumer goes away
    pub fn with_drop_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_drop = Some(Box::new(hook));
        self
    }

    /// Wait for the next delivery; `None` once the channel has closed
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Name of the queue being consumed
    pub fn queue_name(&self) -> &QueueName {
        &self.queue
    }
}

impl std::fmt::Debug for DeliveryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryStream")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

/// Factory for creating transports from a connection URL
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport for the URL's scheme
    pub fn from_url(url: &Url) -> Result<Arc<dyn QueueTransport>, TransportError> {
        match TransportType::from_scheme(url.scheme()) {
            Some(TransportType::InMemory) => Ok(Arc::new(InMemoryTransport::new())),
            Some(TransportType::Amqp) => Err(TransportError::UnsupportedTransport {
                scheme: url.scheme().to_string(),
                message: "no AMQP client is linked into this build; use memory://".to_string(),
            }),
            None => Err(TransportError::UnsupportedTransport {
                scheme: url.scheme().to_string(),
                message: "unknown URL scheme".to_string(),
            }),
        }
    }

    /// Create an in-memory transport for tests
    pub fn create_test_transport() -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport::new())
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
