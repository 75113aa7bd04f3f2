//! Common test utilities for probe integration tests
//!
//! This module provides:
//! - `EchoTransport`, which answers every request itself as it is published,
//!   optionally preceded by decoy replies carrying foreign tokens
//! - `FailingTransport`, whose publishes always fail
//! - Small fixtures shared by the test files

use async_trait::async_trait;
use bytes::Bytes;
use probe_transport::{
    DeliveryStream, InMemoryTransport, Message, QueueHandle, QueueName, QueueTransport,
    TransportError, TransportType,
};
use std::sync::{Arc, Mutex};

#[allow(dead_code)]
pub const HEALTHY: &[u8] = br#"{"healthy": true}"#;

#[allow(dead_code)]
pub fn request_queue() -> QueueName {
    QueueName::new("mstest".to_string()).unwrap()
}

// ============================================================================
// Echo Transport
// ============================================================================

/// In-memory broker that answers requests on publish
///
/// A message published to the request queue is not queued. Instead the
/// configured decoys and then the reply (carrying the request's token) are
/// delivered straight to the request's `reply_to`.
#[allow(dead_code)]
pub struct EchoTransport {
    inner: InMemoryTransport,
    request_queue: QueueName,
    reply_body: Mutex<Bytes>,
    decoys: Mutex<usize>,
    silent: Mutex<bool>,
    requests: Mutex<Vec<Message>>,
}

#[allow(dead_code)]
impl EchoTransport {
    pub fn new(reply_body: &'static [u8]) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryTransport::new(),
            request_queue: request_queue(),
            reply_body: Mutex::new(Bytes::from_static(reply_body)),
            decoys: Mutex::new(0),
            silent: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Deliver `count` uncorrelated replies ahead of each real one
    pub fn set_decoys(&self, count: usize) {
        *self.decoys.lock().unwrap() = count;
    }

    pub fn set_reply_body(&self, body: &'static [u8]) {
        *self.reply_body.lock().unwrap() = Bytes::from_static(body);
    }

    /// Stop answering requests (they are still recorded)
    pub fn set_silent(&self, silent: bool) {
        *self.silent.lock().unwrap() = silent;
    }

    /// Every request published so far
    pub fn requests(&self) -> Vec<Message> {
        self.requests.lock().unwrap().clone()
    }

    pub fn broker(&self) -> &InMemoryTransport {
        &self.inner
    }
}

#[async_trait]
impl QueueTransport for EchoTransport {
    async fn declare_queue(&self, name: &QueueName) -> Result<QueueHandle, TransportError> {
        self.inner.declare_queue(name).await
    }

    async fn declare_ephemeral_queue(&self) -> Result<QueueHandle, TransportError> {
        self.inner.declare_ephemeral_queue().await
    }

    async fn publish(
        &self,
        destination: &QueueName,
        message: Message,
    ) -> Result<(), TransportError> {
        if destination != &self.request_queue {
            return self.inner.publish(destination, message).await;
        }

        self.requests.lock().unwrap().push(message.clone());
        if *self.silent.lock().unwrap() {
            return Ok(());
        }

        let reply_to = message.reply_to.clone().expect("request without reply_to");
        let decoys = *self.decoys.lock().unwrap();
        for n in 0..decoys {
            let decoy = Message::new(Bytes::from_static(HEALTHY))
                .with_correlation_id(format!("decoy-{}", n));
            self.inner.publish(&reply_to, decoy).await?;
        }

        let body = self.reply_body.lock().unwrap().clone();
        let mut reply = Message::new(body);
        if let Some(token) = message.correlation_id {
            reply = reply.with_correlation_id(token);
        }
        self.inner.publish(&reply_to, reply).await
    }

    async fn consume(&self, queue: &QueueHandle) -> Result<DeliveryStream, TransportError> {
        self.inner.consume(queue).await
    }

    fn transport_type(&self) -> TransportType {
        TransportType::InMemory
    }
}

// ============================================================================
// Failing Transport
// ============================================================================

/// Broker whose queues can be declared and consumed but never published to
#[allow(dead_code)]
pub struct FailingTransport {
    inner: InMemoryTransport,
}

#[allow(dead_code)]
impl FailingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryTransport::new(),
        })
    }
}

#[async_trait]
impl QueueTransport for FailingTransport {
    async fn declare_queue(&self, name: &QueueName) -> Result<QueueHandle, TransportError> {
        self.inner.declare_queue(name).await
    }

    async fn declare_ephemeral_queue(&self) -> Result<QueueHandle, TransportError> {
        self.inner.declare_ephemeral_queue().await
    }

    async fn publish(
        &self,
        _destination: &QueueName,
        _message: Message,
    ) -> Result<(), TransportError> {
        Err(TransportError::ConnectionFailed {
            message: "broker unreachable".to_string(),
        })
    }

    async fn consume(&self, queue: &QueueHandle) -> Result<DeliveryStream, TransportError> {
        self.inner.consume(queue).await
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Amqp
    }
}
