//! Health-check worker.
//!
//! Consumes the request queue and answers each request on its `reply_to`
//! queue with a [`StatusRecord`], echoing the request's correlation id. The
//! record carries one leg, `worker`, with the time spent handling the request.

use crate::decoder::StatusRecord;
use crate::latency::as_millis_f64;
use bytes::Bytes;
use probe_transport::{
    Delivery, DeliveryStream, Message, QueueName, QueueTransport, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Leg name for the worker's own processing time
pub const WORKER_LEG: &str = "worker";

/// Answers health-check requests from a request queue
pub struct HealthResponder {
    transport: Arc<dyn QueueTransport>,
    request_queue: QueueName,
    worker_id: String,
    healthy: bool,
    processing_delay: Duration,
}

impl HealthResponder {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        request_queue: QueueName,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            request_queue,
            worker_id: worker_id.into(),
            healthy: true,
            processing_delay: Duration::ZERO,
        }
    }

    /// Set the health flag reported in every reply
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Simulate work before answering
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    /// Declare and consume the request queue, then serve in the background
    ///
    /// The returned task finishes when the request stream ends and yields the
    /// number of requests answered.
    pub async fn start(self) -> Result<JoinHandle<u64>, TransportError> {
        let handle = self.transport.declare_queue(&self.request_queue).await?;
        let stream = self.transport.consume(&handle).await?;

        info!(
            queue = %self.request_queue,
            worker_id = %self.worker_id,
            "Health responder listening"
        );
        Ok(tokio::spawn(self.serve(stream)))
    }

    async fn serve(self, mut stream: DeliveryStream) -> u64 {
        let mut answered = 0;
        while let Some(request) = stream.next().await {
            match self.respond(request).await {
                Ok(true) => answered += 1,
                Ok(false) => {}
                Err(TransportError::QueueNotFound { queue_name }) => {
                    // The caller already abandoned its reply queue
                    warn!(reply_to = %queue_name, "Reply queue no longer exists; reply dropped");
                }
                Err(e) => {
                    error!(error = %e, "Health responder stopping");
                    break;
                }
            }
        }

        info!(answered = answered, "Health responder finished");
        answered
    }

    /// Answer one request; `Ok(false)` when there was nobody to answer
    async fn respond(&self, request: Delivery) -> Result<bool, TransportError> {
        let started = Instant::now();

        let Some(reply_to) = request.reply_to else {
            warn!(message_id = %request.message_id, "Request without reply_to; dropped");
            return Ok(false);
        };

        if !self.processing_delay.is_zero() {
            tokio::time::sleep(self.processing_delay).await;
        }

        let record = StatusRecord::new(self.worker_id.clone(), self.healthy)
            .with_leg_ms(WORKER_LEG, as_millis_f64(started.elapsed()));
        let body = match serde_json::to_vec(&record) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!(error = %e, "Failed to encode status record");
                return Ok(false);
            }
        };

        let mut reply = Message::new(body).with_content_type("application/json".to_string());
        if let Some(correlation_id) = request.correlation_id {
            reply = reply.with_correlation_id(correlation_id);
        }

        self.transport.publish(&reply_to, reply).await?;
        debug!(reply_to = %reply_to, "Answered health check");
        Ok(true)
    }
}

#[cfg(test)]
#[path = "responder_tests.rs"]
mod tests;
