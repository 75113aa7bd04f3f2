//! Many calls in flight over one shared reply queue.
//!
//! Each call registers a single-use completion slot under its token before
//! publishing. One dispatcher task drains the reply stream and hands every
//! delivery to the slot registered for its token; deliveries nobody is
//! waiting for are discarded. Only the slot map is shared, so it is the only
//! thing behind a lock.

use crate::correlator::{CallOutcome, REQUEST_CONTENT_TYPE};
use crate::decoder::ResultDecoder;
use crate::error::RpcError;
use crate::token::{CorrelationToken, TokenGenerator, UuidTokenGenerator};
use bytes::Bytes;
use probe_transport::{
    Delivery, DeliveryStream, Message, QueueName, QueueTransport, TransportError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Completion slots keyed by the token of the call waiting on them
#[derive(Default)]
struct PendingReplies {
    slots: HashMap<CorrelationToken, oneshot::Sender<Delivery>>,
    /// Set once the reply stream has ended; no new slots are accepted
    closed: bool,
}

type SharedPending = Arc<Mutex<PendingReplies>>;

fn lock(pending: &Mutex<PendingReplies>) -> MutexGuard<'_, PendingReplies> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Issues calls concurrently over a single shared reply queue
pub struct ConcurrentCorrelator {
    transport: Arc<dyn QueueTransport>,
    request_queue: QueueName,
    reply_to: QueueName,
    pending: SharedPending,
    tokens: Box<dyn TokenGenerator>,
    decoder: ResultDecoder,
    dispatcher: JoinHandle<()>,
}

impl ConcurrentCorrelator {
    /// Declare the shared reply queue and start the dispatcher
    pub async fn start(
        transport: Arc<dyn QueueTransport>,
        request_queue: QueueName,
    ) -> Result<Self, TransportError> {
        let handle = transport.declare_ephemeral_queue().await?;
        let stream = transport.consume(&handle).await?;
        let pending = SharedPending::default();

        info!(queue = %handle.name(), "Declared shared reply queue for concurrent calls");
        let dispatcher = tokio::spawn(dispatch(stream, Arc::clone(&pending)));

        Ok(Self {
            transport,
            request_queue,
            reply_to: handle.name().clone(),
            pending,
            tokens: Box::new(UuidTokenGenerator),
            decoder: ResultDecoder::new(),
            dispatcher,
        })
    }

    /// Replace the token generator
    pub fn with_token_generator<G>(mut self, generator: G) -> Self
    where
        G: TokenGenerator + 'static,
    {
        self.tokens = Box::new(generator);
        self
    }

    /// The reply queue every call shares
    pub fn reply_destination(&self) -> &QueueName {
        &self.reply_to
    }

    /// Number of calls currently waiting for a reply
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).slots.len()
    }

    /// Publish a request and wait for its reply
    pub async fn call(
        &self,
        body: Bytes,
        timeout: Option<Duration>,
    ) -> Result<CallOutcome, RpcError> {
        let token = self.tokens.new_token();
        let slot = self.register(&token)?;

        let message = Message::new(body)
            .with_correlation_id(token.to_string())
            .with_reply_to(self.reply_to.clone())
            .with_content_type(REQUEST_CONTENT_TYPE.to_string());

        let dispatched_at = Instant::now();
        if let Err(e) = self.transport.publish(&self.request_queue, message).await {
            self.release(&token);
            return Err(e.into());
        }
        debug!(token = %token, queue = %self.request_queue, "Published request");

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, slot).await {
                Ok(received) => received,
                Err(_) => {
                    self.release(&token);
                    return Err(RpcError::Timeout {
                        token,
                        waited: limit,
                    });
                }
            },
            None => slot.await,
        };

        // The slot sender is only dropped without sending when the stream ends
        let delivery = received.map_err(|_| TransportError::ChannelClosed {
            queue_name: self.reply_to.to_string(),
        })?;
        let elapsed = dispatched_at.elapsed();

        let status = self.decoder.decode_with_latency(&delivery.body, elapsed)?;

        Ok(CallOutcome {
            token,
            status,
            elapsed,
            discarded: 0,
        })
    }

    fn register(&self, token: &CorrelationToken) -> Result<oneshot::Receiver<Delivery>, RpcError> {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(TransportError::ChannelClosed {
                queue_name: self.reply_to.to_string(),
            }
            .into());
        }
        if pending.slots.contains_key(token) {
            return Err(RpcError::DuplicateToken {
                token: token.clone(),
            });
        }

        let (sender, receiver) = oneshot::channel();
        pending.slots.insert(token.clone(), sender);
        Ok(receiver)
    }

    fn release(&self, token: &CorrelationToken) {
        lock(&self.pending).slots.remove(token.as_str());
    }
}

impl Drop for ConcurrentCorrelator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Route every delivery on the shared reply stream to its waiting call
async fn dispatch(mut stream: DeliveryStream, pending: SharedPending) {
    while let Some(delivery) = stream.next().await {
        let slot = delivery
            .correlation_id
            .as_deref()
            .and_then(|token| lock(&pending).slots.remove(token));

        match slot {
            // A send error means the caller gave up; the reply is dropped
            Some(slot) => {
                let _ = slot.send(delivery);
            }
            None => trace!(
                received = ?delivery.correlation_id,
                "Discarding reply with no waiting call"
            ),
        }
    }

    let mut pending = lock(&pending);
    pending.closed = true;
    pending.slots.clear();
    debug!(queue = %stream.queue_name(), "Reply stream ended; failing pending calls");
}

#[cfg(test)]
#[path = "concurrent_tests.rs"]
mod tests;
