//! Single-in-flight request/reply correlation.
//!
//! [`Correlator::call`] publishes one request and scans the reply stream until
//! the reply carrying the request's token shows up. Replies with any other
//! token are dropped on the floor: they are never buffered for a later call
//! and never treated as errors.

use crate::decoder::{ResultDecoder, StatusRecord};
use crate::error::RpcError;
use crate::reply_channel::{ReplyChannelManager, ReplyMode};
use crate::token::{CorrelationToken, TokenGenerator, UuidTokenGenerator};
use bytes::Bytes;
use probe_transport::{Delivery, Message, QueueName, QueueTransport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Content type stamped on outgoing requests
pub(crate) const REQUEST_CONTENT_TYPE: &str = "text/plain";

/// Result of a successful call
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub token: CorrelationToken,
    pub status: StatusRecord,
    /// Time from just before publish to observing the matching reply
    pub elapsed: Duration,
    /// Uncorrelated replies skipped while waiting
    pub discarded: usize,
}

/// Issues calls one at a time over a request queue
pub struct Correlator {
    transport: Arc<dyn QueueTransport>,
    replies: ReplyChannelManager,
    tokens: Box<dyn TokenGenerator>,
    decoder: ResultDecoder,
    request_queue: QueueName,
    reply_timeout: Option<Duration>,
}

impl Correlator {
    /// Create a correlator publishing to `request_queue`
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        request_queue: QueueName,
        reply_mode: ReplyMode,
    ) -> Self {
        let replies = ReplyChannelManager::new(Arc::clone(&transport), reply_mode);
        Self {
            transport,
            replies,
            tokens: Box::new(UuidTokenGenerator),
            decoder: ResultDecoder::new(),
            request_queue,
            reply_timeout: None,
        }
    }

    /// Replace the token generator
    pub fn with_token_generator<G>(mut self, generator: G) -> Self
    where
        G: TokenGenerator + 'static,
    {
        self.tokens = Box::new(generator);
        self
    }

    /// Bound how long a call waits for its reply; `None` waits forever
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn reply_channel(&self) -> &ReplyChannelManager {
        &self.replies
    }

    pub fn request_queue(&self) -> &QueueName {
        &self.request_queue
    }

    /// Publish a request and wait for its reply
    ///
    /// In per-request reply mode the reply queue is rotated after every call
    /// that did not fail at the transport level, so a late reply to a timed
    /// out call can never reach the next call's queue.
    pub async fn call(&mut self, body: Bytes) -> Result<CallOutcome, RpcError> {
        let result = self.exchange(body).await;

        if !matches!(result, Err(RpcError::Transport(_))) {
            self.replies.rotate().await?;
        }

        result
    }

    async fn exchange(&mut self, body: Bytes) -> Result<CallOutcome, RpcError> {
        let reply_to = self.replies.current_destination().await?;
        let token = self.tokens.new_token();

        let message = Message::new(body)
            .with_correlation_id(token.to_string())
            .with_reply_to(reply_to.clone())
            .with_content_type(REQUEST_CONTENT_TYPE.to_string());

        let dispatched_at = Instant::now();
        self.transport.publish(&self.request_queue, message).await?;
        debug!(
            token = %token,
            queue = %self.request_queue,
            reply_to = %reply_to,
            "Published request"
        );

        let scan = await_reply(&mut self.replies, &token);
        let (delivery, discarded) = match self.reply_timeout {
            Some(limit) => tokio::time::timeout(limit, scan)
                .await
                .map_err(|_| RpcError::Timeout {
                    token: token.clone(),
                    waited: limit,
                })??,
            None => scan.await?,
        };
        let elapsed = dispatched_at.elapsed();

        let status = self.decoder.decode_with_latency(&delivery.body, elapsed)?;

        Ok(CallOutcome {
            token,
            status,
            elapsed,
            discarded,
        })
    }
}

/// Read the reply stream until the delivery for `token` arrives
async fn await_reply(
    replies: &mut ReplyChannelManager,
    token: &CorrelationToken,
) -> Result<(Delivery, usize), TransportError> {
    let mut discarded = 0;
    loop {
        let delivery = replies.next_delivery().await?;
        if delivery.is_correlated_with(token.as_str()) {
            return Ok((delivery, discarded));
        }

        discarded += 1;
        trace!(
            expected = %token,
            received = ?delivery.correlation_id,
            "Discarding uncorrelated reply"
        );
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("request_queue", &self.request_queue)
            .field("replies", &self.replies)
            .field("reply_timeout", &self.reply_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "correlator_tests.rs"]
mod tests;
