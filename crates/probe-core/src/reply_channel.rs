//! Reply queue lifecycle.
//!
//! A [`ReplyChannelManager`] owns the exclusive, auto-deleting queue that
//! replies are sent to, together with the consumer stream reading it. Nothing
//! else declares against or reads from that queue.

use probe_transport::{
    Delivery, DeliveryStream, QueueHandle, QueueName, QueueTransport, TransportError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// How reply queues are allocated across calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyMode {
    /// One reply queue serves every call of the run
    #[default]
    Shared,
    /// A fresh reply queue for every call
    PerRequest,
}

/// The declared reply queue and its consumer
struct ActiveReplyQueue {
    handle: QueueHandle,
    stream: DeliveryStream,
}

/// Owns the reply destination(s) for a caller
pub struct ReplyChannelManager {
    transport: Arc<dyn QueueTransport>,
    mode: ReplyMode,
    active: Option<ActiveReplyQueue>,
    declared: usize,
}

impl ReplyChannelManager {
    /// Create a manager; no queue is declared until first use
    pub fn new(transport: Arc<dyn QueueTransport>, mode: ReplyMode) -> Self {
        Self {
            transport,
            mode,
            active: None,
            declared: 0,
        }
    }

    pub fn mode(&self) -> ReplyMode {
        self.mode
    }

    /// Number of reply queues declared so far
    pub fn declared_count(&self) -> usize {
        self.declared
    }

    /// The reply destination for the next call, declared on first use
    pub async fn current_destination(&mut self) -> Result<QueueName, TransportError> {
        let active = self.ensure_active().await?;
        Ok(active.handle.name().clone())
    }

    /// Move to the destination for the next call
    ///
    /// In per-request mode the current queue and its stream are replaced by
    /// a new pair; dropping the old consumer lets the broker delete the old
    /// queue. In shared mode this returns the current destination unchanged.
    pub async fn rotate(&mut self) -> Result<QueueName, TransportError> {
        match self.mode {
            ReplyMode::Shared => self.current_destination().await,
            ReplyMode::PerRequest => {
                let next = self.declare().await?;
                let name = next.handle.name().clone();

                if let Some(previous) = self.active.replace(next) {
                    debug!(
                        previous = %previous.handle.name(),
                        next = %name,
                        "Abandoned reply queue"
                    );
                }
                Ok(name)
            }
        }
    }

    /// Wait for the next delivery on the current reply queue
    ///
    /// Fails with [`TransportError::ChannelClosed`] once the stream has ended.
    pub async fn next_delivery(&mut self) -> Result<Delivery, TransportError> {
        let active = self.ensure_active().await?;
        active
            .stream
            .next()
            .await
            .ok_or_else(|| TransportError::ChannelClosed {
                queue_name: active.handle.name().to_string(),
            })
    }

    async fn ensure_active(&mut self) -> Result<&mut ActiveReplyQueue, TransportError> {
        let active = match self.active.take() {
            Some(active) => active,
            None => self.declare().await?,
        };
        Ok(self.active.insert(active))
    }

    async fn declare(&mut self) -> Result<ActiveReplyQueue, TransportError> {
        let handle = self.transport.declare_ephemeral_queue().await?;
        let stream = self.transport.consume(&handle).await?;
        self.declared += 1;

        if self.declared == 1 || self.mode == ReplyMode::Shared {
            info!(queue = %handle.name(), mode = ?self.mode, "Declared reply queue");
        } else {
            debug!(queue = %handle.name(), mode = ?self.mode, "Declared reply queue");
        }

        Ok(ActiveReplyQueue { handle, stream })
    }
}

impl std::fmt::Debug for ReplyChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyChannelManager")
            .field("mode", &self.mode)
            .field("active", &self.active.as_ref().map(|a| a.handle.name()))
            .field("declared", &self.declared)
            .finish()
    }
}

#[cfg(test)]
#[path = "reply_channel_tests.rs"]
mod tests;
