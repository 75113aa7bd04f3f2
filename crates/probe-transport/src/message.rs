//! Message types for transport operations including queue identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
///
/// Broker-generated names such as `amq.gen-JzTY20BRgKO` are valid, so dots
/// and colons are accepted alongside alphanumerics, hyphens and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 255 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-255 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, '-', '_', '.' and ':' allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading or trailing hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Generate a broker-style name for an ephemeral queue
    pub fn generated() -> Self {
        Self(format!("amq.gen-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier assigned to every delivery by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Queues
// ============================================================================

/// Broker-side properties of a declared queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueProperties {
    /// Survives a broker restart
    pub durable: bool,
    /// Only the declaring connection may consume from it
    pub exclusive: bool,
    /// Deleted by the broker once its last consumer goes away
    pub auto_delete: bool,
}

impl QueueProperties {
    /// Plain shared work queue
    pub fn shared() -> Self {
        Self {
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Exclusive, auto-deleting, non-durable reply queue
    pub fn ephemeral() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// A declared queue as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    name: QueueName,
    properties: QueueProperties,
}

impl QueueHandle {
    /// Create a handle for a declared queue
    pub fn new(name: QueueName, properties: QueueProperties) -> Self {
        Self { name, properties }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn properties(&self) -> QueueProperties {
        self.properties
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be published through the transport
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub body: Bytes,
    pub correlation_id: Option<String>,
    pub reply_to: Option<QueueName>,
    pub content_type: Option<String>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Add correlation ID for request/reply matching
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the queue the receiver should answer on
    pub fn with_reply_to(mut self, reply_to: QueueName) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Set content type
    pub fn with_content_type(mut self, content_type: String) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// A message delivered to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub message_id: MessageId,
    pub body: Bytes,
    pub correlation_id: Option<String>,
    pub reply_to: Option<QueueName>,
    pub content_type: Option<String>,
}

impl Delivery {
    /// Build a delivery from a published message
    pub fn from_message(message: Message, delivery_tag: u64) -> Self {
        Self {
            delivery_tag,
            message_id: MessageId::new(),
            body: message.body,
            correlation_id: message.correlation_id,
            reply_to: message.reply_to,
            content_type: message.content_type,
        }
    }

    /// Check whether this delivery carries the given correlation id
    pub fn is_correlated_with(&self, correlation_id: &str) -> bool {
        self.correlation_id.as_deref() == Some(correlation_id)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
