//! Error types for transport operations.

use thiserror::Error;

/// Errors raised by a queue transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Queue '{queue_name}' is exclusive and already has a consumer")]
    QueueInUse { queue_name: String },

    #[error("Delivery channel for queue '{queue_name}' closed")]
    ChannelClosed { queue_name: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Unsupported transport '{scheme}': {message}")]
    UnsupportedTransport { scheme: String, message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for transport identifiers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
