//! # Probe Transport
//!
//! Queue transport seam used by Queue-Probe.
//!
//! The request/reply core never talks to a broker directly. It sees a
//! transport through the [`QueueTransport`] trait, which offers exactly three
//! operations: declare a queue (named or ephemeral), publish a message, and
//! consume a queue as a stream of deliveries.
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for transport operations
//! - [`message`] - Queue names, outbound messages and inbound deliveries
//! - [`transport`] - The transport trait, delivery streams and the factory
//! - [`providers`] - Concrete transports (in-memory broker)

// Module declarations
pub mod error;
pub mod message;
pub mod providers;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use error::{TransportError, ValidationError};
pub use message::{Delivery, Message, MessageId, QueueHandle, QueueName, QueueProperties};
pub use providers::InMemoryTransport;
pub use transport::{DeliveryStream, QueueTransport, TransportFactory, TransportType};
