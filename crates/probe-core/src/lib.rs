//! # Probe Core
//!
//! Request/reply correlation over an asynchronous message queue.
//!
//! A caller publishes a health-check request tagged with a unique
//! [`CorrelationToken`] and the address of a reply queue, then waits on that
//! reply queue for the message carrying the same token. Replies for other
//! tokens are discarded. Every call is timed from just before publish to the
//! moment the matching reply is observed, and the timings are aggregated into
//! a [`RunSummary`].
//!
//! ## Architecture
//!
//! - [`token`] - correlation token generation
//! - [`reply_channel`] - reply queue lifecycle (shared or per-request)
//! - [`correlator`] - the single-in-flight call loop
//! - [`concurrent`] - many calls in flight over one shared reply queue
//! - [`latency`] - per-call timing aggregation
//! - [`decoder`] - status payload decoding and latency injection
//! - [`responder`] - health-check worker answering requests
//! - [`driver`] - runs a configured number of calls and reports
//!
//! The broker itself is reached only through
//! [`probe_transport::QueueTransport`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use probe_core::{HealthResponder, RpcDriver, RunConfig};
//! use probe_transport::{QueueName, QueueTransport, TransportFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport: Arc<dyn QueueTransport> = TransportFactory::create_test_transport();
//! let queue = QueueName::new("mstest".to_string())?;
//!
//! HealthResponder::new(Arc::clone(&transport), queue.clone(), "worker-1")
//!     .start()
//!     .await?;
//!
//! let driver = RpcDriver::new(transport, RunConfig::new(queue).with_call_count(3))?;
//! let report = driver.run().await?;
//! assert_eq!(report.summary.calls_completed, 3);
//! # Ok(())
//! # }
//! ```

pub mod concurrent;
pub mod correlator;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod latency;
pub mod reply_channel;
pub mod responder;
pub mod token;

// Re-export commonly used types
pub use concurrent::ConcurrentCorrelator;
pub use correlator::{CallOutcome, Correlator};
pub use decoder::{ResultDecoder, StatusRecord, TRANSPORT_LEG};
pub use driver::{CallRecord, FailurePolicy, RpcDriver, RunConfig, RunReport};
pub use error::RpcError;
pub use latency::{LatencyAggregator, RunSummary};
pub use reply_channel::{ReplyChannelManager, ReplyMode};
pub use responder::HealthResponder;
pub use token::{CorrelationToken, TokenGenerator, UuidTokenGenerator};

/// Standard result type for probe operations
pub type ProbeResult<T> = Result<T, RpcError>;
