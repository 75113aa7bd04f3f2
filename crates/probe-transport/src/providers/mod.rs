//! Queue transport implementations.
//!
//! This module contains concrete implementations of the `QueueTransport`
//! trait. Broker clients for real deployments live outside this workspace.

pub mod memory;

pub use memory::InMemoryTransport;
