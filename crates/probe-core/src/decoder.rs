//! Status payload decoding.
//!
//! Workers answer a health-check request with a JSON status record:
//!
//! ```json
//! { "worker_id": "worker-1", "healthy": true, "response_ms": { "db": 1.8 } }
//! ```
//!
//! `healthy` is required. `response_ms` holds per-leg latencies reported by
//! the hops the request passed through. The client's own measurement is kept
//! in [`StatusRecord::round_trip_ms`] and mirrored into `response_ms` under
//! [`TRANSPORT_LEG`] unless a hop already reported a leg of that name.

use crate::error::RpcError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Leg name under which the client-measured round trip is recorded
pub const TRANSPORT_LEG: &str = "transport_round_trip";

/// Health status reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub worker_id: String,

    pub healthy: bool,

    /// Per-leg latencies in milliseconds, keyed by leg name
    #[serde(default, deserialize_with = "null_as_empty")]
    pub response_ms: BTreeMap<String, f64>,

    /// Client-measured round trip in milliseconds; never read from a payload
    #[serde(skip)]
    pub round_trip_ms: Option<f64>,
}

/// Workers that never set a leg send `"response_ms": null`
fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, f64>>::deserialize(deserializer)?.unwrap_or_default())
}

impl StatusRecord {
    /// Create a status record with no legs
    pub fn new(worker_id: impl Into<String>, healthy: bool) -> Self {
        Self {
            worker_id: worker_id.into(),
            healthy,
            response_ms: BTreeMap::new(),
            round_trip_ms: None,
        }
    }

    /// Record a leg latency, replacing any previous value for that leg
    pub fn set_leg_ms(&mut self, leg: impl Into<String>, ms: f64) {
        self.response_ms.insert(leg.into(), ms);
    }

    /// Builder form of [`set_leg_ms`](Self::set_leg_ms)
    pub fn with_leg_ms(mut self, leg: impl Into<String>, ms: f64) -> Self {
        self.set_leg_ms(leg, ms);
        self
    }

    /// Get the latency recorded for a leg
    pub fn leg_ms(&self, leg: &str) -> Option<f64> {
        self.response_ms.get(leg).copied()
    }
}

/// Decodes reply bodies into [`StatusRecord`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultDecoder;

impl ResultDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Parse a reply body
    pub fn decode(&self, bytes: &[u8]) -> Result<StatusRecord, RpcError> {
        serde_json::from_slice(bytes).map_err(|source| RpcError::MalformedPayload { source })
    }

    /// Parse a reply body and attach the measured round trip
    pub fn decode_with_latency(
        &self,
        bytes: &[u8],
        elapsed: Duration,
    ) -> Result<StatusRecord, RpcError> {
        let mut record = self.decode(bytes)?;
        let ms = crate::latency::as_millis_f64(elapsed);

        record.round_trip_ms = Some(ms);
        if record.response_ms.contains_key(TRANSPORT_LEG) {
            debug!(
                leg = TRANSPORT_LEG,
                "Reply already carries a transport leg; keeping the reported value"
            );
        } else {
            record.set_leg_ms(TRANSPORT_LEG, ms);
        }

        Ok(record)
    }
}

#[cfg(test)]
#[path = "decoder_tests.rs"]
mod tests;
