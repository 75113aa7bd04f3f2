//! Run driver: issues the configured number of calls and reports.

use crate::concurrent::ConcurrentCorrelator;
use crate::correlator::{CallOutcome, Correlator};
use crate::error::RpcError;
use crate::latency::{as_millis_f64, LatencyAggregator, RunSummary};
use crate::reply_channel::ReplyMode;
use bytes::Bytes;
use probe_transport::{QueueName, QueueTransport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What to do when a single call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any failure ends the run
    #[default]
    Abort,
    /// Timeouts and malformed replies are logged, counted and skipped.
    /// Transport failures still end the run.
    Continue,
}

/// Settings for one probe run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub request_queue: QueueName,
    pub reply_mode: ReplyMode,
    pub call_count: u32,
    pub request_body: Bytes,
    /// `None` waits for each reply indefinitely
    pub reply_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    /// Log every call at `info` rather than `debug`
    pub log_per_call: bool,
    /// Calls kept in flight at once; values above one need shared reply mode
    pub concurrency: usize,
}

impl RunConfig {
    /// Defaults: shared reply queue, 50 calls, empty body, no timeout, abort on error
    pub fn new(request_queue: QueueName) -> Self {
        Self {
            request_queue,
            reply_mode: ReplyMode::Shared,
            call_count: 50,
            request_body: Bytes::new(),
            reply_timeout: None,
            failure_policy: FailurePolicy::Abort,
            log_per_call: false,
            concurrency: 1,
        }
    }

    pub fn with_reply_mode(mut self, mode: ReplyMode) -> Self {
        self.reply_mode = mode;
        self
    }

    pub fn with_call_count(mut self, count: u32) -> Self {
        self.call_count = count;
        self
    }

    pub fn with_request_body(mut self, body: Bytes) -> Self {
        self.request_body = body;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_log_per_call(mut self, enabled: bool) -> Self {
        self.log_per_call = enabled;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Check the settings are usable together
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.call_count == 0 {
            return Err(RpcError::Configuration {
                message: "call_count must be at least 1".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(RpcError::Configuration {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        if self.concurrency > 1 && self.reply_mode == ReplyMode::PerRequest {
            return Err(RpcError::Configuration {
                message: "concurrent calls require the shared reply mode".to_string(),
            });
        }
        if self.reply_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(RpcError::Configuration {
                message: "reply_timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// One completed call
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub index: u32,
    pub token: String,
    pub worker_id: String,
    pub healthy: bool,
    pub elapsed_ms: f64,
    pub discarded: usize,
}

impl CallRecord {
    fn from_outcome(index: u32, outcome: &CallOutcome) -> Self {
        Self {
            index,
            token: outcome.token.to_string(),
            worker_id: outcome.status.worker_id.clone(),
            healthy: outcome.status.healthy,
            elapsed_ms: as_millis_f64(outcome.elapsed),
            discarded: outcome.discarded,
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Wall-clock time of the whole run, reply queue setup included
    pub wall_clock_ms: f64,
    /// Completed calls in call order
    pub calls: Vec<CallRecord>,
}

/// Drives a probe run against a transport
pub struct RpcDriver {
    transport: Arc<dyn QueueTransport>,
    config: RunConfig,
}

impl RpcDriver {
    /// Create a driver; the configuration is validated up front
    pub fn new(transport: Arc<dyn QueueTransport>, config: RunConfig) -> Result<Self, RpcError> {
        config.validate()?;
        Ok(Self { transport, config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Issue every configured call and summarise the results
    pub async fn run(&self) -> Result<RunReport, RpcError> {
        info!(
            queue = %self.config.request_queue,
            calls = self.config.call_count,
            reply_mode = ?self.config.reply_mode,
            concurrency = self.config.concurrency,
            "Starting probe run"
        );
        let started = Instant::now();

        self.transport
            .declare_queue(&self.config.request_queue)
            .await?;

        let mut aggregator = LatencyAggregator::new();
        let calls = if self.config.concurrency > 1 {
            self.run_concurrent(&mut aggregator).await?
        } else {
            self.run_sequential(&mut aggregator).await?
        };

        let report = RunReport {
            summary: aggregator.summary(),
            wall_clock_ms: as_millis_f64(started.elapsed()),
            calls,
        };

        let attempted = report.summary.calls_completed + report.summary.calls_failed;
        info!(
            completed = report.summary.calls_completed,
            failed = report.summary.calls_failed,
            mean_ms = report.summary.mean_elapsed_ms,
            "Processed {} messages in {:.2}ms ({:.2}ms/msg)",
            attempted,
            report.wall_clock_ms,
            report.wall_clock_ms / attempted.max(1) as f64
        );
        Ok(report)
    }

    async fn run_sequential(
        &self,
        aggregator: &mut LatencyAggregator,
    ) -> Result<Vec<CallRecord>, RpcError> {
        let mut correlator = Correlator::new(
            Arc::clone(&self.transport),
            self.config.request_queue.clone(),
            self.config.reply_mode,
        )
        .with_reply_timeout(self.config.reply_timeout);

        let mut calls = Vec::new();
        for index in 1..=self.config.call_count {
            let result = correlator.call(self.config.request_body.clone()).await;
            match settle(index, result, self.config.failure_policy, self.config.log_per_call)? {
                Some(outcome) => {
                    aggregator.record_call(outcome.elapsed);
                    calls.push(CallRecord::from_outcome(index, &outcome));
                }
                None => aggregator.record_failure(),
            }
        }
        Ok(calls)
    }

    async fn run_concurrent(
        &self,
        aggregator: &mut LatencyAggregator,
    ) -> Result<Vec<CallRecord>, RpcError> {
        let correlator = Arc::new(
            ConcurrentCorrelator::start(
                Arc::clone(&self.transport),
                self.config.request_queue.clone(),
            )
            .await?,
        );
        let next_index = Arc::new(AtomicU32::new(1));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.concurrency {
            let correlator = Arc::clone(&correlator);
            let next_index = Arc::clone(&next_index);
            let config = self.config.clone();

            workers.spawn(async move {
                let mut settled = Vec::new();
                loop {
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index > config.call_count {
                        break;
                    }
                    let result = correlator
                        .call(config.request_body.clone(), config.reply_timeout)
                        .await;
                    let outcome =
                        settle(index, result, config.failure_policy, config.log_per_call)?;
                    settled.push((index, outcome));
                }
                Ok::<_, RpcError>(settled)
            });
        }

        let mut settled = Vec::new();
        while let Some(joined) = workers.join_next().await {
            let worker_result = joined.map_err(|e| RpcError::WorkerFailed {
                message: e.to_string(),
            });
            match worker_result.and_then(|result| result) {
                Ok(mut calls) => settled.append(&mut calls),
                Err(e) => {
                    workers.abort_all();
                    return Err(e);
                }
            }
        }

        settled.sort_by_key(|(index, _)| *index);
        let mut calls = Vec::with_capacity(settled.len());
        for (index, outcome) in settled {
            match outcome {
                Some(outcome) => {
                    aggregator.record_call(outcome.elapsed);
                    calls.push(CallRecord::from_outcome(index, &outcome));
                }
                None => aggregator.record_failure(),
            }
        }
        Ok(calls)
    }
}

/// Apply the failure policy to one call's result
///
/// `Ok(Some)` for a completed call, `Ok(None)` for a failure the run skips.
fn settle(
    index: u32,
    result: Result<CallOutcome, RpcError>,
    policy: FailurePolicy,
    log_per_call: bool,
) -> Result<Option<CallOutcome>, RpcError> {
    match result {
        Ok(outcome) => {
            log_call(index, &outcome, log_per_call);
            Ok(Some(outcome))
        }
        Err(e) if e.is_call_scoped() && policy == FailurePolicy::Continue => {
            warn!(call = index, error = %e, "Call failed; continuing");
            Ok(None)
        }
        Err(e) => {
            error!(call = index, error = %e, "Call failed; aborting run");
            Err(e)
        }
    }
}

fn log_call(index: u32, outcome: &CallOutcome, log_per_call: bool) {
    let elapsed_ms = as_millis_f64(outcome.elapsed);
    if log_per_call {
        info!(
            call = index,
            token = %outcome.token,
            worker_id = %outcome.status.worker_id,
            healthy = outcome.status.healthy,
            elapsed_ms = elapsed_ms,
            "Received reply"
        );
    } else {
        debug!(
            call = index,
            token = %outcome.token,
            healthy = outcome.status.healthy,
            elapsed_ms = elapsed_ms,
            "Received reply"
        );
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
