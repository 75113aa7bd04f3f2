//! # Queue Probe CLI
//!
//! Command-line front end for the request/reply probe.
//!
//! The binary publishes a configurable number of health-check requests to a
//! request queue, waits for each correlated reply and prints a latency
//! summary. Settings are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. Configuration file (`--config` or `QUEUE_PROBE_CONFIG`)
//! 3. Environment variables prefixed `QUEUE_PROBE__`, e.g.
//!    `QUEUE_PROBE__RESPONDER__WORKER_ID=edge-2`
//! 4. Command-line flags
//!
//! A `memory://` URL runs the in-memory broker together with an in-process
//! health responder, which makes the tool self-contained for smoke tests.

use bytes::Bytes;
use clap::Parser;
use probe_core::{
    FailurePolicy, HealthResponder, ReplyMode, RpcDriver, RpcError, RunConfig, RunReport,
};
use probe_transport::{QueueName, TransportError, TransportFactory, TransportType};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "QUEUE_PROBE";

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue probe - request/reply round-trip latency over a message queue
#[derive(Debug, Parser)]
#[command(name = "queue-probe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Measure request/reply round trips over a message queue")]
pub struct Cli {
    /// Configuration file path
    #[arg(long, env = "QUEUE_PROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Broker URL; memory:// runs an in-process broker and responder
    #[arg(short, long)]
    pub url: Option<String>,

    /// Request queue name
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Number of calls to make
    #[arg(short, long)]
    pub count: Option<u32>,

    /// Use a fresh reply queue for every request
    #[arg(long = "qpm")]
    pub queue_per_message: bool,

    /// Log every call rather than only the summary
    #[arg(long = "lpl")]
    pub log_per_line: bool,

    /// Request body sent with every call
    #[arg(short, long)]
    pub body: Option<String>,

    /// Give up on a reply after this many milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u32>,

    /// Skip timed out or malformed replies instead of aborting
    #[arg(long)]
    pub continue_on_error: bool,

    /// Calls kept in flight at once (shared reply queue only)
    #[arg(long)]
    pub concurrency: Option<u32>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Probe run failed: {0}")]
    Run(#[from] RpcError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Failed to render report: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Configuration(_) => 1,
            CliError::Transport(_) => 2,
            CliError::Run(_) => 3,
            CliError::InvalidArgument { .. } => 4,
            CliError::Io(_) => 5,
            CliError::Logging { .. } => 6,
            CliError::Output(_) => 7,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Fully resolved probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub url: String,
    pub queue: String,
    pub count: u32,
    pub reply_mode: ReplyMode,
    pub body: String,
    pub timeout_ms: Option<u64>,
    pub continue_on_error: bool,
    pub log_per_call: bool,
    pub concurrency: u32,
    pub responder: ResponderConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: "memory://localhost".to_string(),
            queue: "mstest".to_string(),
            count: 50,
            reply_mode: ReplyMode::Shared,
            body: String::new(),
            timeout_ms: None,
            continue_on_error: false,
            log_per_call: false,
            concurrency: 1,
            responder: ResponderConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Build the core run settings, checking them on the way
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let queue = QueueName::new(self.queue.clone()).map_err(|e| ConfigError::Invalid {
            message: format!("queue: {}", e),
        })?;

        let failure_policy = if self.continue_on_error {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        };

        let run_config = RunConfig::new(queue)
            .with_call_count(self.count)
            .with_reply_mode(self.reply_mode)
            .with_request_body(Bytes::from(self.body.clone()))
            .with_reply_timeout(self.timeout_ms.map(Duration::from_millis))
            .with_failure_policy(failure_policy)
            .with_log_per_call(self.log_per_call)
            .with_concurrency(self.concurrency as usize);

        run_config.validate().map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;
        Ok(run_config)
    }
}

/// In-process responder used with the in-memory broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub enabled: bool,
    pub worker_id: String,
    pub healthy: bool,
    pub processing_delay_ms: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: "local-worker".to_string(),
            healthy: true,
            processing_delay_ms: 0,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli.log_level, cli.json_logs)?;

    let config = load_configuration(&cli)?;
    let report = run_probe(&config).await?;

    let rendered = render_report(&report, cli.format)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered)?;
    Ok(())
}

/// Initialize logging; `RUST_LOG` takes precedence over `level`
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Resolve settings from defaults, file, process environment and flags
pub fn load_configuration(cli: &Cli) -> Result<ProbeConfig, ConfigError> {
    load_configuration_with_env(cli, None)
}

/// Resolve settings, reading environment overrides from `env` when given
/// instead of the process environment
pub fn load_configuration_with_env(
    cli: &Cli,
    env: Option<config::Map<String, String>>,
) -> Result<ProbeConfig, ConfigError> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&ProbeConfig::default())?);

    if let Some(path) = &cli.config {
        if !path.exists() {
            return Err(ConfigError::FileNotFound { path: path.clone() });
        }
        info!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(env),
    );

    let reply_mode = cli.queue_per_message.then_some("per-request");
    builder = builder
        .set_override_option("url", cli.url.clone())?
        .set_override_option("queue", cli.queue.clone())?
        .set_override_option("count", cli.count.map(i64::from))?
        .set_override_option("reply_mode", reply_mode)?
        .set_override_option("body", cli.body.clone())?
        .set_override_option("timeout_ms", cli.timeout_ms.map(i64::from))?
        .set_override_option("continue_on_error", cli.continue_on_error.then_some(true))?
        .set_override_option("log_per_call", cli.log_per_line.then_some(true))?
        .set_override_option("concurrency", cli.concurrency.map(i64::from))?;

    let config: ProbeConfig = builder.build()?.try_deserialize()?;
    Ok(config)
}

/// Execute a probe run with resolved settings
pub async fn run_probe(config: &ProbeConfig) -> Result<RunReport, CliError> {
    let url = Url::parse(&config.url).map_err(|e| CliError::InvalidArgument {
        arg: "url".to_string(),
        message: e.to_string(),
    })?;
    let run_config = config.run_config()?;
    let transport = TransportFactory::from_url(&url)?;

    let responder = if transport.transport_type() == TransportType::InMemory {
        if config.responder.enabled {
            let task = HealthResponder::new(
                Arc::clone(&transport),
                run_config.request_queue.clone(),
                config.responder.worker_id.clone(),
            )
            .with_health(config.responder.healthy)
            .with_processing_delay(Duration::from_millis(config.responder.processing_delay_ms))
            .start()
            .await?;
            Some(task)
        } else {
            warn!("In-memory broker without a responder; calls will not be answered");
            None
        }
    } else {
        None
    };

    info!(url = %url, queue = %run_config.request_queue, "Probing");
    let driver = RpcDriver::new(transport, run_config)?;
    let result = driver.run().await;

    if let Some(task) = responder {
        task.abort();
    }

    Ok(result?)
}

/// Render a report in the requested format
pub fn render_report(report: &RunReport, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            let summary = &report.summary;
            let attempted = summary.calls_completed + summary.calls_failed;
            let per_call = report.wall_clock_ms / attempted.max(1) as f64;

            let mut lines = vec![format!(
                "Processed {} messages in {:.2}ms ({:.2}ms/msg)",
                attempted, report.wall_clock_ms, per_call
            )];
            lines.push(format!("  completed: {}", summary.calls_completed));
            lines.push(format!("  failed:    {}", summary.calls_failed));
            if summary.calls_completed > 0 {
                lines.push(format!(
                    "  latency:   mean {:.2}ms, min {:.2}ms, max {:.2}ms",
                    summary.mean_elapsed_ms, summary.min_elapsed_ms, summary.max_elapsed_ms
                ));
            }
            let unhealthy = report.calls.iter().filter(|call| !call.healthy).count();
            if unhealthy > 0 {
                lines.push(format!("  unhealthy: {}", unhealthy));
            }
            Ok(lines.join("\n"))
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
