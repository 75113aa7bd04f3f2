use probe_cli::{run_cli, CliError};
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        match e {
            // No subscriber to report through
            CliError::Logging { .. } => eprintln!("Error: {}", e),
            _ => error!("CLI error: {}", e),
        }

        std::process::exit(e.exit_code());
    }
}
