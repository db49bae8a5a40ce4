use anyhow::Result;
use clap::Parser;
use tf_fanout::cli::cli::Cli;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    };

    // Logs go to stderr
    let default_level = if config.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!(version = tf_fanout::cli::VERSION, "starting tf-fanout");

    // Execute command with user-friendly error handling
    if let Err(e) = cli.execute(config).await {
        // Log the full error for debugging
        debug!("fan-out failed: {:?}", e);

        // Display user-friendly error message
        eprintln!("Error: {}", e.user_message());

        // Exit with error code
        std::process::exit(1);
    }

    info!("all workspaces succeeded");
    Ok(())
}
