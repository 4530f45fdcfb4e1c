//! SPM Edge - document processing pipeline for sales performance management.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spmedge::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "spmedge=info"
    } else {
        "spmedge=warn"
    };

    // Append to logs/spmedge.log under the data root when it is writable
    let log_dir = spmedge::config::Settings::default().data_dir.join("logs");
    let file_layer = std::fs::create_dir_all(&log_dir)
        .ok()
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join("spmedge.log"))
                .ok()
        })
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
        });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    // Run CLI
    cli::run().await
}
