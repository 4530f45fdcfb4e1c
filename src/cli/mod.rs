//! CLI commands implementation.
//!
//! One entry per pipeline stage plus batch management and RAG operations.
//! Exit codes: 0 on success (including partial batches), 1 on configuration
//! errors, 2 when every document in a batch failed.

mod batch;
mod rag_cmd;
mod stages;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::models::PipelineStage;
use crate::pipeline::{PipelineError, StageContext, StageOutcome};
use crate::repository::StateStore;

#[derive(Parser)]
#[command(name = "spmedge")]
#[command(about = "SPM Edge document processing pipeline")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Manage document batches (INPUT stage and pipeline management)
    Batch {
        #[command(subcommand)]
        command: batch::BatchCommands,
    },

    /// Run the LOAD stage: extract content and prepare RAG records
    Loader {
        /// Max documents to process (overrides the batch.size setting)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Artifact output format
        #[arg(long, default_value = "json")]
        format: String,
        /// Retry documents whose LOAD previously failed
        #[arg(long)]
        retry: bool,
    },

    /// Run the CLEAN stage: section-aware rule-driven cleaning
    Cleaner {
        /// Max documents to process (overrides the batch.size setting)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Request AI-guided cleaning (still gated by settings)
        #[arg(long)]
        use_ai: bool,
    },

    /// Run the PROCESS stage: structured LLM extraction
    Processor {
        /// Max documents to process
        #[arg(short, long)]
        limit: Option<usize>,
        /// Model override
        #[arg(short, long)]
        model: Option<String>,
        /// Documents per API sub-batch
        #[arg(short, long, default_value = "2")]
        batch_size: usize,
    },

    /// RAG indexing and retrieval operations
    Rag {
        #[command(subcommand)]
        command: rag_cmd::RagCommands,
    },
}

/// Shared context for command handlers.
pub(crate) struct App {
    pub settings: Settings,
    pub store: StateStore,
}

impl App {
    fn new(config: Option<PathBuf>, data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = Settings::load(config.as_deref())?.with_data_dir(data_dir);
        let store = StateStore::new(settings.database_path());
        Ok(Self { settings, store })
    }

    pub fn stage_context(&self, stage: PipelineStage) -> anyhow::Result<StageContext> {
        Ok(StageContext::new(
            stage,
            &self.settings.data_dir,
            self.store.clone(),
        )?)
    }
}

/// Exit code policy for a finished stage run.
pub(crate) fn exit_for_outcome(outcome: &StageOutcome) -> ! {
    if outcome.all_failed() {
        std::process::exit(2);
    }
    std::process::exit(0);
}

/// Exit code policy for stage errors: configuration problems are exit 1.
pub(crate) fn exit_for_error(error: &PipelineError) -> ! {
    eprintln!("Error: {error}");
    match error {
        PipelineError::Config(_) => std::process::exit(1),
        _ => std::process::exit(2),
    }
}

/// Parse and dispatch the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app = App::new(cli.config, cli.data_dir)?;

    match cli.command {
        Commands::Init => {
            app.store.init()?;
            // Creating any stage context materializes the directory tree
            app.stage_context(PipelineStage::Input)?;
            println!(
                "Initialized SPM Edge data directory at {}",
                app.settings.data_dir.display()
            );
            Ok(())
        }
        Commands::Batch { command } => batch::run(&app, command).await,
        Commands::Loader {
            limit,
            format,
            retry,
        } => stages::run_loader(&app, limit, &format, retry),
        Commands::Cleaner { limit, use_ai } => stages::run_cleaner(&app, limit, use_ai).await,
        Commands::Processor {
            limit,
            model,
            batch_size,
        } => stages::run_processor(&app, limit, model, batch_size).await,
        Commands::Rag { command } => rag_cmd::run(&app, command).await,
    }
}
