//! `batch` subcommands: INPUT stage and pipeline management.

use std::time::Duration;

use clap::Subcommand;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::models::PipelineStage;
use crate::pipeline::batch_manager::{BatchManager, InputOptions};
use crate::pipeline::cleaner::DocumentCleaner;
use crate::pipeline::loader::{DocumentLoader, OutputFormat};
use crate::pipeline::processor::DocumentProcessor;
use crate::pipeline::PipelineError;
use crate::rag::{IndexKind, RagEngine, RagIndexer};

use super::App;

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Register unprocessed files as a new batch (INPUT stage)
    Process {
        /// Document type for the batch (must exist)
        doc_type: String,
        /// Archive original files after registration
        #[arg(long)]
        archive: bool,
        /// Delete original files after registration
        #[arg(long)]
        delete: bool,
        /// Per-stage document cap stored in pipeline settings
        #[arg(short, long, default_value = "500")]
        batch_size: usize,
    },

    /// Run all pipeline stages in order for a document type
    RunAll {
        /// Document type for the batch (must exist)
        doc_type: String,
        /// Per-stage document cap stored in pipeline settings
        #[arg(short, long, default_value = "500")]
        batch_size: usize,
    },

    /// Reset pipeline stage(s): delete state rows and stage artifacts
    Reset {
        /// Specific stage to reset (omit for all stages)
        #[arg(long)]
        stage: Option<String>,
        /// Restrict the reset to one batch
        #[arg(long)]
        batch: Option<String>,
    },

    /// List active batches and per-stage document counts
    List,

    /// Remove orphaned documents and batches
    Cleanup,

    /// Show detailed status for a batch
    Status {
        /// Batch id to inspect
        batch_id: String,
    },
}

pub async fn run(app: &App, command: BatchCommands) -> anyhow::Result<()> {
    match command {
        BatchCommands::Process {
            doc_type,
            archive,
            delete,
            batch_size,
        } => {
            app.store.put_setting("batch.size", &batch_size.to_string())?;
            run_input(app, &doc_type, archive, delete)
        }
        BatchCommands::RunAll {
            doc_type,
            batch_size,
        } => {
            app.store.put_setting("batch.size", &batch_size.to_string())?;
            run_all(app, &doc_type).await
        }
        BatchCommands::Reset { stage, batch } => reset(app, stage.as_deref(), batch.as_deref()),
        BatchCommands::List => list(app),
        BatchCommands::Cleanup => {
            let (docs, batches) = app.store.cleanup_orphans()?;
            println!("Cleanup completed: {docs} documents and {batches} batches removed");
            Ok(())
        }
        BatchCommands::Status { batch_id } => status(app, &batch_id),
    }
}

fn run_input(app: &App, doc_type: &str, archive: bool, delete: bool) -> anyhow::Result<()> {
    let ctx = app.stage_context(PipelineStage::Input)?;
    let manager = BatchManager::new(ctx);
    match manager.process_batch(doc_type, InputOptions { archive, delete }) {
        Ok(Some(batch_id)) => {
            println!("Created batch: {batch_id}");
            Ok(())
        }
        Ok(None) => {
            println!("No documents to process.");
            Ok(())
        }
        Err(e) => super::exit_for_error(&e),
    }
}

/// Run INPUT, LOAD, CLEAN, PROCESS and INDEX in order.
async fn run_all(app: &App, doc_type: &str) -> anyhow::Result<()> {
    let input_ctx = app.stage_context(PipelineStage::Input)?;
    let manager = BatchManager::new(input_ctx);
    let batch_id = match manager.process_batch(doc_type, InputOptions::default()) {
        Ok(Some(batch_id)) => batch_id,
        Ok(None) => {
            println!("No documents to process; pipeline not started.");
            return Ok(());
        }
        Err(e) => super::exit_for_error(&e),
    };
    println!("Batch {batch_id} registered; running pipeline stages");

    let loader = DocumentLoader::new(app.stage_context(PipelineStage::Load)?);
    let spinner = stage_spinner("load");
    report(
        "load",
        spinner,
        loader.load_documents(None, OutputFormat::Json, false),
    );

    let cleaner = DocumentCleaner::new(app.stage_context(PipelineStage::Clean)?)
        .with_llm(crate::llm::LlmClient::new(app.settings.llm.clone()));
    let spinner = stage_spinner("clean");
    report("clean", spinner, cleaner.clean_documents(None, false).await);

    let llm = crate::llm::LlmClient::new(app.settings.llm.clone());
    let processor = DocumentProcessor::new(app.stage_context(PipelineStage::Process)?, llm);
    let spinner = stage_spinner("process");
    report("process", spinner, processor.process_documents(None, 2).await);

    let index_ctx = app.stage_context(PipelineStage::Index)?;
    let engine = RagEngine::new(
        &app.settings.embedding,
        &app.settings.data_dir,
        "spmedge",
        IndexKind::Flat,
    )
    .map_err(PipelineError::Rag)?;
    let mut indexer = RagIndexer::new(index_ctx, engine);
    let spinner = stage_spinner("index");
    report(
        "index",
        spinner,
        indexer
            .index_pipeline_documents(PipelineStage::Clean, 500)
            .await,
    );

    Ok(())
}

/// Spinner shown while a stage driver runs inside `run-all`.
fn stage_spinner(stage: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Running {stage} stage"));
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn report(
    stage: &str,
    spinner: ProgressBar,
    result: crate::pipeline::Result<crate::pipeline::StageOutcome>,
) -> crate::pipeline::StageOutcome {
    spinner.finish_and_clear();
    match result {
        Ok(outcome) => {
            println!(
                "{} stage: {}/{} succeeded",
                stage, outcome.succeeded, outcome.total
            );
            outcome
        }
        Err(e) => super::exit_for_error(&e),
    }
}

fn reset(app: &App, stage: Option<&str>, batch: Option<&str>) -> anyhow::Result<()> {
    let stages: Vec<PipelineStage> = match stage {
        Some(name) => match PipelineStage::from_str(name) {
            Some(stage) => vec![stage],
            None => {
                eprintln!("Unknown stage: {name}");
                std::process::exit(1);
            }
        },
        // Reverse order avoids resurrecting successor work
        None => PipelineStage::ALL.iter().rev().copied().collect(),
    };

    for stage in stages {
        let ctx = app.stage_context(stage)?;
        let rows = ctx.reset(stage, batch)?;
        println!("Reset stage {} ({} rows)", stage.as_str(), rows);
    }
    Ok(())
}

fn list(app: &App) -> anyhow::Result<()> {
    let batches = app.store.list_active_batches()?;
    if batches.is_empty() {
        println!("No active batches found");
    } else {
        println!(
            "{:<36} | {:<30} | {:<12} | {:<9} | Created At",
            "ID", "Batch Name", "Status", "Doc Count"
        );
        println!("{}", "-".repeat(100));
        for batch in batches {
            println!(
                "{:<36} | {:<30} | {:<12} | {:<9} | {}",
                batch.id,
                batch.name,
                batch.status.as_str(),
                batch.document_count,
                batch.created_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    let counts = app.store.stage_counts(None)?;
    if !counts.is_empty() {
        println!("\nPipeline stage document counts:");
        println!("{:<10} | {:<12} | Count", "Stage", "Status");
        println!("{}", "-".repeat(40));
        for (stage, statuses) in counts {
            for (status, count) in statuses {
                println!("{stage:<10} | {status:<12} | {count}");
            }
        }
    }
    Ok(())
}

fn status(app: &App, batch_id: &str) -> anyhow::Result<()> {
    match app.store.batch_status(batch_id)? {
        None => {
            eprintln!("{} Batch {} not found", style("❌").red(), batch_id);
            std::process::exit(1);
        }
        Some((batch, counts)) => {
            println!("Batch Status: {} ({})", batch.name, batch.id);
            println!("Status: {}", batch.status.as_str());
            println!("Documents: {}", batch.document_count);
            println!("Created: {}", batch.created_at.to_rfc3339());
            if let Some(completed) = batch.completed_at {
                println!("Completed: {}", completed.to_rfc3339());
            }

            println!("\nPipeline Stage Status:");
            if counts.is_empty() {
                println!("No pipeline stage data found");
            } else {
                for (stage, statuses) in counts {
                    let line: Vec<String> = statuses
                        .iter()
                        .map(|(status, count)| format!("{status}={count}"))
                        .collect();
                    println!("{stage}: {}", line.join(" "));
                }
            }
            Ok(())
        }
    }
}
