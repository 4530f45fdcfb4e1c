//! `loader`, `cleaner` and `processor` command handlers.

use crate::llm::LlmClient;
use crate::models::PipelineStage;
use crate::pipeline::cleaner::DocumentCleaner;
use crate::pipeline::loader::{DocumentLoader, OutputFormat};
use crate::pipeline::processor::DocumentProcessor;

use super::App;

pub fn run_loader(
    app: &App,
    limit: Option<usize>,
    format: &str,
    retry: bool,
) -> anyhow::Result<()> {
    let Some(format) = OutputFormat::from_str(format) else {
        eprintln!("Unknown output format: {format} (expected json, text or markdown)");
        std::process::exit(1);
    };

    let ctx = match app.stage_context(PipelineStage::Load) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let loader = DocumentLoader::new(ctx);
    match loader.load_documents(limit, format, retry) {
        Ok(outcome) => {
            println!(
                "Load complete: {}/{} documents succeeded",
                outcome.succeeded, outcome.total
            );
            super::exit_for_outcome(&outcome)
        }
        Err(e) => super::exit_for_error(&e),
    }
}

pub async fn run_cleaner(app: &App, limit: Option<usize>, use_ai: bool) -> anyhow::Result<()> {
    let ctx = app.stage_context(PipelineStage::Clean)?;
    let cleaner =
        DocumentCleaner::new(ctx).with_llm(LlmClient::new(app.settings.llm.clone()));
    match cleaner.clean_documents(limit, use_ai).await {
        Ok(outcome) => {
            println!(
                "Clean complete: {}/{} documents succeeded",
                outcome.succeeded, outcome.total
            );
            super::exit_for_outcome(&outcome)
        }
        Err(e) => super::exit_for_error(&e),
    }
}

pub async fn run_processor(
    app: &App,
    limit: Option<usize>,
    model: Option<String>,
    batch_size: usize,
) -> anyhow::Result<()> {
    let ctx = app.stage_context(PipelineStage::Process)?;
    let llm = LlmClient::new(app.settings.llm.clone()).with_model(model);
    let processor = DocumentProcessor::new(ctx, llm);
    match processor.process_documents(limit, batch_size).await {
        Ok(outcome) => {
            println!(
                "Process complete: {}/{} documents succeeded",
                outcome.succeeded, outcome.total
            );
            super::exit_for_outcome(&outcome)
        }
        Err(e) => super::exit_for_error(&e),
    }
}
