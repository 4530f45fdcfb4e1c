//! `rag` subcommands: indexing, analysis, query and stats.

use clap::Subcommand;

use crate::llm::LlmClient;
use crate::models::PipelineStage;
use crate::rag::{IndexKind, RagEngine, RagIndexer, SearchMode};

use super::App;

#[derive(Subcommand)]
pub enum RagCommands {
    /// Index framework knowledge files from the knowledge/ directory
    IndexFramework {
        /// Restrict to frameworks whose filename contains this value
        #[arg(long)]
        framework_type: Option<String>,
    },

    /// Index documents from a completed pipeline stage (INDEX stage)
    IndexPipeline {
        /// Source stage: clean or process
        #[arg(long, default_value = "clean")]
        stage: String,
        /// Max documents to index
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Generate retrieval-powered insights for a document
    Analyze {
        /// Document id to analyze
        document_id: String,
        /// Analytical question (repeatable; defaults depend on doc type)
        #[arg(long)]
        query: Vec<String>,
    },

    /// Query the knowledge base
    Query {
        /// Query text
        query: String,
        /// Number of results
        #[arg(short, default_value = "5")]
        k: usize,
        /// Search mode: vector, keyword or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Vector weight for hybrid search (0 = keyword, 1 = vector)
        #[arg(long, default_value = "0.5")]
        alpha: f64,
    },

    /// Show index and database statistics
    Stats,
}

fn build_indexer(app: &App, kind: IndexKind) -> anyhow::Result<RagIndexer> {
    let ctx = app.stage_context(PipelineStage::Index)?;
    let engine = RagEngine::new(&app.settings.embedding, &app.settings.data_dir, "spmedge", kind)?;
    Ok(RagIndexer::new(ctx, engine).with_llm(LlmClient::new(app.settings.llm.clone())))
}

pub async fn run(app: &App, command: RagCommands) -> anyhow::Result<()> {
    match command {
        RagCommands::IndexFramework { framework_type } => {
            let mut indexer = build_indexer(app, IndexKind::Flat)?;
            let count = indexer
                .index_framework_documents(framework_type.as_deref())
                .await?;
            println!("Indexed {count} framework documents");
            Ok(())
        }
        RagCommands::IndexPipeline { stage, limit } => {
            let Some(stage) = PipelineStage::from_str(&stage) else {
                eprintln!("Unknown stage: {stage}");
                std::process::exit(1);
            };
            let mut indexer = build_indexer(app, IndexKind::Flat)?;
            match indexer.index_pipeline_documents(stage, limit).await {
                Ok(outcome) => {
                    println!(
                        "Indexed {}/{} documents from {} stage",
                        outcome.succeeded,
                        outcome.total,
                        stage.as_str()
                    );
                    super::exit_for_outcome(&outcome)
                }
                Err(e) => super::exit_for_error(&e),
            }
        }
        RagCommands::Analyze { document_id, query } => {
            let indexer = build_indexer(app, IndexKind::Flat)?;
            let queries = if query.is_empty() { None } else { Some(query) };
            let analysis = indexer.analyze_document(&document_id, queries).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        RagCommands::Query {
            query,
            k,
            mode,
            alpha,
        } => {
            let Some(mode) = SearchMode::from_str(&mode) else {
                eprintln!("Unknown search mode: {mode}");
                std::process::exit(1);
            };
            let indexer = build_indexer(app, IndexKind::Flat)?;
            let hits = indexer.engine().query(&query, k, mode, alpha).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let excerpt: String = hit.text.chars().take(160).collect();
                println!("{}. [{:.4}] {} — {}", i + 1, hit.score, hit.id, excerpt);
            }
            Ok(())
        }
        RagCommands::Stats => {
            let indexer = build_indexer(app, IndexKind::Flat)?;
            let stats = indexer.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}
