//! INDEX stage end-to-end with local embeddings: chunk, embed, insert,
//! mark rag_data and record pipeline completion.

mod common;

use spmedge::models::{PipelineStage, StageStatus};
use spmedge::rag::{EmbeddingConfig, EmbeddingProvider, IndexKind, RagEngine, RagIndexer, SearchMode};

use common::{env, TestEnv};

fn local_engine(env: &TestEnv) -> RagEngine {
    let config = EmbeddingConfig {
        provider: EmbeddingProvider::Local,
        dimensions: 64,
        ..Default::default()
    };
    RagEngine::new(&config, env.data_dir(), "spmedge", IndexKind::Flat).unwrap()
}

fn seed_cleaned(env: &TestEnv, content: &str) -> String {
    let id = env.seed_document(
        "plan.txt",
        "b1",
        &[PipelineStage::Input, PipelineStage::Load, PipelineStage::Clean],
    );
    let ctx = env.ctx(PipelineStage::Clean);
    let short: String = id.chars().filter(|c| *c != '-').take(12).collect();
    std::fs::write(
        ctx.dirs()
            .stage_clean
            .join(format!("pipeline_clean_doc{short}_batchb1_plan.txt")),
        content,
    )
    .unwrap();
    id
}

#[tokio::test]
async fn index_stage_marks_documents_indexed() {
    let env = env();
    let doc_id = seed_cleaned(&env, "Quota attainment drives the quarterly bonus payout.");

    let engine = local_engine(&env);
    let mut indexer = RagIndexer::new(env.ctx(PipelineStage::Index), engine);
    let outcome = indexer
        .index_pipeline_documents(PipelineStage::Clean, 100)
        .await
        .unwrap();
    assert_eq!(outcome.succeeded, 1);

    let record = env
        .store
        .get_pipeline_record(&doc_id, PipelineStage::Index)
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StageStatus::Completed);

    // rag_data reflects indexing
    let (total, indexed) = env.store.indexing_progress().unwrap();
    assert_eq!((total, indexed), (1, 1));

    // The content is retrievable
    let hits = indexer
        .engine()
        .query("quota bonus", 3, SearchMode::Hybrid, 0.5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].metadata["document_id"], doc_id.as_str());
    assert_eq!(hits[0].metadata["pipeline_stage"], "clean");
}

#[tokio::test]
async fn index_rerun_without_new_work_is_noop() {
    let env = env();
    seed_cleaned(&env, "Some plan content to index.");

    let engine = local_engine(&env);
    let mut indexer = RagIndexer::new(env.ctx(PipelineStage::Index), engine);
    let first = indexer
        .index_pipeline_documents(PipelineStage::Clean, 100)
        .await
        .unwrap();
    assert_eq!(first.succeeded, 1);

    let second = indexer
        .index_pipeline_documents(PipelineStage::Clean, 100)
        .await
        .unwrap();
    assert_eq!(second.total, 0);
    // Index size unchanged
    assert_eq!(indexer.engine().store().len(), 1);
}

#[tokio::test]
async fn analysis_persists_insights_in_metadata() {
    let env = env();
    let doc_id = seed_cleaned(
        &env,
        "The bonus structure pays 2% commission above quota attainment.",
    );

    let engine = local_engine(&env);
    let mut indexer = RagIndexer::new(env.ctx(PipelineStage::Index), engine);
    indexer
        .index_pipeline_documents(PipelineStage::Clean, 100)
        .await
        .unwrap();

    let analysis = indexer
        .analyze_document(&doc_id, Some(vec!["What is the bonus structure?".to_string()]))
        .await
        .unwrap();
    assert_eq!(analysis["document_id"], doc_id.as_str());
    let insight = &analysis["insights"]["What is the bonus structure?"];
    assert!(insight["answer"].is_string());
    assert!(!insight["sources"].as_array().unwrap().is_empty());

    // Persisted under the document's metadata
    let doc = env.store.get_document(&doc_id).unwrap().unwrap();
    assert!(doc.metadata.contains_key("rag_analysis"));
}

#[tokio::test]
async fn framework_files_are_indexed_from_knowledge_dir() {
    let env = env();
    let ctx = env.ctx(PipelineStage::Index);
    std::fs::write(
        ctx.dirs().knowledge.join("spm_knowledge.json"),
        serde_json::json!({"content": "Incentive compensation framework taxonomy."}).to_string(),
    )
    .unwrap();
    // Non-framework files are ignored
    std::fs::write(ctx.dirs().knowledge.join("notes.txt"), "ignore me").unwrap();

    let engine = local_engine(&env);
    let mut indexer = RagIndexer::new(ctx, engine);
    let indexed = indexer.index_framework_documents(None).await.unwrap();
    assert_eq!(indexed, 1);

    let hits = indexer
        .engine()
        .query("incentive framework", 3, SearchMode::Keyword, 0.5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].metadata["document_type"], "framework");
}
