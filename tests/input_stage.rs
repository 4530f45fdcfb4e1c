//! INPUT stage end-to-end: registration, sidecars, summaries, archiving and
//! batch lifecycle on a temporary data root.

mod common;

use spmedge::models::{BatchStatus, PipelineStage, StageStatus};
use spmedge::pipeline::batch_manager::{BatchManager, InputOptions};

use common::env;

#[test]
fn empty_unprocessed_creates_no_batch() {
    let env = env();
    let manager = BatchManager::new(env.ctx(PipelineStage::Input));

    let batch_id = manager.process_batch("comp_plan", InputOptions::default()).unwrap();
    assert!(batch_id.is_none());
    assert!(env.store.list_active_batches().unwrap().is_empty());
    assert!(env.store.stage_counts(None).unwrap().is_empty());
}

#[test]
fn unknown_document_type_is_a_config_error() {
    let env = env();
    let ctx = env.ctx(PipelineStage::Input);
    std::fs::write(ctx.dirs().unprocessed.join("plan.txt"), "content").unwrap();

    let manager = BatchManager::new(ctx);
    let result = manager.process_batch("nonexistent_type", InputOptions::default());
    assert!(result.is_err());
}

#[test]
fn files_are_registered_with_sidecars_and_summary() {
    let env = env();
    let ctx = env.ctx(PipelineStage::Input);
    std::fs::write(ctx.dirs().unprocessed.join("My Comp Plan (2024).txt"), "plan body").unwrap();
    std::fs::write(ctx.dirs().unprocessed.join("second.txt"), "more").unwrap();

    let manager = BatchManager::new(ctx);
    let batch_id = manager
        .process_batch("comp_plan", InputOptions::default())
        .unwrap()
        .expect("batch created");

    let batch = env.store.get_batch(&batch_id).unwrap().expect("batch row");
    assert_eq!(batch.document_count, 2);
    assert_eq!(batch.status, BatchStatus::Completed);
    assert!(batch.completed_at.is_some());

    let ctx = env.ctx(PipelineStage::Input);
    let input_dir = &ctx.dirs().stage_input;
    // Sanitized canonical copy
    assert!(input_dir.join("My_Comp_Plan_2024.txt").is_file());
    // Sidecar with registration info
    let sidecar = input_dir.join("My_Comp_Plan_2024.meta.json");
    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(sidecar).unwrap()).unwrap();
    assert_eq!(meta["original_filename"], "My Comp Plan (2024).txt");
    assert_eq!(meta["file_type"], "txt");
    assert_eq!(meta["batch_id"], batch_id.as_str());

    // Batch summary captures file-type counts and totals
    let summary_path = input_dir.join(format!("batch_summary_{batch_id}.json"));
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(summary["success_count"], 2);
    assert_eq!(summary["file_types"]["txt"], 2);
    assert_eq!(summary["status"], "completed");

    // Both documents completed INPUT
    let counts = env.store.stage_counts(Some(&batch_id)).unwrap();
    assert_eq!(counts["input"]["completed"], 2);

    // Sources stay in unprocessed/ without archive/delete
    assert!(ctx
        .dirs()
        .unprocessed
        .join("My Comp Plan (2024).txt")
        .is_file());
}

#[test]
fn archive_moves_originals() {
    let env = env();
    let ctx = env.ctx(PipelineStage::Input);
    std::fs::write(ctx.dirs().unprocessed.join("plan.txt"), "body").unwrap();

    let manager = BatchManager::new(ctx);
    manager
        .process_batch(
            "comp_plan",
            InputOptions {
                archive: true,
                delete: false,
            },
        )
        .unwrap()
        .expect("batch created");

    let ctx = env.ctx(PipelineStage::Input);
    assert!(ctx.dirs().archive.join("plan.txt").is_file());
    assert!(!ctx.dirs().unprocessed.join("plan.txt").exists());
    assert!(ctx.dirs().stage_input.join("plan.txt").is_file());
}

#[test]
fn rerun_with_no_new_files_is_a_noop() {
    let env = env();
    let ctx = env.ctx(PipelineStage::Input);
    std::fs::write(ctx.dirs().unprocessed.join("plan.txt"), "body").unwrap();

    let manager = BatchManager::new(env.ctx(PipelineStage::Input));
    let first = manager
        .process_batch(
            "comp_plan",
            InputOptions {
                archive: false,
                delete: true,
            },
        )
        .unwrap();
    assert!(first.is_some());

    let counts_before = env.store.stage_counts(None).unwrap();
    let second = manager
        .process_batch("comp_plan", InputOptions::default())
        .unwrap();
    assert!(second.is_none());
    assert_eq!(env.store.stage_counts(None).unwrap(), counts_before);
}

#[test]
fn unsanitizable_name_falls_back_to_doc_id() {
    let env = env();
    let ctx = env.ctx(PipelineStage::Input);
    // Stem sanitizes to nothing
    std::fs::write(ctx.dirs().unprocessed.join("???.txt"), "body").unwrap();

    let manager = BatchManager::new(ctx);
    let batch_id = manager
        .process_batch("comp_plan", InputOptions::default())
        .unwrap()
        .expect("batch created");

    let docs = env
        .store
        .documents_ready(PipelineStage::Load, 10, false)
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert!(docs[0].name.starts_with("doc_"), "name: {}", docs[0].name);
    assert!(docs[0].name.ends_with(".txt"));
    assert_eq!(docs[0].batch_id, batch_id);
}
