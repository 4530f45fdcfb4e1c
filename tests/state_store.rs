//! State-store semantics: upsert idempotence, stage selection, reset scope
//! and orphan cleanup against a real on-disk SQLite database.

mod common;

use spmedge::models::{PipelineStage, StageStatus};

use common::env;

#[test]
fn upsert_pipeline_never_duplicates() {
    let env = env();
    let id = env.seed_document("a.txt", "b1", &[]);
    let type_id = 1;

    for status in [
        StageStatus::Processing,
        StageStatus::Failed,
        StageStatus::Completed,
    ] {
        env.store
            .upsert_pipeline(&id, PipelineStage::Load, status, "b1", type_id, None)
            .unwrap();
    }

    let record = env
        .store
        .get_pipeline_record(&id, PipelineStage::Load)
        .unwrap()
        .expect("record exists");
    assert_eq!(record.status, StageStatus::Completed);

    // Only one row per (document, stage): counts show a single load entry
    let counts = env.store.stage_counts(Some("b1")).unwrap();
    let load_counts = counts.get("load").expect("load stage counted");
    assert_eq!(load_counts.values().sum::<u64>(), 1);
}

#[test]
fn upsert_records_error_message() {
    let env = env();
    let id = env.seed_document("a.txt", "b1", &[]);
    env.store
        .upsert_pipeline(
            &id,
            PipelineStage::Clean,
            StageStatus::Failed,
            "b1",
            1,
            Some("No content found"),
        )
        .unwrap();
    let record = env
        .store
        .get_pipeline_record(&id, PipelineStage::Clean)
        .unwrap()
        .unwrap();
    assert_eq!(record.error_message.as_deref(), Some("No content found"));
}

#[test]
fn documents_ready_requires_completed_predecessor() {
    let env = env();
    let ready = env.seed_document("ready.txt", "b1", &[PipelineStage::Input]);
    let _not_ready = env.seed_document("pending.txt", "b1", &[]);

    let docs = env
        .store
        .documents_ready(PipelineStage::Load, 10, false)
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, ready);
}

#[test]
fn documents_ready_excludes_already_recorded() {
    let env = env();
    let done = env.seed_document(
        "done.txt",
        "b1",
        &[PipelineStage::Input, PipelineStage::Load],
    );
    let fresh = env.seed_document("fresh.txt", "b1", &[PipelineStage::Input]);

    let docs = env
        .store
        .documents_ready(PipelineStage::Load, 10, false)
        .unwrap();
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert!(ids.contains(&fresh.as_str()));
    assert!(!ids.contains(&done.as_str()));
}

#[test]
fn retry_failed_readmits_failed_documents() {
    let env = env();
    let failed = env.seed_document("failed.txt", "b1", &[PipelineStage::Input]);
    env.store
        .upsert_pipeline(
            &failed,
            PipelineStage::Load,
            StageStatus::Failed,
            "b1",
            1,
            Some("boom"),
        )
        .unwrap();

    let without_retry = env
        .store
        .documents_ready(PipelineStage::Load, 10, false)
        .unwrap();
    assert!(without_retry.is_empty());

    let with_retry = env
        .store
        .documents_ready(PipelineStage::Load, 10, true)
        .unwrap();
    assert_eq!(with_retry.len(), 1);
    assert_eq!(with_retry[0].id, failed);
}

#[test]
fn selection_is_ordered_and_bounded() {
    let env = env();
    let mut ids = Vec::new();
    for i in 0..5 {
        // created_at granularity is sub-second; spacing keeps order stable
        std::thread::sleep(std::time::Duration::from_millis(5));
        ids.push(env.seed_document(&format!("doc{i}.txt"), "b1", &[PipelineStage::Input]));
    }

    let docs = env
        .store
        .documents_ready(PipelineStage::Load, 3, false)
        .unwrap();
    assert_eq!(docs.len(), 3);
    let got: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(got, &ids[0..3]);
}

#[test]
fn reset_stage_is_scoped_to_batch_and_stage() {
    let env = env();
    let a = env.seed_document("a.txt", "batch_a", &[PipelineStage::Input, PipelineStage::Load]);
    let b = env.seed_document("b.txt", "batch_b", &[PipelineStage::Input, PipelineStage::Load]);

    env.store
        .reset_stage(PipelineStage::Load, Some("batch_a"))
        .unwrap();

    // batch_a's load row is gone, its input row survives
    assert!(env
        .store
        .get_pipeline_record(&a, PipelineStage::Load)
        .unwrap()
        .is_none());
    assert!(env
        .store
        .get_pipeline_record(&a, PipelineStage::Input)
        .unwrap()
        .is_some());
    // batch_b is untouched
    assert!(env
        .store
        .get_pipeline_record(&b, PipelineStage::Load)
        .unwrap()
        .is_some());
}

#[test]
fn cleanup_removes_orphans_only() {
    let env = env();
    let kept = env.seed_document("kept.txt", "b1", &[PipelineStage::Input]);
    let orphan = env.seed_document("orphan.txt", "b2", &[]);

    // A batch with no documents at all
    let empty_batch = env
        .store
        .create_batch("empty", 0, PipelineStage::Input)
        .unwrap();

    let (docs, batches) = env.store.cleanup_orphans().unwrap();
    assert_eq!(docs, 1);
    assert!(batches >= 1);

    assert!(env.store.get_document(&kept).unwrap().is_some());
    assert!(env.store.get_document(&orphan).unwrap().is_none());
    assert!(env.store.get_batch(&empty_batch).unwrap().is_none());
}

#[test]
fn completed_stages_form_pipeline_prefix() {
    let env = env();
    let id = env.seed_document(
        "a.txt",
        "b1",
        &[PipelineStage::Input, PipelineStage::Load, PipelineStage::Clean],
    );
    let stages = env.store.completed_stages(&id).unwrap();
    assert_eq!(
        stages,
        vec![PipelineStage::Input, PipelineStage::Load, PipelineStage::Clean]
    );
    // Prefix of the canonical order
    assert_eq!(&PipelineStage::ALL[0..stages.len()], stages.as_slice());
}

#[test]
fn settings_round_trip_and_coercion() {
    let env = env();
    assert_eq!(env.store.get_setting_usize("batch.size", 42), 500); // seeded default

    env.store.put_setting("batch.size", "25").unwrap();
    assert_eq!(env.store.get_setting_usize("batch.size", 42), 25);

    env.store.put_setting("batch.size", "not-a-number").unwrap();
    assert_eq!(env.store.get_setting_usize("batch.size", 42), 42);

    assert!(!env.store.get_setting_bool("document_cleaner.use_ai", true));
    env.store
        .put_setting("document_cleaner.use_ai", "true")
        .unwrap();
    assert!(env.store.get_setting_bool("document_cleaner.use_ai", false));
}

#[test]
fn cleaning_rules_are_priority_ordered() {
    let env = env();
    env.store
        .add_cleaning_rule("zzz", "", spmedge::models::RuleKind::Exact, 0, "all")
        .unwrap();

    let rules = env.store.get_cleaning_rules().unwrap();
    assert!(!rules.is_empty());
    let priorities: Vec<i64> = rules.iter().map(|r| r.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort();
    assert_eq!(priorities, sorted);
    // The priority-0 rule we added comes first
    assert_eq!(rules[0].pattern, "zzz");
}

#[test]
fn schema_and_prompt_lookups() {
    let env = env();
    env.store
        .create_document_type("comp_plan", Some("Extract the plan."))
        .unwrap();
    assert_eq!(
        env.store.get_prompt("comp_plan").unwrap(),
        None,
        "existing type is not overwritten by create"
    );

    let schema = serde_json::json!({"plan_info": {}, "payout_schedule": []});
    env.store.put_schema("comp_plan", &schema).unwrap();
    assert_eq!(env.store.get_schema("comp_plan").unwrap(), Some(schema));
    assert_eq!(env.store.get_schema("unknown").unwrap(), None);
}
