//! Shared helpers for integration tests.

use std::path::Path;

use spmedge::models::{PipelineStage, StageStatus};
use spmedge::pipeline::StageContext;
use spmedge::repository::StateStore;

/// An initialized store plus data root under a temp directory.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub store: StateStore,
}

pub fn env() -> TestEnv {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(dir.path().join("spmedge.db"));
    store.init().expect("init schema");
    TestEnv { dir, store }
}

impl TestEnv {
    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn ctx(&self, stage: PipelineStage) -> StageContext {
        StageContext::new(stage, self.data_dir(), self.store.clone()).expect("stage context")
    }

    /// Register a document and mark the given stages completed.
    pub fn seed_document(
        &self,
        name: &str,
        batch_id: &str,
        completed: &[PipelineStage],
    ) -> String {
        let type_id = self
            .store
            .create_document_type("comp_plan", None)
            .expect("doc type");
        let id = uuid::Uuid::new_v4().to_string();
        self.store
            .register_document(&id, name, name, type_id, batch_id, 100, "txt")
            .expect("register");
        for stage in completed {
            self.store
                .upsert_pipeline(&id, *stage, StageStatus::Completed, batch_id, type_id, None)
                .expect("upsert");
        }
        id
    }
}
