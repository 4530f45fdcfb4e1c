//! Domain models for the SPM Edge pipeline.

mod artifact;
mod document;
mod section;

pub use artifact::{
    ChunkRecord, CleanArtifact, CleanSectionRecord, DocumentStructure, Heading, LoadArtifact,
    LoadStats, Paragraph, ProcessArtifact, RagDocument, SheetContent, SlideContent, TableContent,
};
pub use document::{
    Batch, BatchStatus, CleaningRule, Document, DocumentType, PipelineRecord, PipelineStage,
    RuleContext, RuleKind, StageStatus,
};
pub use section::{Section, SectionKind, SpmCategory};

pub(crate) use document::short_id;
