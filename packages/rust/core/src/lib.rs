//! Core pipeline orchestration for kbforge.
//!
//! This crate ties together the record store, prompt building, and the
//! generative service into the end-to-end `generate` workflow
//! (incident → draft knowledge-base article).

pub mod pipeline;
pub mod prompt;
pub mod resolver;
pub mod stages;
pub mod store;

pub use pipeline::{
    Pipeline, PipelineConfig, ProgressReporter, RunOutcome, SilentProgress, Stage,
};
pub use prompt::{PromptBuilder, SYSTEM_INSTRUCTION, prompt_hash, render_brief};
pub use resolver::KnowledgeBaseResolver;
pub use store::RecordStore;
