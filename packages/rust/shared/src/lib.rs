//! Shared types, error model, and configuration for kbforge.
//!
//! This crate is the foundation depended on by all other kbforge crates.
//! It provides:
//! - [`KbForgeError`]: the unified error type, with [`FailureReason`] codes
//! - Domain types ([`IncidentContext`], [`PromptPayload`], [`NewArticle`], [`ArticleId`])
//! - Configuration ([`AppConfig`], [`ServiceConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, KnowledgeBaseConfig, RelationshipConfig, ServiceConfig, StoreConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{FailureReason, KbForgeError, Result, excerpt};
pub use types::{
    Article, ArticleId, ArticleRecord, IncidentContext, IncidentId, Instruction, KnowledgeBase,
    NewArticle, PromptPayload, Relationship, Role, WorkflowState, article_number,
};
