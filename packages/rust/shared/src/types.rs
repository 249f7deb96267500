//! Core domain types for incident-to-article drafting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KbForgeError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque incident identifier as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    /// Validate a raw identifier. Blank input is rejected; anything else is
    /// kept verbatim, surrounding whitespace included.
    pub fn parse(raw: &str) -> Result<Self, KbForgeError> {
        if raw.trim().is_empty() {
            return Err(KbForgeError::invalid_input("incident identifier is required"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned article identifier (UUID v7, time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub Uuid);

impl ArticleId {
    /// Generate a new time-sortable article identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ArticleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ArticleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// IncidentContext
// ---------------------------------------------------------------------------

/// Read-only snapshot of the incident fields the prompt is built from.
///
/// Every field is a plain string; absent and `null` values are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentContext {
    #[serde(deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub number: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub short_description: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub category: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub subcategory: String,
    /// Display label of the configuration item.
    #[serde(deserialize_with = "null_as_empty")]
    pub configuration_item: String,
    /// Display label of the assignment group.
    #[serde(deserialize_with = "null_as_empty")]
    pub assignment_group: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub close_notes: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl IncidentContext {
    /// Title used for the draft article filed from this incident.
    pub fn draft_title(&self) -> String {
        format!("KB from {}: {}", self.number, self.short_description)
    }
}

// ---------------------------------------------------------------------------
// PromptPayload
// ---------------------------------------------------------------------------

/// Role tag on a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One role-tagged instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub role: Role,
    pub content: String,
}

/// Chat-completion request body. Serializes to the service wire format
/// `{model, messages, temperature}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub model: String,
    #[serde(rename = "messages")]
    pub instructions: Vec<Instruction>,
    pub temperature: f32,
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

/// Article workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Draft,
    Review,
    Published,
    Retired,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Review => "review",
            Self::Published => "published",
            Self::Retired => "retired",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = KbForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "review" => Ok(Self::Review),
            "published" => Ok(Self::Published),
            "retired" => Ok(Self::Retired),
            other => Err(KbForgeError::validation(format!(
                "unknown workflow state '{other}'"
            ))),
        }
    }
}

/// Field bag for a new article insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    /// Knowledge-base container, if one was resolved.
    pub knowledge_base_id: Option<String>,
    pub title: String,
    pub body: String,
    pub workflow_state: WorkflowState,
    /// Model that generated the body.
    pub model: Option<String>,
    /// SHA-256 of the serialized prompt payload.
    pub prompt_hash: Option<String>,
}

impl NewArticle {
    /// A draft article with no generation metadata.
    pub fn draft(title: String, body: String, knowledge_base_id: Option<String>) -> Self {
        Self {
            knowledge_base_id,
            title,
            body,
            workflow_state: WorkflowState::Draft,
            model: None,
            prompt_hash: None,
        }
    }
}

/// What the store hands back after an article insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRecord {
    pub id: ArticleId,
    /// Human-facing number, e.g. `KB0000001`.
    pub number: String,
}

/// A persisted article row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,
    pub title: String,
    pub body: String,
    pub workflow_state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Format an article sequence number as `KB` + 7 digits.
pub fn article_number(seq: i64) -> String {
    format!("KB{seq:07}")
}

// ---------------------------------------------------------------------------
// Knowledge bases and relationships
// ---------------------------------------------------------------------------

/// A knowledge-base container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// A traceability link between two records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    /// Source record (the incident).
    pub parent_id: String,
    /// Target record (the article).
    pub child_id: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}
