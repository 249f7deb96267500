//! Incident brief rendering and prompt payload construction.
//!
//! Everything here is pure: the same [`IncidentContext`] always produces a
//! byte-identical [`PromptPayload`].

use sha2::{Digest, Sha256};

use kbforge_shared::{IncidentContext, Instruction, PromptPayload, Role};

/// Fixed system instruction. Never varies between runs.
pub const SYSTEM_INSTRUCTION: &str = "You are a senior IT support engineer who writes \
high-quality, reusable knowledge base articles. Write in clear, concise language, suitable \
for end users where possible. Structure your answer with headings like: Problem, Environment, \
Symptoms, Root Cause, Resolution Steps, Prevention.";

/// Lead-in placed before the rendered incident brief.
const USER_PREAMBLE: &str =
    "Based on the following incident details, create a reusable knowledge base article:\n\n";

/// Builds [`PromptPayload`]s for a fixed model and temperature.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    model: String,
    temperature: f32,
}

impl PromptBuilder {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }

    /// Wrap the incident brief in a system + user instruction pair.
    pub fn build(&self, context: &IncidentContext) -> PromptPayload {
        PromptPayload {
            model: self.model.clone(),
            instructions: vec![
                Instruction {
                    role: Role::System,
                    content: SYSTEM_INSTRUCTION.to_string(),
                },
                Instruction {
                    role: Role::User,
                    content: format!("{USER_PREAMBLE}{}", render_brief(context)),
                },
            ],
            temperature: self.temperature,
        }
    }
}

/// Render the labelled, one-field-per-line incident brief.
pub fn render_brief(context: &IncidentContext) -> String {
    let lines = [
        ("Incident Number", context.number.clone()),
        ("Short Description", context.short_description.clone()),
        ("Description", context.description.clone()),
        (
            "Category/Subcategory",
            format!("{} / {}", context.category, context.subcategory),
        ),
        ("Configuration Item", context.configuration_item.clone()),
        ("Assignment Group", context.assignment_group.clone()),
        ("Resolution / Close Notes", context.close_notes.clone()),
    ];

    let mut brief = String::new();
    for (label, value) in lines {
        brief.push_str(label);
        brief.push_str(": ");
        brief.push_str(&value);
        brief.push('\n');
    }
    brief
}

/// SHA-256 over everything that shapes the generated text.
pub fn prompt_hash(payload: &PromptPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.model.as_bytes());
    for instruction in &payload.instructions {
        let role: &[u8] = match instruction.role {
            Role::System => b"system",
            Role::User => b"user",
        };
        hasher.update([0u8]);
        hasher.update(role);
        hasher.update([0u8]);
        hasher.update(instruction.content.as_bytes());
    }
    hasher.update(payload.temperature.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
