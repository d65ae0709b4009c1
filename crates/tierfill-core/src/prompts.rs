//! Prompt templates and the registry that routes reply fields to outputs.
//!
//! A [`PromptTemplate`] says what to ask and where each answer lands: its
//! routing table maps a reply field name (what the model returns) to an
//! output path (where the value is stored). Configured output paths that
//! no route mentions are asked for under their own path name.

use std::collections::BTreeMap;

use serde::Serialize;

use tierfill_types::{FieldConfig, InputRecord};

/// One prompt: instructions plus a reply-field -> output-path table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Prompt id referenced by `FieldConfig::prompt`.
    pub id: String,
    /// Task description placed at the top of the prompt.
    pub instructions: String,
    /// Reply field -> output path.
    pub routes: Vec<(String, String)>,
}

impl PromptTemplate {
    /// A template with no routes.
    pub fn new(id: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
            routes: Vec::new(),
        }
    }

    /// Builder: route reply field `reply_field` to `output_path`.
    pub fn route(mut self, reply_field: impl Into<String>, output_path: impl Into<String>) -> Self {
        self.routes.push((reply_field.into(), output_path.into()));
        self
    }

    /// The reply field the model is asked to fill for `output_path`.
    pub fn reply_key_for<'a>(&'a self, output_path: &'a str) -> &'a str {
        self.routes
            .iter()
            .find(|(_, path)| path == output_path)
            .map(|(field, _)| field.as_str())
            .unwrap_or(output_path)
    }
}

/// Prompt id -> template.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    templates: BTreeMap<String, PromptTemplate>,
}

impl PromptRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Templates for the exercise catalogue: `classification`, `muscles`
    /// and `instructions`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            PromptTemplate::new(
                "classification",
                "Classify each exercise by its movement pattern, mechanic (compound or \
                 isolation), force direction and difficulty level.",
            )
            .route("movement", "classification.movement")
            .route("mechanic", "classification.mechanic")
            .route("force", "classification.force")
            .route("level", "classification.level"),
        );
        registry.register(
            PromptTemplate::new(
                "muscles",
                "List the primary and secondary muscles each exercise works, using common \
                 anatomical names.",
            )
            .route("primary", "muscles.primary")
            .route("secondary", "muscles.secondary"),
        );
        registry.register(
            PromptTemplate::new(
                "instructions",
                "Write step-by-step instructions for each exercise, a few coaching tips, and \
                 the mistakes people most often make.",
            )
            .route("steps", "content.instructions")
            .route("tips", "content.tips")
            .route("mistakes", "content.commonMistakes"),
        );
        registry
    }

    /// Add or replace a template.
    pub fn register(&mut self, template: PromptTemplate) -> Option<PromptTemplate> {
        self.templates.insert(template.id.clone(), template)
    }

    /// Look up a template.
    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

// ── Prompt building ──────────────────────────────────────────────────────

/// The record view sent to the model.
#[derive(Serialize)]
struct PromptRecord<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    equipment: Option<&'a str>,
}

impl<'a> From<&'a InputRecord> for PromptRecord<'a> {
    fn from(r: &'a InputRecord) -> Self {
        Self {
            id: &r.id,
            name: &r.name,
            description: r.description.as_deref(),
            target: r.target.as_deref(),
            equipment: r.equipment.as_deref(),
        }
    }
}

/// Build one prompt covering every record of a batch.
///
/// `fields` are the configured `(output path, field)` pairs of the tier
/// that use `template`.
pub fn build_batch_prompt(
    template: &PromptTemplate,
    fields: &[(&str, &FieldConfig)],
    records: &[&InputRecord],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(template.instructions.trim());
    prompt.push_str("\n\nFields to return for each record:\n");
    for (path, field) in fields {
        let key = template.reply_key_for(path);
        prompt.push_str(&format!("- \"{key}\""));
        if let Some(values) = &field.allowed_values {
            let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
            prompt.push_str(&format!(": one of [{}]", quoted.join(", ")));
        }
        if field.required {
            prompt.push_str(" (required)");
        }
        prompt.push('\n');
    }

    let view: Vec<PromptRecord<'_>> = records.iter().map(|r| PromptRecord::from(*r)).collect();
    // Serializing borrowed strs into a Vec cannot fail.
    let records_json = serde_json::to_string_pretty(&view).unwrap_or_else(|_| "[]".into());
    prompt.push_str("\nRecords:\n");
    prompt.push_str(&records_json);
    prompt.push_str(
        "\n\nReply with a JSON object keyed by record id. Each value is an object \
         holding the fields listed above.",
    );
    prompt
}
