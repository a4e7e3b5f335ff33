// src/coord/result.rs

//! Final document assembly from completed task outputs.

use serde::Serialize;
use serde_json::Value;

use crate::config::TemplateCatalog;
use crate::engine::state::{WorkflowState, output_key};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSection {
    pub task_id: String,
    pub key: String,
    pub content: Value,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledDocument {
    pub workflow_id: String,
    pub topic: Option<String>,
    /// In catalog order; tasks without output are omitted.
    pub sections: Vec<DocumentSection>,
    pub word_count: usize,
    /// `score` from the quality review output, when numeric.
    pub quality_score: Option<f64>,
    /// Some non-critical tasks failed or were blocked.
    pub partial: bool,
}

/// Build the document from `state.shared_context`. Pure; calling it twice on
/// the same state gives the same document.
pub fn assemble(state: &WorkflowState, catalog: &TemplateCatalog) -> AssembledDocument {
    let mut sections = Vec::new();
    for template in catalog.templates() {
        let key = output_key(&template.key);
        if let Some(content) = state.shared_context.get(&key) {
            sections.push(DocumentSection {
                task_id: template.key.clone(),
                word_count: count_words(content),
                key,
                content: content.clone(),
            });
        }
    }

    let quality_score = state
        .shared_context
        .get(&output_key("quality_review"))
        .and_then(|v| v.get("score"))
        .and_then(Value::as_f64);

    AssembledDocument {
        workflow_id: state.workflow_id.clone(),
        topic: state
            .metadata
            .get("topic")
            .and_then(Value::as_str)
            .map(str::to_string),
        word_count: sections.iter().map(|s| s.word_count).sum(),
        sections,
        quality_score,
        partial: !state.failed_tasks.is_empty() || !state.blocked_tasks.is_empty(),
    }
}

/// Whitespace-separated words across every string leaf of `value`.
pub fn count_words(value: &Value) -> usize {
    match value {
        Value::String(s) => s.split_whitespace().count(),
        Value::Array(items) => items.iter().map(count_words).sum(),
        Value::Object(map) => map.values().map(count_words).sum(),
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}
