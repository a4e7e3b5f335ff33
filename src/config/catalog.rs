// src/config/catalog.rs

//! Declarative task template catalog.
//!
//! The catalog is plain data: an ordered table of templates, each naming the
//! capability that performs it, its priority, estimated cost and the
//! templates it waits for. The builder expands it into a concrete task graph
//! per request; nothing here knows about execution.

use std::collections::BTreeSet;

use crate::config::validate::validate_catalog;
use crate::errors::Result;

/// One task template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    pub key: String,
    pub name: String,
    pub capability: String,
    pub stage: String,
    /// 1..=10, higher is more urgent.
    pub priority: u8,
    pub cost_units: u32,
    pub after: Vec<String>,
}

struct BuiltinTemplate {
    key: &'static str,
    name: &'static str,
    capability: &'static str,
    stage: &'static str,
    priority: u8,
    cost_units: u32,
    after: &'static [&'static str],
}

static BUILTIN_TEMPLATES: [BuiltinTemplate; 8] = [
    BuiltinTemplate {
        key: "research",
        name: "Research",
        capability: "researcher",
        stage: "research",
        priority: 10,
        cost_units: 3,
        after: &[],
    },
    BuiltinTemplate {
        key: "outline",
        name: "Outline",
        capability: "planner",
        stage: "planning",
        priority: 9,
        cost_units: 2,
        after: &["research"],
    },
    BuiltinTemplate {
        key: "introduction",
        name: "Introduction",
        capability: "writer",
        stage: "drafting",
        priority: 8,
        cost_units: 2,
        after: &["outline"],
    },
    BuiltinTemplate {
        key: "body",
        name: "Body",
        capability: "writer",
        stage: "drafting",
        priority: 8,
        cost_units: 5,
        after: &["outline", "research"],
    },
    BuiltinTemplate {
        key: "conclusion",
        name: "Conclusion",
        capability: "writer",
        stage: "drafting",
        priority: 7,
        cost_units: 2,
        after: &["body"],
    },
    BuiltinTemplate {
        key: "summary",
        name: "Summary",
        capability: "summarizer",
        stage: "summarizing",
        priority: 6,
        cost_units: 1,
        after: &["introduction", "body", "conclusion"],
    },
    BuiltinTemplate {
        key: "quality_review",
        name: "Quality review",
        capability: "reviewer",
        stage: "review",
        priority: 5,
        cost_units: 2,
        after: &["summary"],
    },
    BuiltinTemplate {
        key: "formatting",
        name: "Formatting",
        capability: "formatter",
        stage: "formatting",
        priority: 4,
        cost_units: 1,
        after: &["quality_review"],
    },
];

impl From<&BuiltinTemplate> for TemplateSpec {
    fn from(t: &BuiltinTemplate) -> Self {
        TemplateSpec {
            key: t.key.to_string(),
            name: t.name.to_string(),
            capability: t.capability.to_string(),
            stage: t.stage.to_string(),
            priority: t.priority,
            cost_units: t.cost_units,
            after: t.after.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Validated, ordered set of templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCatalog {
    templates: Vec<TemplateSpec>,
}

impl TemplateCatalog {
    /// Validate and wrap a list of templates. Declaration order is kept and
    /// later used as the scheduling tie-break.
    pub fn new(templates: Vec<TemplateSpec>) -> Result<Self> {
        validate_catalog(&templates)?;
        Ok(Self { templates })
    }

    /// The catalog compiled into flowdag.
    pub fn builtin() -> Self {
        Self {
            templates: BUILTIN_TEMPLATES.iter().map(TemplateSpec::from).collect(),
        }
    }

    /// Skip validation; lets tests hand malformed catalogs to consumers.
    #[cfg(test)]
    pub(crate) fn unchecked(templates: Vec<TemplateSpec>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[TemplateSpec] {
        &self.templates
    }

    pub fn get(&self, key: &str) -> Option<&TemplateSpec> {
        self.templates.iter().find(|t| t.key == key)
    }

    /// Distinct capability names the catalog needs.
    pub fn capabilities(&self) -> BTreeSet<&str> {
        self.templates.iter().map(|t| t.capability.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
