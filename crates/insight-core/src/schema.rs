//! Schema descriptor of the analysed table.
//!
//! Loaded once per process and shared behind an `Arc`; the workflow only ever
//! reads it, mostly through the pre-rendered prompt context.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;

/// One column of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nullable: bool,
    /// When a nullable column is expected to be null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

impl ColumnDescriptor {
    /// Name as it appears in the database: lowercase, spaces as underscores,
    /// parentheses dropped.
    pub fn column_name(&self) -> String {
        normalize_column_name(&self.name)
    }
}

pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .replace(' ', "_")
        .replace(['(', ')'], "")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub table_name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub important_notes: Vec<String>,
    #[serde(default)]
    pub query_guidelines: Vec<String>,
}

impl SchemaDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        let wanted = normalize_column_name(name);
        self.columns.iter().find(|c| c.column_name() == wanted)
    }

    /// Renders the schema as markdown for prompts.
    pub fn render_context(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Database Schema\n");
        let _ = writeln!(out, "Table: `{}`", self.table_name);
        let _ = writeln!(out, "Description: {}\n", self.description);

        let names: Vec<String> = self.columns.iter().map(ColumnDescriptor::column_name).collect();
        let _ = writeln!(out, "## Exact Column Names (use these EXACTLY in SQL)");
        let _ = writeln!(out, "{}\n", names.join(", "));

        let _ = writeln!(out, "## Column Details\n");
        for (column, name) in self.columns.iter().zip(&names) {
            let _ = writeln!(out, "- **{name}** ({}): {}", column.data_type, column.description);
            if let Some(example) = &column.example {
                let _ = writeln!(out, "  - Example: `{}`", render_value(example));
            }
            if !column.valid_values.is_empty() {
                let values: Vec<String> = column.valid_values.iter().map(render_value).collect();
                let _ = writeln!(out, "  - Valid values: {}", values.join(", "));
            }
            if column.nullable {
                match &column.null_condition {
                    Some(condition) => {
                        let _ = writeln!(out, "  - Nullable: Yes ({condition})");
                    }
                    None => {
                        let _ = writeln!(out, "  - Nullable: Yes");
                    }
                }
            }
            out.push('\n');
        }

        if !self.important_notes.is_empty() {
            let _ = writeln!(out, "## Important Notes");
            for note in &self.important_notes {
                let _ = writeln!(out, "- {note}");
            }
            out.push('\n');
        }

        if !self.query_guidelines.is_empty() {
            let _ = writeln!(out, "## Query Guidelines");
            for guideline in &self.query_guidelines {
                let _ = writeln!(out, "- {guideline}");
            }
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "## CRITICAL: Column names are lowercase with underscores. Use them exactly as listed above."
        );
        out
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read-only access to the schema.
pub trait SchemaProvider: Send + Sync {
    fn descriptor(&self) -> &SchemaDescriptor;

    /// Prompt text, rendered once.
    fn context(&self) -> &str;
}

/// A descriptor together with its rendered context.
#[derive(Debug, Clone)]
pub struct SchemaContext {
    descriptor: Arc<SchemaDescriptor>,
    rendered: Arc<str>,
}

impl SchemaContext {
    pub fn new(descriptor: SchemaDescriptor) -> Self {
        let rendered: Arc<str> = Arc::from(descriptor.render_context());
        Self {
            descriptor: Arc::new(descriptor),
            rendered,
        }
    }

    pub fn shared(&self) -> Arc<SchemaDescriptor> {
        Arc::clone(&self.descriptor)
    }
}

impl SchemaProvider for SchemaContext {
    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    fn context(&self) -> &str {
        &self.rendered
    }
}
