//! Schema provider backed by a JSON descriptor file.

use anyhow::{Context, Result};
use insight_core::schema::{SchemaContext, SchemaDescriptor, SchemaProvider};
use std::path::Path;

/// Loads the descriptor once and serves it for the life of the process.
#[derive(Debug, Clone)]
pub struct JsonSchemaProvider {
    context: SchemaContext,
}

impl JsonSchemaProvider {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Schema file not found: {}", path.display()))?;
        let descriptor: SchemaDescriptor = serde_json::from_str(&content)
            .with_context(|| format!("Invalid schema file {}", path.display()))?;
        if descriptor.columns.is_empty() {
            anyhow::bail!("Schema file {} defines no columns", path.display());
        }
        tracing::info!(
            table = %descriptor.table_name,
            columns = descriptor.columns.len(),
            "Schema loaded"
        );
        Ok(Self {
            context: SchemaContext::new(descriptor),
        })
    }

    pub fn schema_context(&self) -> &SchemaContext {
        &self.context
    }
}

impl SchemaProvider for JsonSchemaProvider {
    fn descriptor(&self) -> &SchemaDescriptor {
        self.context.descriptor()
    }

    fn context(&self) -> &str {
        SchemaProvider::context(&self.context)
    }
}
