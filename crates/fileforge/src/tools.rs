//! User-facing tool catalog.
//!
//! This registry serves job submission: display metadata plus a declared JSON
//! parameter schema per tool, validated before a job row is ever created. It
//! shares the slug key space with the worker's `ProcessorRegistry` but has a
//! different purpose; the two are deliberately separate.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::SubmitError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    /// JSON Schema for the tool's parameters.
    pub params_schema: Value,
    /// Upper bound on declared input files per job.
    pub max_input_files: usize,
}

pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.slug.clone(), t)).collect(),
        }
    }

    /// The built-in catalog. Assembled once at startup; read-only afterwards.
    pub fn builtin() -> Self {
        Self::new(builtin_tools())
    }

    pub fn get(&self, slug: &str) -> Option<&ToolSpec> {
        self.tools.get(slug)
    }

    pub fn all(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    /// Validates submitted parameters against the tool's declared schema.
    pub fn validate_params(&self, slug: &str, params: &Value) -> Result<(), SubmitError> {
        let tool = self
            .get(slug)
            .ok_or_else(|| SubmitError::UnknownTool(slug.to_string()))?;

        let validator = jsonschema::validator_for(&tool.params_schema)
            .map_err(|e| SubmitError::InvalidParams(format!("schema for '{}': {}", slug, e)))?;

        validator
            .validate(params)
            .map_err(|e| SubmitError::InvalidParams(e.to_string()))
    }
}

fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            slug: "pdf-merge".to_string(),
            name: "PDF Merge".to_string(),
            description: "Combine PDFs and images into a single PDF document".to_string(),
            category: "pdf".to_string(),
            params_schema: json!({
                "type": "object",
                "properties": {
                    "outputName": { "type": "string", "minLength": 1 },
                    "pageSize": { "type": "string", "enum": ["a4", "original"] }
                },
                "additionalProperties": false
            }),
            max_input_files: 50,
        },
        ToolSpec {
            slug: "image-resize".to_string(),
            name: "Image Resize".to_string(),
            description: "Resize images, optionally converting their format".to_string(),
            category: "image".to_string(),
            params_schema: json!({
                "type": "object",
                "properties": {
                    "width": { "type": "integer", "minimum": 1 },
                    "height": { "type": "integer", "minimum": 1 },
                    "lockAspectRatio": { "type": "boolean" },
                    "format": {
                        "type": "string",
                        "enum": ["original", "jpg", "jpeg", "png", "webp"]
                    }
                },
                "additionalProperties": false
            }),
            max_input_files: 50,
        },
        ToolSpec {
            slug: "markdown-converter".to_string(),
            name: "Markdown Converter".to_string(),
            description: "Convert documents (DOCX, HTML, PDF, text) to markdown".to_string(),
            category: "document".to_string(),
            params_schema: json!({
                "type": "object",
                "properties": {
                    "outputName": { "type": "string", "minLength": 1 },
                    "frontMatter": { "type": "boolean" }
                },
                "additionalProperties": false
            }),
            max_input_files: 20,
        },
    ]
}
