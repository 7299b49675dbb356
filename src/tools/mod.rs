//! # Tool Trait
//!
//! This module defines the `Tool` trait that every local action offered to the
//! model implements, together with the parameter declarations the registry
//! renders into each backend's function-call schema.

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod read_file;
pub mod run_command;
pub use self::read_file::ReadFileTool;
pub use self::run_command::RunCommandTool;

/// Primitive type tag of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    /// Lower-case JSON-schema tag, as used by OpenAI-style backends.
    pub fn json_schema_tag(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    /// Upper-case OpenAPI tag, as used by Gemini.
    pub fn openapi_tag(&self) -> &'static str {
        match self {
            ParamType::String => "STRING",
            ParamType::Integer => "INTEGER",
            ParamType::Number => "NUMBER",
            ParamType::Boolean => "BOOLEAN",
        }
    }

    /// Whether a JSON argument value satisfies this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub kind: ParamType,
    pub description: &'static str,
    pub optional: bool,
}

impl Parameter {
    pub fn required(kind: ParamType, description: &'static str) -> Self {
        Self {
            kind,
            description,
            optional: false,
        }
    }

    pub fn optional(kind: ParamType, description: &'static str) -> Self {
        Self {
            kind,
            description,
            optional: true,
        }
    }
}

/// Schema flavour a backend expects for function declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDialect {
    /// `{"type": "function", "function": {...}}` with JSON-schema tags.
    OpenAi,
    /// Bare function declaration with OpenAPI tags.
    Gemini,
}

/// A trait representing a self-contained, executable tool.
///
/// This trait is object-safe, so tools live in the registry as `Box<dyn Tool>`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique, static name of the tool.
    fn name(&self) -> &'static str;

    /// One-line description shown to the model.
    fn description(&self) -> &'static str;

    /// Declared parameters, in declaration order.
    fn parameters(&self) -> IndexMap<&'static str, Parameter>;

    /// Runs the tool with arguments that already passed the registry's
    /// binding checks. The returned text is fed back to the model verbatim.
    async fn execute(&self, args: &Map<String, Value>) -> Result<String>;
}
