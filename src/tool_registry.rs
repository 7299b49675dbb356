//! # Tool Registry
//!
//! The `ToolRegistry` is the central hub for describing and executing tools.
//! It is filled once at startup and only read afterwards. Calls are dispatched
//! by tool name after the raw arguments have been bound against the tool's
//! declared parameters.

use crate::tools::{ReadFileTool, RunCommandTool, SchemaDialect, Tool};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),
    #[error("Invalid invocation of {tool}: {reason}")]
    Invocation { tool: String, reason: String },
}

impl ToolError {
    fn invocation(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::Invocation {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// A registry responsible for describing and dispatching tool calls.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    /// Registration order, so schemas are rendered deterministically.
    order: Vec<String>,
}

impl ToolRegistry {
    /// Creates a new, empty `ToolRegistry`.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The registry with the built-in tools: `run_command` and `read_file`.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RunCommandTool));
        registry.register(Box::new(ReadFileTool));
        registry
    }

    /// Registers a new tool. A tool with the same name replaces the old one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Renders one tool into the function-call schema of the given dialect.
    pub fn describe(&self, name: &str, dialect: SchemaDialect) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let parameters = tool.parameters();
        let mut properties = Map::new();
        for (param_name, param) in &parameters {
            let tag = match dialect {
                SchemaDialect::OpenAi => param.kind.json_schema_tag(),
                SchemaDialect::Gemini => param.kind.openapi_tag(),
            };
            properties.insert(
                param_name.to_string(),
                json!({ "type": tag, "description": param.description }),
            );
        }
        let required: Vec<&str> = parameters
            .iter()
            .filter(|(_, param)| !param.optional)
            .map(|(param_name, _)| *param_name)
            .collect();

        Ok(match dialect {
            SchemaDialect::OpenAi => json!({
                "type": "function",
                "function": {
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": {
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    }
                }
            }),
            SchemaDialect::Gemini => json!({
                "name": tool.name(),
                "description": tool.description(),
                "parameters": {
                    "type": "OBJECT",
                    "properties": properties,
                    "required": required,
                }
            }),
        })
    }

    /// Gathers the schemas of all registered tools to be sent to the backend.
    pub fn schemas(&self, dialect: SchemaDialect) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.describe(name, dialect).ok())
            .collect()
    }

    /// Parses raw argument text and checks it against the tool's declared
    /// parameters. Succeeds only when the tool exists, the text is a JSON
    /// object, every required parameter is present and every supplied
    /// parameter has the declared type.
    pub fn bind(&self, name: &str, arguments: &str) -> Result<Map<String, Value>, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let raw = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ToolError::invocation(name, format!("failed to parse JSON arguments: {e}")))?;
        let Value::Object(args) = value else {
            return Err(ToolError::invocation(name, "arguments must be a JSON object"));
        };

        for (param_name, param) in tool.parameters() {
            match args.get(param_name) {
                None | Some(Value::Null) if !param.optional => {
                    return Err(ToolError::invocation(
                        name,
                        format!("missing required argument '{param_name}'"),
                    ));
                }
                Some(value) if !value.is_null() && !param.kind.accepts(value) => {
                    return Err(ToolError::invocation(
                        name,
                        format!(
                            "argument '{param_name}' must be of type {}",
                            param.kind.json_schema_tag()
                        ),
                    ));
                }
                _ => {}
            }
        }
        Ok(args)
    }

    /// Binds and runs a tool, returning its text output.
    pub async fn execute(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let args = self.bind(name, arguments)?;
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(&args)
            .await
            .map_err(|e| ToolError::invocation(name, e.to_string()))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
