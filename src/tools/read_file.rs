use crate::tools::{ParamType, Parameter, Tool};
use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct ReadFileArgs {
    pub file_path: String,
}

pub struct ReadFileTool;

/// Reads a whole file as text. Missing or unreadable files produce a
/// descriptive message instead of an error, so the model can react to it.
pub async fn read_file(file_path: &str) -> String {
    match tokio::fs::read_to_string(Path::new(file_path)).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => format!("File not found: {file_path}"),
        Err(e) => format!("Error reading file {file_path}: {e}"),
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read the contents of a file and return it as a string."
    }

    fn parameters(&self) -> IndexMap<&'static str, Parameter> {
        IndexMap::from([(
            "file_path",
            Parameter::required(ParamType::String, "The path to the file to read"),
        )])
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<String> {
        let args: ReadFileArgs = serde_json::from_value(Value::Object(args.clone()))?;
        Ok(read_file(&args.file_path).await)
    }
}
