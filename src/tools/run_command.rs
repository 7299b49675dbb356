use crate::tools::{ParamType, Parameter, Tool};
use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;

/// Defines the arguments structure for the shell command tool.
/// The model populates this structure.
#[derive(Deserialize, Debug)]
pub struct RunCommandArgs {
    pub command: String,
}

pub struct RunCommandTool;

/// Runs a command through `sh -c` and returns stdout followed by stderr.
///
/// A non-zero exit status is not an error: whatever the command printed is
/// the result. Only a failure to spawn the shell is reported as an error.
pub async fn run_command(command: &str) -> Result<String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .with_context(|| format!("failed to spawn shell for '{command}'"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(format!("{}\n{}", stdout.trim(), stderr.trim()))
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Execute a command in the terminal and return the output."
    }

    fn parameters(&self) -> IndexMap<&'static str, Parameter> {
        IndexMap::from([(
            "command",
            Parameter::required(ParamType::String, "The command to execute"),
        )])
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<String> {
        let args: RunCommandArgs = serde_json::from_value(Value::Object(args.clone()))?;
        run_command(&args.command).await
    }
}
