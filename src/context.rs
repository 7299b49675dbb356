//! # Context Composer
//!
//! Turns the configured context sources and the operator's prompt into the
//! ordered message list sent to the backend: the system message first, then
//! one system message per context source, then the user prompt(s).

use crate::config::Config;
use crate::history::{self, HistoryOptions};
use crate::message::Message;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    Shell,
    Pwd,
    History,
}

/// Where the composer gets its facts about the terminal from.
pub trait ShellEnvironment {
    fn current_dir(&self) -> Option<String>;
    fn current_shell(&self) -> String;
    fn history(&self, options: &HistoryOptions, size: i64, all_panes: bool) -> Result<Vec<String>>;
}

/// The real process environment.
pub struct SystemEnvironment;

impl ShellEnvironment for SystemEnvironment {
    fn current_dir(&self) -> Option<String> {
        std::env::current_dir()
            .ok()
            .map(|dir| dir.display().to_string())
    }

    fn current_shell(&self) -> String {
        std::env::var("SHELL").unwrap_or_else(|_| "/usr/bin/bash".to_string())
    }

    fn history(&self, options: &HistoryOptions, size: i64, all_panes: bool) -> Result<Vec<String>> {
        history::recent_history(options, size, all_panes)
    }
}

/// Per-invocation choices layered over the configuration.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    /// A configured system message name, or literal text if it contains a space.
    pub system: Option<String>,
    pub no_context: bool,
    pub no_pwd: bool,
    pub no_shell: bool,
    pub no_history: bool,
    /// Zero means "not given"; the configured size applies.
    pub history_size: i64,
    pub all_panes: bool,
}

/// Picks the system message. An unknown name falls back to the empty
/// message with a warning.
pub fn resolve_system_message(config: &Config, requested: Option<&str>) -> String {
    let message = match requested {
        Some(text) if text.contains(' ') => Some(text.to_string()),
        Some(name) => config.system_messages.get(name).cloned(),
        None => config
            .system_messages
            .get(&config.default_system_message)
            .cloned(),
    };
    match message {
        Some(message) => message,
        None => {
            let name = requested.unwrap_or(&config.default_system_message);
            warn!("System message {name} not found in the configuration, using empty message.");
            String::new()
        }
    }
}

/// The history window to request: an explicit positive or negative size
/// wins, zero defers to the configured size.
pub fn effective_history_size(requested: i64, configured: i64) -> i64 {
    if requested == 0 { configured } else { requested }
}

/// Builds one labelled system string per selected and available source.
pub fn compose_context(
    config: &Config,
    request: &ContextRequest,
    env: &dyn ShellEnvironment,
) -> Vec<String> {
    let mut context = Vec::new();
    if request.no_context {
        return context;
    }

    let selected = &config.contexts;
    if !request.no_pwd && selected.contains(&ContextSource::Pwd) {
        match env.current_dir() {
            Some(dir) => context.push(format!("The current directory is {dir}")),
            None => warn!("Current directory is unavailable, leaving it out of the context."),
        }
    }
    if !request.no_shell && selected.contains(&ContextSource::Shell) {
        context.push(format!("The current shell is {}", env.current_shell()));
    }
    if !request.no_history && selected.contains(&ContextSource::History) {
        let options = &config.history_context_options;
        let size = effective_history_size(request.history_size, options.size);
        match env.history(options, size, request.all_panes) {
            Ok(lines) if !lines.is_empty() => {
                context.push(format!(
                    "The recent terminal history is:\n{}",
                    lines.join("\n")
                ));
            }
            Ok(_) => warn!("No terminal history available, leaving it out of the context."),
            Err(e) => warn!("{e}"),
        }
    }
    context
}

/// System strings first, in order, then the user prompts.
pub fn compose_messages(system_messages: &[String], user_messages: &[String]) -> Vec<Message> {
    system_messages
        .iter()
        .map(|msg| Message::system(msg.as_str()))
        .chain(user_messages.iter().map(|msg| Message::user(msg.as_str())))
        .collect()
}

/// The full prompt for one invocation.
pub fn build_conversation(
    config: &Config,
    request: &ContextRequest,
    env: &dyn ShellEnvironment,
    prompt: &str,
) -> Vec<Message> {
    let mut system = Vec::new();
    let system_message = resolve_system_message(config, request.system.as_deref());
    if !system_message.is_empty() {
        system.push(system_message);
    }
    system.extend(compose_context(config, request, env));
    compose_messages(&system, &[prompt.to_string()])
}
