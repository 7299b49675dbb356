use crate::context::ContextSource;
use crate::history::HistoryOptions;
use crate::provider::ProviderKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable selecting the configuration file.
pub const CONFIG_ENV: &str = "ASSISTANT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = ".assistant.yaml";

const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant living in the user's terminal.
Answer concisely. When a task needs it, use the `run_command` tool to inspect the system
and the `read_file` tool to look at files, then give the final answer directly.";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub default_model: String,
    pub generation: GenerationConfig,
    pub default_system_message: String,
    pub system_messages: IndexMap<String, String>,
    pub contexts: Vec<ContextSource>,
    pub history_context_options: HistoryOptions,
    pub providers: ProvidersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: "openai/gpt-4o".to_string(),
            generation: GenerationConfig::default(),
            default_system_message: "default".to_string(),
            system_messages: IndexMap::from([(
                "default".to_string(),
                DEFAULT_SYSTEM_MESSAGE.to_string(),
            )]),
            contexts: vec![
                ContextSource::Shell,
                ContextSource::Pwd,
                ContextSource::History,
            ],
            history_context_options: HistoryOptions::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

/// Sampling defaults. `None` leaves the choice to the backend.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub with_tools: bool,
    /// How many times one invocation may resume after tool calls.
    pub max_tool_rounds: u32,
    pub timeout_seconds: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            with_tools: true,
            max_tool_rounds: 10,
            timeout_seconds: 120,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

impl ProviderConfig {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: String::new(),
        }
    }
}

/// Backend endpoints and credentials. A provider entry in the file only
/// overrides the fields it names.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(from = "ProviderEntries")]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub mistral: ProviderConfig,
    pub gemini: ProviderConfig,
    pub ollama: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderConfig::new("https://api.openai.com/v1"),
            mistral: ProviderConfig::new("https://api.mistral.ai"),
            gemini: ProviderConfig::new("https://generativelanguage.googleapis.com"),
            ollama: ProviderConfig::new("http://localhost:11434"),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ProviderEntries {
    openai: ProviderEntry,
    mistral: ProviderEntry,
    gemini: ProviderEntry,
    ollama: ProviderEntry,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ProviderEntry {
    base_url: Option<String>,
    api_key: Option<String>,
}

impl ProviderEntry {
    fn over(self, defaults: ProviderConfig) -> ProviderConfig {
        ProviderConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            api_key: self.api_key.unwrap_or(defaults.api_key),
        }
    }
}

impl From<ProviderEntries> for ProvidersConfig {
    fn from(entries: ProviderEntries) -> Self {
        let defaults = ProvidersConfig::default();
        Self {
            openai: entries.openai.over(defaults.openai),
            mistral: entries.mistral.over(defaults.mistral),
            gemini: entries.gemini.over(defaults.gemini),
            ollama: entries.ollama.over(defaults.ollama),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Mistral => &self.mistral,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Ollama => &self.ollama,
        }
    }
}

/// Outcome of reading the configuration file. Loading never fails; problems
/// fall back to defaults and are described in `notice`.
#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub notice: Option<String>,
}

/// The configuration file path: `$ASSISTANT_CONFIG`, else `~/.assistant.yaml`.
pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::home_dir()
            .map(|home| home.join(DEFAULT_CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
    }
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

pub fn load_from(path: &Path) -> ConfigLoad {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return ConfigLoad {
                config: Config::default(),
                notice: Some(format!(
                    "Config file not found at {}, using defaults.",
                    path.display()
                )),
            };
        }
        Err(e) => {
            return ConfigLoad {
                config: Config::default(),
                notice: Some(format!(
                    "Failed to read config file {}: {e}, using defaults.",
                    path.display()
                )),
            };
        }
    };

    if contents.trim().is_empty() {
        return ConfigLoad {
            config: Config::default(),
            notice: None,
        };
    }

    match serde_yaml::from_str::<Config>(&contents) {
        Ok(config) => ConfigLoad {
            config,
            notice: None,
        },
        Err(e) => ConfigLoad {
            config: Config::default(),
            notice: Some(format!(
                "Malformed config file {}: {e}, using defaults.",
                path.display()
            )),
        },
    }
}

/// Loads the configuration from `config_path()`, logging any notice.
pub fn load() -> Config {
    let ConfigLoad { config, notice } = load_from(&config_path());
    if let Some(notice) = notice {
        warn!("{notice}");
    }
    config
}
