//! # Provider Adapters
//!
//! One adapter per backend family. Each one speaks its own wire protocol but
//! exposes the same contract: list models, and open a streaming completion
//! whose chunks are normalized to `StreamChunk`. The shared tool-call state
//! machine lives in `assistant`, not here.

use crate::config::Config;
use crate::message::{Message, Role, StreamChunk};
use crate::tool_registry::ToolRegistry;
use crate::tools::SchemaDialect;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub mod gemini;
pub mod mistral;
pub mod ollama;
pub mod openai;
pub mod sse;

pub use gemini::GeminiProvider;
pub use mistral::MistralProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// End of the run of tool messages starting at `start` that answer one
/// backend turn.
pub(crate) fn tool_run_end(messages: &[Message], start: usize) -> usize {
    let round = messages[start].round;
    messages[start..]
        .iter()
        .position(|m| m.role != Role::Tool || m.round != round)
        .map_or(messages.len(), |offset| start + offset)
}

/// Normalized chunks of one turn. An `Err` item is a transport failure and
/// ends the stream.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Mistral,
    Gemini,
    Ollama,
}

impl ProviderKind {
    /// Search order for bare model ids.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Mistral,
        ProviderKind::Gemini,
        ProviderKind::Ollama,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn dialect(&self) -> SchemaDialect {
        match self {
            ProviderKind::Gemini => SchemaDialect::Gemini,
            _ => SchemaDialect::OpenAi,
        }
    }

    /// Local backends run without credentials.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }

    /// A short hand-picked list, returned without contacting the backend.
    pub fn curated_models(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "o3-mini"],
            ProviderKind::Mistral => &[
                "mistral-large-latest",
                "mistral-medium-latest",
                "mistral-small-latest",
                "codestral-latest",
                "open-mistral-nemo",
            ],
            ProviderKind::Gemini => &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"],
            ProviderKind::Ollama => &["llama3.1", "qwen2.5-coder", "mistral-nemo"],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything an adapter needs to open one streaming turn.
#[derive(Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    /// `None` when tool use is disabled; no schemas are sent then.
    pub tools: Option<&'a ToolRegistry>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl CompletionRequest<'_> {
    pub(crate) fn tool_schemas(&self, dialect: SchemaDialect) -> Vec<serde_json::Value> {
        self.tools
            .map(|registry| registry.schemas(dialect))
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// The backend model id requests are sent to.
    fn model(&self) -> &str;

    /// Live catalog query, in whatever order the backend returns it.
    async fn fetch_models(&self) -> Result<Vec<String>>;

    /// Opens a streaming completion.
    async fn stream(&self, request: CompletionRequest<'_>) -> Result<ChunkStream>;

    /// `full = false` returns the curated list without network access;
    /// `full = true` queries the backend and sorts the result.
    async fn list_models(&self, full: bool) -> Result<Vec<String>> {
        if !full {
            return Ok(self
                .kind()
                .curated_models()
                .iter()
                .map(|m| m.to_string())
                .collect());
        }
        let mut models = self.fetch_models().await?;
        models.sort();
        Ok(models)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Model name '{0}' should be in the format of 'provider/model'.")]
    InvalidModel(String),
    #[error("Unknown provider '{0}'.")]
    UnknownProvider(String),
    #[error("Provider {0} has no API key configured.")]
    MissingCredentials(ProviderKind),
    #[error("Model {0} not found.")]
    ModelNotFound(String),
}

/// A backend and the model to use on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub kind: ProviderKind,
    pub model: String,
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.model)
    }
}

/// Whether a provider has what it needs to be contacted.
pub fn is_usable(kind: ProviderKind, config: &Config) -> bool {
    !kind.requires_api_key() || !config.providers.get(kind).api_key.trim().is_empty()
}

pub fn usable_providers(config: &Config) -> Vec<ProviderKind> {
    ProviderKind::ALL
        .into_iter()
        .filter(|kind| is_usable(*kind, config))
        .collect()
}

/// Resolves `provider/model`, or a bare model id (optionally pinned to a
/// provider), to a usable backend.
pub fn resolve_model(
    model: &str,
    provider: Option<&str>,
    config: &Config,
) -> Result<ModelSpec, ResolveError> {
    let model = model.trim();
    let pinned = provider
        .map(|name| ProviderKind::from_name(name).ok_or_else(|| ResolveError::UnknownProvider(name.to_string())))
        .transpose()?;

    let spec = match (model.split_once('/'), pinned) {
        (Some((prefix, rest)), _) if ProviderKind::from_name(prefix).is_some() => {
            if rest.is_empty() {
                return Err(ResolveError::InvalidModel(model.to_string()));
            }
            let kind = ProviderKind::from_name(prefix)
                .ok_or_else(|| ResolveError::UnknownProvider(prefix.to_string()))?;
            ModelSpec {
                kind,
                model: rest.to_string(),
            }
        }
        (_, Some(kind)) => ModelSpec {
            kind,
            model: model.to_string(),
        },
        (Some((prefix, _)), None) => return Err(ResolveError::UnknownProvider(prefix.to_string())),
        (None, None) => {
            if model.is_empty() {
                return Err(ResolveError::InvalidModel(model.to_string()));
            }
            return usable_providers(config)
                .into_iter()
                .find(|kind| {
                    kind.curated_models()
                        .iter()
                        .any(|m| m.eq_ignore_ascii_case(model))
                })
                .map(|kind| ModelSpec {
                    kind,
                    model: model.to_string(),
                })
                .ok_or_else(|| ResolveError::ModelNotFound(model.to_string()));
        }
    };

    if !is_usable(spec.kind, config) {
        return Err(ResolveError::MissingCredentials(spec.kind));
    }
    Ok(spec)
}

pub(crate) fn http_client(timeout_seconds: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeout_seconds))
        .build()
        .context("failed to build HTTP client")
}

/// Turns a non-success response into an error carrying status and body.
pub(crate) async fn check_status(
    kind: ProviderKind,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    bail!("{kind} API error (HTTP {status}): {body}")
}

/// Maps raw payloads to chunks with an adapter's parser. Payloads that fail
/// to parse are skipped; transport errors pass through.
pub(crate) fn normalize(
    events: BoxStream<'static, Result<String>>,
    parse: fn(&str) -> Result<StreamChunk>,
) -> ChunkStream {
    Box::pin(events.filter_map(move |event| async move {
        match event {
            Ok(payload) => match parse(&payload) {
                Ok(chunk) => Some(Ok(chunk)),
                Err(e) => {
                    debug!("Skipping malformed chunk ({e}): {payload}");
                    None
                }
            },
            Err(e) => Some(Err(e)),
        }
    }))
}

/// Builds the adapter for a resolved model.
pub fn create_provider(spec: &ModelSpec, config: &Config) -> Result<Box<dyn Provider>> {
    let provider_config = config.providers.get(spec.kind);
    let timeout = config.generation.timeout_seconds;
    let base_url = provider_config.base_url.trim_end_matches('/');
    let api_key = provider_config.api_key.trim();
    Ok(match spec.kind {
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(base_url, api_key, &spec.model, timeout)?),
        ProviderKind::Mistral => Box::new(MistralProvider::new(base_url, api_key, &spec.model, timeout)?),
        ProviderKind::Gemini => Box::new(GeminiProvider::new(base_url, api_key, &spec.model, timeout)?),
        ProviderKind::Ollama => Box::new(OllamaProvider::new(base_url, api_key, &spec.model, timeout)?),
    })
}
