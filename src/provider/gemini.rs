//! Gemini adapter, using the `streamGenerateContent` endpoint in SSE mode.

use crate::message::{FinishReason, Message, Role, StreamChunk, ToolCallDelta};
use crate::provider::{
    ChunkStream, CompletionRequest, Provider, ProviderKind, check_status, http_client, normalize,
    sse, tool_run_end,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_seconds)?,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    /// Convert the conversation to Gemini's `contents` format.
    pub fn build_request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let (system, contents) = encode_contents(request.messages);
        let mut generation = json!({});
        if let Some(temperature) = request.temperature {
            generation["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            generation["topP"] = json!(top_p);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation,
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": system });
        }

        let declarations = request.tool_schemas(self.kind().dialect());
        if !declarations.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1beta/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .context("failed to call Gemini API")?;
        let listing: ModelList = check_status(self.kind(), response).await?.json().await?;
        Ok(listing
            .models
            .into_iter()
            .map(|m| match m.name.strip_prefix("models/") {
                Some(id) => id.to_string(),
                None => m.name,
            })
            .collect())
    }

    async fn stream(&self, request: CompletionRequest<'_>) -> Result<ChunkStream> {
        let body = self.build_request_body(&request);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        debug!(model = %self.model, "calling Gemini API");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call Gemini API")?;
        let response = check_status(self.kind(), response).await?;

        Ok(normalize(sse::data_events(response), parse_chunk))
    }
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

/// Splits the conversation into system instruction parts and `contents`.
///
/// Tool results are sent as a `model` turn holding the function calls
/// followed by a `user` turn holding the matching function responses.
pub(crate) fn encode_contents(messages: &[Message]) -> (Vec<Value>, Vec<Value>) {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    let mut index = 0;
    while index < messages.len() {
        let message = &messages[index];
        match message.role {
            Role::System => system.push(json!({ "text": message.text() })),
            Role::User => contents.push(json!({ "role": "user", "parts": [{ "text": message.text() }] })),
            Role::Assistant => {
                contents.push(json!({ "role": "model", "parts": [{ "text": message.text() }] }))
            }
            Role::Tool => {
                let run_end = tool_run_end(messages, index);
                let run = &messages[index..run_end];

                let calls: Vec<Value> = run
                    .iter()
                    .filter_map(|m| m.tool_call.as_ref())
                    .map(|call| {
                        let args: Value = serde_json::from_str(call.arguments_or_empty())
                            .unwrap_or_else(|_| json!({}));
                        json!({ "functionCall": { "name": call.name, "args": args } })
                    })
                    .collect();
                let responses: Vec<Value> = run
                    .iter()
                    .filter_map(|m| {
                        let call = m.tool_call.as_ref()?;
                        Some(json!({
                            "functionResponse": {
                                "name": call.name,
                                "response": { "content": m.text() }
                            }
                        }))
                    })
                    .collect();
                contents.push(json!({ "role": "model", "parts": calls }));
                contents.push(json!({ "role": "user", "parts": responses }));
                index = run_end;
                continue;
            }
        }
        index += 1;
    }
    (system, contents)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<Value>,
    model_version: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize, Debug)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

/// Parses one `streamGenerateContent` payload. Gemini sends each function
/// call whole, so every call becomes a delta with its name and arguments.
pub fn parse_chunk(payload: &str) -> Result<StreamChunk> {
    let chunk: GenerateChunk = serde_json::from_str(payload)?;
    let mut normalized = StreamChunk {
        model: chunk.model_version,
        usage: chunk.usage_metadata,
        ..Default::default()
    };
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(normalized);
    };

    if let Some(content) = candidate.content {
        normalized.role = content.role.as_deref().and_then(Role::from_wire);
        let mut text: Option<String> = None;
        for part in content.parts {
            if let Some(fragment) = part.text {
                text.get_or_insert_with(String::new).push_str(&fragment);
            }
            if let Some(call) = part.function_call {
                let arguments = match call.args {
                    Value::Null => "{}".to_string(),
                    args => args.to_string(),
                };
                normalized.tool_calls.push(ToolCallDelta {
                    index: None,
                    call_id: None,
                    name: Some(call.name),
                    arguments: Some(arguments),
                });
            }
        }
        normalized.content = text;
    }

    normalized.finish_reason = match candidate.finish_reason.as_deref() {
        None | Some("") | Some("FINISH_REASON_UNSPECIFIED") => None,
        Some("STOP") if !normalized.tool_calls.is_empty() => Some(FinishReason::ToolCalls),
        Some("STOP") => Some(FinishReason::Stop),
        Some(other) => {
            warn!("Response ended with finish reason '{other}'.");
            Some(FinishReason::Stop)
        }
    };
    Ok(normalized)
}
