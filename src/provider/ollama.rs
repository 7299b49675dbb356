//! Ollama adapter. `/api/chat` streams newline-delimited JSON objects.

use crate::message::{FinishReason, Message, Role, StreamChunk, ToolCallDelta};
use crate::provider::{
    ChunkStream, CompletionRequest, Provider, ProviderKind, check_status, http_client, normalize,
    sse,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    /// Only sent when set, for servers behind an authenticating proxy.
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_seconds)?,
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()).filter(|key| !key.is_empty()),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    pub fn build_request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let mut options = json!({});
        if let Some(temperature) = request.temperature {
            options["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            options["top_p"] = json!(top_p);
        }
        let mut body = json!({
            "model": self.model,
            "messages": encode_messages(request.messages),
            "stream": true,
            "options": options,
        });
        let tools = request.tool_schemas(self.kind().dialect());
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .timeout(self.timeout)
            .send()
            .await
            .context("failed to call Ollama API")?;
        let listing: TagList = check_status(self.kind(), response).await?.json().await?;
        Ok(listing.models.into_iter().map(|m| m.name).collect())
    }

    async fn stream(&self, request: CompletionRequest<'_>) -> Result<ChunkStream> {
        let body = self.build_request_body(&request);
        let url = format!("{}/api/chat", self.base_url);
        debug!(model = %self.model, url = %url, "calling Ollama API");

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .context("failed to call Ollama API")?;
        let response = check_status(self.kind(), response).await?;
        Ok(normalize(sse::json_lines(response), parse_chunk))
    }
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Tool results are preceded by an assistant message carrying the calls,
/// with arguments as JSON objects rather than text.
pub(crate) fn encode_messages(messages: &[Message]) -> Vec<Value> {
    let mut encoded = Vec::new();
    let mut pending_calls: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();
    let mut pending_round = None;

    for message in messages {
        match (&message.role, &message.tool_call) {
            (Role::Tool, Some(call)) => {
                if pending_round != message.round {
                    flush(&mut encoded, &mut pending_calls, &mut pending_results);
                    pending_round = message.round;
                }
                let arguments: Value =
                    serde_json::from_str(call.arguments_or_empty()).unwrap_or_else(|_| json!({}));
                pending_calls.push(json!({ "function": { "name": call.name, "arguments": arguments } }));
                pending_results.push(json!({
                    "role": "tool",
                    "content": message.text(),
                    "tool_name": call.name,
                }));
            }
            _ => {
                flush(&mut encoded, &mut pending_calls, &mut pending_results);
                encoded.push(json!({ "role": message.role.as_str(), "content": message.text() }));
            }
        }
    }
    flush(&mut encoded, &mut pending_calls, &mut pending_results);
    encoded
}

fn flush(encoded: &mut Vec<Value>, calls: &mut Vec<Value>, results: &mut Vec<Value>) {
    if calls.is_empty() {
        return;
    }
    encoded.push(json!({ "role": "assistant", "content": "", "tool_calls": std::mem::take(calls) }));
    encoded.append(results);
}

#[derive(Deserialize, Debug)]
struct ChatLine {
    model: Option<String>,
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct ChatMessage {
    role: Option<String>,
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Deserialize, Debug)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Deserialize, Debug)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Parses one line of an `/api/chat` stream.
pub fn parse_chunk(payload: &str) -> Result<StreamChunk> {
    let line: ChatLine = serde_json::from_str(payload)?;
    let mut normalized = StreamChunk {
        model: line.model,
        ..Default::default()
    };

    if let Some(message) = line.message {
        normalized.role = message.role.as_deref().and_then(Role::from_wire);
        normalized.content = message.content;
        normalized.tool_calls = message
            .tool_calls
            .into_iter()
            .map(|call| ToolCallDelta {
                index: None,
                call_id: None,
                name: Some(call.function.name),
                arguments: Some(match call.function.arguments {
                    Value::Null => "{}".to_string(),
                    Value::String(text) => text,
                    args => args.to_string(),
                }),
            })
            .collect();
    }

    if line.done {
        normalized.usage = Some(json!({
            "prompt_eval_count": line.prompt_eval_count,
            "eval_count": line.eval_count,
        }));
        normalized.finish_reason = Some(match line.done_reason.as_deref() {
            _ if !normalized.tool_calls.is_empty() => FinishReason::ToolCalls,
            None | Some("stop") => FinishReason::Stop,
            Some(other) => {
                warn!("Response ended with finish reason '{other}'.");
                FinishReason::Stop
            }
        });
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolCallRequest, ToolResult};

    #[test]
    fn test_parse_content_line() {
        let chunk = parse_chunk(
            r#"{"model":"llama3.1","created_at":"2024-07-22T20:33:28Z","message":{"role":"assistant","content":"The"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.role, Some(Role::Assistant));
        assert_eq!(chunk.content.as_deref(), Some("The"));
        assert_eq!(chunk.model.as_deref(), Some("llama3.1"));
        assert_eq!(chunk.finish_reason, None);
        assert_eq!(chunk.usage, None);
    }

    #[test]
    fn test_parse_done_line() {
        let chunk = parse_chunk(
            r#"{"model":"llama3.1","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":26,"eval_count":298}"#,
        )
        .unwrap();
        assert_eq!(chunk.finish_reason, Some(FinishReason::Stop));
        assert_eq!(chunk.usage.unwrap()["eval_count"], 298);
    }

    #[test]
    fn test_parse_tool_call_line() {
        let chunk = parse_chunk(
            r#"{"model":"llama3.1","message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"read_file","arguments":{"file_path":"a.txt"}}}]},"done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].name.as_deref(), Some("read_file"));
        assert_eq!(
            chunk.tool_calls[0].arguments.as_deref(),
            Some(r#"{"file_path":"a.txt"}"#)
        );
    }

    #[test]
    fn test_encode_tool_history() {
        let messages = vec![
            Message::user("show a.txt"),
            Message::tool(ToolResult {
                call: ToolCallRequest {
                    call_id: None,
                    name: "read_file".to_string(),
                    arguments: r#"{"file_path":"a.txt"}"#.to_string(),
                },
                output: "hello".to_string(),
            }),
            Message::assistant("It says hello."),
        ];
        let encoded = encode_messages(&messages);
        assert_eq!(encoded.len(), 4);
        assert_eq!(encoded[1]["role"], "assistant");
        assert_eq!(
            encoded[1]["tool_calls"][0]["function"]["arguments"]["file_path"],
            "a.txt"
        );
        assert_eq!(encoded[2], json!({ "role": "tool", "content": "hello", "tool_name": "read_file" }));
        assert_eq!(encoded[3]["content"], "It says hello.");
    }

    #[test]
    fn test_encode_splits_tool_rounds() {
        let result = |path: &str, round: u32| {
            Message::tool(ToolResult {
                call: ToolCallRequest {
                    call_id: None,
                    name: "read_file".to_string(),
                    arguments: json!({ "file_path": path }).to_string(),
                },
                output: String::new(),
            })
            .in_round(round)
        };
        let encoded = encode_messages(&[result("a", 0), result("b", 0), result("c", 1)]);
        let roles: Vec<&str> = encoded.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["assistant", "tool", "tool", "assistant", "tool"]);
        assert_eq!(encoded[0]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(encoded[3]["tool_calls"][0]["function"]["arguments"]["file_path"], "c");
    }

    #[test]
    fn test_api_key_is_optional() {
        let provider = OllamaProvider::new("http://localhost:11434", "", "llama3.1", 5).unwrap();
        assert!(provider.api_key.is_none());
        let body = provider.build_request_body(&CompletionRequest {
            messages: &[Message::user("hi")],
            tools: None,
            temperature: None,
            top_p: None,
        });
        assert_eq!(body["options"], json!({}));
        assert!(body.get("tools").is_none());
    }
}
