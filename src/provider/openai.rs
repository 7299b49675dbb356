//! OpenAI chat-completions adapter. Also serves any OpenAI-compatible
//! endpoint reachable through `base_url`.

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

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_seconds)?,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    pub fn build_request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": encode_messages(request.messages, false),
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        let tools = request.tool_schemas(self.kind().dialect());
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .context("failed to call OpenAI API")?;
        let listing: ModelList = check_status(self.kind(), response).await?.json().await?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    async fn stream(&self, request: CompletionRequest<'_>) -> Result<ChunkStream> {
        let body = self.build_request_body(&request);
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, url = %url, "calling OpenAI API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call OpenAI API")?;
        let response = check_status(self.kind(), response).await?;
        Ok(normalize(sse::data_events(response), parse_chunk))
    }
}

#[derive(Deserialize)]
pub(crate) struct ModelList {
    pub data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
pub(crate) struct ModelEntry {
    pub id: String,
}

/// Encodes the conversation as chat-completions messages.
///
/// Each run of tool-role messages is preceded by the assistant message that
/// requested those calls, since the API rejects tool results without it.
/// `with_tool_name` adds the `name` field Mistral expects on tool results.
pub(crate) fn encode_messages(messages: &[Message], with_tool_name: bool) -> Vec<Value> {
    let mut encoded = Vec::new();
    let mut index = 0;
    while index < messages.len() {
        let message = &messages[index];
        if message.role != Role::Tool {
            encoded.push(json!({ "role": message.role.as_str(), "content": message.text() }));
            index += 1;
            continue;
        }

        let run_end = tool_run_end(messages, index);
        let run = &messages[index..run_end];
        let ids: Vec<String> = run
            .iter()
            .enumerate()
            .map(|(n, m)| {
                m.tool_call_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", index + n))
            })
            .collect();

        let calls: Vec<Value> = run
            .iter()
            .zip(&ids)
            .filter_map(|(m, id)| {
                let call = m.tool_call.as_ref()?;
                Some(json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments_or_empty() }
                }))
            })
            .collect();
        encoded.push(json!({ "role": "assistant", "content": Value::Null, "tool_calls": calls }));

        for (m, id) in run.iter().zip(&ids) {
            let mut result = json!({ "role": "tool", "tool_call_id": id, "content": m.text() });
            if with_tool_name {
                if let Some(call) = &m.tool_call {
                    result["name"] = json!(call.name);
                }
            }
            encoded.push(result);
        }
        index = run_end;
    }
    encoded
}

#[derive(Deserialize, Debug)]
struct ChatChunk {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkDelta {
    role: Option<String>,
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Deserialize, Debug)]
struct ToolCallChunk {
    index: Option<usize>,
    id: Option<String>,
    function: Option<FunctionChunk>,
}

#[derive(Deserialize, Debug)]
struct FunctionChunk {
    name: Option<String>,
    arguments: Option<Value>,
}

pub(crate) fn parse_finish_reason(reason: Option<&str>) -> Option<FinishReason> {
    match reason? {
        "" => None,
        "tool_calls" => Some(FinishReason::ToolCalls),
        "stop" => Some(FinishReason::Stop),
        other => {
            warn!("Response ended with finish reason '{other}'.");
            Some(FinishReason::Stop)
        }
    }
}

/// Parses one chat-completions stream payload.
pub fn parse_chunk(payload: &str) -> Result<StreamChunk> {
    let chunk: ChatChunk = serde_json::from_str(payload)?;
    let mut normalized = StreamChunk {
        model: chunk.model,
        usage: chunk.usage.filter(|u| !u.is_null()),
        ..Default::default()
    };
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(normalized);
    };

    normalized.role = choice.delta.role.as_deref().and_then(Role::from_wire);
    normalized.content = choice.delta.content;
    normalized.tool_calls = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments.map(argument_text)),
                None => (None, None),
            };
            ToolCallDelta {
                index: call.index,
                call_id: call.id.filter(|id| !id.is_empty()),
                name: name.filter(|n| !n.is_empty()),
                arguments,
            }
        })
        .collect();
    normalized.finish_reason = parse_finish_reason(choice.finish_reason.as_deref());
    Ok(normalized)
}

/// Arguments normally arrive as text fragments; some compatible servers
/// send a whole JSON object instead.
fn argument_text(arguments: Value) -> String {
    match arguments {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolCallRequest, ToolResult};
    use crate::tool_registry::ToolRegistry;

    #[test]
    fn test_parse_role_chunk() {
        let chunk = parse_chunk(
            r#"{"id":"c1","model":"gpt-4o-2024-08-06","choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.role, Some(Role::Assistant));
        assert_eq!(chunk.model.as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(chunk.content.as_deref(), Some(""));
        assert_eq!(chunk.finish_reason, None);
    }

    #[test]
    fn test_parse_tool_call_fragments() {
        let first = parse_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","type":"function","function":{"name":"run_command","arguments":""}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(
            first.tool_calls,
            vec![ToolCallDelta {
                index: Some(0),
                call_id: Some("call_abc".to_string()),
                name: Some("run_command".to_string()),
                arguments: Some(String::new()),
            }]
        );

        let next = parse_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"comm"}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(next.tool_calls[0].name, None);
        assert_eq!(next.tool_calls[0].arguments.as_deref(), Some("{\"comm"));
    }

    #[test]
    fn test_parse_finish_reasons() {
        let stop = parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(stop.finish_reason, Some(FinishReason::Stop));
        assert_eq!(stop.content, None);

        let calls = parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#).unwrap();
        assert_eq!(calls.finish_reason, Some(FinishReason::ToolCalls));

        let length = parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#).unwrap();
        assert_eq!(length.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_parse_usage_only_chunk() {
        let chunk = parse_chunk(r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2}}"#).unwrap();
        assert!(chunk.usage.is_some());
        assert_eq!(chunk.content, None);
        assert_eq!(chunk.finish_reason, None);
    }

    #[test]
    fn test_malformed_chunk_is_an_error() {
        assert!(parse_chunk("{not json").is_err());
    }

    #[test]
    fn test_tool_results_are_preceded_by_their_calls() {
        let messages = vec![
            Message::user("what is in a.txt?"),
            Message::tool(ToolResult {
                call: ToolCallRequest {
                    call_id: Some("call_1".to_string()),
                    name: "read_file".to_string(),
                    arguments: r#"{"file_path":"a.txt"}"#.to_string(),
                },
                output: "hello".to_string(),
            }),
            Message::tool(ToolResult {
                call: ToolCallRequest {
                    call_id: None,
                    name: "run_command".to_string(),
                    arguments: String::new(),
                },
                output: "ok".to_string(),
            }),
        ];
        let encoded = encode_messages(&messages, false);
        assert_eq!(encoded.len(), 4);
        assert_eq!(encoded[1]["role"], "assistant");
        assert_eq!(encoded[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(encoded[1]["tool_calls"][1]["id"], "call_2");
        assert_eq!(encoded[1]["tool_calls"][1]["function"]["arguments"], "{}");
        assert_eq!(encoded[2]["tool_call_id"], "call_1");
        assert_eq!(encoded[2]["content"], "hello");
        assert_eq!(encoded[3]["tool_call_id"], "call_2");
        assert!(encoded[3].get("name").is_none());

        let with_names = encode_messages(&messages, true);
        assert_eq!(with_names[2]["name"], "read_file");
    }

    #[test]
    fn test_each_round_gets_its_own_assistant_record() {
        let result = |id: &str, round: u32| {
            Message::tool(ToolResult {
                call: ToolCallRequest {
                    call_id: Some(id.to_string()),
                    name: "run_command".to_string(),
                    arguments: r#"{"command":"ls"}"#.to_string(),
                },
                output: id.to_string(),
            })
            .in_round(round)
        };
        let messages = vec![
            Message::user("look around"),
            result("call_1", 0),
            result("call_2", 0),
            result("call_3", 1),
        ];
        let encoded = encode_messages(&messages, false);
        let roles: Vec<&str> = encoded.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["user", "assistant", "tool", "tool", "assistant", "tool"]);
        assert_eq!(encoded[1]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(encoded[4]["tool_calls"][0]["id"], "call_3");
        assert_eq!(encoded[5]["tool_call_id"], "call_3");
    }

    #[test]
    fn test_request_body_omits_tools_when_disabled() {
        let provider = OpenAiProvider::new("https://api.openai.com/v1", "sk", "gpt-4o", 5).unwrap();
        let messages = vec![Message::user("hi")];
        let registry = ToolRegistry::with_builtin_tools();

        let without = provider.build_request_body(&CompletionRequest {
            messages: &messages,
            tools: None,
            temperature: None,
            top_p: Some(0.9),
        });
        assert!(without.get("tools").is_none());
        assert!(without.get("temperature").is_none());
        assert_eq!(without["stream"], true);

        let with = provider.build_request_body(&CompletionRequest {
            messages: &messages,
            tools: Some(&registry),
            temperature: Some(0.5),
            top_p: None,
        });
        assert_eq!(with["tools"].as_array().unwrap().len(), 2);
        assert_eq!(with["tools"][0]["function"]["name"], "run_command");
    }
}
