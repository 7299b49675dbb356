//! Mistral adapter. The streaming format matches OpenAI's chat completions;
//! tool results additionally carry the tool name.

use crate::provider::openai::{ModelList, encode_messages, parse_chunk};
use crate::provider::{
    ChunkStream, CompletionRequest, Provider, ProviderKind, check_status, http_client, normalize,
    sse,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

pub struct MistralProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl MistralProvider {
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
            "messages": encode_messages(request.messages, true),
            "stream": true,
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
impl Provider for MistralProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .context("failed to call Mistral API")?;
        let listing: ModelList = check_status(self.kind(), response).await?.json().await?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    async fn stream(&self, request: CompletionRequest<'_>) -> Result<ChunkStream> {
        let body = self.build_request_body(&request);
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(model = %self.model, url = %url, "calling Mistral API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call Mistral API")?;
        let response = check_status(self.kind(), response).await?;
        Ok(normalize(sse::data_events(response), parse_chunk))
    }
}
