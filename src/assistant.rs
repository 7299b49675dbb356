//! # Streaming Orchestrator
//!
//! Drives a provider through the stream / tool-call / resume cycle and hands
//! its caller one ordered stream of fragments.
//!
//! A single backend call is a `Turn`: every normalized chunk is fed to
//! `Turn::step`, which says what to print and whether the turn goes on, ends,
//! or stops to run tools. When tools were requested, `assist` runs them
//! (each one behind the confirmation gate), appends one tool message per
//! result and opens the next turn with the extended conversation.

use crate::config::GenerationConfig;
use crate::confirm::{ConfirmationGate, USER_CANCELLED};
use crate::message::{
    FinishReason, Fragment, Message, StreamChunk, ToolCallDelta, ToolCallRequest, ToolResult,
};
use crate::provider::{CompletionRequest, Provider};
use crate::tool_registry::ToolRegistry;
use anyhow::Result;
use async_stream::try_stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct AssistOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// When off, no tool schemas are sent and no tool ever runs.
    pub with_tools: bool,
    /// How many times one invocation may resume after running tools.
    pub max_tool_rounds: u32,
}

impl From<&GenerationConfig> for AssistOptions {
    fn from(generation: &GenerationConfig) -> Self {
        Self {
            temperature: generation.temperature,
            top_p: generation.top_p,
            with_tools: generation.with_tools,
            max_tool_rounds: generation.max_tool_rounds,
        }
    }
}

impl Default for AssistOptions {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    index: Option<usize>,
    call_id: Option<String>,
    name: String,
    arguments: String,
}

/// Assembles tool calls from the partial deltas of one turn.
///
/// A delta belongs to the latest call with the same `index`, else the same
/// `call_id`. A delta whose `call_id` differs from the one already recorded
/// at its index starts a new call. A delta that names neither index nor id
/// but carries a tool name starts a new call; a bare argument fragment
/// continues the latest call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PendingCall>,
}

impl ToolCallAccumulator {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn add(&mut self, delta: ToolCallDelta) {
        let matched = match (delta.index, &delta.call_id) {
            (Some(index), id) => self.calls.iter().rposition(|c| {
                c.index == Some(index)
                    && !matches!((&c.call_id, id), (Some(known), Some(id)) if known != id)
            }),
            (None, Some(id)) => self
                .calls
                .iter()
                .position(|c| c.call_id.as_deref() == Some(id.as_str())),
            (None, None) => None,
        };
        let starts_new = delta.index.is_some() || delta.call_id.is_some() || delta.name.is_some();
        let slot = match matched {
            Some(slot) => slot,
            None if starts_new || self.calls.is_empty() => {
                self.calls.push(PendingCall {
                    index: delta.index,
                    ..Default::default()
                });
                self.calls.len() - 1
            }
            None => self.calls.len() - 1,
        };

        let call = &mut self.calls[slot];
        if call.call_id.is_none() {
            call.call_id = delta.call_id;
        }
        if let Some(name) = delta.name {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        if let Some(arguments) = delta.arguments {
            call.arguments.push_str(&arguments);
        }
    }

    /// The assembled calls, in the order they were first seen. Calls that
    /// never received a name cannot be dispatched and are dropped.
    pub fn take(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .filter_map(|call| {
                if call.name.is_empty() {
                    warn!("Dropping tool call without a name: {}", call.arguments);
                    return None;
                }
                Some(ToolCallRequest {
                    call_id: call.call_id,
                    name: call.name,
                    arguments: call.arguments,
                })
            })
            .collect()
    }
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Keep reading chunks.
    Continue,
    /// The turn paused to run these calls.
    ToolCalls(Vec<ToolCallRequest>),
    /// The turn is complete.
    Done,
}

/// What one chunk produced: fragments to emit, then what happens next.
#[derive(Debug, PartialEq)]
pub struct Step {
    pub fragments: Vec<Fragment>,
    pub outcome: Outcome,
}

/// State of one backend call.
#[derive(Debug)]
pub struct Turn {
    model: String,
    tools_enabled: bool,
    header_sent: bool,
    calls: ToolCallAccumulator,
    response: String,
    usage: Option<serde_json::Value>,
}

impl Turn {
    pub fn new(model: &str, tools_enabled: bool) -> Self {
        Self {
            model: model.to_string(),
            tools_enabled,
            header_sent: false,
            calls: ToolCallAccumulator::default(),
            response: String::new(),
            usage: None,
        }
    }

    /// Keeps the usage metadata of a chunk read after the turn finished.
    /// Everything else in it is ignored.
    pub fn record_usage(&mut self, chunk: StreamChunk) {
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    /// The latest usage metadata the backend reported for this turn.
    pub fn usage(&self) -> Option<&serde_json::Value> {
        self.usage.as_ref()
    }

    pub fn step(&mut self, chunk: StreamChunk) -> Step {
        let mut fragments = Vec::new();
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        if let Some(role) = chunk.role {
            if !self.header_sent {
                self.header_sent = true;
                fragments.push(Fragment::Header {
                    role,
                    model: chunk.model.unwrap_or_else(|| self.model.clone()),
                });
            }
        }
        for delta in chunk.tool_calls {
            self.calls.add(delta);
        }

        let Some(reason) = chunk.finish_reason else {
            if let Some(text) = chunk.content {
                self.response.push_str(&text);
                fragments.push(Fragment::Content(text));
            }
            return Step {
                fragments,
                outcome: Outcome::Continue,
            };
        };

        if let Some(text) = chunk.content.filter(|text| !text.is_empty()) {
            self.response.push_str(&text);
            fragments.push(Fragment::Content(text));
        }
        debug!("Response: {}", self.response);

        let calls = self.calls.take();
        if !calls.is_empty() && self.tools_enabled {
            return Step {
                fragments,
                outcome: Outcome::ToolCalls(calls),
            };
        }
        if !calls.is_empty() {
            warn!("Ignoring {} tool call(s), tool use is disabled.", calls.len());
        } else if reason == FinishReason::ToolCalls {
            warn!("Backend asked for tool calls but sent none.");
        }
        fragments.push(Fragment::Newline);
        Step {
            fragments,
            outcome: Outcome::Done,
        }
    }

    /// Closes a turn whose stream ended without a finish reason.
    pub fn finish(&mut self) -> Step {
        warn!("Response stream ended without a finish reason.");
        self.step(StreamChunk::finish(FinishReason::Stop))
    }
}

/// The streaming orchestrator. Holds the read-only collaborators of one
/// invocation.
pub struct Assistant {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    gate: Arc<dyn ConfirmationGate>,
    options: AssistOptions,
}

impl Assistant {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        gate: Arc<dyn ConfirmationGate>,
        options: AssistOptions,
    ) -> Self {
        Self {
            provider,
            tools,
            gate,
            options,
        }
    }

    /// Streams the reply to `messages`, running tools and resuming as the
    /// backend asks. An `Err` item is a transport failure and is the last
    /// item of the stream.
    pub fn assist(&self, messages: Vec<Message>) -> BoxStream<'_, Result<Fragment>> {
        Box::pin(try_stream! {
            let mut messages = messages;
            let mut rounds = 0;
            'turns: loop {
                debug!(
                    "Sending {} message(s) to {}/{}: {}",
                    messages.len(),
                    self.provider.kind(),
                    self.provider.model(),
                    serde_json::to_string(&messages).unwrap_or_default()
                );
                let request = CompletionRequest {
                    messages: &messages,
                    tools: self.options.with_tools.then_some(self.tools.as_ref()),
                    temperature: self.options.temperature,
                    top_p: self.options.top_p,
                };
                let mut chunks = self.provider.stream(request).await?;
                let mut turn = Turn::new(self.provider.model(), self.options.with_tools);

                let mut outcome = Outcome::Continue;
                while let Some(chunk) = chunks.next().await {
                    let step = turn.step(chunk?);
                    for fragment in step.fragments {
                        yield fragment;
                    }
                    if step.outcome != Outcome::Continue {
                        outcome = step.outcome;
                        break;
                    }
                }
                if outcome != Outcome::Continue {
                    // Usage-only chunks may trail the finishing one.
                    while let Some(Ok(chunk)) = chunks.next().await {
                        turn.record_usage(chunk);
                    }
                }
                drop(chunks);
                if outcome == Outcome::Continue {
                    let step = turn.finish();
                    for fragment in step.fragments {
                        yield fragment;
                    }
                    outcome = step.outcome;
                }
                if let Some(usage) = turn.usage() {
                    debug!("Usage: {usage}");
                }

                let Outcome::ToolCalls(calls) = outcome else {
                    break 'turns;
                };
                if rounds >= self.options.max_tool_rounds {
                    warn!(
                        "Stopping after {} tool round(s), {} call(s) left unanswered.",
                        rounds,
                        calls.len()
                    );
                    yield Fragment::Newline;
                    break 'turns;
                }

                for call in calls {
                    yield Fragment::ToolStatus(call.name.clone());
                    let output = self.run_tool(&call).await;
                    messages.push(Message::tool(ToolResult { call, output }).in_round(rounds));
                }
                yield Fragment::Newline;
                rounds += 1;
            }
        })
    }

    /// Runs one call and returns the text fed back to the backend. Nothing
    /// here fails: problems become the tool's output.
    async fn run_tool(&self, call: &ToolCallRequest) -> String {
        let arguments = call.arguments_or_empty();
        if let Err(e) = self.tools.bind(&call.name, arguments) {
            warn!("{e}");
            return format!("Error: {e}");
        }
        if !self.gate.confirm(&call.name, arguments).await {
            debug!(tool = %call.name, "tool call declined");
            return USER_CANCELLED.to_string();
        }

        debug!(tool = %call.name, arguments, "running tool");
        match self.tools.execute(&call.name, arguments).await {
            Ok(output) => {
                let output = strip_ansi_escapes::strip_str(&output);
                debug!(tool = %call.name, "tool output: {output}");
                output
            }
            Err(e) => {
                warn!("{e}");
                format!("Error: {e}")
            }
        }
    }
}
