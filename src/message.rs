//! # Conversation Data Model
//!
//! Messages make up the prompt sent to a backend, stream chunks are the
//! normalized form of whatever a backend sends back, and fragments are what
//! the orchestrator hands to its caller.

use console::style;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Maps a wire role marker onto a role. Gemini calls the assistant `model`.
    pub fn from_wire(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" | "model" => Some(Role::Assistant),
            "tool" | "function" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of a conversation. Once sent, a message is never mutated;
/// follow-up turns append to the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    /// The call this message answers. Only set on tool-role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
    /// Tool round a tool message belongs to. Tool messages of one round
    /// answer the calls of a single backend turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_call: None,
            round: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_call: None,
            round: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_call: None,
            round: None,
        }
    }

    /// Builds the tool-role message that feeds a result back to the model.
    pub fn tool(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: Some(result.output),
            tool_call: Some(result.call),
            round: None,
        }
    }

    pub fn in_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call.as_ref().and_then(|c| c.call_id.as_deref())
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A fully assembled request from the backend to run a local tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Absent for backends without multi-call support.
    pub call_id: Option<String>,
    pub name: String,
    /// Raw JSON argument text, as concatenated from the stream.
    pub arguments: String,
}

impl ToolCallRequest {
    /// Argument text with the empty string treated as an empty object.
    pub fn arguments_or_empty(&self) -> &str {
        if self.arguments.trim().is_empty() {
            "{}"
        } else {
            &self.arguments
        }
    }
}

/// A partial tool call as it appears in one stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the call within the turn, for backends that stream calls
    /// incrementally.
    pub index: Option<usize>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub call: ToolCallRequest,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    ToolCalls,
    Stop,
}

/// Provider-neutral view of one streamed chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Only expected on the first chunk of a turn, though some backends
    /// repeat it on every chunk.
    pub role: Option<Role>,
    /// Model id as reported by the backend.
    pub model: Option<String>,
    /// `Some("")` is a real (empty) delta and is forwarded as such.
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<FinishReason>,
    /// Raw usage metadata, logged at debug level.
    pub usage: Option<serde_json::Value>,
}

impl StreamChunk {
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Default::default()
        }
    }
}

/// One unit of output handed to the caller of `assist`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Speaker framing, emitted once per turn.
    Header { role: Role, model: String },
    /// Model output, forwarded exactly as received.
    Content(String),
    /// Announces that a tool is about to be used.
    ToolStatus(String),
    Newline,
}

impl Fragment {
    /// Returns the raw model text, or `None` for framing fragments.
    pub fn content(&self) -> Option<&str> {
        match self {
            Fragment::Content(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_status(&self) -> bool {
        matches!(self, Fragment::ToolStatus(_))
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Header { role, model } => {
                write!(f, "{} ", style(format!("{role}({model}):")).green())
            }
            Fragment::Content(text) => f.write_str(text),
            Fragment::ToolStatus(name) => {
                writeln!(f, "{}", style(format!("Using tool {name}...")).green())
            }
            Fragment::Newline => writeln!(f),
        }
    }
}
