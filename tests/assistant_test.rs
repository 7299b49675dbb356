use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;
use term_assistant::assistant::{AssistOptions, Assistant};
use term_assistant::confirm::ConfirmationGate;
use term_assistant::context::compose_messages;
use term_assistant::message::{
    FinishReason, Fragment, Message, Role, StreamChunk, ToolCallDelta,
};
use term_assistant::provider::{ChunkStream, CompletionRequest, Provider, ProviderKind};
use term_assistant::tool_registry::ToolRegistry;

/// Replays canned turns and records every request it receives.
struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<Result<StreamChunk>>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    tools_offered: Mutex<Vec<bool>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<Result<StreamChunk>>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            tools_offered: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        Err(anyhow!("no catalog"))
    }

    async fn stream(&self, request: CompletionRequest<'_>) -> Result<ChunkStream> {
        self.requests.lock().unwrap().push(request.messages.to_vec());
        self.tools_offered.lock().unwrap().push(request.tools.is_some());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected request"))?;
        Ok(Box::pin(futures::stream::iter(turn)))
    }
}

/// Answers every confirmation the same way and counts the questions.
struct CountingGate {
    approve: bool,
    asked: AtomicUsize,
}

impl CountingGate {
    fn new(approve: bool) -> Arc<Self> {
        Arc::new(Self {
            approve,
            asked: AtomicUsize::new(0),
        })
    }

    fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationGate for CountingGate {
    async fn confirm(&self, _tool_name: &str, _arguments: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.approve
    }
}

fn options(with_tools: bool) -> AssistOptions {
    AssistOptions {
        temperature: None,
        top_p: None,
        with_tools,
        max_tool_rounds: 10,
    }
}

fn call(index: usize, id: &str, name: &str, arguments: &str) -> Result<StreamChunk> {
    Ok(StreamChunk::tool_call(ToolCallDelta {
        index: Some(index),
        call_id: Some(id.to_string()),
        name: Some(name.to_string()),
        arguments: Some(arguments.to_string()),
    }))
}

fn header() -> Fragment {
    Fragment::Header {
        role: Role::Assistant,
        model: "stub-model".to_string(),
    }
}

async fn run(assistant: &Assistant, messages: Vec<Message>) -> Vec<Result<Fragment>> {
    assistant.assist(messages).collect().await
}

async fn run_ok(assistant: &Assistant, messages: Vec<Message>) -> Vec<Fragment> {
    run(assistant, messages)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

#[tokio::test]
async fn test_plain_answer_yields_three_fragments() {
    let provider = ScriptedProvider::new(vec![vec![
        Ok(StreamChunk::role(Role::Assistant)),
        Ok(StreamChunk::content("a.txt\nb.txt")),
        Ok(StreamChunk::finish(FinishReason::Stop)),
    ]]);
    let gate = CountingGate::new(true);
    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(ToolRegistry::with_builtin_tools()),
        gate.clone(),
        options(false),
    );

    let messages = compose_messages(&[], &["list files".to_string()]);
    let fragments = run_ok(&assistant, messages).await;
    assert_eq!(
        fragments,
        vec![
            header(),
            Fragment::Content("a.txt\nb.txt".to_string()),
            Fragment::Newline
        ]
    );
    let raw: Vec<&str> = fragments.iter().filter_map(Fragment::content).collect();
    assert_eq!(raw, vec!["a.txt\nb.txt"]);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn test_declined_call_feeds_back_user_cancelled() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("marker");
    let command = serde_json::json!({ "command": format!("touch {}", marker.display()) }).to_string();

    let provider = ScriptedProvider::new(vec![
        vec![
            Ok(StreamChunk::role(Role::Assistant)),
            call(0, "call_1", "run_command", &command),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ],
        vec![
            Ok(StreamChunk::role(Role::Assistant)),
            Ok(StreamChunk::content("Okay, I will not run it.")),
            Ok(StreamChunk::finish(FinishReason::Stop)),
        ],
    ]);
    let gate = CountingGate::new(false);
    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(ToolRegistry::with_builtin_tools()),
        gate.clone(),
        options(true),
    );

    let fragments = run_ok(&assistant, vec![Message::user("touch the marker")]).await;
    assert!(fragments.contains(&Fragment::ToolStatus("run_command".to_string())));
    assert_eq!(gate.asked(), 1);
    assert!(!marker.exists());

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let follow_up = requests[1].last().unwrap();
    assert_eq!(follow_up.role, Role::Tool);
    assert_eq!(follow_up.text(), "User cancelled.");
    assert_eq!(follow_up.tool_call_id(), Some("call_1"));
}

#[tokio::test]
async fn test_resumed_turn_follows_the_requesting_turn() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    fs::write(&first, "one").unwrap();
    fs::write(&second, "two").unwrap();
    let args = |path: &std::path::Path| {
        serde_json::json!({ "file_path": path.display().to_string() }).to_string()
    };

    let provider = ScriptedProvider::new(vec![
        vec![
            Ok(StreamChunk::role(Role::Assistant)),
            call(0, "call_a", "read_file", &args(&first)),
            call(1, "call_b", "read_file", &args(&second)),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ],
        vec![
            Ok(StreamChunk::role(Role::Assistant)),
            Ok(StreamChunk::content("one and two")),
            Ok(StreamChunk::finish(FinishReason::Stop)),
        ],
    ]);
    let gate = CountingGate::new(true);
    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(ToolRegistry::with_builtin_tools()),
        gate.clone(),
        options(true),
    );

    let original = vec![
        Message::system("You are a terminal assistant."),
        Message::user("compare the files"),
    ];
    let fragments = run_ok(&assistant, original.clone()).await;
    assert_eq!(
        fragments,
        vec![
            header(),
            Fragment::ToolStatus("read_file".to_string()),
            Fragment::ToolStatus("read_file".to_string()),
            Fragment::Newline,
            header(),
            Fragment::Content("one and two".to_string()),
            Fragment::Newline,
        ]
    );
    assert_eq!(gate.asked(), 2);

    // Prior messages are untouched; exactly one tool message per result.
    let requests = provider.requests();
    assert_eq!(requests[0], original);
    assert_eq!(requests[1].len(), original.len() + 2);
    assert_eq!(requests[1][..original.len()], original[..]);
    assert_eq!(requests[1][2].text(), "one");
    assert_eq!(requests[1][2].tool_call_id(), Some("call_a"));
    assert_eq!(requests[1][3].text(), "two");
    assert_eq!(requests[1][3].tool_call_id(), Some("call_b"));
    assert_eq!(requests[1][2].round, Some(0));
    assert_eq!(requests[1][3].round, Some(0));
}

#[tokio::test]
async fn test_disabled_tools_never_reach_the_gate() {
    let provider = ScriptedProvider::new(vec![vec![
        Ok(StreamChunk::role(Role::Assistant)),
        call(0, "call_1", "run_command", r#"{"command":"ls"}"#),
        Ok(StreamChunk::finish(FinishReason::ToolCalls)),
    ]]);
    let gate = CountingGate::new(true);
    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(ToolRegistry::with_builtin_tools()),
        gate.clone(),
        options(false),
    );

    let fragments = run_ok(&assistant, vec![Message::user("list files")]).await;
    assert!(!fragments.iter().any(Fragment::is_tool_status));
    assert_eq!(gate.asked(), 0);
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(*provider.tools_offered.lock().unwrap(), vec![false]);
}

#[tokio::test]
async fn test_unknown_tool_is_reported_to_the_model() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Ok(StreamChunk::role(Role::Assistant)),
            call(0, "call_1", "format_disk", "{}"),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ],
        vec![
            Ok(StreamChunk::role(Role::Assistant)),
            Ok(StreamChunk::finish(FinishReason::Stop)),
        ],
    ]);
    let gate = CountingGate::new(true);
    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(ToolRegistry::with_builtin_tools()),
        gate.clone(),
        options(true),
    );

    run_ok(&assistant, vec![Message::user("clean up")]).await;
    assert_eq!(gate.asked(), 0);
    let requests = provider.requests();
    assert_eq!(
        requests[1].last().unwrap().text(),
        "Error: Unknown tool 'format_disk'"
    );
}

#[tokio::test]
async fn test_bad_arguments_are_reported_to_the_model() {
    let provider = ScriptedProvider::new(vec![
        vec![
            call(0, "call_1", "read_file", r#"{"path":"a.txt"}"#),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ],
        vec![Ok(StreamChunk::finish(FinishReason::Stop))],
    ]);
    let gate = CountingGate::new(true);
    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(ToolRegistry::with_builtin_tools()),
        gate.clone(),
        options(true),
    );

    run_ok(&assistant, vec![Message::user("read a.txt")]).await;
    assert_eq!(gate.asked(), 0);
    let feedback = provider.requests()[1].last().unwrap().text().to_string();
    assert!(feedback.starts_with("Error: Invalid invocation of read_file"));
    assert!(feedback.contains("file_path"));
}

#[tokio::test]
async fn test_transport_error_ends_the_stream() {
    let provider = ScriptedProvider::new(vec![vec![
        Ok(StreamChunk::role(Role::Assistant)),
        Ok(StreamChunk::content("partial")),
        Err(anyhow!("connection reset by peer")),
        Ok(StreamChunk::content("never seen")),
    ]]);
    let assistant = Assistant::new(
        provider,
        Arc::new(ToolRegistry::with_builtin_tools()),
        CountingGate::new(true),
        options(true),
    );

    let items = run(&assistant, vec![Message::user("hi")]).await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), &header());
    assert_eq!(
        items[1].as_ref().unwrap(),
        &Fragment::Content("partial".to_string())
    );
    let err = items[2].as_ref().unwrap_err();
    assert!(err.to_string().contains("connection reset"));
}

#[tokio::test]
async fn test_tool_rounds_are_bounded() {
    let looping_turn = || {
        vec![
            Ok(StreamChunk::role(Role::Assistant)),
            call(0, "call_1", "read_file", r#"{"file_path":"/nonexistent/x"}"#),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ]
    };
    let provider = ScriptedProvider::new(vec![looping_turn(), looping_turn(), looping_turn()]);
    let gate = CountingGate::new(true);
    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(ToolRegistry::with_builtin_tools()),
        gate.clone(),
        AssistOptions {
            max_tool_rounds: 1,
            ..options(true)
        },
    );

    let fragments = run_ok(&assistant, vec![Message::user("loop")]).await;
    assert_eq!(provider.requests().len(), 2);
    assert_eq!(gate.asked(), 1);
    assert_eq!(fragments.last(), Some(&Fragment::Newline));
    assert_eq!(
        provider.requests()[1].last().unwrap().text(),
        "File not found: /nonexistent/x"
    );
}

#[tokio::test]
async fn test_stream_without_finish_reason_still_ends_cleanly() {
    let provider = ScriptedProvider::new(vec![vec![
        Ok(StreamChunk::role(Role::Assistant)),
        Ok(StreamChunk::content("cut short")),
    ]]);
    let assistant = Assistant::new(
        provider,
        Arc::new(ToolRegistry::with_builtin_tools()),
        CountingGate::new(true),
        options(true),
    );

    let fragments = run_ok(&assistant, vec![Message::user("hi")]).await;
    assert_eq!(
        fragments,
        vec![
            header(),
            Fragment::Content("cut short".to_string()),
            Fragment::Newline
        ]
    );
}
