// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! End-to-end tests for the agent loop against the scripted mock provider:
//! delegated tool round trips, restricted-tool suppression, parallel
//! sub-agents, cancellation, budgets, and credit accounting.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use otto_agent::{run_root, AgentDeps, RequestContext};
use otto_billing::InMemoryAccounts;
use otto_config::{Config, TemplateRegistry};
use otto_model::{MockProvider, MockTurn};
use otto_proto::{
    AgentOutput, AgentTemplate, McpServerConfig, MessageContent, ProjectFileContext, Role,
    SessionState, StreamEvent, ToolCall, ToolResultOutput,
};
use otto_tools::{builtin_registry, BridgeError, ClientBridge, ToolCallReply};

// ─── Test bridge ─────────────────────────────────────────────────────────────

/// Records every chunk and answers delegated calls from a canned reply
/// table, after an optional per-call delay.
struct TestBridge {
    chunks: Mutex<Vec<StreamEvent>>,
    replies: Mutex<HashMap<String, Vec<ToolResultOutput>>>,
    calls: Mutex<Vec<ToolCall>>,
}

impl TestBridge {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            chunks: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn reply_with(&self, tool: &str, output: Vec<ToolResultOutput>) {
        self.replies.lock().unwrap().insert(tool.to_string(), output);
    }

    fn chunks(&self) -> Vec<StreamEvent> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientBridge for TestBridge {
    async fn send_chunk(&self, _user_input_id: &str, chunk: StreamEvent) {
        self.chunks.lock().unwrap().push(chunk);
    }

    async fn request_tool_call(
        &self,
        _user_input_id: &str,
        call: &ToolCall,
        _mcp: Option<&McpServerConfig>,
        cancel: &CancellationToken,
    ) -> Result<ToolCallReply, BridgeError> {
        self.calls.lock().unwrap().push(call.clone());
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let output = self
            .replies
            .lock()
            .unwrap()
            .get(&call.tool_name)
            .cloned()
            .unwrap_or_else(|| vec![ToolResultOutput::json(json!({"ok": true}))]);
        Ok(ToolCallReply {
            output,
            credits_used: 0,
        })
    }

    async fn request_files(
        &self,
        _user_input_id: &str,
        _paths: &[String],
        _cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, BridgeError> {
        Ok(BTreeMap::new())
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn template(id: &str, tools: &[&str], extra: serde_json::Value) -> AgentTemplate {
    let mut base = json!({
        "id": id,
        "model": "mock",
        "toolNames": tools,
        "includeMessageHistory": false,
    });
    if let (Some(dst), Some(src)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(base).unwrap()
}

fn registry_with(templates: &[AgentTemplate]) -> TemplateRegistry {
    let mut overrides = BTreeMap::new();
    for t in templates {
        overrides.insert(t.id.clone(), t.clone());
    }
    TemplateRegistry::builtin().with_overrides(&overrides)
}

fn make_deps(
    provider: MockProvider,
    bridge: Arc<TestBridge>,
    templates: TemplateRegistry,
) -> AgentDeps {
    AgentDeps {
        provider: Arc::new(provider),
        registry: Arc::new(builtin_registry(None, None)),
        templates: Arc::new(templates),
        bridge,
        billing: Arc::new(InMemoryAccounts::new()),
        config: Arc::new(Config::default()),
        file_context: Arc::new(ProjectFileContext::default()),
        http: reqwest::Client::new(),
        ctx: RequestContext::anonymous("sess-1", "p1"),
    }
}

fn texts(chunks: &[StreamEvent]) -> String {
    chunks
        .iter()
        .filter_map(|c| match c {
            StreamEvent::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_only_turn_finishes_with_last_message() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text("hello there").with_usage(1000, 1000));
    let bridge = TestBridge::new();
    let root = template("root", &["end_turn"], json!({}));
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let mut session = SessionState::fresh("root", 0);
    let output = run_root(&mut session, &root, Some("hi".into()), None, vec![], &deps).await;

    match output {
        AgentOutput::Success { message, .. } => {
            assert_eq!(message.as_deref(), Some("hello there"));
        }
        other => panic!("unexpected output: {other:?}"),
    }
    // 1000 in + 1000 out on the default price table rounds up to 3 credits.
    assert_eq!(session.main_agent_state.credits_used, 3);
    assert_eq!(session.main_agent_state.direct_credits_used, 3);

    let chunks = bridge.chunks();
    assert!(matches!(chunks.first(), Some(StreamEvent::Start { .. })));
    assert!(matches!(
        chunks.last(),
        Some(StreamEvent::Finish { total_cost: 3, .. })
    ));
}

#[tokio::test]
async fn client_delegated_tool_round_trip() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text(
        "ok, listing.\n<tool:list_directory {\"path\":\".\"}>",
    ));
    mock.push_turn(MockTurn::text("all done<tool:end_turn {}>"));

    let bridge = TestBridge::new();
    bridge.reply_with(
        "list_directory",
        vec![ToolResultOutput::json(
            json!({"files": ["a.ts"], "directories": []}),
        )],
    );

    let root = template("root", &["end_turn", "list_directory"], json!({}));
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let mut session = SessionState::fresh("root", 0);
    let output = run_root(&mut session, &root, Some("list".into()), None, vec![], &deps).await;
    assert!(matches!(output, AgentOutput::Success { .. }));

    // Chunk order: start, text, the delegated call and its result, then the
    // second step's text and its end_turn pair, then finish.
    let chunks = bridge.chunks();
    let kinds: Vec<&'static str> = chunks
        .iter()
        .map(|c| match c {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Text { .. } => "text",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Finish { .. } => "finish",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "start",
            "text",
            "tool_call",
            "tool_result",
            "text",
            "tool_call",
            "tool_result",
            "finish"
        ]
    );

    // The history pairs the call with its result.
    let history = &session.main_agent_state.message_history;
    let call_id = history
        .iter()
        .find_map(|m| match &m.content {
            MessageContent::ToolCall { tool_call_id, tool_name, .. }
                if tool_name == "list_directory" =>
            {
                Some(tool_call_id.clone())
            }
            _ => None,
        })
        .expect("tool call recorded");
    let result = history
        .iter()
        .find_map(|m| match &m.content {
            MessageContent::ToolResult { tool_call_id, content, .. }
                if *tool_call_id == call_id =>
            {
                Some(content.clone())
            }
            _ => None,
        })
        .expect("tool result recorded");
    assert_eq!(
        result,
        vec![ToolResultOutput::json(
            json!({"files": ["a.ts"], "directories": []})
        )]
    );
    assert_eq!(bridge.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn restricted_tool_is_suppressed_entirely() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text(
        "<tool:write_file {\"path\":\"a\",\"instructions\":\"b\",\"content\":\"c\"}>",
    ));

    let bridge = TestBridge::new();
    let root = template("root", &["end_turn"], json!({}));
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let mut session = SessionState::fresh("root", 0);
    let _ = run_root(&mut session, &root, Some("write".into()), None, vec![], &deps).await;

    let chunks = bridge.chunks();
    assert!(
        !chunks
            .iter()
            .any(|c| matches!(c, StreamEvent::ToolCall { tool_name, .. } if tool_name == "write_file")),
        "no tool_call chunk for the restricted tool"
    );
    let error = chunks
        .iter()
        .find_map(|c| match c {
            StreamEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
        .expect("error chunk emitted");
    assert!(error.contains("not currently available"));

    // Nothing about the call reached the history.
    assert!(session
        .main_agent_state
        .message_history
        .iter()
        .all(|m| m.tool_call_id().is_none()));
    // The call never reached the client either.
    assert!(bridge.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_markup_is_rejected_as_unknown_tool() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text("<tool:glob {not json}>"));
    mock.push_turn(MockTurn::text("<tool:end_turn {}>"));

    let bridge = TestBridge::new();
    let root = template("root", &["end_turn", "glob"], json!({}));
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let mut session = SessionState::fresh("root", 0);
    let _ = run_root(&mut session, &root, Some("go".into()), None, vec![], &deps).await;

    let rejected = session
        .main_agent_state
        .message_history
        .iter()
        .find_map(|m| match &m.content {
            MessageContent::ToolResult { tool_name, content, .. }
                if tool_name == "malformed_tool" =>
            {
                content[0].as_error_message().map(str::to_string)
            }
            _ => None,
        })
        .expect("malformed call got an error result");
    assert!(rejected.contains("unknown tool"));
}

#[tokio::test]
async fn spawn_agents_run_in_parallel_and_join_in_spawn_order() {
    let mock = MockProvider::new();
    mock.route(
        "task alpha",
        vec![MockTurn::text("ra<tool:end_turn {}>")
            .with_delay(Duration::from_millis(200))
            .with_usage(1000, 1000)],
    );
    mock.route(
        "task beta",
        vec![MockTurn::text("rb<tool:end_turn {}>")
            .with_delay(Duration::from_millis(100))
            .with_usage(1000, 1000)],
    );
    mock.push_turn(MockTurn::text(
        "<tool:spawn_agents {\"agents\":[\
         {\"agent_type\":\"researcher\",\"prompt\":\"task alpha\"},\
         {\"agent_type\":\"researcher\",\"prompt\":\"task beta\"}]}>",
    ));
    mock.push_turn(MockTurn::text("done<tool:end_turn {}>").with_usage(1000, 1000));

    let bridge = TestBridge::new();
    let researcher = template("researcher", &["end_turn"], json!({}));
    let lead = template(
        "lead",
        &["end_turn", "spawn_agents"],
        json!({"spawnableAgents": ["researcher"]}),
    );
    let deps = make_deps(
        mock,
        Arc::clone(&bridge),
        registry_with(&[lead.clone(), researcher]),
    );

    let mut session = SessionState::fresh("lead", 0);
    let started = Instant::now();
    let output = run_root(&mut session, &lead, Some("go".into()), None, vec![], &deps).await;
    let elapsed = started.elapsed();
    assert!(matches!(output, AgentOutput::Success { .. }));

    // Join time is max(200, 100)ms, not the 300ms sum.
    assert!(elapsed >= Duration::from_millis(190), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(290), "elapsed {elapsed:?}");

    let chunks = bridge.chunks();
    let starts = chunks
        .iter()
        .filter(|c| matches!(c, StreamEvent::SubagentStart { .. }))
        .count();
    let finishes = chunks
        .iter()
        .filter(|c| matches!(c, StreamEvent::SubagentFinish { .. }))
        .count();
    assert_eq!(starts, 2);
    assert_eq!(finishes, 2);

    // The joined result is ordered by spawn index (alpha before beta),
    // regardless of finish order.
    let joined = session
        .main_agent_state
        .message_history
        .iter()
        .find_map(|m| match &m.content {
            MessageContent::ToolResult { tool_name, content, .. }
                if tool_name == "spawn_agents" =>
            {
                Some(content.clone())
            }
            _ => None,
        })
        .expect("spawn result synthesized");
    let ToolResultOutput::Json { value } = &joined[0] else {
        panic!("spawn result must be json");
    };
    let outputs = value.as_array().unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0]["output"]["message"], "ra");
    assert_eq!(outputs[1]["output"]["message"], "rb");

    // Cost roll-up: children's credits land in credits_used only.
    let agent = &session.main_agent_state;
    assert_eq!(agent.direct_credits_used, 3);
    assert_eq!(agent.credits_used, 3 + 3 + 3);
}

#[tokio::test]
async fn cancellation_mid_stream_aborts_without_partial_messages() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text("this arrives far too late").with_delay(Duration::from_secs(5)));

    let bridge = TestBridge::new();
    let root = template("root", &["end_turn"], json!({}));
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let cancel = deps.ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        // Repeated cancels are no-ops.
        cancel.cancel();
    });

    let mut session = SessionState::fresh("root", 0);
    let started = Instant::now();
    let output = run_root(&mut session, &root, Some("hi".into()), None, vec![], &deps).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    match output {
        AgentOutput::Error { message } => assert!(message.contains("aborted")),
        other => panic!("unexpected output: {other:?}"),
    }
    // Only the user prompt was committed; no partial assistant message.
    let history = &session.main_agent_state.message_history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    // The stream still terminates with a finish chunk.
    assert!(matches!(
        bridge.chunks().last(),
        Some(StreamEvent::Finish { .. })
    ));
}

#[tokio::test]
async fn step_budget_exhaustion_terminates_with_error() {
    let mock = MockProvider::new();
    for _ in 0..2 {
        mock.push_turn(MockTurn::text("<tool:glob {\"pattern\":\"*\"}>"));
    }

    let bridge = TestBridge::new();
    let root = template("root", &["end_turn", "glob"], json!({}));
    let mut config = Config::default();
    config.agent.max_steps = 2;
    let mut deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));
    deps.config = Arc::new(config);

    let mut session = SessionState::fresh("root", 0);
    let output = run_root(&mut session, &root, Some("loop".into()), None, vec![], &deps).await;
    match output {
        AgentOutput::Error { message } => assert_eq!(message, "step budget exhausted"),
        other => panic!("unexpected output: {other:?}"),
    }
    assert_eq!(session.main_agent_state.steps_remaining, 0);
}

#[tokio::test]
async fn set_output_records_structured_output() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text(
        "<tool:set_output {\"output\":{\"verdict\":\"ship it\"}}>",
    ));

    let bridge = TestBridge::new();
    let root = template(
        "root",
        &["end_turn", "set_output"],
        json!({"outputMode": "structured_output"}),
    );
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let mut session = SessionState::fresh("root", 0);
    let output = run_root(&mut session, &root, Some("review".into()), None, vec![], &deps).await;
    match output {
        AgentOutput::Success { value: Some(v), .. } => assert_eq!(v["verdict"], "ship it"),
        other => panic!("unexpected output: {other:?}"),
    }
}

#[tokio::test]
async fn structured_output_agent_must_call_set_output() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text("just text<tool:end_turn {}>"));

    let bridge = TestBridge::new();
    let root = template(
        "root",
        &["end_turn", "set_output"],
        json!({"outputMode": "structured_output"}),
    );
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let mut session = SessionState::fresh("root", 0);
    let output = run_root(&mut session, &root, Some("review".into()), None, vec![], &deps).await;
    match output {
        AgentOutput::Error { message } => assert!(message.contains("set_output")),
        other => panic!("unexpected output: {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_balance_becomes_a_fatal_agent_error() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn::text("expensive thoughts").with_usage(1000, 1000));

    let bridge = TestBridge::new();
    let root = template("root", &["end_turn"], json!({}));
    let mut deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let accounts = InMemoryAccounts::new();
    accounts.add_user("u1", "tok", 0).await;
    deps.billing = Arc::new(accounts);
    deps.ctx.user_id = Some("u1".into());

    let mut session = SessionState::fresh("root", 0);
    let output = run_root(&mut session, &root, Some("hi".into()), None, vec![], &deps).await;
    match output {
        AgentOutput::Error { message } => assert!(message.contains("insufficient credits")),
        other => panic!("unexpected output: {other:?}"),
    }
}

#[tokio::test]
async fn text_streaming_preserves_chunk_splitting() {
    let mock = MockProvider::new();
    mock.push_turn(MockTurn {
        delay: Duration::ZERO,
        chunks: vec![
            otto_model::ModelChunk::Text("hel".into()),
            otto_model::ModelChunk::Text("lo ".into()),
            otto_model::ModelChunk::Text("world".into()),
        ],
    });

    let bridge = TestBridge::new();
    let root = template("root", &["end_turn"], json!({}));
    let deps = make_deps(mock, Arc::clone(&bridge), registry_with(&[root.clone()]));

    let mut session = SessionState::fresh("root", 0);
    let _ = run_root(&mut session, &root, Some("hi".into()), None, vec![], &deps).await;

    let text_chunks: Vec<String> = bridge
        .chunks()
        .iter()
        .filter_map(|c| match c {
            StreamEvent::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(text_chunks, vec!["hel", "lo ", "world"]);
    assert_eq!(texts(&bridge.chunks()), "hello world");
    assert_eq!(
        session.main_agent_state.last_assistant_text(),
        Some("hello world")
    );
}
