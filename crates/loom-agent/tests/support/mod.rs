#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use loom_agent::{
    AgentRuntime, LocalExecutionEnvironment, RunStream, RuntimeConfig, StreamMessage,
    ToolBundle, ToolDescriptor, ToolEffect, ToolOutput, ToolRegistry, builtin_bundle,
};
use loom_llm::{
    Client, ConfigurationError, FinishReason, Message, ProviderAdapter, Request, Response,
    SDKError, ToolCall, Usage,
};
use loom_turnstore::MemorySessionStore;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted backend: answers each request with the next queued response,
/// then with `fallback` if set.
#[derive(Clone, Default)]
pub struct SequenceAdapter {
    pub responses: Arc<Mutex<VecDeque<Result<Response, SDKError>>>>,
    pub fallback: Option<Response>,
    pub requests: Arc<Mutex<Vec<Request>>>,
}

impl SequenceAdapter {
    pub fn new(responses: Vec<Response>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().map(Ok).collect())),
            ..Self::default()
        }
    }

    pub fn failing(error: SDKError) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from([Err(error)]))),
            ..Self::default()
        }
    }

    pub fn repeating(response: Response) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests mutex").clone()
    }
}

#[async_trait]
impl ProviderAdapter for SequenceAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        self.requests.lock().expect("requests mutex").push(request);
        let next = self.responses.lock().expect("responses mutex").pop_front();
        match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(SDKError::Configuration(ConfigurationError::new(
                "no response queued",
            ))),
        }
    }
}

/// Backend that never answers.
pub struct StalledAdapter;

#[async_trait]
impl ProviderAdapter for StalledAdapter {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _request: Request) -> Result<Response, SDKError> {
        std::future::pending::<Result<Response, SDKError>>().await
    }
}

pub fn usage() -> Usage {
    Usage {
        input_tokens: 10,
        output_tokens: 5,
        total_tokens: 15,
    }
}

pub fn text_response(id: &str, text: &str) -> Response {
    Response {
        id: id.to_string(),
        model: "test-model".to_string(),
        provider: "scripted".to_string(),
        message: Message::assistant(text),
        finish_reason: FinishReason::stop(),
        usage: usage(),
    }
}

pub fn tool_call_response(id: &str, calls: Vec<(&str, &str, Value)>) -> Response {
    let tool_calls = calls
        .into_iter()
        .map(|(call_id, name, arguments)| ToolCall::new(call_id, name, arguments))
        .collect();
    Response {
        id: id.to_string(),
        model: "test-model".to_string(),
        provider: "scripted".to_string(),
        message: Message::assistant_with_tool_calls("", tool_calls),
        finish_reason: FinishReason::tool_calls(),
        usage: usage(),
    }
}

pub fn client_with_adapter(adapter: Arc<dyn ProviderAdapter>) -> Arc<Client> {
    let mut client = Client::default();
    client
        .register_provider(adapter)
        .expect("adapter should register");
    Arc::new(client)
}

pub fn builtin_registry(working_directory: &Path) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(builtin_bundle(
            Arc::new(LocalExecutionEnvironment::new(working_directory)),
            None,
        ))
        .expect("builtin bundle should register");
    registry
}

pub const SLEEP_TOOL: &str = "mcp__fixtures__sleep";

/// `fixtures` bundle with a `sleep` tool that waits `ms` and echoes `label`.
/// Finished labels are recorded in completion order.
pub fn fixtures_bundle(completed: Arc<Mutex<Vec<String>>>) -> ToolBundle {
    ToolBundle::new("fixtures", "0.1.0").with_tool(
        ToolDescriptor::new(
            "sleep",
            "Sleeps, then echoes the label.",
            json!({
                "type": "object",
                "required": ["label", "ms"],
                "properties": {
                    "label": { "type": "string" },
                    "ms": { "type": "integer", "minimum": 0 }
                },
                "additionalProperties": false
            }),
            move |args| {
                let completed = completed.clone();
                async move {
                    let label = args["label"].as_str().unwrap_or_default().to_string();
                    let ms = args["ms"].as_u64().unwrap_or_default();
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    completed.lock().expect("completed mutex").push(label.clone());
                    Ok(ToolOutput::text(format!("slept {label}")))
                }
            },
        )
        .with_effect(ToolEffect::ReadOnly),
    )
}

pub fn runtime_with(
    client: Arc<Client>,
    registry: ToolRegistry,
) -> (AgentRuntime, MemorySessionStore) {
    let store = MemorySessionStore::new();
    let runtime = AgentRuntime::new(
        RuntimeConfig::default(),
        client,
        Arc::new(store.clone()),
        registry,
    )
    .expect("runtime should build");
    (runtime, store)
}

pub async fn collect(stream: RunStream) -> Vec<StreamMessage> {
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("stream should terminate")
}

pub fn kinds(messages: &[StreamMessage]) -> Vec<&'static str> {
    messages.iter().map(StreamMessage::kind).collect()
}

pub fn session_id(messages: &[StreamMessage]) -> String {
    match messages.first() {
        Some(StreamMessage::Init { session_id, .. }) => session_id.clone(),
        other => panic!("expected init first, got {other:?}"),
    }
}
