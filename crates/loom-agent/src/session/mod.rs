//! The execution loop: one task driven against the reasoning backend.

mod types;
mod utils;

pub use types::{LoopSettings, LoopState};
use utils::{current_timestamp, history_to_messages};

use crate::events::{EventSink, LoopEvent, RunOutcome};
use crate::tools::parse_tool_arguments;
use crate::{
    AgentError, PermissionDecision, PermissionGate, ToolError, ToolInvocation, ToolRegistry,
    ToolResult, Turn,
};
use loom_llm::{Client, Message, Request, Response, SDKError, ToolCall, Usage};
use loom_turnstore::{SessionRecord, SessionStatus, SessionStore, turn_idempotency_key};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared collaborators of every loop.
#[derive(Clone)]
pub struct LoopServices {
    pub store: Arc<dyn SessionStore>,
    pub client: Arc<Client>,
    pub registry: Arc<ToolRegistry>,
}

struct PendingCall {
    call_id: String,
    sequence_no: u64,
    tool_name: String,
    arguments: Result<Value, ToolError>,
}

enum Dispatch {
    Settled { result: ToolResult, denied: bool },
    Run(Value),
}

enum Slot {
    Settled { result: ToolResult, denied: bool },
    Running(JoinHandle<ToolResult>),
}

pub struct Session {
    record: SessionRecord,
    services: LoopServices,
    gate: PermissionGate,
    settings: LoopSettings,
    history: Vec<Turn>,
    state: LoopState,
    sink: EventSink,
    cancel: CancellationToken,
    steps: usize,
    usage: Usage,
    next_sequence_no: u64,
}

impl Session {
    /// Loads the session's stored turns and prepares a loop in `Idle`.
    pub async fn open(
        record: SessionRecord,
        services: LoopServices,
        gate: PermissionGate,
        settings: LoopSettings,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<Self, AgentError> {
        let history = services
            .store
            .turns(&record.session_id)
            .await?
            .iter()
            .map(Turn::from_stored)
            .collect::<Result<Vec<_>, _>>()?;
        let next_sequence_no = history
            .iter()
            .filter_map(Turn::sequence_no)
            .max()
            .unwrap_or(0)
            + 1;
        Ok(Self {
            record,
            services,
            gate,
            settings,
            history,
            state: LoopState::Idle,
            sink,
            cancel,
            steps: 0,
            usage: Usage::default(),
            next_sequence_no,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.session_id
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn transition_to(&mut self, next_state: LoopState) -> Result<(), AgentError> {
        if !self.state.can_transition_to(&next_state) {
            return Err(AgentError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next_state.to_string(),
            });
        }
        if self.state != next_state {
            tracing::debug!(session_id = %self.record.session_id, from = %self.state, to = %next_state, "loop state");
            self.state = next_state;
        }
        Ok(())
    }

    /// Runs one task to a terminal state. The stored session status follows
    /// the outcome; a cancelled session stays `active`.
    pub async fn run(&mut self, prompt: impl Into<String>) -> RunOutcome {
        let prompt = prompt.into();
        tracing::info!(
            session_id = %self.record.session_id,
            model = %self.settings.model,
            prior_turns = self.history.len(),
            "task started"
        );
        let outcome = match self.drive(prompt).await {
            Ok(result) => RunOutcome::Completed {
                result,
                steps: self.steps,
                usage: self.usage.clone(),
            },
            Err(AgentError::Cancelled) => RunOutcome::Cancelled,
            Err(error) => RunOutcome::Errored(error),
        };

        let (state, status) = match &outcome {
            RunOutcome::Completed { .. } => (LoopState::Completed, Some(SessionStatus::Completed)),
            RunOutcome::Errored(_) => (LoopState::Errored, Some(SessionStatus::Errored)),
            RunOutcome::Cancelled => (LoopState::Cancelled, None),
        };
        if let Err(error) = self.transition_to(state) {
            tracing::warn!(session_id = %self.record.session_id, error = %error, "terminal transition rejected");
        }
        if let Some(status) = status {
            match self
                .services
                .store
                .set_status(&self.record.session_id, status)
                .await
            {
                Ok(record) => self.record = record,
                Err(error) => {
                    tracing::warn!(session_id = %self.record.session_id, error = %error, "failed to record session status");
                }
            }
        }

        match &outcome {
            RunOutcome::Errored(error) => tracing::warn!(
                session_id = %self.record.session_id,
                steps = self.steps,
                code = error.code(),
                error = %error,
                "task errored"
            ),
            other => tracing::info!(
                session_id = %self.record.session_id,
                steps = self.steps,
                outcome = other.as_str(),
                "task finished"
            ),
        }
        outcome
    }

    async fn drive(&mut self, prompt: String) -> Result<String, AgentError> {
        self.transition_to(LoopState::Planning)?;
        if self.record.status != SessionStatus::Active {
            self.record = self
                .services
                .store
                .set_status(&self.record.session_id, SessionStatus::Active)
                .await?;
        }
        self.append_turn(Turn::User {
            content: prompt,
            timestamp: current_timestamp(),
        })
        .await?;

        loop {
            self.ensure_not_cancelled()?;
            if self.steps >= self.settings.step_limit {
                return Err(AgentError::StepLimitExceeded {
                    limit: self.settings.step_limit,
                });
            }

            let response = self.plan().await?;
            self.steps += 1;
            self.usage += response.usage.clone();

            let text = response.text();
            let tool_calls = response.tool_calls();
            self.append_turn(Turn::Assistant {
                content: text.clone(),
                usage: response.usage.clone(),
                response_id: Some(response.id.clone()),
                timestamp: current_timestamp(),
            })
            .await?;
            if !text.is_empty() {
                self.emit(LoopEvent::AssistantText { text: text.clone() })
                    .await;
            }

            if tool_calls.is_empty() {
                return Ok(text);
            }

            self.transition_to(LoopState::AwaitingPermission)?;
            let pending = self.record_tool_requests(tool_calls).await?;
            let dispatches = self.authorize(&pending).await?;

            self.transition_to(LoopState::Executing)?;
            let results = self.execute(&pending, dispatches).await?;
            self.ensure_not_cancelled()?;

            for (call, (result, denied)) in pending.iter().zip(results) {
                self.append_turn(Turn::ToolResult {
                    call_id: call.call_id.clone(),
                    sequence_no: call.sequence_no,
                    tool_name: call.tool_name.clone(),
                    content: result.content.clone(),
                    is_error: result.is_error,
                    denied,
                    timestamp: current_timestamp(),
                })
                .await?;
                self.emit(LoopEvent::ToolCallFinished {
                    call_id: call.call_id.clone(),
                    sequence_no: call.sequence_no,
                    tool_name: call.tool_name.clone(),
                    content: result.content,
                    is_error: result.is_error,
                    denied,
                })
                .await;
            }
            self.transition_to(LoopState::Planning)?;
        }
    }

    async fn plan(&self) -> Result<Response, AgentError> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !self.settings.system_prompt.is_empty() {
            messages.push(Message::system(self.settings.system_prompt.clone()));
        }
        messages.extend(history_to_messages(&self.history));
        let request = Request {
            model: self.settings.model.clone(),
            messages,
            tools: self
                .services
                .registry
                .definitions(self.gate.allowed_tools()),
            ..Request::default()
        };
        tracing::debug!(
            session_id = %self.record.session_id,
            step = self.steps + 1,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "calling backend"
        );

        let client = self.services.client.clone();
        let timeout = self.settings.backend_timeout;
        let call = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, client.complete(request))
                    .await
                    .unwrap_or_else(|_| {
                        Err(SDKError::Timeout {
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }),
                None => client.complete(request).await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            result = call => result.map_err(AgentError::from),
        }
    }

    async fn record_tool_requests(
        &mut self,
        tool_calls: Vec<ToolCall>,
    ) -> Result<Vec<PendingCall>, AgentError> {
        let mut pending = Vec::with_capacity(tool_calls.len());
        for tool_call in tool_calls {
            let sequence_no = self.next_sequence_no;
            self.next_sequence_no += 1;
            let arguments = parse_tool_arguments(&tool_call);
            let recorded = arguments
                .as_ref()
                .map(Value::clone)
                .unwrap_or_else(|_| tool_call.arguments.clone());

            self.append_turn(Turn::ToolRequest {
                call_id: tool_call.id.clone(),
                sequence_no,
                tool_name: tool_call.name.clone(),
                arguments: recorded.clone(),
                raw_arguments: tool_call.raw_arguments.clone(),
                timestamp: current_timestamp(),
            })
            .await?;
            self.emit(LoopEvent::ToolCallRequested {
                call_id: tool_call.id.clone(),
                sequence_no,
                tool_name: tool_call.name.clone(),
                arguments: recorded,
            })
            .await;

            pending.push(PendingCall {
                call_id: tool_call.id,
                sequence_no,
                tool_name: tool_call.name,
                arguments,
            });
        }
        Ok(pending)
    }

    /// Validates every call and runs the valid ones through the permission
    /// gate, one at a time.
    async fn authorize(&self, pending: &[PendingCall]) -> Result<Vec<Dispatch>, AgentError> {
        let mut dispatches = Vec::with_capacity(pending.len());
        for call in pending {
            let arguments = match &call.arguments {
                Ok(arguments) => arguments,
                Err(error) => {
                    dispatches.push(Dispatch::Settled {
                        result: ToolResult::error(
                            AgentError::InvalidArguments {
                                tool: call.tool_name.clone(),
                                message: error.to_string(),
                            }
                            .to_string(),
                        ),
                        denied: false,
                    });
                    continue;
                }
            };
            let tool = match self.services.registry.resolve(&call.tool_name) {
                Ok(tool) => tool,
                Err(error) => {
                    tracing::warn!(session_id = %self.record.session_id, tool = %call.tool_name, "backend requested an unknown tool");
                    dispatches.push(Dispatch::Settled {
                        result: ToolResult::error(error.to_string()),
                        denied: false,
                    });
                    continue;
                }
            };
            if let Err(error) = tool.check_arguments(arguments) {
                tracing::debug!(session_id = %self.record.session_id, tool = %call.tool_name, error = %error, "arguments rejected before permission check");
                dispatches.push(Dispatch::Settled {
                    result: ToolResult::error(error.to_string()),
                    denied: false,
                });
                continue;
            }

            let invocation = ToolInvocation {
                session_id: self.record.session_id.clone(),
                sequence_no: call.sequence_no,
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: arguments.clone(),
            };
            let decision = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                decision = self.gate.decide(&invocation, tool.effect()) => decision,
            };
            match decision {
                PermissionDecision::Allow => dispatches.push(Dispatch::Run(arguments.clone())),
                PermissionDecision::Deny { reason } | PermissionDecision::Ask { reason } => {
                    tracing::warn!(
                        session_id = %self.record.session_id,
                        tool = %call.tool_name,
                        sequence_no = call.sequence_no,
                        reason = %reason,
                        "tool call denied"
                    );
                    let denial = AgentError::PermissionDenied {
                        tool: call.tool_name.clone(),
                        reason,
                    };
                    dispatches.push(Dispatch::Settled {
                        result: ToolResult::success(denial.to_string()),
                        denied: true,
                    });
                }
            }
        }
        Ok(dispatches)
    }

    /// Starts every allowed call concurrently and collects the results in
    /// request order. On cancellation, running handlers are left to finish
    /// and their results are dropped.
    async fn execute(
        &self,
        pending: &[PendingCall],
        dispatches: Vec<Dispatch>,
    ) -> Result<Vec<(ToolResult, bool)>, AgentError> {
        let mut slots = Vec::with_capacity(dispatches.len());
        for (call, dispatch) in pending.iter().zip(dispatches) {
            let slot = match dispatch {
                Dispatch::Settled { result, denied } => Slot::Settled { result, denied },
                Dispatch::Run(arguments) => {
                    tracing::debug!(
                        session_id = %self.record.session_id,
                        tool = %call.tool_name,
                        sequence_no = call.sequence_no,
                        "dispatching tool"
                    );
                    let registry = self.services.registry.clone();
                    let tool_name = call.tool_name.clone();
                    let timeout = self.settings.tool_timeout;
                    Slot::Running(tokio::spawn(async move {
                        registry
                            .invoke(&tool_name, arguments, timeout)
                            .await
                            .unwrap_or_else(|error| ToolResult::error(error.to_string()))
                    }))
                }
            };
            slots.push(slot);
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let result = match slot {
                Slot::Settled { result, denied } => (result, denied),
                Slot::Running(handle) => tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    joined = handle => {
                        let result = joined.unwrap_or_else(|error| {
                            ToolResult::error(format!("tool task failed: {error}"))
                        });
                        (result, false)
                    }
                },
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn append_turn(&mut self, turn: Turn) -> Result<(), AgentError> {
        let key = turn_idempotency_key(
            &self.record.session_id,
            self.history.len() as u64,
            turn.type_id(),
        );
        let request = turn.to_append_request(&self.record.session_id, key)?;
        let stored = self.services.store.append(request).await?;
        self.record.head_turn_id = stored.turn_id;
        self.record.head_depth = stored.depth;
        self.history.push(turn);
        Ok(())
    }

    async fn emit(&self, event: LoopEvent) {
        if !self.sink.emit(event).await {
            tracing::debug!(session_id = %self.record.session_id, "stream consumer is gone");
        }
    }

    fn ensure_not_cancelled(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}
