//! Stream multiplexer: turns the loop's internal events into the ordered,
//! caller-facing [`StreamMessage`] sequence.
//!
//! Every stream starts with exactly one `init` and ends with exactly one
//! terminal message (`done` or `error`). Dropping the [`RunStream`] cancels
//! the loop behind it.

use crate::events::{LoopEvent, RunOutcome};
use crate::{AgentError, PermissionMode};
use futures::Stream;
use loom_llm::Usage;
use loom_turnstore::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Init {
        session_id: SessionId,
        model: String,
        tools: Vec<String>,
        permission_mode: PermissionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_session_id: Option<SessionId>,
    },
    AssistantText {
        text: String,
    },
    ToolCall {
        call_id: String,
        sequence_no: u64,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        sequence_no: u64,
        tool_name: String,
        content: String,
        is_error: bool,
        #[serde(default)]
        denied: bool,
    },
    Error {
        code: String,
        message: String,
    },
    Done {
        session_id: SessionId,
        result: String,
        steps: usize,
        usage: Usage,
    },
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::AssistantText { .. } => "assistant_text",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }

    pub fn error(error: &AgentError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.public_message(),
        }
    }
}

/// Sequencing state for one stream.
#[derive(Debug)]
pub struct StreamMultiplexer {
    session_id: SessionId,
    init: Option<StreamMessage>,
    terminated: bool,
}

impl StreamMultiplexer {
    pub fn new(init: StreamMessage) -> Self {
        let session_id = match &init {
            StreamMessage::Init { session_id, .. } => session_id.clone(),
            _ => String::new(),
        };
        Self {
            session_id,
            init: Some(init),
            terminated: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// The pending `init` message, returned once.
    pub fn take_init(&mut self) -> Option<StreamMessage> {
        self.init.take()
    }

    /// Maps one loop event. Anything after the terminal message is dropped.
    pub fn translate(&mut self, event: LoopEvent) -> Option<StreamMessage> {
        if self.terminated {
            return None;
        }
        let message = match event {
            LoopEvent::AssistantText { text } => StreamMessage::AssistantText { text },
            LoopEvent::ToolCallRequested {
                call_id,
                sequence_no,
                tool_name,
                arguments,
            } => StreamMessage::ToolCall {
                call_id,
                sequence_no,
                tool_name,
                arguments,
            },
            LoopEvent::ToolCallFinished {
                call_id,
                sequence_no,
                tool_name,
                content,
                is_error,
                denied,
            } => StreamMessage::ToolResult {
                call_id,
                sequence_no,
                tool_name,
                content,
                is_error,
                denied,
            },
            LoopEvent::Finished(outcome) => {
                self.terminated = true;
                match outcome {
                    RunOutcome::Completed {
                        result,
                        steps,
                        usage,
                    } => StreamMessage::Done {
                        session_id: self.session_id.clone(),
                        result,
                        steps,
                        usage,
                    },
                    RunOutcome::Errored(error) => StreamMessage::error(&error),
                    RunOutcome::Cancelled => StreamMessage::error(&AgentError::Cancelled),
                }
            }
        };
        Some(message)
    }

    /// Terminal message for a loop that went away without finishing.
    pub fn abandoned(&mut self) -> Option<StreamMessage> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(StreamMessage::Error {
            code: "internal".to_string(),
            message: "the task ended without a result".to_string(),
        })
    }
}

/// Caller side of a running task.
pub struct RunStream {
    receiver: mpsc::Receiver<LoopEvent>,
    multiplexer: StreamMultiplexer,
    cancel: CancellationToken,
}

impl RunStream {
    pub(crate) fn new(
        init: StreamMessage,
        receiver: mpsc::Receiver<LoopEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            multiplexer: StreamMultiplexer::new(init),
            cancel,
        }
    }

    pub fn session_id(&self) -> &str {
        self.multiplexer.session_id()
    }

    /// Requests cooperative cancellation. The stream still ends with its
    /// terminal message.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for RunStream {
    type Item = StreamMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(init) = this.multiplexer.take_init() {
            return Poll::Ready(Some(init));
        }
        loop {
            if this.multiplexer.is_terminated() {
                return Poll::Ready(None);
            }
            match this.receiver.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if let Some(message) = this.multiplexer.translate(event) {
                        return Poll::Ready(Some(message));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(this.multiplexer.abandoned()),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for RunStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
