use crate::AgentError;
use loom_llm::Usage;
use serde_json::Value;
use tokio::sync::mpsc;

/// Internal events produced by the execution loop, in causal order.
#[derive(Debug)]
pub enum LoopEvent {
    AssistantText {
        text: String,
    },
    ToolCallRequested {
        call_id: String,
        sequence_no: u64,
        tool_name: String,
        arguments: Value,
    },
    ToolCallFinished {
        call_id: String,
        sequence_no: u64,
        tool_name: String,
        content: String,
        is_error: bool,
        denied: bool,
    },
    Finished(RunOutcome),
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        result: String,
        steps: usize,
        usage: Usage,
    },
    Errored(AgentError),
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Errored(_) => "errored",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Producer half of the bounded loop-to-stream channel.
#[derive(Clone, Debug)]
pub struct EventSink {
    sender: mpsc::Sender<LoopEvent>,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<LoopEvent>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LoopEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }

    /// Waits for channel capacity. Returns `false` once the consumer is gone.
    pub async fn emit(&self, event: LoopEvent) -> bool {
        self.sender.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn emit_reports_a_dropped_consumer() {
        let (sink, receiver) = EventSink::channel(1);
        assert!(
            sink.emit(LoopEvent::AssistantText {
                text: "hi".to_string()
            })
            .await
        );
        drop(receiver);
        assert!(sink.is_closed());
        assert!(!sink.emit(LoopEvent::Finished(RunOutcome::Cancelled)).await);
    }
}
