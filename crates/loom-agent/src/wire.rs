//! Server-Sent Events framing for [`StreamMessage`] streams.
//!
//! Each message is one event named after its `type`, with the JSON message
//! as data. The stream ends with [`SSE_DONE`], which never parses as a
//! message.

use crate::{AgentError, RunStream, StreamMessage};
use futures::{Stream, StreamExt, stream};

pub const SSE_DONE_DATA: &str = "[DONE]";
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Encodes one message as an SSE event.
pub fn encode_sse(message: &StreamMessage) -> Result<String, AgentError> {
    let data = serde_json::to_string(message).map_err(|error| {
        AgentError::invalid_configuration(format!("unencodable stream message: {error}"))
    })?;
    Ok(format!("event: {}\ndata: {}\n\n", message.kind(), data))
}

/// SSE frames for a running task, terminated by [`SSE_DONE`].
pub fn sse_frames(run: RunStream) -> impl Stream<Item = String> + Send {
    run.map(|message| {
        encode_sse(&message).unwrap_or_else(|error| {
            tracing::warn!(error = %error, "dropping unencodable stream message");
            format!(
                "event: error\ndata: {}\n\n",
                serde_json::json!({ "type": "error", "code": "internal", "message": "unencodable message" })
            )
        })
    })
    .chain(stream::once(async { SSE_DONE.to_string() }))
}

/// Decodes an event back into a message. `Ok(None)` marks the end sentinel.
pub fn decode_sse(event: &SseEvent) -> Result<Option<StreamMessage>, AgentError> {
    if event.data.trim() == SSE_DONE_DATA {
        return Ok(None);
    }
    let message: StreamMessage = serde_json::from_str(&event.data).map_err(|error| {
        AgentError::invalid_configuration(format!("malformed stream event: {error}"))
    })?;
    if let Some(name) = &event.event {
        if name != message.kind() {
            return Err(AgentError::invalid_configuration(format!(
                "event '{name}' carries a '{}' message",
                message.kind()
            )));
        }
    }
    Ok(Some(message))
}

/// One raw SSE event: the `event:` name and the joined `data:` lines.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental reader for framed streams. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes `chunk` and returns the events it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.pending.push_str(chunk);
        let mut completed = Vec::new();
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            if let Some(event) = self.accept_line(line.trim_end_matches(['\r', '\n'])) {
                completed.push(event);
            }
        }
        completed
    }

    /// Decodes every completed message in `chunk`; the end sentinel is skipped.
    pub fn push_messages(&mut self, chunk: &str) -> Result<Vec<StreamMessage>, AgentError> {
        let mut messages = Vec::new();
        for event in self.push(chunk) {
            if let Some(message) = decode_sse(&event)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Event left open when the input ended without a blank line.
    pub fn finish(mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.pending);
        if !rest.is_empty() {
            self.accept_line(rest.trim_end_matches('\r'));
        }
        self.take_event()
    }

    fn accept_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "" => {}
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            other => tracing::trace!(field = other, "ignoring sse field"),
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PermissionMode;
    use loom_llm::Usage;

    fn done() -> StreamMessage {
        StreamMessage::Done {
            session_id: "s-1".to_string(),
            result: "two files".to_string(),
            steps: 2,
            usage: Usage::default(),
        }
    }

    #[test]
    fn encoded_frames_parse_back_into_messages() {
        let init = StreamMessage::Init {
            session_id: "s-1".to_string(),
            model: "m".to_string(),
            tools: vec!["Glob".to_string()],
            permission_mode: PermissionMode::Bypass,
            parent_session_id: None,
        };
        let mut wire = String::new();
        wire.push_str(&encode_sse(&init).expect("encode"));
        wire.push_str(&encode_sse(&done()).expect("encode"));
        wire.push_str(SSE_DONE);

        let mut parser = SseParser::new();
        let events = parser.push(&wire);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event.as_deref(), Some("init"));
        assert_eq!(decode_sse(&events[0]).expect("decode"), Some(init));
        assert_eq!(decode_sse(&events[1]).expect("decode"), Some(done()));
        assert_eq!(decode_sse(&events[2]).expect("decode"), None);
    }

    #[test]
    fn mismatched_event_name_is_rejected() {
        let frame = encode_sse(&done()).expect("encode").replace("event: done", "event: init");
        let mut parser = SseParser::new();
        let events = parser.push(&frame);
        assert!(decode_sse(&events[0]).is_err());
    }

    #[test]
    fn split_chunks_and_comments_are_handled() {
        let frame = encode_sse(&done()).expect("encode");
        let (head, tail) = frame.split_at(9);
        let mut parser = SseParser::new();
        assert!(parser.push(": keep-alive\n").is_empty());
        assert!(parser.push_messages(head).expect("partial").is_empty());
        assert_eq!(parser.push_messages(tail).expect("decode"), vec![done()]);
    }

    #[test]
    fn data_lines_are_joined_and_flushed_at_the_end() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: note\r\ndata: one\ndata: two").is_empty());
        assert_eq!(
            parser.finish(),
            Some(SseEvent {
                event: Some("note".to_string()),
                data: "one\ntwo".to_string(),
            })
        );
    }
}
