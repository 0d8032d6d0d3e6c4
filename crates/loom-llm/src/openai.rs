//! Adapter for backends that speak the OpenAI chat-completions protocol.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::errors::{ConfigurationError, SDKError};
use crate::provider::ProviderAdapter;
use crate::types::{FinishReason, Message, Request, Response, Role, ToolCall, Usage};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    name: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Result<Self, SDKError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigurationError::new("backend API key must not be empty").into());
        }
        let base_url = base_url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        Ok(Self {
            name: "openai".to_string(),
            base_url,
            api_key,
            http: reqwest::Client::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        let body = build_request_body(&request);
        tracing::debug!(model = %request.model, messages = request.messages.len(), "sending chat completion");
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| SDKError::unavailable(format!("request failed: {error}")))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|error| SDKError::unavailable(format!("reading response failed: {error}")))?;
        if !(200..300).contains(&status) {
            return Err(classify_status(status, &text));
        }
        parse_response_body(&self.name, &text)
    }
}

fn classify_status(status: u16, body: &str) -> SDKError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        408 | 429 | 500..=599 => SDKError::Unavailable {
            message: detail,
            status: Some(status),
        },
        _ => SDKError::Protocol(format!("HTTP {status}: {detail}")),
    }
}

pub(crate) fn build_request_body(request: &Request) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_to_json).collect();
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(request.model.clone()));
    body.insert("messages".to_string(), Value::Array(messages));
    if !request.tools.is_empty() {
        let tools = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body.insert("tools".to_string(), Value::Array(tools));
        body.insert("tool_choice".to_string(), Value::String("auto".to_string()));
    }
    if let Some(temperature) = request.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }
    Value::Object(body)
}

fn message_to_json(message: &Message) -> Value {
    match message.role {
        Role::System => json!({ "role": "system", "content": message.content }),
        Role::User => json!({ "role": "user", "content": message.content }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        Role::Assistant => {
            let content = if message.content.is_empty() && !message.tool_calls.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            let mut value = json!({ "role": "assistant", "content": content });
            if !message.tool_calls.is_empty() {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        let arguments = call
                            .raw_arguments
                            .clone()
                            .unwrap_or_else(|| call.arguments.to_string());
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": { "name": call.name, "arguments": arguments },
                        })
                    })
                    .collect();
                value["tool_calls"] = Value::Array(calls);
            }
            value
        }
    }
}

pub(crate) fn parse_response_body(provider: &str, body: &str) -> Result<Response, SDKError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|error| SDKError::protocol(format!("response is not JSON: {error}")))?;
    let choice = value
        .pointer("/choices/0")
        .ok_or_else(|| SDKError::protocol("response has no choices"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| SDKError::protocol("choice has no message"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            tool_calls.push(parse_tool_call(call)?);
        }
    }

    let usage = value
        .get("usage")
        .map(|usage| {
            let read = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
            Usage {
                input_tokens: read("prompt_tokens"),
                output_tokens: read("completion_tokens"),
                total_tokens: read("total_tokens"),
            }
        })
        .unwrap_or_default();

    let raw_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    let finish_reason = FinishReason {
        reason: match raw_reason.as_deref() {
            Some("tool_calls") | Some("function_call") => "tool_calls".to_string(),
            Some("length") => "length".to_string(),
            _ => "stop".to_string(),
        },
        raw: raw_reason,
    };

    Ok(Response {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        model: value
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        provider: provider.to_string(),
        message: Message::assistant_with_tool_calls(content, tool_calls),
        finish_reason,
        usage,
    })
}

fn parse_tool_call(call: &Value) -> Result<ToolCall, SDKError> {
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| SDKError::protocol("tool call has no id"))?;
    let function = call
        .get("function")
        .ok_or_else(|| SDKError::protocol("tool call has no function"))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| SDKError::protocol("tool call has no function name"))?;
    let raw = function
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}");

    let mut tool_call = ToolCall::new(id, name, Value::Null);
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    match serde_json::from_str::<Value>(raw) {
        Ok(arguments) => tool_call.arguments = arguments,
        Err(_) => tool_call.raw_arguments = Some(raw.to_string()),
    }
    Ok(tool_call)
}
