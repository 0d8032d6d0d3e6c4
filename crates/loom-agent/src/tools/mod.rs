mod bash;
mod edit;
mod glob;
mod grep;
mod read;
mod registry;
mod schema;
mod web_search;
mod write;

use crate::{ExecutionEnvironment, SearchBackend, ToolError};
use futures::future::BoxFuture;
use loom_llm::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub use registry::{RegisteredTool, ToolRegistry};
pub(crate) use schema::{validate_schema_root, validate_tool_arguments};

pub const BUILTIN_BUNDLE: &str = "builtin";
pub const BUILTIN_BUNDLE_VERSION: &str = "1.0.0";

pub const GLOB_TOOL: &str = "Glob";
pub const GREP_TOOL: &str = "Grep";
pub const READ_TOOL: &str = "Read";
pub const WRITE_TOOL: &str = "Write";
pub const EDIT_TOOL: &str = "Edit";
pub const BASH_TOOL: &str = "Bash";
pub const WEB_SEARCH_TOOL: &str = "WebSearch";

/// How much a tool can change the world. Drives the permission gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    ReadOnly,
    /// Mutates state in a way that can be reverted (file edits).
    Edit,
    Destructive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Data { data: Value },
}

/// What a handler returns: `{content: [{type, text|data}]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            content: vec![ContentBlock::Data { data }],
        }
    }

    /// Flattens the blocks into the text sent back to the backend.
    pub fn render(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::Data { data } => data.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

pub type ToolFuture = BoxFuture<'static, Result<ToolOutput, ToolError>>;
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub effect: ToolEffect,
    pub handler: ToolHandler,
}

impl ToolDescriptor {
    /// New descriptor classified as [`ToolEffect::Destructive`] until told
    /// otherwise.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            effect: ToolEffect::Destructive,
            handler: Arc::new(move |arguments| Box::pin(handler(arguments))),
        }
    }

    pub fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effect = effect;
        self
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("effect", &self.effect)
            .finish_non_exhaustive()
    }
}

/// A named, versioned group of tools registered together.
#[derive(Clone, Debug)]
pub struct ToolBundle {
    pub name: String,
    pub version: String,
    pub tools: Vec<ToolDescriptor>,
}

impl ToolBundle {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }
}

/// Name the backend uses to call `tool` from `bundle`.
pub fn qualified_tool_name(bundle: &str, tool: &str) -> String {
    if bundle == BUILTIN_BUNDLE {
        tool.to_string()
    } else {
        format!("mcp__{bundle}__{tool}")
    }
}

/// Built-in tools over `env`. `WebSearch` is included only with a search
/// backend.
pub fn builtin_bundle(
    env: Arc<dyn ExecutionEnvironment>,
    search: Option<Arc<dyn SearchBackend>>,
) -> ToolBundle {
    let mut bundle = ToolBundle::new(BUILTIN_BUNDLE, BUILTIN_BUNDLE_VERSION)
        .with_tool(glob::glob_tool(env.clone()))
        .with_tool(grep::grep_tool(env.clone()))
        .with_tool(read::read_tool(env.clone()))
        .with_tool(write::write_tool(env.clone()))
        .with_tool(edit::edit_tool(env.clone()))
        .with_tool(bash::bash_tool(env));
    if let Some(search) = search {
        bundle = bundle.with_tool(web_search::web_search_tool(search));
    }
    bundle
}

fn required_string_argument(arguments: &Value, key: &str) -> Result<String, ToolError> {
    optional_string_argument(arguments, key)?
        .ok_or_else(|| ToolError::Validation(format!("missing required argument '{}'", key)))
}

fn optional_string_argument(arguments: &Value, key: &str) -> Result<Option<String>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    let Some(value) = value.as_str() else {
        return Err(ToolError::Validation(format!(
            "argument '{}' must be a string",
            key
        )));
    };
    Ok(Some(value.to_string()))
}

fn optional_bool_argument(arguments: &Value, key: &str) -> Result<Option<bool>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    let Some(value) = value.as_bool() else {
        return Err(ToolError::Validation(format!(
            "argument '{}' must be a boolean",
            key
        )));
    };
    Ok(Some(value))
}

fn optional_u64_argument(arguments: &Value, key: &str) -> Result<Option<u64>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    let Some(value) = value.as_u64() else {
        return Err(ToolError::Validation(format!(
            "argument '{}' must be a positive integer",
            key
        )));
    };
    Ok(Some(value))
}

fn optional_usize_argument(arguments: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    Ok(optional_u64_argument(arguments, key)?.map(|value| value as usize))
}

fn format_line_numbered_content(content: &str, start_line: usize) -> String {
    if content.is_empty() {
        return String::new();
    }
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| format!("{:>6}\t{}", start_line + idx, line))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Arguments of a backend tool call, or a validation error when the backend
/// produced text that is not JSON.
pub(crate) fn parse_tool_arguments(tool_call: &ToolCall) -> Result<Value, ToolError> {
    if let Some(raw_arguments) = &tool_call.raw_arguments {
        return serde_json::from_str::<Value>(raw_arguments).map_err(|error| {
            ToolError::Validation(format!(
                "invalid JSON arguments for tool '{}': {}",
                tool_call.name, error
            ))
        });
    }
    if tool_call.arguments.is_null() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    Ok(tool_call.arguments.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_tools_use_bare_names_and_others_are_namespaced() {
        assert_eq!(qualified_tool_name(BUILTIN_BUNDLE, "Glob"), "Glob");
        assert_eq!(qualified_tool_name("github", "open_pr"), "mcp__github__open_pr");
    }

    #[test]
    fn tool_output_renders_text_and_data_blocks() {
        let output = ToolOutput {
            content: vec![
                ContentBlock::Text {
                    text: "two matches".to_string(),
                },
                ContentBlock::Data {
                    data: json!({ "count": 2 }),
                },
            ],
        };
        assert_eq!(output.render(), "two matches\n{\"count\":2}");
        let encoded = serde_json::to_value(&output).expect("serialize");
        assert_eq!(encoded["content"][0]["type"], "text");
        assert_eq!(encoded["content"][1]["type"], "data");
    }

    #[test]
    fn third_party_descriptors_default_to_destructive() {
        let tool = ToolDescriptor::new("noop", "does nothing", json!({ "type": "object" }), |_| async {
            Ok(ToolOutput::default())
        });
        assert_eq!(tool.effect, ToolEffect::Destructive);
    }

    #[test]
    fn unparsable_raw_arguments_are_a_validation_error() {
        let mut call = ToolCall::new("c1", "Glob", Value::Null);
        call.raw_arguments = Some("{oops".to_string());
        assert!(matches!(
            parse_tool_arguments(&call),
            Err(ToolError::Validation(message)) if message.contains("invalid JSON")
        ));
        let call = ToolCall::new("c2", "Glob", Value::Null);
        assert_eq!(parse_tool_arguments(&call).expect("empty args"), json!({}));
    }

    #[test]
    fn line_numbers_start_at_offset() {
        assert_eq!(
            format_line_numbered_content("a\nb", 3),
            "     3\ta\n     4\tb"
        );
    }
}
