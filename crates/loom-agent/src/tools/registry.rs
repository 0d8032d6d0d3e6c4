use super::{ToolBundle, ToolDescriptor, ToolEffect, ToolResult, qualified_tool_name};
use crate::{AgentError, AllowedTools, OutputLimits, ToolError, truncate_tool_output};
use futures::FutureExt;
use loom_llm::ToolDefinition;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RegisteredTool {
    pub qualified_name: String,
    pub bundle: String,
    pub bundle_version: String,
    pub descriptor: ToolDescriptor,
}

impl RegisteredTool {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.qualified_name.clone(),
            description: self.descriptor.description.clone(),
            parameters: self.descriptor.input_schema.clone(),
        }
    }

    pub fn effect(&self) -> ToolEffect {
        self.descriptor.effect
    }

    /// Checks `arguments` against the tool's input schema.
    pub fn check_arguments(&self, arguments: &Value) -> Result<(), AgentError> {
        super::validate_tool_arguments(&self.descriptor.input_schema, arguments).map_err(|error| {
            AgentError::InvalidArguments {
                tool: self.qualified_name.clone(),
                message: error.to_string(),
            }
        })
    }
}

/// Qualified tool name to handler record. Filled at startup, read-only and
/// shared behind an `Arc` afterwards.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    bundles: BTreeMap<String, String>,
    output_limits: OutputLimits,
}

fn valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_limits(mut self, output_limits: OutputLimits) -> Self {
        self.output_limits = output_limits;
        self
    }

    /// Registers every tool of `bundle` or none of them.
    pub fn register(&mut self, bundle: ToolBundle) -> Result<(), AgentError> {
        if !valid_identifier(&bundle.name) || bundle.name.contains("__") {
            return Err(AgentError::invalid_configuration(format!(
                "invalid bundle name '{}'",
                bundle.name
            )));
        }
        if self.bundles.contains_key(&bundle.name) {
            return Err(AgentError::invalid_configuration(format!(
                "bundle '{}' is already registered",
                bundle.name
            )));
        }

        let mut seen = HashSet::new();
        for tool in &bundle.tools {
            if !valid_identifier(&tool.name) {
                return Err(AgentError::invalid_configuration(format!(
                    "invalid tool name '{}' in bundle '{}'",
                    tool.name, bundle.name
                )));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(AgentError::DuplicateTool {
                    bundle: bundle.name.clone(),
                    tool: tool.name.clone(),
                });
            }
            let qualified_name = qualified_tool_name(&bundle.name, &tool.name);
            if self.tools.contains_key(&qualified_name) {
                return Err(AgentError::DuplicateTool {
                    bundle: bundle.name.clone(),
                    tool: tool.name.clone(),
                });
            }
            super::validate_schema_root(&tool.input_schema).map_err(|message| {
                AgentError::invalid_configuration(format!(
                    "tool '{}' in bundle '{}': {}",
                    tool.name, bundle.name, message
                ))
            })?;
        }

        tracing::debug!(
            bundle = %bundle.name,
            version = %bundle.version,
            tools = bundle.tools.len(),
            "tool bundle registered"
        );
        for tool in bundle.tools {
            let qualified_name = qualified_tool_name(&bundle.name, &tool.name);
            self.tools.insert(
                qualified_name.clone(),
                RegisteredTool {
                    qualified_name,
                    bundle: bundle.name.clone(),
                    bundle_version: bundle.version.clone(),
                    descriptor: tool,
                },
            );
        }
        self.bundles.insert(bundle.name, bundle.version);
        Ok(())
    }

    pub fn resolve(&self, qualified_name: &str) -> Result<&RegisteredTool, AgentError> {
        self.tools
            .get(qualified_name)
            .ok_or_else(|| AgentError::UnknownTool(qualified_name.to_string()))
    }

    /// Definitions advertised to the backend, sorted by name.
    pub fn definitions(&self, allowed: &AllowedTools) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|tool| allowed.permits(&tool.qualified_name))
            .map(RegisteredTool::definition)
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Registered bundles with their versions.
    pub fn bundles(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bundles
            .iter()
            .map(|(name, version)| (name.as_str(), version.as_str()))
    }

    /// Validates `arguments` and runs the handler.
    ///
    /// Unknown tools and schema violations are returned as errors and never
    /// reach a handler. Handler failures, panics and timeouts come back as an
    /// error-bearing [`ToolResult`].
    pub async fn invoke(
        &self,
        qualified_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResult, AgentError> {
        let tool = self.resolve(qualified_name)?;
        tool.check_arguments(&arguments)?;

        let handler = tool.descriptor.handler.clone();
        let started = std::time::Instant::now();
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(arguments))) {
            Ok(future) => {
                let guarded = AssertUnwindSafe(future).catch_unwind();
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, guarded).await {
                        Ok(result) => result,
                        Err(_) => Ok(Err(ToolError::Timeout {
                            timeout_ms: limit.as_millis() as u64,
                        })),
                    },
                    None => guarded.await,
                }
            }
            Err(panic) => Err(panic),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(output)) => {
                tracing::debug!(tool = %qualified_name, duration_ms, "tool finished");
                ToolResult::success(truncate_tool_output(
                    &output.render(),
                    qualified_name,
                    &self.output_limits,
                ))
            }
            Ok(Err(error)) => {
                tracing::warn!(tool = %qualified_name, duration_ms, error = %error, "tool failed");
                ToolResult::error(
                    AgentError::ToolHandlerFailure {
                        tool: qualified_name.to_string(),
                        message: error.to_string(),
                    }
                    .to_string(),
                )
            }
            Err(_) => {
                tracing::warn!(tool = %qualified_name, duration_ms, "tool handler panicked");
                ToolResult::error(
                    AgentError::ToolHandlerFailure {
                        tool: qualified_name.to_string(),
                        message: "handler panicked".to_string(),
                    }
                    .to_string(),
                )
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolOutput;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_tool(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            "echo",
            json!({
                "type": "object",
                "required": ["text"],
                "properties": { "text": { "type": "string" } },
                "additionalProperties": false
            }),
            |args| async move {
                Ok(ToolOutput::text(
                    args["text"].as_str().unwrap_or_default().to_string(),
                ))
            },
        )
    }

    fn registry_with(tools: Vec<ToolDescriptor>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        let mut bundle = ToolBundle::new("test", "0.1.0");
        bundle.tools = tools;
        registry.register(bundle).expect("bundle should register");
        registry
    }

    #[test]
    fn duplicate_name_within_bundle_is_rejected() {
        let mut registry = ToolRegistry::new();
        let bundle = ToolBundle::new("test", "0.1.0")
            .with_tool(echo_tool("echo"))
            .with_tool(echo_tool("echo"));
        let error = registry.register(bundle).expect_err("duplicate should fail");
        assert!(matches!(error, AgentError::DuplicateTool { tool, .. } if tool == "echo"));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn same_tool_name_in_different_bundles_is_allowed() {
        let mut registry = registry_with(vec![echo_tool("echo")]);
        registry
            .register(ToolBundle::new("other", "1").with_tool(echo_tool("echo")))
            .expect("other bundle should register");
        assert_eq!(
            registry.names(),
            vec!["mcp__other__echo".to_string(), "mcp__test__echo".to_string()]
        );
    }

    #[test]
    fn invalid_schema_is_rejected_at_registration() {
        let mut registry = ToolRegistry::new();
        let tool = ToolDescriptor::new("bad", "bad", json!({ "type": "array" }), |_| async {
            Ok(ToolOutput::default())
        });
        let error = registry
            .register(ToolBundle::new("test", "1").with_tool(tool))
            .expect_err("schema should be rejected");
        assert_eq!(error.code(), "invalid_configuration");
    }

    #[test]
    fn resolve_unknown_tool_fails() {
        let registry = registry_with(vec![echo_tool("echo")]);
        assert!(matches!(
            registry.resolve("echo"),
            Err(AgentError::UnknownTool(name)) if name == "echo"
        ));
        assert!(registry.resolve("mcp__test__echo").is_ok());
    }

    #[test]
    fn definitions_respect_allowed_tools() {
        let registry = registry_with(vec![echo_tool("a"), echo_tool("b")]);
        let allowed: AllowedTools = ["mcp__test__b"].into_iter().collect();
        let names: Vec<String> = registry
            .definitions(&allowed)
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, vec!["mcp__test__b".to_string()]);
        assert_eq!(registry.definitions(&AllowedTools::all()).len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn schema_violation_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let tool = ToolDescriptor::new(
            "count",
            "count",
            json!({ "type": "object", "required": ["n"], "properties": { "n": { "type": "integer" } } }),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(ToolOutput::default()) }
            },
        );
        let registry = registry_with(vec![tool]);
        let error = registry
            .invoke("mcp__test__count", json!({ "n": "one" }), None)
            .await
            .expect_err("invalid args should fail");
        assert!(matches!(error, AgentError::InvalidArguments { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn nested_violation_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let tool = ToolDescriptor::new(
            "tag",
            "tag",
            json!({
                "type": "object",
                "properties": {
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "opts": {
                        "type": "object",
                        "required": ["k"],
                        "properties": { "k": { "type": "integer" } }
                    }
                }
            }),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(ToolOutput::default()) }
            },
        );
        let registry = registry_with(vec![tool]);
        for arguments in [
            json!({ "tags": ["ok", 1] }),
            json!({ "opts": { "k": "one" } }),
            json!({ "opts": {} }),
        ] {
            let error = registry
                .invoke("mcp__test__tag", arguments, None)
                .await
                .expect_err("nested violation should fail");
            assert!(matches!(error, AgentError::InvalidArguments { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handler_error_becomes_error_result() {
        let tool = ToolDescriptor::new("fail", "fail", json!({ "type": "object" }), |_| async {
            Err(ToolError::Execution("disk on fire".to_string()))
        });
        let registry = registry_with(vec![tool]);
        let result = registry
            .invoke("mcp__test__fail", json!({}), None)
            .await
            .expect("failure is a result");
        assert!(result.is_error);
        assert!(result.content.contains("disk on fire"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handler_panic_becomes_error_result() {
        let tool = ToolDescriptor::new("boom", "boom", json!({ "type": "object" }), |_| async {
            if true {
                panic!("handler bug");
            }
            Ok(ToolOutput::default())
        });
        let registry = registry_with(vec![tool]);
        let result = registry
            .invoke("mcp__test__boom", json!({}), None)
            .await
            .expect("panic is a result");
        assert!(result.is_error);
        assert!(result.content.contains("handler panicked"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn handler_timeout_becomes_error_result() {
        let tool = ToolDescriptor::new("slow", "slow", json!({ "type": "object" }), |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("late"))
        });
        let registry = registry_with(vec![tool]);
        let result = registry
            .invoke("mcp__test__slow", json!({}), Some(Duration::from_millis(10)))
            .await
            .expect("timeout is a result");
        assert!(result.is_error);
        assert!(result.content.contains("timed out after 10 ms"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn successful_output_is_rendered() {
        let registry = registry_with(vec![echo_tool("echo")]);
        let result = registry
            .invoke("mcp__test__echo", json!({ "text": "hi" }), None)
            .await
            .expect("echo should run");
        assert_eq!(result, ToolResult::success("hi"));
    }
}
