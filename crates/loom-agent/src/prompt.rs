use crate::AgentError;
use loom_llm::ToolDefinition;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PRESET: &str = "default";

const DEFAULT_PRESET_TEXT: &str = "You are an autonomous assistant that completes tasks by calling tools.\n\
Work step by step. Call tools when you need information or need to change something, \
then answer with a concise summary of what you did.\n\
If a tool call is denied, do not retry it unchanged; adapt your plan or explain why you cannot continue.";

/// System prompt for one task: literal text, or a named preset with caller
/// text appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Preset {
        preset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        append: Option<String>,
    },
}

impl SystemPrompt {
    pub fn preset(name: impl Into<String>) -> Self {
        Self::Preset {
            preset: name.into(),
            append: None,
        }
    }

    pub fn with_append(self, text: impl Into<String>) -> Self {
        match self {
            Self::Text(mut body) => {
                body.push_str("\n\n");
                body.push_str(&text.into());
                Self::Text(body)
            }
            Self::Preset { preset, .. } => Self::Preset {
                preset,
                append: Some(text.into()),
            },
        }
    }

    /// Fails for unknown presets so bad options surface before a session is
    /// touched.
    pub fn validate(&self) -> Result<(), AgentError> {
        match self {
            Self::Text(_) => Ok(()),
            Self::Preset { preset, .. } if preset == DEFAULT_PRESET => Ok(()),
            Self::Preset { preset, .. } => Err(AgentError::invalid_configuration(format!(
                "unknown system prompt preset '{preset}'"
            ))),
        }
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self::preset(DEFAULT_PRESET)
    }
}

/// Renders the prompt sent as the first system message of every request.
pub fn build_system_prompt(
    prompt: Option<&SystemPrompt>,
    tools: &[ToolDefinition],
    working_directory: Option<&str>,
) -> Result<String, AgentError> {
    let default_prompt = SystemPrompt::default();
    let prompt = prompt.unwrap_or(&default_prompt);
    prompt.validate()?;
    match prompt {
        SystemPrompt::Text(text) => Ok(text.clone()),
        SystemPrompt::Preset { append, .. } => {
            let mut sections = vec![DEFAULT_PRESET_TEXT.to_string()];
            if let Some(directory) = working_directory {
                sections.push(format!("Working directory: {directory}"));
            }
            if !tools.is_empty() {
                let listing = tools
                    .iter()
                    .map(|tool| format!("- {}: {}", tool.name, tool.description))
                    .collect::<Vec<_>>()
                    .join("\n");
                sections.push(format!("Available tools:\n{listing}"));
            }
            if let Some(append) = append.as_deref().filter(|text| !text.trim().is_empty()) {
                sections.push(append.to_string());
            }
            Ok(sections.join("\n\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("{name} things"),
            parameters: json!({ "type": "object" }),
        }
    }

    #[test]
    fn preset_lists_tools_and_appends_caller_text() {
        let prompt = SystemPrompt::preset(DEFAULT_PRESET).with_append("Answer in French.");
        let rendered =
            build_system_prompt(Some(&prompt), &[tool("Glob")], Some("/work")).expect("render");
        assert!(rendered.starts_with("You are an autonomous assistant"));
        assert!(rendered.contains("Working directory: /work"));
        assert!(rendered.contains("- Glob: Glob things"));
        assert!(rendered.ends_with("Answer in French."));
    }

    #[test]
    fn literal_text_replaces_the_preset() {
        let prompt = SystemPrompt::Text("Be terse.".to_string());
        assert_eq!(
            build_system_prompt(Some(&prompt), &[tool("Glob")], None).expect("render"),
            "Be terse."
        );
    }

    #[test]
    fn unknown_preset_is_a_configuration_error() {
        let error = build_system_prompt(Some(&SystemPrompt::preset("pirate")), &[], None)
            .expect_err("unknown preset");
        assert_eq!(error.code(), "invalid_configuration");
    }

    #[test]
    fn deserializes_string_or_preset_object() {
        let text: SystemPrompt = serde_json::from_value(json!("hi")).expect("text");
        assert_eq!(text, SystemPrompt::Text("hi".to_string()));
        let preset: SystemPrompt =
            serde_json::from_value(json!({ "preset": "default", "append": "x" })).expect("preset");
        assert_eq!(preset, SystemPrompt::preset("default").with_append("x"));
    }
}
