use serde_json::json;
use std::sync::Arc;

use super::{
    GREP_TOOL, ToolDescriptor, ToolEffect, ToolOutput, optional_bool_argument,
    optional_string_argument, optional_usize_argument, required_string_argument,
};
use crate::{ExecutionEnvironment, GrepOptions};

pub(super) fn grep_tool(env: Arc<dyn ExecutionEnvironment>) -> ToolDescriptor {
    ToolDescriptor::new(
        GREP_TOOL,
        "Search file contents with a regular expression. Returns `path:line:text` matches.",
        json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": { "type": "string", "minLength": 1 },
                "path": { "type": "string" },
                "glob_filter": { "type": "string" },
                "case_insensitive": { "type": "boolean" },
                "max_results": { "type": "integer", "minimum": 1 }
            },
            "additionalProperties": false
        }),
        move |args| {
            let env = env.clone();
            async move {
                let pattern = required_string_argument(&args, "pattern")?;
                let path = optional_string_argument(&args, "path")?.unwrap_or(".".to_string());
                let options = GrepOptions {
                    glob_filter: optional_string_argument(&args, "glob_filter")?,
                    case_insensitive: optional_bool_argument(&args, "case_insensitive")?
                        .unwrap_or(false),
                    max_results: optional_usize_argument(&args, "max_results")?,
                };
                let output = env.grep(&pattern, &path, options).await?;
                if output.is_empty() {
                    Ok(ToolOutput::text("No matches found"))
                } else {
                    Ok(ToolOutput::text(output))
                }
            }
        },
    )
    .with_effect(ToolEffect::ReadOnly)
}
