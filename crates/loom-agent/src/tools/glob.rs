use serde_json::json;
use std::sync::Arc;

use super::{
    GLOB_TOOL, ToolDescriptor, ToolEffect, ToolOutput, optional_string_argument,
    required_string_argument,
};
use crate::ExecutionEnvironment;

pub(super) fn glob_tool(env: Arc<dyn ExecutionEnvironment>) -> ToolDescriptor {
    ToolDescriptor::new(
        GLOB_TOOL,
        "Find files matching a glob pattern. Paths are relative to the working directory.",
        json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": { "type": "string", "minLength": 1 },
                "path": { "type": "string" }
            },
            "additionalProperties": false
        }),
        move |args| {
            let env = env.clone();
            async move {
                let pattern = required_string_argument(&args, "pattern")?;
                let path = optional_string_argument(&args, "path")?.unwrap_or(".".to_string());
                let matches = env.glob(&pattern, &path).await?;
                if matches.is_empty() {
                    Ok(ToolOutput::text("No files matched"))
                } else {
                    Ok(ToolOutput::text(matches.join("\n")))
                }
            }
        },
    )
    .with_effect(ToolEffect::ReadOnly)
}
