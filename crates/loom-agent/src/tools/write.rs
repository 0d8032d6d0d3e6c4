use serde_json::json;
use std::sync::Arc;

use super::{ToolDescriptor, ToolEffect, ToolOutput, WRITE_TOOL, required_string_argument};
use crate::ExecutionEnvironment;

pub(super) fn write_tool(env: Arc<dyn ExecutionEnvironment>) -> ToolDescriptor {
    ToolDescriptor::new(
        WRITE_TOOL,
        "Write a file, replacing any existing content. Parent directories are created.",
        json!({
            "type": "object",
            "required": ["file_path", "content"],
            "properties": {
                "file_path": { "type": "string", "minLength": 1 },
                "content": { "type": "string" }
            },
            "additionalProperties": false
        }),
        move |args| {
            let env = env.clone();
            async move {
                let file_path = required_string_argument(&args, "file_path")?;
                let content = required_string_argument(&args, "content")?;
                env.write_file(&file_path, &content).await?;
                Ok(ToolOutput::text(format!(
                    "Wrote {} bytes to {}",
                    content.len(),
                    file_path
                )))
            }
        },
    )
    .with_effect(ToolEffect::Edit)
}
