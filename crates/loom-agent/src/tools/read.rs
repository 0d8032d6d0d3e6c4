use serde_json::json;
use std::sync::Arc;

use super::{
    READ_TOOL, ToolDescriptor, ToolEffect, ToolOutput, format_line_numbered_content,
    optional_usize_argument, required_string_argument,
};
use crate::ExecutionEnvironment;

pub(super) fn read_tool(env: Arc<dyn ExecutionEnvironment>) -> ToolDescriptor {
    ToolDescriptor::new(
        READ_TOOL,
        "Read a text file. Output lines are prefixed with their line number.",
        json!({
            "type": "object",
            "required": ["file_path"],
            "properties": {
                "file_path": { "type": "string", "minLength": 1 },
                "offset": { "type": "integer", "minimum": 1 },
                "limit": { "type": "integer", "minimum": 1 }
            },
            "additionalProperties": false
        }),
        move |args| {
            let env = env.clone();
            async move {
                let file_path = required_string_argument(&args, "file_path")?;
                let offset = optional_usize_argument(&args, "offset")?;
                let limit = optional_usize_argument(&args, "limit")?;
                let content = env.read_file(&file_path, offset, limit).await?;
                Ok(ToolOutput::text(format_line_numbered_content(
                    &content,
                    offset.unwrap_or(1),
                )))
            }
        },
    )
    .with_effect(ToolEffect::ReadOnly)
}

#[cfg(test)]
mod tests {
    use super::read_tool;
    use crate::{LocalExecutionEnvironment, ToolError};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test(flavor = "current_thread")]
    async fn read_numbers_lines_from_offset() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").expect("write");
        let tool = read_tool(Arc::new(LocalExecutionEnvironment::new(dir.path())));

        let output = (tool.handler)(json!({ "file_path": "f.txt", "offset": 2, "limit": 1 }))
            .await
            .expect("read should succeed");
        assert_eq!(output.render(), "     2\ttwo");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_file_is_an_execution_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let tool = read_tool(Arc::new(LocalExecutionEnvironment::new(dir.path())));
        let error = (tool.handler)(json!({ "file_path": "absent.txt" }))
            .await
            .expect_err("missing file should fail");
        assert!(matches!(error, ToolError::Execution(_)));
    }
}
