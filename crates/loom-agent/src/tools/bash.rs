use serde_json::json;
use std::sync::Arc;

use super::{
    BASH_TOOL, ToolDescriptor, ToolOutput, optional_string_argument, optional_u64_argument,
    required_string_argument,
};
use crate::{ExecResult, ExecutionEnvironment};

pub(super) fn bash_tool(env: Arc<dyn ExecutionEnvironment>) -> ToolDescriptor {
    ToolDescriptor::new(
        BASH_TOOL,
        "Execute a shell command. Returns stdout, stderr, and exit code.",
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": { "type": "string", "minLength": 1 },
                "timeout_ms": { "type": "integer", "minimum": 1 },
                "working_dir": { "type": "string" },
                "description": { "type": "string" }
            },
            "additionalProperties": false
        }),
        move |args| {
            let env = env.clone();
            async move {
                let command = required_string_argument(&args, "command")?;
                let timeout_ms = optional_u64_argument(&args, "timeout_ms")?.unwrap_or(0);
                let working_dir = optional_string_argument(&args, "working_dir")?;
                let result = env
                    .exec_command(&command, timeout_ms, working_dir.as_deref(), None)
                    .await?;
                Ok(ToolOutput::text(format_exec_result(&result)))
            }
        },
    )
}

fn format_exec_result(result: &ExecResult) -> String {
    let mut output = format!(
        "exit_code: {}\nduration_ms: {}",
        result.exit_code, result.duration_ms
    );
    if result.timed_out {
        output.push_str("\ntimed_out: true");
    }
    if !result.stdout.is_empty() {
        output.push_str("\nstdout:\n");
        output.push_str(&result.stdout);
    }
    if !result.stderr.is_empty() {
        output.push_str("\nstderr:\n");
        output.push_str(&result.stderr);
    }
    output
}
