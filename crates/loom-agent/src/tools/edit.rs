use serde_json::json;
use std::sync::Arc;

use super::{
    EDIT_TOOL, ToolDescriptor, ToolEffect, ToolOutput, optional_bool_argument,
    required_string_argument,
};
use crate::{ExecutionEnvironment, ToolError};

pub(super) fn edit_tool(env: Arc<dyn ExecutionEnvironment>) -> ToolDescriptor {
    ToolDescriptor::new(
        EDIT_TOOL,
        "Replace an exact string occurrence in a file. The match must be unique unless replace_all is set.",
        json!({
            "type": "object",
            "required": ["file_path", "old_string", "new_string"],
            "properties": {
                "file_path": { "type": "string", "minLength": 1 },
                "old_string": { "type": "string", "minLength": 1 },
                "new_string": { "type": "string" },
                "replace_all": { "type": "boolean" }
            },
            "additionalProperties": false
        }),
        move |args| {
            let env = env.clone();
            async move {
                let file_path = required_string_argument(&args, "file_path")?;
                let old_string = required_string_argument(&args, "old_string")?;
                let new_string = required_string_argument(&args, "new_string")?;
                let replace_all = optional_bool_argument(&args, "replace_all")?.unwrap_or(false);

                let content = env.read_file(&file_path, None, None).await?;
                let (next_content, replacements) =
                    apply_edit(&content, &file_path, &old_string, &new_string, replace_all)?;
                env.write_file(&file_path, &next_content).await?;

                Ok(ToolOutput::text(format!(
                    "Updated {} ({} replacement{})",
                    file_path,
                    replacements,
                    if replacements == 1 { "" } else { "s" }
                )))
            }
        },
    )
    .with_effect(ToolEffect::Edit)
}

fn apply_edit(
    content: &str,
    file_path: &str,
    old_string: &str,
    new_string: &str,
    replace_all: bool,
) -> Result<(String, usize), ToolError> {
    if old_string.is_empty() {
        return Err(ToolError::Validation(
            "old_string must not be empty".to_string(),
        ));
    }
    let occurrences = content.matches(old_string).count();
    match occurrences {
        0 => Err(ToolError::Execution(format!(
            "old_string not found in {file_path}"
        ))),
        1 => Ok((content.replacen(old_string, new_string, 1), 1)),
        count if replace_all => Ok((content.replace(old_string, new_string), count)),
        count => Err(ToolError::Execution(format!(
            "old_string matches {count} times in {file_path}; provide more context or set replace_all"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_edit, edit_tool};
    use crate::{LocalExecutionEnvironment, ToolError};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn ambiguous_match_requires_replace_all() {
        let error = apply_edit("a a", "f", "a", "b", false).expect_err("ambiguous");
        assert!(matches!(error, ToolError::Execution(message) if message.contains("2 times")));
        assert_eq!(
            apply_edit("a a", "f", "a", "b", true).expect("replace all"),
            ("b b".to_string(), 2)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn edit_rewrites_file_in_place() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("lib.rs"), "let x = 1;\n").expect("write");
        let tool = edit_tool(Arc::new(LocalExecutionEnvironment::new(dir.path())));
        let output = (tool.handler)(json!({
            "file_path": "lib.rs",
            "old_string": "1",
            "new_string": "2"
        }))
        .await
        .expect("edit should succeed");
        assert_eq!(output.render(), "Updated lib.rs (1 replacement)");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lib.rs")).expect("read"),
            "let x = 2;\n"
        );
    }
}
