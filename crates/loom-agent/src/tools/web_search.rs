use serde_json::json;
use std::sync::Arc;

use super::{
    ToolDescriptor, ToolEffect, ToolOutput, WEB_SEARCH_TOOL, optional_usize_argument,
    required_string_argument,
};
use crate::SearchBackend;

const DEFAULT_MAX_RESULTS: usize = 5;

pub(super) fn web_search_tool(search: Arc<dyn SearchBackend>) -> ToolDescriptor {
    ToolDescriptor::new(
        WEB_SEARCH_TOOL,
        "Search the web. Returns titles, URLs and snippets.",
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": { "type": "string", "minLength": 1 },
                "max_results": { "type": "integer", "minimum": 1, "maximum": 20 }
            },
            "additionalProperties": false
        }),
        move |args| {
            let search = search.clone();
            async move {
                let query = required_string_argument(&args, "query")?;
                let max_results =
                    optional_usize_argument(&args, "max_results")?.unwrap_or(DEFAULT_MAX_RESULTS);
                let hits = search.search(&query, max_results).await?;
                if hits.is_empty() {
                    return Ok(ToolOutput::text("No results"));
                }
                let rendered = hits
                    .iter()
                    .enumerate()
                    .map(|(index, hit)| {
                        format!("{}. {}\n   {}\n   {}", index + 1, hit.title, hit.url, hit.snippet)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolOutput::text(rendered))
            }
        },
    )
    .with_effect(ToolEffect::ReadOnly)
}
