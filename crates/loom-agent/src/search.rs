//! Web search backend used by the `WebSearch` tool.

use crate::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default, alias = "content")]
    pub snippet: String,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError>;
}

#[derive(Clone)]
pub struct HttpSearchBackend {
    endpoint: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpSearchBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_SEARCH_URL.to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        tracing::debug!(query, max_results, "web search");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "query": query, "max_results": max_results }))
            .send()
            .await
            .map_err(|error| ToolError::Execution(format!("search request failed: {error}")))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|error| ToolError::Execution(format!("reading search response failed: {error}")))?;
        if !(200..300).contains(&status) {
            return Err(ToolError::Execution(format!(
                "search backend returned HTTP {status}"
            )));
        }
        parse_search_response(&text, max_results)
    }
}

fn parse_search_response(body: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|error| ToolError::Execution(format!("invalid search response: {error}")))?;
    let Some(results) = value.get("results").cloned() else {
        return Ok(Vec::new());
    };
    let mut hits: Vec<SearchHit> = serde_json::from_value(results)
        .map_err(|error| ToolError::Execution(format!("invalid search results: {error}")))?;
    hits.truncate(max_results);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_results_and_caps_count() {
        let body = r#"{
            "results": [
                {"title": "A", "url": "https://a", "content": "first"},
                {"title": "B", "url": "https://b", "content": "second"}
            ]
        }"#;
        let hits = parse_search_response(body, 1).expect("parse");
        assert_eq!(
            hits,
            vec![SearchHit {
                title: "A".to_string(),
                url: "https://a".to_string(),
                snippet: "first".to_string(),
            }]
        );
    }

    #[test]
    fn missing_results_is_empty_and_garbage_is_an_error() {
        assert!(parse_search_response("{}", 5).expect("parse").is_empty());
        assert!(parse_search_response("<html>", 5).is_err());
    }
}
