use crate::{AgentError, OutputLimits, PermissionMode, SystemPrompt, ToolApprover};
use loom_llm::RetryPolicy;
use loom_turnstore::SessionId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_STEP_LIMIT: usize = 32;

/// Process-wide runtime inputs, validated once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub search_api_key: Option<String>,
    pub model: String,
    pub step_limit: usize,
    pub backend_timeout: Duration,
    pub tool_timeout: Duration,
    pub approval_timeout: Duration,
    pub retry: RetryPolicy,
    pub channel_capacity: usize,
    pub output_limits: OutputLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            search_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            step_limit: DEFAULT_STEP_LIMIT,
            backend_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(120),
            approval_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            channel_capacity: 64,
            output_limits: OutputLimits::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source and validates it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self {
            api_key: read("LOOM_API_KEY").unwrap_or_default(),
            base_url: read("LOOM_BASE_URL"),
            search_api_key: read("LOOM_SEARCH_API_KEY"),
            ..Self::default()
        };
        if let Some(model) = read("LOOM_MODEL") {
            config.model = model;
        }
        if let Some(raw) = read("LOOM_STEP_LIMIT") {
            config.step_limit = parse_number("LOOM_STEP_LIMIT", &raw)? as usize;
        }
        if let Some(raw) = read("LOOM_BACKEND_TIMEOUT_MS") {
            config.backend_timeout =
                Duration::from_millis(parse_number("LOOM_BACKEND_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = read("LOOM_TOOL_TIMEOUT_MS") {
            config.tool_timeout = Duration::from_millis(parse_number("LOOM_TOOL_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = read("LOOM_MAX_RETRIES") {
            let retries = parse_number("LOOM_MAX_RETRIES", &raw)?;
            config.retry = RetryPolicy::with_max_retries(retries.min(u32::MAX as u64) as u32);
        }
        config.validate()?;
        Ok(config)
    }

    /// Full validation, including the backend credential.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.api_key.trim().is_empty() {
            return Err(AgentError::invalid_configuration(
                "LOOM_API_KEY is required",
            ));
        }
        self.validate_limits()
    }

    /// Validation of everything except credentials.
    pub fn validate_limits(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::invalid_configuration("model must not be empty"));
        }
        if self.step_limit == 0 {
            return Err(AgentError::invalid_configuration(
                "step limit must be at least 1",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(AgentError::invalid_configuration(
                "stream channel capacity must be at least 1",
            ));
        }
        if self.backend_timeout.is_zero() || self.tool_timeout.is_zero() {
            return Err(AgentError::invalid_configuration(
                "timeouts must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, AgentError> {
    raw.parse::<u64>().map_err(|_| {
        AgentError::invalid_configuration(format!(
            "{key} must be a non-negative integer, got '{raw}'"
        ))
    })
}

/// Set of qualified tool names a task may use. Empty permits every
/// registered tool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllowedTools(BTreeSet<String>);

impl AllowedTools {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn permits(&self, qualified_name: &str) -> bool {
        self.0.is_empty() || self.0.contains(qualified_name)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for AllowedTools {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Per-task options for [`crate::AgentRuntime::run_task`].
#[derive(Clone, Default)]
pub struct RunOptions {
    pub allowed_tools: AllowedTools,
    pub permission_mode: PermissionMode,
    pub can_use_tool: Option<Arc<dyn ToolApprover>>,
    pub resume: Option<SessionId>,
    pub fork_session: bool,
    pub model: Option<String>,
    pub system_prompt: Option<SystemPrompt>,
    pub step_limit: Option<usize>,
    pub tool_timeout: Option<Duration>,
    pub backend_timeout: Option<Duration>,
}

impl RunOptions {
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().collect();
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn ToolApprover>) -> Self {
        self.can_use_tool = Some(approver);
        self
    }

    pub fn resume(mut self, session_id: impl Into<SessionId>) -> Self {
        self.resume = Some(session_id.into());
        self
    }

    pub fn fork(mut self) -> Self {
        self.fork_session = true;
        self
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = Some(step_limit);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AgentError> {
        if self.fork_session && self.resume.is_none() {
            return Err(AgentError::invalid_configuration(
                "fork_session requires a session to resume",
            ));
        }
        if self.step_limit == Some(0) {
            return Err(AgentError::invalid_configuration(
                "step limit must be at least 1",
            ));
        }
        if self
            .model
            .as_deref()
            .is_some_and(|model| model.trim().is_empty())
        {
            return Err(AgentError::invalid_configuration("model must not be empty"));
        }
        Ok(())
    }
}
