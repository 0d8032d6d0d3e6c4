use loom_llm::SDKError;
use loom_turnstore::StoreError;
use thiserror::Error;

/// Failure inside a single tool handler. Always recovered locally by turning
/// it into an error-bearing tool result.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Execution(String),
    #[error("tool timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

/// Top-level error type for the loom-agent crate.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("duplicate tool '{tool}' in bundle '{bundle}'")]
    DuplicateTool { bundle: String, tool: String },
    #[error("permission denied for tool '{tool}': {reason}")]
    PermissionDenied { tool: String, reason: String },
    #[error(transparent)]
    Backend(#[from] SDKError),
    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: usize },
    #[error("tool '{tool}' failed: {message}")]
    ToolHandlerFailure { tool: String, message: String },
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("session {0} already has a task in progress")]
    SessionBusy(String),
    #[error("invalid loop state transition {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("task cancelled")]
    Cancelled,
    #[error("session store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AgentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::SessionNotFound(session_id) => Self::SessionNotFound(session_id),
            other => Self::Store(other),
        }
    }
}

impl AgentError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Stable machine-readable code carried by `error` stream messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::DuplicateTool { .. } => "duplicate_tool",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Backend(SDKError::Protocol(_)) => "backend_protocol_error",
            Self::Backend(SDKError::Configuration(_)) => "invalid_configuration",
            Self::Backend(SDKError::Unavailable { .. } | SDKError::Timeout { .. }) => {
                "backend_unavailable"
            }
            Self::StepLimitExceeded { .. } => "step_limit_exceeded",
            Self::ToolHandlerFailure { .. } => "tool_handler_failure",
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::SessionBusy(_) => "session_busy",
            Self::InvalidStateTransition { .. } => "internal",
            Self::Cancelled => "cancelled",
            Self::Store(_) => "store_failure",
        }
    }

    /// Message safe to show to an end user. Backend and store failures are
    /// summarized; the full error goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Backend(SDKError::Unavailable { status: Some(status), .. }) => {
                format!("reasoning backend unavailable (HTTP {status})")
            }
            Self::Backend(SDKError::Unavailable { .. }) => {
                "reasoning backend unavailable".to_string()
            }
            Self::Backend(SDKError::Timeout { timeout_ms }) => {
                format!("reasoning backend timed out after {timeout_ms} ms")
            }
            Self::Backend(SDKError::Protocol(_)) => {
                "reasoning backend returned an unusable response".to_string()
            }
            Self::Backend(SDKError::Configuration(error)) => {
                format!("invalid backend configuration: {}", error.message)
            }
            Self::Store(_) => "session storage failed".to_string(),
            Self::InvalidStateTransition { .. } => "internal runtime error".to_string(),
            other => other.to_string(),
        }
    }
}
