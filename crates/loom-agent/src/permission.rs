//! Permission gate: decides whether a tool invocation may run.
//!
//! [`PermissionGate::evaluate`] is a pure function of the mode, the allowed
//! tool set and the tool's effect class. [`PermissionGate::decide`] resolves
//! `ask` outcomes through the configured [`ToolApprover`] and always fails
//! closed.

use crate::{AgentError, AllowedTools, ToolEffect};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Read-only and reversible edits run; destructive calls need approval.
    #[default]
    AutoAcceptEdits,
    /// Everything runs. Only for sandboxed or CI contexts.
    Bypass,
    /// Every call goes to the approver.
    Interactive,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoAcceptEdits => "auto_accept_edits",
            Self::Bypass => "bypass",
            Self::Interactive => "interactive",
        }
    }
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auto_accept_edits" | "accept_edits" => Ok(Self::AutoAcceptEdits),
            "bypass" | "bypass_permissions" => Ok(Self::Bypass),
            "interactive" | "default" => Ok(Self::Interactive),
            other => Err(AgentError::invalid_configuration(format!(
                "unknown permission mode '{other}'"
            ))),
        }
    }
}

/// One tool call as seen by the gate and the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub session_id: String,
    pub sequence_no: u64,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny { reason: String },
    Ask { reason: String },
}

impl PermissionDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason } | Self::Ask { reason } => Some(reason),
        }
    }
}

/// External approval callback (`canUseTool`).
#[async_trait]
pub trait ToolApprover: Send + Sync {
    async fn can_use_tool(&self, tool_name: &str, arguments: &Value) -> Result<bool, AgentError>;
}

pub struct CallbackApprover {
    callback: Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>,
}

impl CallbackApprover {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl ToolApprover for CallbackApprover {
    async fn can_use_tool(&self, tool_name: &str, arguments: &Value) -> Result<bool, AgentError> {
        Ok((self.callback)(tool_name, arguments))
    }
}

/// Wraps a synchronous closure as a shareable approver.
pub fn approver_fn<F>(callback: F) -> Arc<dyn ToolApprover>
where
    F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
{
    Arc::new(CallbackApprover::new(callback))
}

#[derive(Clone)]
pub struct PermissionGate {
    mode: PermissionMode,
    allowed_tools: AllowedTools,
    approver: Option<Arc<dyn ToolApprover>>,
    approval_timeout: Duration,
}

impl PermissionGate {
    pub fn new(mode: PermissionMode, allowed_tools: AllowedTools) -> Self {
        Self {
            mode,
            allowed_tools,
            approver: None,
            approval_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_approver(mut self, approver: Option<Arc<dyn ToolApprover>>) -> Self {
        self.approver = approver;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn allowed_tools(&self) -> &AllowedTools {
        &self.allowed_tools
    }

    pub fn evaluate(&self, invocation: &ToolInvocation, effect: ToolEffect) -> PermissionDecision {
        if !self.allowed_tools.permits(&invocation.tool_name) {
            return PermissionDecision::deny(format!(
                "tool '{}' is not in the allowed tools for this task",
                invocation.tool_name
            ));
        }
        match self.mode {
            PermissionMode::Bypass => PermissionDecision::Allow,
            PermissionMode::AutoAcceptEdits => match effect {
                ToolEffect::ReadOnly | ToolEffect::Edit => PermissionDecision::Allow,
                ToolEffect::Destructive => PermissionDecision::Ask {
                    reason: format!(
                        "tool '{}' is destructive and requires approval",
                        invocation.tool_name
                    ),
                },
            },
            PermissionMode::Interactive => PermissionDecision::Ask {
                reason: format!("tool '{}' requires approval", invocation.tool_name),
            },
        }
    }

    /// Final decision: `Allow` or `Deny`, never `Ask`.
    pub async fn decide(&self, invocation: &ToolInvocation, effect: ToolEffect) -> PermissionDecision {
        let reason = match self.evaluate(invocation, effect) {
            PermissionDecision::Ask { reason } => reason,
            decided => return decided,
        };
        let Some(approver) = &self.approver else {
            return PermissionDecision::deny(format!("{reason}; no approver is configured"));
        };

        let call = AssertUnwindSafe(
            approver.can_use_tool(&invocation.tool_name, &invocation.arguments),
        )
        .catch_unwind();
        match tokio::time::timeout(self.approval_timeout, call).await {
            Ok(Ok(Ok(true))) => PermissionDecision::Allow,
            Ok(Ok(Ok(false))) => PermissionDecision::deny(format!(
                "the user declined to run '{}'",
                invocation.tool_name
            )),
            Ok(Ok(Err(error))) => {
                tracing::warn!(tool = %invocation.tool_name, error = %error, "approver failed; denying");
                PermissionDecision::deny(format!(
                    "approval for '{}' failed; the call was not run",
                    invocation.tool_name
                ))
            }
            Ok(Err(_)) => {
                tracing::warn!(tool = %invocation.tool_name, "approver panicked; denying");
                PermissionDecision::deny(format!(
                    "approval for '{}' failed; the call was not run",
                    invocation.tool_name
                ))
            }
            Err(_) => {
                tracing::warn!(
                    tool = %invocation.tool_name,
                    timeout_ms = self.approval_timeout.as_millis() as u64,
                    "approval timed out; denying"
                );
                PermissionDecision::deny(format!(
                    "approval for '{}' timed out; the call was not run",
                    invocation.tool_name
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(tool_name: &str) -> ToolInvocation {
        ToolInvocation {
            session_id: "s".to_string(),
            sequence_no: 1,
            call_id: "call-1".to_string(),
            tool_name: tool_name.to_string(),
            arguments: json!({}),
        }
    }

    struct FailingApprover;

    #[async_trait]
    impl ToolApprover for FailingApprover {
        async fn can_use_tool(&self, _: &str, _: &Value) -> Result<bool, AgentError> {
            Err(AgentError::invalid_configuration("approver offline"))
        }
    }

    struct SlowApprover;

    #[async_trait]
    impl ToolApprover for SlowApprover {
        async fn can_use_tool(&self, _: &str, _: &Value) -> Result<bool, AgentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    #[test]
    fn auto_accept_edits_allows_edits_and_defers_destructive_calls() {
        let gate = PermissionGate::new(PermissionMode::AutoAcceptEdits, AllowedTools::all());
        assert_eq!(
            gate.evaluate(&invocation("Read"), ToolEffect::ReadOnly),
            PermissionDecision::Allow
        );
        assert_eq!(
            gate.evaluate(&invocation("Edit"), ToolEffect::Edit),
            PermissionDecision::Allow
        );
        assert!(matches!(
            gate.evaluate(&invocation("Bash"), ToolEffect::Destructive),
            PermissionDecision::Ask { .. }
        ));
    }

    #[test]
    fn bypass_allows_everything_in_the_allowed_set() {
        let gate = PermissionGate::new(
            PermissionMode::Bypass,
            ["Glob"].into_iter().collect(),
        );
        assert!(
            gate.evaluate(&invocation("Glob"), ToolEffect::Destructive)
                .is_allowed()
        );
        let denied = gate.evaluate(&invocation("Bash"), ToolEffect::ReadOnly);
        assert!(denied.reason().is_some_and(|reason| reason.contains("allowed tools")));
    }

    #[test]
    fn permission_mode_parses_cli_spellings() {
        assert_eq!(
            "auto-accept-edits".parse::<PermissionMode>().expect("parse"),
            PermissionMode::AutoAcceptEdits
        );
        assert_eq!(
            "bypass".parse::<PermissionMode>().expect("parse"),
            PermissionMode::Bypass
        );
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn interactive_uses_approver_answer() {
        let gate = PermissionGate::new(PermissionMode::Interactive, AllowedTools::all())
            .with_approver(Some(approver_fn(|name, _| name == "Read")));
        assert!(
            gate.decide(&invocation("Read"), ToolEffect::ReadOnly)
                .await
                .is_allowed()
        );
        let denied = gate.decide(&invocation("Bash"), ToolEffect::Destructive).await;
        assert!(matches!(denied, PermissionDecision::Deny { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ask_without_approver_fails_closed() {
        let gate = PermissionGate::new(PermissionMode::AutoAcceptEdits, AllowedTools::all());
        let decision = gate.decide(&invocation("Bash"), ToolEffect::Destructive).await;
        assert!(matches!(decision, PermissionDecision::Deny { reason } if reason.contains("no approver")));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn approver_error_fails_closed() {
        let gate = PermissionGate::new(PermissionMode::Interactive, AllowedTools::all())
            .with_approver(Some(Arc::new(FailingApprover)));
        let decision = gate.decide(&invocation("Read"), ToolEffect::ReadOnly).await;
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn approver_timeout_fails_closed() {
        let gate = PermissionGate::new(PermissionMode::Interactive, AllowedTools::all())
            .with_approver(Some(Arc::new(SlowApprover)))
            .with_approval_timeout(Duration::from_millis(50));
        let decision = gate.decide(&invocation("Read"), ToolEffect::ReadOnly).await;
        assert!(matches!(decision, PermissionDecision::Deny { reason } if reason.contains("timed out")));
    }
}
