use loom_llm::Usage;
use loom_turnstore::{AppendTurnRequest, StoreError, StoredTurn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Timestamp = String;

pub const USER_TURN_TYPE: &str = "loom.agent.user";
pub const ASSISTANT_TURN_TYPE: &str = "loom.agent.assistant";
pub const TOOL_REQUEST_TURN_TYPE: &str = "loom.agent.tool_request";
pub const TOOL_RESULT_TURN_TYPE: &str = "loom.agent.tool_result";
pub const TURN_TYPE_VERSION: u32 = 1;

/// One immutable exchange unit of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
        timestamp: Timestamp,
    },
    Assistant {
        content: String,
        usage: Usage,
        response_id: Option<String>,
        timestamp: Timestamp,
    },
    ToolRequest {
        call_id: String,
        sequence_no: u64,
        tool_name: String,
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_arguments: Option<String>,
        timestamp: Timestamp,
    },
    ToolResult {
        call_id: String,
        sequence_no: u64,
        tool_name: String,
        content: String,
        is_error: bool,
        /// The permission gate refused the call; the handler never ran.
        #[serde(default)]
        denied: bool,
        timestamp: Timestamp,
    },
}

impl Turn {
    pub fn type_id(&self) -> &'static str {
        match self {
            Self::User { .. } => USER_TURN_TYPE,
            Self::Assistant { .. } => ASSISTANT_TURN_TYPE,
            Self::ToolRequest { .. } => TOOL_REQUEST_TURN_TYPE,
            Self::ToolResult { .. } => TOOL_RESULT_TURN_TYPE,
        }
    }

    pub fn sequence_no(&self) -> Option<u64> {
        match self {
            Self::ToolRequest { sequence_no, .. } | Self::ToolResult { sequence_no, .. } => {
                Some(*sequence_no)
            }
            _ => None,
        }
    }

    pub fn to_append_request(
        &self,
        session_id: &str,
        idempotency_key: String,
    ) -> Result<AppendTurnRequest, StoreError> {
        let payload = serde_json::to_vec(self)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        Ok(AppendTurnRequest {
            session_id: session_id.to_string(),
            type_id: self.type_id().to_string(),
            type_version: TURN_TYPE_VERSION,
            payload,
            idempotency_key,
        })
    }

    pub fn from_stored(stored: &StoredTurn) -> Result<Self, StoreError> {
        if stored.type_version != TURN_TYPE_VERSION {
            return Err(StoreError::Serialization(format!(
                "turn {} has unsupported version {} for {}",
                stored.turn_id, stored.type_version, stored.type_id
            )));
        }
        let turn: Turn = serde_json::from_slice(&stored.payload)
            .map_err(|error| StoreError::Serialization(error.to_string()))?;
        if turn.type_id() != stored.type_id {
            return Err(StoreError::Serialization(format!(
                "turn {} is recorded as {} but decodes as {}",
                stored.turn_id,
                stored.type_id,
                turn.type_id()
            )));
        }
        Ok(turn)
    }
}
