use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

pub type SessionId = String;
pub type TurnId = String;
pub type ContentHash = String;

/// Sentinel parent of the first turn in every chain.
pub const ROOT_TURN_ID: &str = "0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Errored,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Set when the session was produced by a fork.
    pub parent_session_id: Option<SessionId>,
    /// Parent head at the moment of the fork.
    pub forked_from_turn_id: Option<TurnId>,
    pub head_turn_id: TurnId,
    pub head_depth: u32,
    pub status: SessionStatus,
    pub created_at_ms: u64,
}

impl SessionRecord {
    pub fn turn_count(&self) -> usize {
        self.head_depth as usize
    }

    pub fn is_forked(&self) -> bool {
        self.parent_session_id.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendTurnRequest {
    pub session_id: SessionId,
    pub type_id: String,
    pub type_version: u32,
    pub payload: Vec<u8>,
    /// Empty disables deduplication.
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTurn {
    /// Session that appended the turn. Forks see ancestor turns with the
    /// ancestor's id here.
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub parent_turn_id: TurnId,
    pub depth: u32,
    pub type_id: String,
    pub type_version: u32,
    pub payload: Vec<u8>,
    pub idempotency_key: Option<String>,
    pub content_hash: ContentHash,
}

fn encode_part(part: &str) -> String {
    format!("{}:{}", part.len(), part)
}

pub fn turn_idempotency_key(session_id: &str, turn_index: u64, type_id: &str) -> String {
    format!(
        "loom-agent:v1|{}|{}|{}",
        encode_part(session_id),
        turn_index,
        encode_part(type_id)
    )
}

pub(crate) fn content_hash(payload: &[u8]) -> ContentHash {
    blake3::hash(payload).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_idempotency_key_same_inputs_expected_stable_output() {
        let key_a = turn_idempotency_key("session-1", 7, "loom.agent.user");
        let key_b = turn_idempotency_key("session-1", 7, "loom.agent.user");

        assert_eq!(key_a, key_b);
        assert_eq!(key_a, "loom-agent:v1|9:session-1|7|15:loom.agent.user");
    }

    #[test]
    fn turn_idempotency_key_distinct_index_expected_distinct_keys() {
        assert_ne!(
            turn_idempotency_key("s", 1, "loom.agent.user"),
            turn_idempotency_key("s", 2, "loom.agent.user")
        );
    }

    #[test]
    fn session_status_serializes_snake_case() {
        let encoded = serde_json::to_string(&SessionStatus::Completed).expect("serialize");
        assert_eq!(encoded, "\"completed\"");
        assert_eq!(SessionStatus::Errored.to_string(), "errored");
    }
}
