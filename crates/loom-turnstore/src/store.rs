use crate::types::{
    AppendTurnRequest, SessionId, SessionRecord, SessionStatus, StoredTurn, TurnId,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("resource not found: {resource} ({id})")]
    NotFound { resource: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent conversation state keyed by session id.
///
/// Appends to one session are serialized; different sessions may be served
/// in parallel. Turns are immutable once appended.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates an `active` session with an empty turn sequence.
    async fn create(&self) -> StoreResult<SessionRecord>;

    async fn load(&self, session_id: &SessionId) -> StoreResult<SessionRecord>;

    /// Appends at the session head. A repeated non-empty idempotency key
    /// returns the turn recorded the first time.
    async fn append(&self, request: AppendTurnRequest) -> StoreResult<StoredTurn>;

    /// Creates a session whose history is the parent's current sequence.
    /// Later appends to either session are invisible to the other.
    async fn fork(&self, session_id: &SessionId) -> StoreResult<SessionRecord>;

    async fn set_status(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> StoreResult<SessionRecord>;

    /// Marks the session `completed`. Storage is not reclaimed.
    async fn close(&self, session_id: &SessionId) -> StoreResult<SessionRecord> {
        self.set_status(session_id, SessionStatus::Completed).await
    }

    /// Returns up to `limit` turns ending just before `before_turn_id` (or at
    /// the head), oldest first.
    async fn list_turns(
        &self,
        session_id: &SessionId,
        before_turn_id: Option<&TurnId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredTurn>>;

    /// Full turn sequence of the session, oldest first.
    async fn turns(&self, session_id: &SessionId) -> StoreResult<Vec<StoredTurn>> {
        self.list_turns(session_id, None, usize::MAX).await
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionRecord>>;
}
