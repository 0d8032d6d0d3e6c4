use crate::store::{SessionStore, StoreError, StoreResult};
use crate::types::{
    AppendTurnRequest, ROOT_TURN_ID, SessionId, SessionRecord, SessionStatus, StoredTurn, TurnId,
    content_hash,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Serializable image of the whole store, used by the file-backed store.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct MemoryState {
    pub next_turn_id: u64,
    pub sessions: BTreeMap<SessionId, SessionState>,
    pub turns: BTreeMap<TurnId, StoredTurn>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct SessionState {
    pub record: SessionRecord,
    pub idempotency: BTreeMap<String, TurnId>,
}

impl SessionState {
    fn new(record: SessionRecord) -> Self {
        Self {
            record,
            idempotency: BTreeMap::new(),
        }
    }
}

type SessionSlot = Arc<Mutex<SessionState>>;

#[derive(Debug, Default)]
struct Inner {
    next_turn_id: AtomicU64,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
    turns: RwLock<HashMap<TurnId, StoredTurn>>,
}

/// In-memory reference store.
///
/// Each session sits behind its own lock so appends to one session are
/// serialized while other sessions proceed. The turn arena is shared by all
/// sessions and only ever grows.
#[derive(Clone, Debug, Default)]
pub struct MemorySessionStore {
    inner: Arc<Inner>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory session store lock poisoned".to_string())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: MemoryState) -> Self {
        let sessions = state
            .sessions
            .into_iter()
            .map(|(id, session)| (id, Arc::new(Mutex::new(session))))
            .collect();
        let turns = state.turns.into_iter().collect();
        Self {
            inner: Arc::new(Inner {
                next_turn_id: AtomicU64::new(state.next_turn_id.max(1)),
                sessions: RwLock::new(sessions),
                turns: RwLock::new(turns),
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> StoreResult<MemoryState> {
        let slots: Vec<(SessionId, SessionSlot)> = {
            let sessions = self.inner.sessions.read().map_err(poisoned)?;
            sessions
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect()
        };
        let mut snapshot_sessions = BTreeMap::new();
        for (id, slot) in slots {
            let session = slot.lock().map_err(poisoned)?;
            snapshot_sessions.insert(id, session.clone());
        }
        let turns = self.inner.turns.read().map_err(poisoned)?;
        Ok(MemoryState {
            next_turn_id: self.inner.next_turn_id.load(Ordering::SeqCst),
            sessions: snapshot_sessions,
            turns: turns
                .iter()
                .map(|(id, turn)| (id.clone(), turn.clone()))
                .collect(),
        })
    }

    pub(crate) fn session_state(&self, session_id: &SessionId) -> StoreResult<SessionState> {
        let slot = self.slot(session_id)?;
        let session = slot.lock().map_err(poisoned)?;
        Ok(session.clone())
    }

    /// Puts a session back to `before` and drops `turn_id` from the arena if
    /// the failed append created it.
    pub(crate) fn rollback_append(
        &self,
        before: SessionState,
        turn_id: &TurnId,
    ) -> StoreResult<()> {
        let slot = self.slot(&before.record.session_id)?;
        let mut session = slot.lock().map_err(poisoned)?;
        let created = before.record.head_turn_id != *turn_id
            && !before.idempotency.values().any(|existing| existing == turn_id);
        if created {
            let mut turns = self.inner.turns.write().map_err(poisoned)?;
            turns.remove(turn_id);
        }
        *session = before;
        Ok(())
    }

    pub(crate) fn remove_session(&self, session_id: &SessionId) -> StoreResult<()> {
        let mut sessions = self.inner.sessions.write().map_err(poisoned)?;
        sessions.remove(session_id);
        Ok(())
    }

    fn slot(&self, session_id: &SessionId) -> StoreResult<SessionSlot> {
        let sessions = self.inner.sessions.read().map_err(poisoned)?;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))
    }

    fn allocate_turn_id(&self) -> TurnId {
        // Zero is reserved for the root sentinel.
        let _ = self
            .inner
            .next_turn_id
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
        self.inner
            .next_turn_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn insert_session(&self, record: SessionRecord) -> StoreResult<SessionRecord> {
        let mut sessions = self.inner.sessions.write().map_err(poisoned)?;
        sessions.insert(
            record.session_id.clone(),
            Arc::new(Mutex::new(SessionState::new(record.clone()))),
        );
        Ok(record)
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self) -> StoreResult<SessionRecord> {
        let record = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            parent_session_id: None,
            forked_from_turn_id: None,
            head_turn_id: ROOT_TURN_ID.to_string(),
            head_depth: 0,
            status: SessionStatus::Active,
            created_at_ms: now_ms(),
        };
        tracing::debug!(session_id = %record.session_id, "session created");
        self.insert_session(record)
    }

    async fn load(&self, session_id: &SessionId) -> StoreResult<SessionRecord> {
        let slot = self.slot(session_id)?;
        let session = slot.lock().map_err(poisoned)?;
        Ok(session.record.clone())
    }

    async fn append(&self, request: AppendTurnRequest) -> StoreResult<StoredTurn> {
        let slot = self.slot(&request.session_id)?;
        let mut session = slot.lock().map_err(poisoned)?;

        let key = (!request.idempotency_key.is_empty()).then(|| request.idempotency_key.clone());
        if let Some(existing) = key.as_ref().and_then(|key| session.idempotency.get(key)) {
            let turns = self.inner.turns.read().map_err(poisoned)?;
            if let Some(turn) = turns.get(existing) {
                return Ok(turn.clone());
            }
        }

        let turn = StoredTurn {
            session_id: request.session_id.clone(),
            turn_id: self.allocate_turn_id(),
            parent_turn_id: session.record.head_turn_id.clone(),
            depth: session.record.head_depth + 1,
            content_hash: content_hash(&request.payload),
            type_id: request.type_id,
            type_version: request.type_version,
            payload: request.payload,
            idempotency_key: key.clone(),
        };

        {
            let mut turns = self.inner.turns.write().map_err(poisoned)?;
            turns.insert(turn.turn_id.clone(), turn.clone());
        }
        if let Some(key) = key {
            session.idempotency.insert(key, turn.turn_id.clone());
        }
        session.record.head_turn_id = turn.turn_id.clone();
        session.record.head_depth = turn.depth;
        Ok(turn)
    }

    async fn fork(&self, session_id: &SessionId) -> StoreResult<SessionRecord> {
        // Point-in-time read of the parent head; the parent lock is released
        // before the child is registered.
        let (head_turn_id, head_depth) = {
            let slot = self.slot(session_id)?;
            let parent = slot.lock().map_err(poisoned)?;
            (
                parent.record.head_turn_id.clone(),
                parent.record.head_depth,
            )
        };

        let record = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            parent_session_id: Some(session_id.clone()),
            forked_from_turn_id: Some(head_turn_id.clone()),
            head_turn_id,
            head_depth,
            status: SessionStatus::Active,
            created_at_ms: now_ms(),
        };
        tracing::debug!(
            session_id = %record.session_id,
            parent_session_id = %session_id,
            depth = head_depth,
            "session forked"
        );
        self.insert_session(record)
    }

    async fn set_status(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> StoreResult<SessionRecord> {
        let slot = self.slot(session_id)?;
        let mut session = slot.lock().map_err(poisoned)?;
        session.record.status = status;
        Ok(session.record.clone())
    }

    async fn list_turns(
        &self,
        session_id: &SessionId,
        before_turn_id: Option<&TurnId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredTurn>> {
        let head = self.load(session_id).await?.head_turn_id;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let turns = self.inner.turns.read().map_err(poisoned)?;
        let mut cursor = head;
        if let Some(before) = before_turn_id {
            if before == ROOT_TURN_ID {
                return Ok(Vec::new());
            }
            let mut reachable = false;
            while cursor != ROOT_TURN_ID {
                let turn = turns.get(&cursor).ok_or_else(|| StoreError::NotFound {
                    resource: "turn",
                    id: cursor.clone(),
                })?;
                if &cursor == before {
                    reachable = true;
                    cursor = turn.parent_turn_id.clone();
                    break;
                }
                cursor = turn.parent_turn_id.clone();
            }
            if !reachable {
                return Err(StoreError::InvalidInput(format!(
                    "turn {} is not reachable from session {} head",
                    before, session_id
                )));
            }
        }

        let mut collected = Vec::new();
        while cursor != ROOT_TURN_ID && collected.len() < limit {
            let turn = turns.get(&cursor).ok_or_else(|| StoreError::NotFound {
                resource: "turn",
                id: cursor.clone(),
            })?;
            collected.push(turn.clone());
            cursor = turn.parent_turn_id.clone();
        }
        collected.reverse();
        Ok(collected)
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionRecord>> {
        let slots: Vec<SessionSlot> = {
            let sessions = self.inner.sessions.read().map_err(poisoned)?;
            sessions.values().cloned().collect()
        };
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            records.push(slot.lock().map_err(poisoned)?.record.clone());
        }
        records.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(records)
    }
}
