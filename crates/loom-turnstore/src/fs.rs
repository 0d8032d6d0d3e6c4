use crate::memory::{MemorySessionStore, MemoryState};
use crate::store::{SessionStore, StoreError, StoreResult};
use crate::types::{
    AppendTurnRequest, SessionId, SessionRecord, SessionStatus, StoredTurn, TurnId,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const STATE_FILE_NAME: &str = "sessions-state.json";

/// Session store persisted as a single JSON snapshot under `root`.
///
/// Every mutation rewrites the snapshot through a temp file and a rename, so
/// a crash leaves either the previous or the new state on disk.
#[derive(Clone, Debug)]
pub struct FsSessionStore {
    state_file: PathBuf,
    inner: MemorySessionStore,
    persist_lock: Arc<Mutex<()>>,
}

impl FsSessionStore {
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        fs::create_dir_all(root.as_ref()).map_err(|err| {
            StoreError::Backend(format!("create session store root failed: {err}"))
        })?;
        let state_file = root.as_ref().join(STATE_FILE_NAME);
        let state = if state_file.exists() {
            let raw = fs::read(&state_file)
                .map_err(|err| StoreError::Backend(format!("read state file failed: {err}")))?;
            serde_json::from_slice::<MemoryState>(&raw)
                .map_err(|err| StoreError::Serialization(err.to_string()))?
        } else {
            MemoryState::default()
        };
        tracing::debug!(
            path = %state_file.display(),
            sessions = state.sessions.len(),
            turns = state.turns.len(),
            "session store opened"
        );

        Ok(Self {
            state_file,
            inner: MemorySessionStore::from_state(state),
            persist_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn persist(&self) -> StoreResult<()> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| StoreError::Backend("persist lock poisoned".to_string()))?;
        let snapshot = self.inner.snapshot()?;
        let raw = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| StoreError::Backend(format!("write state file failed: {err}")))?;
        fs::rename(&tmp, &self.state_file)
            .map_err(|err| StoreError::Backend(format!("rename state file failed: {err}")))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for FsSessionStore {
    async fn create(&self) -> StoreResult<SessionRecord> {
        let record = self.inner.create().await?;
        if let Err(error) = self.persist() {
            self.inner.remove_session(&record.session_id)?;
            return Err(error);
        }
        Ok(record)
    }

    async fn load(&self, session_id: &SessionId) -> StoreResult<SessionRecord> {
        self.inner.load(session_id).await
    }

    async fn append(&self, request: AppendTurnRequest) -> StoreResult<StoredTurn> {
        let before = self.inner.session_state(&request.session_id)?;
        let turn = self.inner.append(request).await?;
        if let Err(error) = self.persist() {
            tracing::warn!(
                session_id = %turn.session_id,
                turn_id = %turn.turn_id,
                error = %error,
                "append not persisted; rolling back"
            );
            self.inner.rollback_append(before, &turn.turn_id)?;
            return Err(error);
        }
        Ok(turn)
    }

    async fn fork(&self, session_id: &SessionId) -> StoreResult<SessionRecord> {
        let record = self.inner.fork(session_id).await?;
        if let Err(error) = self.persist() {
            self.inner.remove_session(&record.session_id)?;
            return Err(error);
        }
        Ok(record)
    }

    async fn set_status(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> StoreResult<SessionRecord> {
        let previous = self.inner.load(session_id).await?.status;
        let record = self.inner.set_status(session_id, status).await?;
        if let Err(error) = self.persist() {
            self.inner.set_status(session_id, previous).await?;
            return Err(error);
        }
        Ok(record)
    }

    async fn list_turns(
        &self,
        session_id: &SessionId,
        before_turn_id: Option<&TurnId>,
        limit: usize,
    ) -> StoreResult<Vec<StoredTurn>> {
        self.inner
            .list_turns(session_id, before_turn_id, limit)
            .await
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionRecord>> {
        self.inner.list_sessions().await
    }
}
