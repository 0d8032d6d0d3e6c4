//! Session store for loom: an append-only turn arena where each session is a
//! head pointer into the arena. Forking creates a new head that shares the
//! parent's prefix without copying it.

pub mod fs;
pub mod memory;
pub mod store;
pub mod types;

pub use fs::FsSessionStore;
pub use memory::MemorySessionStore;
pub use store::{SessionStore, StoreError, StoreResult};
pub use types::{
    AppendTurnRequest, ContentHash, ROOT_TURN_ID, SessionId, SessionRecord, SessionStatus,
    StoredTurn, TurnId, turn_idempotency_key,
};
