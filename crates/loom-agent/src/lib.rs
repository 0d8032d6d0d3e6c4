//! Agent session runtime for loom.
//!
//! Drives a tool-using execution loop against a reasoning backend, gates
//! every tool call through a permission policy, and streams the loop's
//! progress to the caller. Sessions live in a [`loom_turnstore`] store and
//! can be resumed or forked.

pub mod config;
pub mod errors;
pub mod events;
pub mod execution;
pub mod permission;
pub mod prompt;
pub mod runtime;
pub mod search;
pub mod session;
pub mod stream;
pub mod tools;
pub mod truncation;
pub mod turn;
pub mod wire;

pub use config::*;
pub use errors::*;
pub use events::*;
pub use execution::*;
pub use permission::*;
pub use prompt::*;
pub use runtime::*;
pub use search::*;
pub use session::*;
pub use stream::*;
pub use tools::*;
pub use truncation::*;
pub use turn::*;
pub use wire::{SSE_DONE, SSE_DONE_DATA, SseEvent, SseParser, decode_sse, encode_sse, sse_frames};
