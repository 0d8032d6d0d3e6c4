//! Reasoning backend contract for loom.
//!
//! Provides the request/response vocabulary exchanged with a reasoning
//! backend, the provider adapter trait, a client with a middleware chain
//! (retry, per-attempt timeout), and an OpenAI-compatible HTTP adapter.

pub mod client;
pub mod errors;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod types;

pub use client::{Client, CompleteHandler, Middleware, TimeoutMiddleware};
pub use errors::{ConfigurationError, SDKError};
pub use openai::{DEFAULT_OPENAI_BASE_URL, OpenAiCompatibleAdapter};
pub use provider::ProviderAdapter;
pub use retry::{RetryBackoffConfig, RetryMiddleware, RetryPolicy, delay_for_attempt_ms};
pub use types::{
    FinishReason, Message, Request, Response, Role, ToolCall, ToolDefinition, Usage,
};
