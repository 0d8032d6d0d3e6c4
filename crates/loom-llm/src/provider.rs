//! Provider adapter contract.

use async_trait::async_trait;

use crate::errors::SDKError;
use crate::types::{Request, Response};

/// A reasoning backend reachable by name through the [`crate::Client`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: Request) -> Result<Response, SDKError>;
}
