//! Core client and middleware system.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::errors::{ConfigurationError, SDKError};
use crate::provider::ProviderAdapter;
use crate::types::{Request, Response};

pub type CompleteHandler =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response, SDKError>> + Send + Sync>;

/// Middleware wrapping `complete()` calls. The first middleware added is the
/// outermost one.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle_complete(
        &self,
        request: Request,
        next: CompleteHandler,
    ) -> Result<Response, SDKError>;
}

#[derive(Clone, Default)]
pub struct Client {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    default_provider: Option<String>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Client {
    pub fn new(
        providers: HashMap<String, Arc<dyn ProviderAdapter>>,
        default_provider: Option<String>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        Self {
            providers,
            default_provider,
            middleware,
        }
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ProviderAdapter>) -> Result<(), SDKError> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(ConfigurationError::new(format!(
                "provider '{}' is already registered",
                name
            ))
            .into());
        }
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub async fn complete(&self, mut request: Request) -> Result<Response, SDKError> {
        let provider_name = self.resolve_provider(&request)?;
        request.provider = Some(provider_name.clone());
        let adapter = self
            .providers
            .get(&provider_name)
            .ok_or_else(|| {
                ConfigurationError::new(format!("provider '{}' not registered", provider_name))
            })?
            .clone();

        let base: CompleteHandler = Arc::new(move |req| {
            let adapter = adapter.clone();
            Box::pin(async move { adapter.complete(req).await })
        });

        let handler = self
            .middleware
            .iter()
            .rev()
            .fold(base, |next, middleware| {
                let middleware = middleware.clone();
                Arc::new(move |req| {
                    let middleware = middleware.clone();
                    let next = next.clone();
                    Box::pin(async move { middleware.handle_complete(req, next).await })
                })
            });

        handler(request).await
    }

    fn resolve_provider(&self, request: &Request) -> Result<String, SDKError> {
        if let Some(provider) = &request.provider {
            return Ok(provider.clone());
        }
        if let Some(provider) = &self.default_provider {
            return Ok(provider.clone());
        }
        Err(ConfigurationError::new("no provider configured").into())
    }
}

/// Bounds every call that passes through it; expiry surfaces as
/// [`SDKError::Timeout`], which the retry middleware treats as transient.
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle_complete(
        &self,
        request: Request,
        next: CompleteHandler,
    ) -> Result<Response, SDKError> {
        match tokio::time::timeout(self.timeout, next(request)).await {
            Ok(result) => result,
            Err(_) => Err(SDKError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Message, Usage};
    use std::sync::Mutex;

    struct TestAdapter {
        name: String,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ProviderAdapter for TestAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, request: Request) -> Result<Response, SDKError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Response {
                id: "resp".to_string(),
                model: request.model,
                provider: self.name.clone(),
                message: Message::assistant("ok"),
                finish_reason: FinishReason::stop(),
                usage: Usage::default(),
            })
        }
    }

    fn adapter(name: &str) -> Arc<dyn ProviderAdapter> {
        Arc::new(TestAdapter {
            name: name.to_string(),
            delay: None,
        })
    }

    struct OrderMiddleware {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for OrderMiddleware {
        async fn handle_complete(
            &self,
            request: Request,
            next: CompleteHandler,
        ) -> Result<Response, SDKError> {
            self.log.lock().expect("log mutex").push(self.label);
            let result = next(request).await;
            self.log.lock().expect("log mutex").push(self.label);
            result
        }
    }

    fn request() -> Request {
        Request {
            model: "model".to_string(),
            messages: vec![Message::user("hi")],
            ..Request::default()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn middleware_order_is_preserved() {
        let mut client = Client::default();
        client.register_provider(adapter("test")).expect("register");

        let log = Arc::new(Mutex::new(Vec::new()));
        client.add_middleware(Arc::new(OrderMiddleware {
            label: "a",
            log: log.clone(),
        }));
        client.add_middleware(Arc::new(OrderMiddleware {
            label: "b",
            log: log.clone(),
        }));

        client.complete(request()).await.expect("complete");
        let order = log.lock().expect("log mutex").clone();
        assert_eq!(order, vec!["a", "b", "b", "a"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn provider_resolution_prefers_request_provider() {
        let mut client = Client::default();
        client.register_provider(adapter("first")).expect("register");
        client.register_provider(adapter("second")).expect("register");
        assert_eq!(client.default_provider(), Some("first"));

        let mut routed = request();
        routed.provider = Some("second".to_string());
        let response = client.complete(routed).await.expect("complete");
        assert_eq!(response.provider, "second");
    }

    #[test]
    fn duplicate_provider_registration_is_rejected() {
        let mut client = Client::default();
        client.register_provider(adapter("test")).expect("register");
        let error = client
            .register_provider(adapter("test"))
            .expect_err("duplicate must fail");
        assert!(matches!(error, SDKError::Configuration(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_provider_is_a_configuration_error() {
        let client = Client::default();
        let error = client.complete(request()).await.expect_err("no provider");
        assert!(matches!(error, SDKError::Configuration(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn timeout_middleware_converts_expiry_into_timeout_error() {
        let mut client = Client::default();
        client
            .register_provider(Arc::new(TestAdapter {
                name: "slow".to_string(),
                delay: Some(Duration::from_millis(200)),
            }))
            .expect("register");
        client.add_middleware(Arc::new(TimeoutMiddleware::new(Duration::from_millis(10))));

        let error = client.complete(request()).await.expect_err("should time out");
        assert_eq!(error, SDKError::Timeout { timeout_ms: 10 });
    }
}
