//! Service routing: dispatches a decoded request to the handler registered
//! for its service code.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tower::Service;
use tracing::debug;
use xroad_core::Fault;

use super::request::{DispatchError, SoapFuture, SoapRequest, SoapResponse};

/// Handler key used when no handler matches the service code.
pub const FALLBACK: &str = "*";

// ---------------------------------------------------------------------------
// SoapHandler
// ---------------------------------------------------------------------------

/// Handles requests for one service code.
#[async_trait]
pub trait SoapHandler<B>: Send + Sync {
    async fn handle(&self, request: SoapRequest<B>) -> Result<SoapResponse, DispatchError>;
}

/// Adapts an async closure into a [`SoapHandler`].
pub struct HandlerFn<F, B> {
    f: F,
    _body: PhantomData<fn(B)>,
}

/// Wraps `f` as a handler.
pub fn handler_fn<B, F, Fut>(f: F) -> HandlerFn<F, B>
where
    F: Fn(SoapRequest<B>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SoapResponse, DispatchError>> + Send,
{
    HandlerFn {
        f,
        _body: PhantomData,
    }
}

#[async_trait]
impl<B, F, Fut> SoapHandler<B> for HandlerFn<F, B>
where
    B: Send + 'static,
    F: Fn(SoapRequest<B>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SoapResponse, DispatchError>> + Send,
{
    async fn handle(&self, request: SoapRequest<B>) -> Result<SoapResponse, DispatchError> {
        (self.f)(request).await
    }
}

// ---------------------------------------------------------------------------
// ServiceRouter
// ---------------------------------------------------------------------------

/// Registration table from service code to handler.
///
/// Registering the same code twice replaces the earlier handler. Requests
/// for an unknown code go to the [`FALLBACK`] handler when one exists and
/// otherwise fail with the "Service not found" fault. The table is
/// read-only once the router is turned into a service.
pub struct ServiceRouter<B> {
    handlers: HashMap<String, Arc<dyn SoapHandler<B>>>,
}

impl<B: Send + 'static> ServiceRouter<B> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `service_code` (or [`FALLBACK`]).
    pub fn handle(
        &mut self,
        service_code: impl Into<String>,
        handler: impl SoapHandler<B> + 'static,
    ) {
        self.handlers.insert(service_code.into(), Arc::new(handler));
    }

    /// Registers an async closure for `service_code`.
    pub fn handle_fn<F, Fut>(&mut self, service_code: impl Into<String>, f: F)
    where
        F: Fn(SoapRequest<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SoapResponse, DispatchError>> + Send + 'static,
    {
        self.handle(service_code, handler_fn(f));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Freezes the table into a cloneable tower service.
    #[must_use]
    pub fn into_service(self) -> RouterService<B> {
        RouterService {
            handlers: Arc::new(self.handlers),
        }
    }
}

impl<B: Send + 'static> Default for ServiceRouter<B> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RouterService
// ---------------------------------------------------------------------------

/// Innermost pipeline stage: resolves the target and calls the handler.
pub struct RouterService<B> {
    handlers: Arc<HashMap<String, Arc<dyn SoapHandler<B>>>>,
}

impl<B> Clone for RouterService<B> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
        }
    }
}

impl<B> RouterService<B> {
    fn resolve(&self, service_code: &str) -> Option<Arc<dyn SoapHandler<B>>> {
        self.handlers
            .get(service_code)
            .or_else(|| self.handlers.get(FALLBACK))
            .cloned()
    }
}

impl<B: Send + 'static> Service<SoapRequest<B>> for RouterService<B> {
    type Response = SoapResponse;
    type Error = DispatchError;
    type Future = SoapFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: SoapRequest<B>) -> Self::Future {
        let handler = match request.header().target() {
            Ok(target) => {
                let code = target.service_code().to_string();
                debug!(service = %target, "routing request");
                self.resolve(&code).ok_or(code)
            }
            Err(e) => {
                let fault = Fault::client(e.to_string()).with_cause(e);
                return Box::pin(async move { Err(DispatchError::Fault(fault)) });
            }
        };
        match handler {
            Ok(handler) => Box::pin(async move { handler.handle(request).await }),
            Err(code) => Box::pin(async move {
                Err(DispatchError::Fault(
                    Fault::service_not_found()
                        .with_cause(anyhow::anyhow!("no handler for {code:?}")),
                ))
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;
    use xroad_core::{ClientIdentity, Envelope, HeaderBuilder, MessageHeader, RawBody};

    use super::*;

    fn request(service_code: &str) -> SoapRequest<RawBody> {
        let header = HeaderBuilder::new()
            .client(ClientIdentity::new("FI", "GOV", "1", "c"))
            .service_code(service_code)
            .build();
        SoapRequest::new(Envelope::new(header, RawBody::default()))
    }

    fn tagging(tag: &'static str) -> impl SoapHandler<RawBody> {
        handler_fn(move |req: SoapRequest<RawBody>| async move {
            let header = req.header().to_builder().user_id(tag).build();
            Ok(SoapResponse::ok(header, RawBody::default()))
        })
    }

    #[tokio::test]
    async fn routes_to_registered_service() {
        let mut router = ServiceRouter::new();
        router.handle("a", tagging("A"));
        router.handle("b", tagging("B"));

        let resp = router.into_service().oneshot(request("b")).await.unwrap();
        assert_eq!(resp.envelope.header.user_id, "B");
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut router = ServiceRouter::new();
        router.handle("a", tagging("first"));
        router.handle("a", tagging("second"));
        assert_eq!(router.len(), 1);

        let resp = router.into_service().oneshot(request("a")).await.unwrap();
        assert_eq!(resp.envelope.header.user_id, "second");
    }

    #[tokio::test]
    async fn unknown_service_falls_back_to_wildcard() {
        let mut router = ServiceRouter::new();
        router.handle("a", tagging("A"));
        router.handle(FALLBACK, tagging("any"));

        let resp = router.into_service().oneshot(request("zzz")).await.unwrap();
        assert_eq!(resp.envelope.header.user_id, "any");
    }

    #[tokio::test]
    async fn unknown_service_without_fallback_is_service_not_found() {
        let mut router = ServiceRouter::new();
        router.handle("a", tagging("A"));

        let err = router.into_service().oneshot(request("zzz")).await.unwrap_err();
        assert_eq!(err.fault(), Some(&Fault::service_not_found()));
    }

    #[tokio::test]
    async fn header_without_target_is_client_fault() {
        let router = ServiceRouter::<RawBody>::new();
        let req = SoapRequest::new(Envelope::new(MessageHeader::default(), RawBody::default()));

        let err = router.into_service().oneshot(req).await.unwrap_err();
        let fault = err.fault().unwrap();
        assert_eq!(fault.code, xroad_core::fault::CLIENT_CODE);
    }
}
