//! Dispatch core: decodes an inbound message, runs it through the middleware
//! chain and the service router, and returns the response to render.

use bytes::{Buf, Bytes};
use tower::ServiceExt;
use tracing::{debug, info_span, Instrument};
use xroad_core::{decode_message, FromXml};

use super::config::DispatcherConfig;
use super::middleware::{
    build_pipeline, default_middlewares, dump_request, verbose_middlewares, Middlewares,
};
use super::request::{DispatchError, SoapRequest, SoapResponse};
use super::router::{RouterService, ServiceRouter};

/// Owns the frozen handler table and the middleware list.
///
/// Both are read-only after construction, so one dispatcher is shared by
/// every connection without locking.
pub struct Dispatcher<B> {
    router: RouterService<B>,
    middlewares: Middlewares<B>,
    config: DispatcherConfig,
}

impl<B: FromXml + Send + 'static> Dispatcher<B> {
    /// Creates a dispatcher with the default (or, when `config.verbose` is
    /// set, the verbose) middleware chain.
    #[must_use]
    pub fn new(router: ServiceRouter<B>, config: DispatcherConfig) -> Self {
        let middlewares = if config.verbose {
            verbose_middlewares()
        } else {
            default_middlewares()
        };
        Self {
            router: router.into_service(),
            middlewares,
            config,
        }
    }

    /// Replaces the middleware chain. The first entry is the outermost.
    #[must_use]
    pub fn with_middlewares(mut self, middlewares: Middlewares<B>) -> Self {
        self.middlewares = middlewares;
        self
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Decodes a raw request body according to its content type.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] for an unsupported content type or a
    /// malformed message.
    pub fn decode(
        &self,
        content_type: &str,
        body: Bytes,
    ) -> Result<SoapRequest<B>, DispatchError> {
        let message =
            decode_message::<B, _>(content_type, body.reader(), self.config.attachment_limit)?;
        debug!(attachments = message.attachments.len(), "request decoded");
        Ok(SoapRequest::new(message.envelope).with_attachments(message.attachments))
    }

    /// Decodes the request and runs it through a freshly built chain. In
    /// verbose mode the raw body is logged first.
    ///
    /// Handler errors are turned into fault responses by the fault
    /// translation middleware; only decode failures (and errors from a
    /// custom chain without fault translation) come back as `Err`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::decode`].
    pub async fn dispatch(
        &self,
        content_type: &str,
        body: Bytes,
    ) -> Result<SoapResponse, DispatchError> {
        if self.config.verbose {
            dump_request(content_type, &body);
        }
        let request = self.decode(content_type, body)?;
        self.call(request).await
    }

    /// Runs an already decoded request through the chain.
    ///
    /// # Errors
    ///
    /// Whatever the outermost middleware lets through.
    pub async fn call(&self, request: SoapRequest<B>) -> Result<SoapResponse, DispatchError> {
        let header = request.header();
        // Resolved without `target()` so the both-set warning is logged once, by the router.
        let service_code = header
            .central_service
            .as_ref()
            .map(|c| c.service_code.as_str())
            .or_else(|| header.service.as_ref().map(|s| s.service_code.as_str()))
            .unwrap_or_default();
        let span = info_span!("dispatch", id = %header.id, service = %service_code);
        let pipeline = build_pipeline(self.router.clone(), &self.middlewares);
        pipeline.oneshot(request).instrument(span).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
