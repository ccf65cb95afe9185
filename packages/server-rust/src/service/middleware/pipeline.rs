//! Pipeline composition: wraps the router in an ordered middleware list.

use std::sync::Arc;

use tower::util::BoxService;
use tower::{Layer, Service};

use super::dump::DumpLayer;
use super::fault::FaultLayer;
use super::header_log::HeaderLogLayer;
use super::recover::RecoverLayer;
use crate::service::request::{DispatchError, SoapRequest, SoapResponse};

/// Type-erased pipeline stage.
pub type SoapService<B> = BoxService<SoapRequest<B>, SoapResponse, DispatchError>;

/// Ordered middleware list; the first entry is the outermost wrapper.
pub type Middlewares<B> = Vec<Arc<dyn SoapMiddleware<B>>>;

/// A handler-transforming stage. Every tower [`Layer`] over [`SoapService`]
/// whose service speaks the pipeline's request and error types is one.
pub trait SoapMiddleware<B>: Send + Sync {
    fn wrap(&self, inner: SoapService<B>) -> SoapService<B>;
}

impl<B, L> SoapMiddleware<B> for L
where
    B: 'static,
    L: Layer<SoapService<B>> + Send + Sync,
    L::Service: Service<SoapRequest<B>, Response = SoapResponse, Error = DispatchError>
        + Send
        + 'static,
    <L::Service as Service<SoapRequest<B>>>::Future: Send + 'static,
{
    fn wrap(&self, inner: SoapService<B>) -> SoapService<B> {
        BoxService::new(self.layer(inner))
    }
}

/// Fault translation, header logging, recovery.
#[must_use]
pub fn default_middlewares<B: Send + 'static>() -> Middlewares<B> {
    vec![
        Arc::new(FaultLayer),
        Arc::new(HeaderLogLayer),
        Arc::new(RecoverLayer),
    ]
}

/// Fault translation, response dumping, recovery.
#[must_use]
pub fn verbose_middlewares<B: Send + 'static>() -> Middlewares<B> {
    vec![
        Arc::new(FaultLayer),
        Arc::new(DumpLayer),
        Arc::new(RecoverLayer),
    ]
}

/// Wraps `core` so that `middlewares[0]` sees the request first and the
/// result last, and the final entry wraps `core` directly.
pub fn build_pipeline<B, S>(core: S, middlewares: &[Arc<dyn SoapMiddleware<B>>]) -> SoapService<B>
where
    B: 'static,
    S: Service<SoapRequest<B>, Response = SoapResponse, Error = DispatchError> + Send + 'static,
    S::Future: Send + 'static,
{
    middlewares
        .iter()
        .rev()
        .fold(BoxService::new(core), |service, middleware| middleware.wrap(service))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    use tower::{service_fn, ServiceExt};
    use xroad_core::{ClientIdentity, Envelope, Fault, HeaderBuilder, RawBody, Reply};

    use super::*;
    use crate::service::request::SoapFuture;

    /// Records its name on the way in and on the way out.
    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    struct TraceService {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        inner: SoapService<RawBody>,
    }

    impl SoapMiddleware<RawBody> for Trace {
        fn wrap(&self, inner: SoapService<RawBody>) -> SoapService<RawBody> {
            BoxService::new(TraceService {
                name: self.name,
                log: Arc::clone(&self.log),
                inner,
            })
        }
    }

    impl Service<SoapRequest<RawBody>> for TraceService {
        type Response = SoapResponse;
        type Error = DispatchError;
        type Future = SoapFuture;

        fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.inner.poll_ready(cx)
        }

        fn call(&mut self, request: SoapRequest<RawBody>) -> Self::Future {
            self.log.lock().unwrap().push(format!("{} in", self.name));
            let fut = self.inner.call(request);
            let (name, log) = (self.name, Arc::clone(&self.log));
            Box::pin(async move {
                let result = fut.await;
                log.lock().unwrap().push(format!("{name} out"));
                result
            })
        }
    }

    fn request() -> SoapRequest<RawBody> {
        let header = HeaderBuilder::new()
            .client(ClientIdentity::new("FI", "GOV", "1", "c"))
            .service_code("svc")
            .build();
        SoapRequest::new(Envelope::new(header, RawBody::default()))
    }

    fn echo() -> SoapService<RawBody> {
        BoxService::new(service_fn(|req: SoapRequest<RawBody>| async move {
            Ok::<_, DispatchError>(req.reply(RawBody::default()))
        }))
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middlewares: Middlewares<RawBody> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                Arc::new(Trace {
                    name,
                    log: Arc::clone(&log),
                }) as Arc<dyn SoapMiddleware<RawBody>>
            })
            .collect();

        build_pipeline(echo(), &middlewares).oneshot(request()).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a in", "b in", "c in", "c out", "b out", "a out"]
        );
    }

    #[tokio::test]
    async fn default_chain_turns_panic_into_internal_fault() {
        let core = service_fn(|req: SoapRequest<RawBody>| async move {
            if req.attachments.is_empty() {
                panic!("index out of bounds");
            }
            Ok::<_, DispatchError>(req.reply(RawBody::default()))
        });
        let response = build_pipeline(core, &default_middlewares())
            .oneshot(request())
            .await
            .unwrap();

        let xml = response.envelope.encode().unwrap();
        let fault = Envelope::<Reply<RawBody>>::decode(&xml)
            .unwrap()
            .body
            .into_result()
            .unwrap_err();
        assert_eq!(fault, Fault::internal());
    }

    #[tokio::test]
    async fn empty_list_is_the_bare_core() {
        let response = build_pipeline(echo(), &[]).oneshot(request()).await.unwrap();
        assert_eq!(response.status, http::StatusCode::OK);
    }
}
