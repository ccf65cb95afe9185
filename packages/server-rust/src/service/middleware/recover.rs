//! Panic recovery middleware.
//!
//! Guards the handler invocation: a panic raised while building or polling
//! the inner future is caught, logged once together with the stack at the
//! panic site, and returned as [`DispatchError::Panicked`] so the fault
//! translation layer above can still answer with a proper fault.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::error;

use crate::service::request::{DispatchError, SoapFuture, SoapRequest, SoapResponse};

thread_local! {
    /// Number of recovery boundaries active on this thread.
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    /// Location and stack of the last panic raised inside a boundary.
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chains a panic hook that records the stack of panics raised inside a
/// recovery boundary instead of printing them. Panics elsewhere go to the
/// previously installed hook.
fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if BOUNDARY_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let location = info
                .location()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string);
            let trace = format!("panicked at {location}\n{}", Backtrace::force_capture());
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(trace));
        }));
    });
}

/// Runs `f` inside a recovery boundary.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, Box<dyn Any + Send>> {
    BOUNDARY_DEPTH.with(|d| d.set(d.get() + 1));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    BOUNDARY_DEPTH.with(|d| d.set(d.get() - 1));
    result
}

fn recovered(payload: &(dyn Any + Send)) -> DispatchError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string());
    let backtrace = LAST_PANIC
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_default();
    error!(panic = %message, stack = %backtrace, "recovered from panic in handler");
    DispatchError::Panicked { message, backtrace }
}

// ---------------------------------------------------------------------------
// RecoverLayer
// ---------------------------------------------------------------------------

/// Tower layer that converts handler panics into [`DispatchError::Panicked`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverLayer;

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        install_panic_hook();
        RecoverService { inner }
    }
}

// ---------------------------------------------------------------------------
// RecoverService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecoverService<S> {
    inner: S,
}

impl<B, S> Service<SoapRequest<B>> for RecoverService<S>
where
    S: Service<SoapRequest<B>, Response = SoapResponse, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = SoapResponse;
    type Error = DispatchError;
    type Future = SoapFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: SoapRequest<B>) -> Self::Future {
        let inner = &mut self.inner;
        match guarded(move || inner.call(request)) {
            Ok(fut) => Box::pin(CatchPanic {
                inner: Box::pin(fut),
            }),
            Err(payload) => {
                let err = recovered(payload.as_ref());
                Box::pin(async move { Err(err) })
            }
        }
    }
}

/// Polls the wrapped future inside a recovery boundary.
struct CatchPanic<F> {
    inner: Pin<Box<F>>,
}

impl<F> Future for CatchPanic<F>
where
    F: Future<Output = Result<SoapResponse, DispatchError>>,
{
    type Output = Result<SoapResponse, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        match guarded(move || inner.poll(cx)) {
            Ok(poll) => poll,
            Err(payload) => Poll::Ready(Err(recovered(payload.as_ref()))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::{service_fn, ServiceExt};
    use xroad_core::{ClientIdentity, Envelope, HeaderBuilder, RawBody};

    use super::*;
    use crate::logging::test_support::CapturedLogs;

    fn request() -> SoapRequest<RawBody> {
        let header = HeaderBuilder::new()
            .client(ClientIdentity::new("FI", "GOV", "1", "c"))
            .service_code("svc")
            .build();
        SoapRequest::new(Envelope::new(header, RawBody::default()))
    }

    #[tokio::test]
    async fn panic_inside_future_becomes_error() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let svc = RecoverLayer.layer(service_fn(|_req: SoapRequest<RawBody>| async move {
            tokio::task::yield_now().await;
            if true {
                panic!("handler blew up");
            }
            Ok::<SoapResponse, DispatchError>(unreachable!())
        }));
        let err = svc.oneshot(request()).await.unwrap_err();

        let DispatchError::Panicked { message, backtrace } = err else {
            panic!("expected a recovered panic");
        };
        assert_eq!(message, "handler blew up");
        assert!(backtrace.contains("recover.rs"));
        assert_eq!(logs.contents().matches("recovered from panic").count(), 1);
    }

    #[tokio::test]
    async fn panic_while_building_future_becomes_error() {
        struct Exploding;

        impl Service<SoapRequest<RawBody>> for Exploding {
            type Response = SoapResponse;
            type Error = DispatchError;
            type Future = SoapFuture;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, _req: SoapRequest<RawBody>) -> Self::Future {
                panic!("{}", String::from("formatted panic"));
            }
        }

        let err = RecoverLayer.layer(Exploding).oneshot(request()).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Panicked { message, .. } if message == "formatted panic"
        ));
    }

    #[tokio::test]
    async fn regular_results_pass_through() {
        let svc = RecoverLayer.layer(service_fn(|req: SoapRequest<RawBody>| async move {
            Ok::<_, DispatchError>(req.reply(RawBody::default()))
        }));
        assert!(svc.oneshot(request()).await.is_ok());
    }
}
