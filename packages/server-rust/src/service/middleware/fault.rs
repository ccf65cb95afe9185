//! Fault translation middleware.
//!
//! Turns every pipeline error into a fault response. A [`Fault`] (directly
//! or at the root of an error chain) is sent as-is; anything else is logged
//! and replaced with the generic "Internal Server Error" fault.

use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::{error, info};
use xroad_core::{Fault, MessageHeader};

use crate::service::request::{DispatchError, SoapFuture, SoapRequest, SoapResponse};

// ---------------------------------------------------------------------------
// FaultLayer
// ---------------------------------------------------------------------------

/// Tower layer that converts errors into fault responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultLayer;

impl<S> Layer<S> for FaultLayer {
    type Service = FaultService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FaultService { inner }
    }
}

// ---------------------------------------------------------------------------
// FaultService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FaultService<S> {
    inner: S,
}

impl<B, S> Service<SoapRequest<B>> for FaultService<S>
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
        let header = request.header().clone();
        let fut = self.inner.call(request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => Ok(response),
                Err(err) => Ok(translate(header, &err)),
            }
        })
    }
}

fn translate(header: MessageHeader, err: &DispatchError) -> SoapResponse {
    if let Some(fault) = err.fault() {
        match &fault.cause {
            Some(cause) => info!(fault = %fault, cause = %format!("{cause:#}"), "fault"),
            None => info!(fault = %fault, "fault"),
        }
        return SoapResponse::fault(header, fault);
    }
    // Recovery has already logged the panic and its stack.
    if !matches!(err, DispatchError::Panicked { .. }) {
        error!(error = %err, detail = ?err, "request failed");
    }
    SoapResponse::fault(header, &Fault::internal())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
