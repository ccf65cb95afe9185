//! Dumping for verbose mode: writes every raw request body and every
//! rendered response envelope to the debug log.

use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::service::request::{DispatchError, SoapFuture, SoapRequest, SoapResponse};

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpLayer;

impl<S> Layer<S> for DumpLayer {
    type Service = DumpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DumpService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct DumpService<S> {
    inner: S,
}

impl<B, S> Service<SoapRequest<B>> for DumpService<S>
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
        let fut = self.inner.call(request);
        Box::pin(async move {
            let response = fut.await?;
            dump(&response);
            Ok(response)
        })
    }
}

/// Logs a raw request body as received, before it is decoded.
pub fn dump_request(content_type: &str, body: &[u8]) {
    debug!(
        content_type,
        bytes = body.len(),
        request = %String::from_utf8_lossy(body),
        "in"
    );
}

fn dump(response: &SoapResponse) {
    let attachments = response.attachments.as_ref().map_or(0, |set| set.len());
    match response.envelope.encode() {
        Ok(xml) => debug!(
            status = response.status.as_u16(),
            attachments,
            envelope = %String::from_utf8_lossy(&xml),
            "out"
        ),
        Err(e) => warn!(error = %e, "response envelope could not be rendered for dumping"),
    }
}
