//! Logs the identity fields of every inbound header.

use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::info;
use xroad_core::MessageHeader;

use crate::service::request::{DispatchError, SoapRequest, SoapResponse};

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderLogLayer;

impl<S> Layer<S> for HeaderLogLayer {
    type Service = HeaderLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HeaderLogService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct HeaderLogService<S> {
    inner: S,
}

impl<B, S> Service<SoapRequest<B>> for HeaderLogService<S>
where
    S: Service<SoapRequest<B>, Response = SoapResponse, Error = DispatchError>,
{
    type Response = SoapResponse;
    type Error = DispatchError;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: SoapRequest<B>) -> Self::Future {
        log_header(request.header());
        self.inner.call(request)
    }
}

fn log_header(header: &MessageHeader) {
    let service = header.service.as_ref().map(ToString::to_string).unwrap_or_default();
    let central_service = header
        .central_service
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    info!(
        id = %header.id,
        protocol_version = %header.protocol_version,
        user_id = %header.user_id,
        client = %header.client,
        service = %service,
        central_service = %central_service,
        "header"
    );
}

#[cfg(test)]
mod tests {
    use tower::{service_fn, ServiceExt};
    use xroad_core::{ClientIdentity, Envelope, HeaderBuilder, RawBody, ServiceIdentity};

    use super::*;
    use crate::logging::test_support::CapturedLogs;

    #[tokio::test]
    async fn logs_identities_without_touching_result() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let header = HeaderBuilder::new()
            .client(ClientIdentity::new("FI", "GOV", "1", "consumer"))
            .service(ServiceIdentity::parse("FI/COM/2/provider/getPerson/v3").unwrap())
            .user_id("EE123")
            .id("abc")
            .build();
        let svc = HeaderLogLayer.layer(service_fn(|req: SoapRequest<RawBody>| async move {
            Ok::<_, DispatchError>(req.reply(RawBody::default()))
        }));
        let response = svc
            .oneshot(SoapRequest::new(Envelope::new(header.clone(), RawBody::default())))
            .await
            .unwrap();
        assert_eq!(response.envelope.header, header);

        let out = logs.contents();
        assert!(out.contains("client=FI/GOV/1/consumer"));
        assert!(out.contains("service=FI/COM/2/provider/getPerson/v3"));
        assert!(out.contains("user_id=EE123"));
        assert!(out.contains("id=abc"));
    }
}
