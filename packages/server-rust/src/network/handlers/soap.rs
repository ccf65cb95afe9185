//! The SOAP POST endpoint.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{error, warn};
use xroad_core::{FromXml, XML_CONTENT_TYPE};

use super::AppState;
use crate::body::multipart_stream;
use crate::service::{DispatchError, SoapResponse};

/// Handles `POST /`: decodes the message, dispatches it and renders the
/// response as plain XML or, when it carries attachments, as a streamed
/// multipart message.
///
/// Errors that escape the middleware chain become plain-text responses:
/// a malformed message is a 400 with the parse error, anything else a 500
/// whose detail is only logged.
pub async fn soap_handler<B>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    B: FromXml + Send + 'static,
{
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.dispatcher.dispatch(content_type, body).await {
        Ok(response) => render(response),
        Err(DispatchError::Parse(e)) => {
            warn!(error = %e, content_type, "rejected malformed request");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

fn render(response: SoapResponse) -> Response {
    let SoapResponse {
        status,
        envelope,
        attachments,
    } = response;

    let Some(set) = attachments else {
        return match envelope.encode() {
            Ok(xml) => (status, [(CONTENT_TYPE, XML_CONTENT_TYPE)], xml).into_response(),
            Err(e) => internal_error(&e),
        };
    };

    // Checked up front: once streaming starts the status line is gone.
    if let Err(e) = set.check_includes(&envelope) {
        return internal_error(&e);
    }
    let content_type = set.content_type();
    let body = Body::from_stream(multipart_stream(set, envelope));
    (status, [(CONTENT_TYPE, content_type)], body).into_response()
}

fn internal_error(err: &dyn std::error::Error) -> Response {
    error!(error = %err, "response could not be produced");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
