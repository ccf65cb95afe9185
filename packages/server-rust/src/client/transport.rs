//! HTTP exchange capability used by [`Client`](super::Client).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::body::MultipartStream;

/// Connection-level timeout of [`HttpTransport::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of an outbound POST.
pub enum OutboundBody {
    /// A fully encoded XML envelope.
    Full(Bytes),
    /// A multipart message encoded while it is sent.
    Stream(MultipartStream),
}

impl std::fmt::Debug for OutboundBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A POST to send.
#[derive(Debug)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: OutboundBody,
}

/// The peer's answer, body read to the end.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Pluggable HTTP exchange.
/// Implementations: reqwest ([`HttpTransport`]), in-memory fakes (tests).
///
/// A failed exchange is reported once; retry policy belongs to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError>;
}

/// [`Transport`] over a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with the default 30 second timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        let body = match request.body {
            OutboundBody::Full(bytes) => reqwest::Body::from(bytes),
            OutboundBody::Stream(stream) => reqwest::Body::wrap_stream(stream),
        };
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(InboundResponse {
            status,
            headers,
            body,
        })
    }
}
