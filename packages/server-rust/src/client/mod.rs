//! Calling side of an exchange.
//!
//! A [`Client`] holds the peer URL and a baseline header. Every call derives
//! a fresh header from that baseline (new message id, protocol version
//! filled in), encodes the envelope, hands it to a [`Transport`] and decodes
//! the answer. Faults returned by the peer come back as
//! [`ClientError::Fault`].

pub mod config;
pub mod transport;

pub use config::{client_check, service_check, url_check, ConfigCheck, ConfigError, RequestConfig};
pub use transport::{
    HttpTransport, InboundResponse, OutboundBody, OutboundRequest, Transport, TransportError,
};

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::debug;
use xroad_core::{
    decode_message, AttachmentLimit, AttachmentSet, EncodeError, Envelope, Fault, FromXml,
    HeaderBuilder, IdGenerator, IncludeFile, MessageHeader, ParseError, ReceivedAttachment, Reply,
    ToXml, UuidGenerator, WireFormat, XML_CONTENT_TYPE,
};

use crate::body::multipart_stream;

/// `User-Agent` sent with every request.
pub const USER_AGENT_VALUE: &str = concat!("xroad-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("peer returned a fault: {0}")]
    Fault(Fault),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid response: {0}")]
    Parse(#[from] ParseError),
    #[error("request could not be encoded: {0}")]
    Encode(#[from] EncodeError),
    #[error("peer answered {status}: {message}")]
    Status { status: StatusCode, message: String },
}

/// A decoded, non-fault answer.
#[derive(Debug)]
pub struct Response<B> {
    pub status: StatusCode,
    pub envelope: Envelope<B>,
    pub attachments: Vec<ReceivedAttachment>,
}

/// Sends requests to one peer.
///
/// The baseline header is never modified; [`Client::request`] hands out a
/// builder seeded from it, so one client can serve concurrent callers.
pub struct Client<T = HttpTransport> {
    url: String,
    base_header: MessageHeader,
    ids: Arc<dyn IdGenerator>,
    transport: T,
    attachment_limit: AttachmentLimit,
}

impl Client<HttpTransport> {
    /// Client over [`HttpTransport`] with UUID message ids.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, base_header: MessageHeader) -> Result<Self, TransportError> {
        Ok(Self::with_transport(url, base_header, HttpTransport::new()?))
    }

    /// Client for a loaded [`RequestConfig`]. The config is validated first.
    ///
    /// # Errors
    ///
    /// Fails when the config does not validate or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &RequestConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self::new(config.url.clone(), config.header.clone())?)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(
        url: impl Into<String>,
        base_header: MessageHeader,
        transport: T,
    ) -> Self {
        Self {
            url: url.into(),
            base_header,
            ids: Arc::new(UuidGenerator),
            transport,
            attachment_limit: AttachmentLimit::default(),
        }
    }

    /// Replaces the source of message ids, boundaries and content-ids.
    #[must_use]
    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// How many attachments of a multipart answer are kept.
    #[must_use]
    pub fn with_attachment_limit(mut self, limit: AttachmentLimit) -> Self {
        self.attachment_limit = limit;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn base_header(&self) -> &MessageHeader {
        &self.base_header
    }

    /// A header builder starting from the baseline header.
    #[must_use]
    pub fn request(&self) -> HeaderBuilder {
        self.base_header.to_builder()
    }

    /// Sends `body` as a plain XML envelope.
    ///
    /// # Errors
    ///
    /// [`ClientError::Fault`] when the peer answers with a fault; otherwise
    /// encode, transport or decode failures, each reported once.
    pub async fn send<Req, Resp>(
        &self,
        header: MessageHeader,
        body: &Req,
    ) -> Result<Response<Resp>, ClientError>
    where
        Req: ToXml,
        Resp: FromXml,
    {
        let xml = Envelope::new(self.prepare(header), body).encode()?;
        self.exchange(XML_CONTENT_TYPE.to_string(), OutboundBody::Full(Bytes::from(xml)))
            .await
    }

    /// Sends `body` with one attached file, streamed from `reader`.
    ///
    /// The file gets a fresh content-id, which is passed to the body through
    /// [`IncludeFile`] before the envelope is encoded.
    ///
    /// # Errors
    ///
    /// As [`Client::send`].
    pub async fn send_xop<Req, Resp>(
        &self,
        header: MessageHeader,
        mut body: Req,
        reader: impl Read + Send + 'static,
        filename: impl Into<String>,
    ) -> Result<Response<Resp>, ClientError>
    where
        Req: ToXml + IncludeFile + Send + 'static,
        Resp: FromXml,
    {
        let mut set = AttachmentSet::new(self.ids.as_ref());
        let content_id = set.add_file(self.ids.as_ref(), filename, reader)?;
        body.include_file(&content_id);

        let envelope = Envelope::new(self.prepare(header), body);
        set.check_includes(&envelope)?;
        let content_type = set.content_type();
        self.exchange(content_type, OutboundBody::Stream(multipart_stream(set, envelope)))
            .await
    }

    fn prepare(&self, header: MessageHeader) -> MessageHeader {
        header.to_builder().id(self.ids.next_id()).build()
    }

    async fn exchange<Resp: FromXml>(
        &self,
        content_type: String,
        body: OutboundBody,
    ) -> Result<Response<Resp>, ClientError> {
        let mut headers = HeaderMap::new();
        let content_type = HeaderValue::try_from(content_type)
            .map_err(|e| EncodeError::Io(std::io::Error::other(e)))?;
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let answer = self
            .transport
            .exchange(OutboundRequest {
                url: self.url.clone(),
                headers,
                body,
            })
            .await?;
        debug!(
            status = answer.status.as_u16(),
            bytes = answer.body.len(),
            "response received"
        );
        self.decode(answer)
    }

    fn decode<Resp: FromXml>(
        &self,
        answer: InboundResponse,
    ) -> Result<Response<Resp>, ClientError> {
        let content_type = answer
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if WireFormat::sniff(content_type).is_err() && !answer.status.is_success() {
            return Err(ClientError::Status {
                status: answer.status,
                message: String::from_utf8_lossy(&answer.body).into_owned(),
            });
        }

        let message = decode_message::<Reply<Resp>, _>(
            content_type,
            answer.body.as_ref(),
            self.attachment_limit,
        )?;
        let Envelope { header, body } = message.envelope;
        match body {
            Reply::Body(body) => Ok(Response {
                status: answer.status,
                envelope: Envelope::new(header, body),
                attachments: message.attachments,
            }),
            Reply::Fault(fault) => Err(ClientError::Fault(fault)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
