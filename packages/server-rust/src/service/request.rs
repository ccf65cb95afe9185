//! Request, response and error types carried through the dispatch pipeline.

use std::future::Future;
use std::panic::Location;
use std::pin::Pin;

use http::StatusCode;
use xroad_core::{
    AttachmentSet, Envelope, Fault, MessageHeader, ParseError, RawBody, ReceivedAttachment, ToXml,
};

/// Boxed future returned by every pipeline stage.
pub type SoapFuture = Pin<Box<dyn Future<Output = Result<SoapResponse, DispatchError>> + Send>>;

/// A decoded inbound exchange handed to a service handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest<B> {
    pub envelope: Envelope<B>,
    pub attachments: Vec<ReceivedAttachment>,
}

impl<B> SoapRequest<B> {
    #[must_use]
    pub fn new(envelope: Envelope<B>) -> Self {
        Self {
            envelope,
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<ReceivedAttachment>) -> Self {
        self.attachments = attachments;
        self
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        &self.envelope.header
    }

    #[must_use]
    pub fn body(&self) -> &B {
        &self.envelope.body
    }

    /// A 200 response echoing this request's header.
    pub fn reply(&self, body: impl ToXml) -> SoapResponse {
        SoapResponse::ok(self.envelope.header.clone(), body)
    }

    /// A fault response echoing this request's header.
    #[must_use]
    pub fn fault(&self, fault: &Fault) -> SoapResponse {
        SoapResponse::fault(self.envelope.header.clone(), fault)
    }
}

/// A response ready to be rendered: status, envelope and an optional
/// attachment set that turns the response into a multipart message.
#[derive(Debug)]
pub struct SoapResponse {
    pub status: StatusCode,
    pub envelope: Envelope<RawBody>,
    pub attachments: Option<AttachmentSet>,
}

impl SoapResponse {
    pub fn ok(header: MessageHeader, body: impl ToXml) -> Self {
        Self {
            status: StatusCode::OK,
            envelope: Envelope::new(header, RawBody(body.to_xml())),
            attachments: None,
        }
    }

    /// Fault responses are always sent with status 500.
    #[must_use]
    pub fn fault(header: MessageHeader, fault: &Fault) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            envelope: Envelope::new(header, RawBody(fault.to_xml())),
            attachments: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: AttachmentSet) -> Self {
        self.attachments = Some(attachments);
        self
    }
}

/// Errors raised inside the dispatch pipeline.
///
/// Only [`DispatchError::Fault`] (directly or as the root cause of an
/// internal error) reaches the wire verbatim; everything else is masked by
/// the fault translation middleware.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("handler panicked: {message}")]
    Panicked { message: String, backtrace: String },
    #[error("{source:#} (at {location})")]
    Internal {
        source: anyhow::Error,
        location: &'static Location<'static>,
    },
}

impl DispatchError {
    /// The fault to put on the wire, if this error carries one.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault(fault) => Some(fault),
            Self::Internal { source, .. } => source.root_cause().downcast_ref::<Fault>(),
            Self::Parse(_) | Self::Panicked { .. } => None,
        }
    }
}

impl From<anyhow::Error> for DispatchError {
    #[track_caller]
    fn from(source: anyhow::Error) -> Self {
        Self::Internal {
            source,
            location: Location::caller(),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context as _;
    use xroad_core::{ClientIdentity, HeaderBuilder};

    use super::*;

    fn header() -> MessageHeader {
        HeaderBuilder::new()
            .client(ClientIdentity::new("FI", "GOV", "1", "c"))
            .service_code("echo")
            .build()
    }

    #[test]
    fn fault_is_found_at_root_of_anyhow_chain() {
        let err: anyhow::Error = Err::<(), _>(Fault::client("bad id"))
            .context("loading record")
            .unwrap_err();
        let err = DispatchError::from(err);
        assert_eq!(err.fault(), Some(&Fault::client("bad id")));
    }

    #[test]
    fn plain_internal_error_has_no_fault_and_records_location() {
        let err = DispatchError::from(anyhow::anyhow!("db down"));
        assert!(err.fault().is_none());
        let DispatchError::Internal { location, .. } = &err else {
            panic!("expected internal error");
        };
        assert!(location.file().ends_with("request.rs"));
        assert!(err.to_string().starts_with("db down (at "));
    }

    #[test]
    fn fault_response_uses_error_status() {
        let response = SoapResponse::fault(header(), &Fault::service_not_found());
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.envelope.body.0[0].is(Some(xroad_core::SOAP_ENV_NS), "Fault"));
        assert!(response.attachments.is_none());
    }

    #[test]
    fn reply_echoes_header() {
        let request = SoapRequest::new(Envelope::new(header(), RawBody::default()));
        let response = request.reply(RawBody::default());
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.envelope.header, header());
    }
}
