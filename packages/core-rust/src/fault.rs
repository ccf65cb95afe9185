//! SOAP fault value.
//!
//! A `Fault` is both the body of an error response and a regular Rust error,
//! so handlers can return it with `?` or bury it in an `anyhow` chain.

use std::fmt;
use std::sync::Arc;

use crate::envelope::SOAP_ENV_NS;
use crate::error::ParseError;
use crate::xml::{Element, FromXml, ToXml};

/// Fault code for errors caused by the receiving side.
pub const SERVER_CODE: &str = "soap:Server";
/// Fault code for errors caused by the sender's message.
pub const CLIENT_CODE: &str = "soap:Client";

pub const SERVICE_NOT_FOUND: &str = "Service not found";
pub const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// Structured error response.
///
/// `cause` is diagnostic context for logs and never appears on the wire.
#[derive(Debug, Clone, Default)]
pub struct Fault {
    pub code: String,
    pub string: String,
    pub actor: Option<String>,
    pub detail: Option<String>,
    pub cause: Option<Arc<anyhow::Error>>,
}

impl Fault {
    #[must_use]
    pub fn new(code: impl Into<String>, string: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            string: string.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn server(string: impl Into<String>) -> Self {
        Self::new(SERVER_CODE, string)
    }

    #[must_use]
    pub fn client(string: impl Into<String>) -> Self {
        Self::new(CLIENT_CODE, string)
    }

    /// Server fault whose string is the reason phrase of an HTTP status code.
    #[must_use]
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        Self::server(reason_phrase(status)).with_detail(detail)
    }

    #[must_use]
    pub fn service_not_found() -> Self {
        Self::server(SERVICE_NOT_FOUND)
    }

    /// The generic fault that masks every non-fault failure.
    #[must_use]
    pub fn internal() -> Self {
        Self::server(INTERNAL_SERVER_ERROR)
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(Arc::new(cause.into()));
        self
    }

    pub(crate) fn to_element(&self) -> Element {
        let mut fault = Element::new(Some(SOAP_ENV_NS), "Fault")
            .with_child(Element::new(None, "faultcode").with_text(&self.code))
            .with_child(Element::new(None, "faultstring").with_text(&self.string));
        if let Some(actor) = &self.actor {
            fault = fault.with_child(Element::new(None, "faultactor").with_text(actor));
        }
        if let Some(detail) = &self.detail {
            fault = fault.with_child(
                Element::new(Some(SOAP_ENV_NS), "detail")
                    .with_child(Element::new(None, "faultDetail").with_text(detail)),
            );
        }
        fault
    }

    pub(crate) fn from_element(el: &Element) -> Result<Self, ParseError> {
        let code = el
            .child(None, "faultcode")
            .ok_or(ParseError::MissingElement("faultcode"))?
            .text();
        let string = el
            .child(None, "faultstring")
            .ok_or(ParseError::MissingElement("faultstring"))?
            .text();
        let actor = el.child(None, "faultactor").map(Element::text);
        // Some peers emit an unqualified detail element.
        let detail = el
            .child(Some(SOAP_ENV_NS), "detail")
            .or_else(|| el.child(None, "detail"))
            .map(|d| match d.child(None, "faultDetail") {
                Some(inner) => inner.text(),
                None => d.text(),
            });
        Ok(Self {
            code,
            string,
            actor,
            detail,
            cause: None,
        })
    }
}

impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.string == other.string
            && self.actor == other.actor
            && self.detail == other.detail
    }
}

impl Eq for Fault {}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "faultcode: {}, faultstring: {}", self.code, self.string)?;
        if let Some(actor) = &self.actor {
            write!(f, ", faultactor: {actor}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ", faultDetail: {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {}

impl ToXml for Fault {
    fn to_xml(&self) -> Vec<Element> {
        vec![self.to_element()]
    }
}

impl FromXml for Fault {
    fn from_xml(body: &Element) -> Result<Self, ParseError> {
        let el = body
            .child(Some(SOAP_ENV_NS), "Fault")
            .ok_or(ParseError::MissingElement("Fault"))?;
        Self::from_element(el)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => INTERNAL_SERVER_ERROR,
    }
}
