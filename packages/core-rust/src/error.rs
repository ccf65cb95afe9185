//! Error types shared by the identity model and the wire codecs.

use thiserror::Error;

/// A malformed identifier string or identity field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {kind} identifier {input:?}: expected {expected} segments separated by '/', found {found}")]
    SegmentCount {
        kind: &'static str,
        input: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid {kind} identifier {input:?}: segment {index} is empty")]
    EmptySegment {
        kind: &'static str,
        input: String,
        index: usize,
    },
    #[error("unknown objectType {0:?}")]
    ObjectType(String),
}

/// Failure to decode an inbound message: malformed XML, a namespace mismatch,
/// a broken multipart stream, or an unrecognized content type.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("expected element {{{expected_ns}}}{expected}, found {found}")]
    UnexpectedElement {
        expected_ns: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("element {name} must be in namespace {expected}, found {found}")]
    Namespace {
        name: String,
        expected: &'static str,
        found: String,
    },
    #[error("missing element {0}")]
    MissingElement(&'static str),
    #[error("invalid header: {0}")]
    Header(String),
    #[error(transparent)]
    Identity(#[from] ValidationError),
    #[error("invalid Content-Type")]
    ContentType(String),
    #[error("malformed multipart: {0}")]
    Multipart(String),
    #[error("I/O error while decoding: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to encode an outbound message.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("XML write failed: {0}")]
    Xml(String),
    #[error("attachment content-id {0:?} is already present in the set")]
    DuplicateContentId(String),
    #[error("envelope references content-id {0:?} which has no attachment")]
    UnknownContentId(String),
    #[error("attachment {field} {value:?} cannot be written into a part header")]
    InvalidPartHeader { field: &'static str, value: String },
    #[error("I/O error while encoding: {0}")]
    Io(#[from] std::io::Error),
}
