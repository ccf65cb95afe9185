//! X-Road message core: identities, SOAP envelope codec, and XOP/MTOM
//! attachment transport.

pub mod envelope;
pub mod error;
pub mod fault;
pub mod header;
pub mod id;
pub mod identity;
pub mod message;
pub mod multipart;
pub mod xml;
pub mod xop;

pub use envelope::{Envelope, Reply, IDENTIFIERS_NS, SOAP_ENV_NS, XROAD_NS};
pub use error::{EncodeError, ParseError, ValidationError};
pub use fault::Fault;
pub use header::{HeaderBuilder, MessageHeader, Target, DEFAULT_PROTOCOL_VERSION};
pub use id::{IdGenerator, UuidGenerator};
pub use identity::{CentralServiceIdentity, ClientIdentity, ObjectType, ServiceIdentity};
pub use message::{decode_message, DecodedMessage, WireFormat, XML_CONTENT_TYPE};
pub use xml::{Element, FromXml, RawBody, ToXml};
pub use xop::{
    include, Attachment, AttachmentLimit, AttachmentSet, IncludeFile, ReceivedAttachment, XOP_NS,
};
