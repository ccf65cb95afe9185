//! Content-type dispatch between the plain XML and multipart encodings.

use std::io::Read;

use crate::envelope::Envelope;
use crate::error::ParseError;
use crate::xml::FromXml;
use crate::xop::{decode_xop, AttachmentLimit, ReceivedAttachment};

/// `Content-Type` of an attachment-less message.
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Wire encoding selected by a `Content-Type` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Xml,
    Multipart,
}

impl WireFormat {
    /// # Errors
    ///
    /// Returns [`ParseError::ContentType`] for anything other than
    /// `text/xml` or a `multipart/` type.
    pub fn sniff(content_type: &str) -> Result<Self, ParseError> {
        let lower = content_type.trim_start().to_ascii_lowercase();
        if lower.starts_with("text/xml") {
            Ok(Self::Xml)
        } else if lower.starts_with("multipart/") {
            Ok(Self::Multipart)
        } else {
            Err(ParseError::ContentType(content_type.to_string()))
        }
    }
}

/// A decoded inbound message with its attachments read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage<B> {
    pub envelope: Envelope<B>,
    pub attachments: Vec<ReceivedAttachment>,
}

/// Decodes a whole message, choosing the encoding from `content_type`.
///
/// # Errors
///
/// Returns [`ParseError`] for an unsupported content type, a malformed
/// envelope or a broken multipart stream.
pub fn decode_message<B: FromXml, R: Read>(
    content_type: &str,
    mut reader: R,
    limit: AttachmentLimit,
) -> Result<DecodedMessage<B>, ParseError> {
    match WireFormat::sniff(content_type)? {
        WireFormat::Xml => {
            let mut xml = Vec::new();
            reader.read_to_end(&mut xml)?;
            Ok(DecodedMessage {
                envelope: Envelope::decode(&xml)?,
                attachments: Vec::new(),
            })
        }
        WireFormat::Multipart => {
            let (envelope, rest) = decode_xop(content_type, reader, limit)?;
            Ok(DecodedMessage {
                envelope,
                attachments: rest.read_all()?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::header::HeaderBuilder;
    use crate::identity::ClientIdentity;
    use crate::xml::RawBody;
    use crate::xop::AttachmentSet;

    fn envelope() -> Envelope<RawBody> {
        let header = HeaderBuilder::new()
            .client(ClientIdentity::new("EE", "COM", "7", "app"))
            .service_code("ping")
            .id("m1")
            .build();
        Envelope::new(header, RawBody::default())
    }

    #[test]
    fn sniff_recognises_supported_types() {
        assert_eq!(WireFormat::sniff(XML_CONTENT_TYPE).unwrap(), WireFormat::Xml);
        assert_eq!(WireFormat::sniff("Text/XML").unwrap(), WireFormat::Xml);
        assert_eq!(
            WireFormat::sniff("multipart/related; boundary=x").unwrap(),
            WireFormat::Multipart
        );
    }

    #[test]
    fn unsupported_content_type_is_rejected() {
        let err = decode_message::<RawBody, _>(
            "application/json",
            Cursor::new(b"{}"),
            AttachmentLimit::First,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::ContentType(_)));
        assert_eq!(err.to_string(), "invalid Content-Type");
    }

    #[test]
    fn decodes_plain_xml() {
        let bytes = envelope().encode().unwrap();
        let decoded = decode_message::<RawBody, _>(
            XML_CONTENT_TYPE,
            Cursor::new(bytes),
            AttachmentLimit::First,
        )
        .unwrap();
        assert_eq!(decoded.envelope, envelope());
        assert!(decoded.attachments.is_empty());
    }

    #[test]
    fn decodes_multipart() {
        let mut set = AttachmentSet::with_boundary("mb");
        let ids = || "file-1".to_string();
        set.add_file(&ids, "note.txt", Cursor::new(b"note".to_vec())).unwrap();
        let content_type = set.content_type();
        let bytes = set.write_to(&envelope(), Vec::new()).unwrap();

        let decoded =
            decode_message::<RawBody, _>(&content_type, Cursor::new(bytes), AttachmentLimit::First)
                .unwrap();
        assert_eq!(decoded.envelope, envelope());
        assert_eq!(decoded.attachments[0].filename, "note.txt");
        assert_eq!(decoded.attachments[0].data, b"note");
    }
}
