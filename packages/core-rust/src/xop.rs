//! XOP/MTOM attachment transport.
//!
//! An attachment-bearing message is a `multipart/related` stream whose first
//! part is the XML envelope and whose remaining parts carry base64 encoded
//! files. The envelope references a file through an `xop:Include` element
//! pointing at the part's content-id.
//!
//! Encoding streams every file straight from its source reader into the
//! output. Decoding yields attachments one at a time in arrival order; each
//! must be read (or dropped, which drains it) before the next is requested.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};

use base64::engine::general_purpose::{GeneralPurpose, STANDARD};
use base64::read::DecoderReader;
use base64::write::EncoderWriter;
use tracing::debug;

use crate::envelope::{write_envelope_element, Envelope};
use crate::error::{EncodeError, ParseError};
use crate::id::IdGenerator;
use crate::multipart::{MultipartReader, MultipartWriter, Part};
use crate::xml::{Element, FromXml, ToXml};

pub const XOP_NS: &str = "http://www.w3.org/2004/08/xop/include";

/// Content-id of the XML part.
pub const ROOT_CONTENT_ID: &str = "root";

const ROOT_PART_TYPE: &str = r#"application/xop+xml; charset=UTF-8; type="text/xml""#;

/// `<xop:Include href="cid:..."/>` referencing an attachment.
#[must_use]
pub fn include(content_id: &str) -> Element {
    Element::new(Some(XOP_NS), "Include").with_attr(None, "href", format!("cid:{content_id}"))
}

impl Element {
    /// Content-ids referenced by `xop:Include` elements anywhere below and
    /// including this element, in document order.
    #[must_use]
    pub fn includes(&self) -> Vec<String> {
        let mut found = Vec::new();
        collect_includes(self, &mut found);
        found
    }
}

fn collect_includes(el: &Element, found: &mut Vec<String>) {
    if el.is(Some(XOP_NS), "Include") {
        if let Some(href) = el.attr(None, "href") {
            let cid = href.strip_prefix("cid:").unwrap_or(href);
            found.push(cid.to_string());
        }
    }
    for child in el.elements() {
        collect_includes(child, found);
    }
}

/// A request body that can reference an attached file.
pub trait IncludeFile {
    /// Records the content-id under which the file is attached.
    fn include_file(&mut self, content_id: &str);
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

// Filenames are written quoted and unescaped into part headers.
fn check_header_value(field: &'static str, value: &str) -> Result<(), EncodeError> {
    if value.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return Err(EncodeError::InvalidPartHeader {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One outbound file.
pub struct Attachment {
    pub content_id: String,
    pub filename: String,
    source: Box<dyn Read + Send>,
}

impl Attachment {
    pub fn new(
        content_id: impl Into<String>,
        filename: impl Into<String>,
        source: impl Read + Send + 'static,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            filename: filename.into(),
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("content_id", &self.content_id)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Boundary plus the ordered files of one multipart message. The XML part is
/// supplied when the set is written.
#[derive(Debug)]
pub struct AttachmentSet {
    boundary: String,
    attachments: Vec<Attachment>,
}

impl AttachmentSet {
    /// Empty set with a fresh `uuid:` boundary.
    #[must_use]
    pub fn new(ids: &dyn IdGenerator) -> Self {
        Self::with_boundary(format!("uuid:{}", ids.next_id()))
    }

    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    pub fn content_ids(&self) -> impl Iterator<Item = &str> {
        self.attachments.iter().map(|a| a.content_id.as_str())
    }

    /// Appends an attachment.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::DuplicateContentId`] when the content-id is
    /// already taken (the root part's included), and
    /// [`EncodeError::InvalidPartHeader`] when the content-id or filename
    /// holds a quote, backslash or control character.
    pub fn add(&mut self, attachment: Attachment) -> Result<(), EncodeError> {
        check_header_value("content-id", &attachment.content_id)?;
        check_header_value("filename", &attachment.filename)?;
        if attachment.content_id == ROOT_CONTENT_ID
            || self.content_ids().any(|cid| cid == attachment.content_id)
        {
            return Err(EncodeError::DuplicateContentId(attachment.content_id));
        }
        self.attachments.push(attachment);
        Ok(())
    }

    /// Appends a file under a freshly generated content-id and returns it.
    /// The filename is validated as in [`AttachmentSet::add`].
    ///
    /// # Errors
    ///
    /// See [`AttachmentSet::add`].
    pub fn add_file(
        &mut self,
        ids: &dyn IdGenerator,
        filename: impl Into<String>,
        source: impl Read + Send + 'static,
    ) -> Result<String, EncodeError> {
        let content_id = ids.next_id();
        self.add(Attachment::new(content_id.clone(), filename, source))?;
        Ok(content_id)
    }

    /// Value of the message's `Content-Type` header.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!(
            r#"multipart/related; type="application/xop+xml"; boundary="{}"; start="<{ROOT_CONTENT_ID}>"; start-info="text/xml""#,
            self.boundary
        )
    }

    /// Checks that every include marker in `envelope` names a file of this
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::UnknownContentId`] for the first dangling
    /// reference.
    pub fn check_includes<B: ToXml>(&self, envelope: &Envelope<B>) -> Result<(), EncodeError> {
        self.check_element(&envelope.to_element())
    }

    fn check_element(&self, root: &Element) -> Result<(), EncodeError> {
        let known: HashSet<&str> = self.content_ids().collect();
        match root.includes().into_iter().find(|cid| !known.contains(cid.as_str())) {
            Some(missing) => Err(EncodeError::UnknownContentId(missing)),
            None => Ok(()),
        }
    }

    /// Writes `envelope` as the root part followed by every file, consuming
    /// the file sources.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::UnknownContentId`] when the envelope includes a
    /// content-id missing from the set, otherwise any write or source read
    /// failure.
    pub fn write_to<B: ToXml, W: Write>(
        self,
        envelope: &Envelope<B>,
        out: W,
    ) -> Result<W, EncodeError> {
        let root = envelope.to_element();
        self.check_element(&root)?;

        let mut writer = MultipartWriter::new(out, self.boundary);
        let root_id = format!("<{ROOT_CONTENT_ID}>");
        writer.start_part(&[
            ("Content-Type", ROOT_PART_TYPE),
            ("Content-Transfer-Encoding", "8bit"),
            ("Content-ID", root_id.as_str()),
        ])?;
        write_envelope_element(&root, writer.body())?;

        for mut attachment in self.attachments {
            let filename = &attachment.filename;
            let content_type = format!("application/octet-stream; name={filename}");
            let content_id = format!("<{}>", attachment.content_id);
            let disposition = format!(r#"attachment;name="{filename}";filename="{filename}""#);
            writer.start_part(&[
                ("Content-Type", content_type.as_str()),
                ("Content-Transfer-Encoding", "base64"),
                ("Content-ID", content_id.as_str()),
                ("Content-Disposition", disposition.as_str()),
            ])?;
            let mut encoder = EncoderWriter::new(writer.body(), &STANDARD);
            let copied = io::copy(&mut attachment.source, &mut encoder)?;
            encoder.finish()?;
            debug!(content_id = %attachment.content_id, bytes = copied, "attachment written");
        }

        Ok(writer.finish()?)
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// How many non-root parts a decoder hands out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachmentLimit {
    /// Only the first attachment.
    #[default]
    First,
    AtMost(usize),
    Unlimited,
}

impl AttachmentLimit {
    fn allows(self, taken: usize) -> bool {
        match self {
            Self::First => taken < 1,
            Self::AtMost(n) => taken < n,
            Self::Unlimited => true,
        }
    }
}

/// Reads a multipart message after its root part.
pub struct XopReader<R: Read> {
    parts: MultipartReader<R>,
    limit: AttachmentLimit,
    taken: usize,
    done: bool,
}

impl<R: Read> XopReader<R> {
    /// Next attachment within the limit. Once the limit is reached, the
    /// rest of the stream is drained and its parts discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Multipart`] on a malformed stream.
    pub fn next_attachment(&mut self) -> Result<Option<IncomingAttachment<'_, R>>, ParseError> {
        if self.done {
            return Ok(None);
        }
        if !self.limit.allows(self.taken) {
            let mut skipped = 0usize;
            while self.parts.next_part()?.is_some() {
                skipped += 1;
            }
            self.done = true;
            if skipped > 0 {
                debug!(skipped, limit = ?self.limit, "discarded attachments beyond limit");
            }
            return Ok(None);
        }
        let Some(part) = self.parts.next_part()? else {
            self.done = true;
            return Ok(None);
        };
        self.taken += 1;
        Ok(Some(IncomingAttachment::new(part)))
    }

    /// Reads every remaining attachment within the limit into memory.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] on a malformed stream or undecodable content.
    pub fn read_all(mut self) -> Result<Vec<ReceivedAttachment>, ParseError> {
        let mut received = Vec::new();
        while let Some(attachment) = self.next_attachment()? {
            received.push(attachment.read_all()?);
        }
        Ok(received)
    }
}

/// Streaming view of one inbound attachment; reading yields decoded bytes.
pub struct IncomingAttachment<'a, R: Read> {
    content_id: String,
    filename: String,
    body: AttachmentBody<'a, R>,
}

enum AttachmentBody<'a, R: Read> {
    Base64(DecoderReader<'static, GeneralPurpose, SkipWhitespace<Part<'a, R>>>),
    Raw(Part<'a, R>),
}

impl<'a, R: Read> IncomingAttachment<'a, R> {
    fn new(part: Part<'a, R>) -> Self {
        let headers = part.headers();
        let content_id = headers.content_id().unwrap_or_default().to_string();
        let filename = headers.filename().unwrap_or_default();
        let base64 = headers
            .transfer_encoding()
            .is_some_and(|enc| enc.eq_ignore_ascii_case("base64"));
        let body = if base64 {
            AttachmentBody::Base64(DecoderReader::new(SkipWhitespace(part), &STANDARD))
        } else {
            AttachmentBody::Raw(part)
        };
        Self {
            content_id,
            filename,
            body,
        }
    }

    #[must_use]
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// # Errors
    ///
    /// Returns [`ParseError::Io`] when the stream breaks or the base64
    /// content is invalid.
    pub fn read_all(mut self) -> Result<ReceivedAttachment, ParseError> {
        let mut data = Vec::new();
        self.read_to_end(&mut data)?;
        Ok(ReceivedAttachment {
            content_id: self.content_id,
            filename: self.filename,
            data,
        })
    }
}

impl<R: Read> Read for IncomingAttachment<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            AttachmentBody::Base64(reader) => reader.read(buf),
            AttachmentBody::Raw(reader) => reader.read(buf),
        }
    }
}

/// Fully read inbound attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedAttachment {
    pub content_id: String,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Drops the line breaks base64 encoders insert.
struct SkipWhitespace<R>(R);

impl<R: Read> Read for SkipWhitespace<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.0.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                if !buf[i].is_ascii_whitespace() {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

/// Decodes the root part of a multipart message and returns the envelope
/// together with a reader positioned at the first attachment.
///
/// # Errors
///
/// Returns [`ParseError`] when the content type has no boundary or is not a
/// multipart type, when the stream has no root part, or when the root part
/// is not a valid envelope.
pub fn decode_xop<B: FromXml, R: Read>(
    content_type: &str,
    reader: R,
    limit: AttachmentLimit,
) -> Result<(Envelope<B>, XopReader<R>), ParseError> {
    let media: mime::Mime = content_type
        .parse()
        .map_err(|_| ParseError::ContentType(content_type.to_string()))?;
    let boundary = media
        .get_param(mime::BOUNDARY)
        .map(|b| b.as_str().to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            ParseError::Multipart(format!("boundary not found, Content-Type: {content_type}"))
        })?;
    if media.type_() != mime::MULTIPART {
        return Err(ParseError::Multipart(format!(
            "media type {} is not multipart",
            media.essence_str()
        )));
    }

    let mut parts = MultipartReader::new(reader, &boundary);
    let envelope = {
        let mut root = parts
            .next_part()?
            .ok_or_else(|| ParseError::Multipart("message has no root part".into()))?;
        let mut xml = Vec::new();
        root.read_to_end(&mut xml)?;
        Envelope::decode(&xml)?
    };
    Ok((
        envelope,
        XopReader {
            parts,
            limit,
            taken: 0,
            done: false,
        },
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
