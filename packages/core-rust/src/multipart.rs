//! Streaming MIME multipart writer and reader.
//!
//! Both sides work on plain `std::io` streams and never hold more than one
//! read chunk of a part body in memory. Parts are consumed strictly in
//! arrival order: requesting the next part drains whatever is left of the
//! current one.

use std::io::{self, Read, Write};

use crate::error::ParseError;

const CHUNK: usize = 8 * 1024;
const MAX_HEADER_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writes `--boundary` delimited parts to `out`.
pub struct MultipartWriter<W: Write> {
    out: W,
    boundary: String,
    parts: usize,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(out: W, boundary: impl Into<String>) -> Self {
        Self {
            out,
            boundary: boundary.into(),
            parts: 0,
        }
    }

    /// Starts a new part: writes the delimiter and the part headers. The
    /// part body is then written through [`MultipartWriter::body`].
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn start_part(&mut self, headers: &[(&str, &str)]) -> io::Result<()> {
        if self.parts > 0 {
            self.out.write_all(b"\r\n")?;
        }
        write!(self.out, "--{}\r\n", self.boundary)?;
        for (name, value) in headers {
            write!(self.out, "{name}: {value}\r\n")?;
        }
        self.out.write_all(b"\r\n")?;
        self.parts += 1;
        Ok(())
    }

    /// Sink for the body of the current part.
    pub fn body(&mut self) -> &mut W {
        &mut self.out
    }

    /// Writes the closing delimiter and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn finish(mut self) -> io::Result<W> {
        if self.parts > 0 {
            self.out.write_all(b"\r\n")?;
        }
        write!(self.out, "--{}--\r\n", self.boundary)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

// ---------------------------------------------------------------------------
// Part headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders(Vec<(String, String)>);

impl PartHeaders {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    /// `Content-ID` with surrounding angle brackets removed.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> {
        self.get("Content-ID").map(strip_angle_brackets)
    }

    #[must_use]
    pub fn transfer_encoding(&self) -> Option<&str> {
        self.get("Content-Transfer-Encoding").map(str::trim)
    }

    /// File name from `Content-Disposition`, falling back to the `name`
    /// parameter of `Content-Type`.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.get("Content-Disposition")
            .and_then(|v| header_param(v, "filename"))
            .or_else(|| self.content_type().and_then(|v| header_param(v, "name")))
    }
}

/// Removes one pair of surrounding `<` `>` from a content-id.
#[must_use]
pub fn strip_angle_brackets(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .unwrap_or(value)
}

/// Extracts a `key=value` parameter from a structured header value,
/// honouring double quotes.
#[must_use]
pub fn header_param(value: &str, key: &str) -> Option<String> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => params.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    params.push(current);

    params.iter().skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        if !k.trim().eq_ignore_ascii_case(key) {
            return None;
        }
        let v = v.trim();
        let v = v
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(v);
        Some(v.to_string())
    })
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first delimiter.
    Preamble,
    /// A delimiter has just been consumed.
    Boundary,
    /// Inside a part body.
    InPart,
    /// The closing delimiter has been consumed.
    Done,
}

/// Pull-based multipart parser over any [`Read`].
pub struct MultipartReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    /// `--boundary`
    dash_boundary: Vec<u8>,
    /// `\n--boundary`; a preceding `\r` belongs to the delimiter too.
    delimiter: Vec<u8>,
    state: State,
}

impl<R: Read> MultipartReader<R> {
    pub fn new(inner: R, boundary: &str) -> Self {
        let dash_boundary = format!("--{boundary}").into_bytes();
        let mut delimiter = b"\n".to_vec();
        delimiter.extend_from_slice(&dash_boundary);
        Self {
            inner,
            buf: Vec::with_capacity(CHUNK),
            pos: 0,
            eof: false,
            dash_boundary,
            delimiter,
            state: State::Preamble,
        }
    }

    /// Advances to the next part, draining any unread rest of the current
    /// one. Returns `None` after the closing delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Multipart`] when the stream is truncated or a
    /// delimiter line is malformed.
    pub fn next_part(&mut self) -> Result<Option<Part<'_, R>>, ParseError> {
        loop {
            match self.state {
                State::Preamble => self.skip_preamble()?,
                State::InPart => self.drain_part()?,
                State::Boundary => {
                    return match self.after_delimiter()? {
                        Some(headers) => {
                            self.state = State::InPart;
                            Ok(Some(Part {
                                reader: self,
                                headers,
                            }))
                        }
                        None => {
                            self.state = State::Done;
                            Ok(None)
                        }
                    };
                }
                State::Done => return Ok(None),
            }
        }
    }

    fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Reads another chunk. Returns `false` at end of input.
    fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let old_len = self.buf.len();
        self.buf.resize(old_len + CHUNK, 0);
        let read = loop {
            match self.inner.read(&mut self.buf[old_len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(old_len);
                    return Err(e);
                }
            }
        };
        self.buf.truncate(old_len + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(read > 0)
    }

    fn skip_preamble(&mut self) -> Result<(), ParseError> {
        // The first delimiter may open the stream without a leading newline.
        while self.available().len() < self.dash_boundary.len() && self.fill()? {}
        if self.available().starts_with(&self.dash_boundary) {
            self.pos += self.dash_boundary.len();
            self.state = State::Boundary;
            return Ok(());
        }
        loop {
            if let Some(i) = find(self.available(), &self.delimiter) {
                self.pos += i + self.delimiter.len();
                self.state = State::Boundary;
                return Ok(());
            }
            // Keep a tail that may hold the start of a delimiter.
            let keep = self.delimiter.len().min(self.available().len());
            self.pos += self.available().len() - keep;
            if !self.fill()? {
                return Err(ParseError::Multipart("no opening boundary found".into()));
            }
        }
    }

    fn drain_part(&mut self) -> Result<(), ParseError> {
        let mut sink = [0u8; CHUNK];
        while self.read_body(&mut sink)? > 0 {}
        Ok(())
    }

    /// Handles the rest of a delimiter line. Returns the next part's
    /// headers, or `None` for the closing delimiter.
    fn after_delimiter(&mut self) -> Result<Option<PartHeaders>, ParseError> {
        while self.available().len() < 2 && self.fill()? {}
        if self.available().starts_with(b"--") {
            self.pos += 2;
            return Ok(None);
        }
        let line = self.read_line()?;
        if line.iter().any(|b| !matches!(b, b' ' | b'\t')) {
            return Err(ParseError::Multipart(
                "unexpected data after boundary delimiter".into(),
            ));
        }
        self.read_headers().map(Some)
    }

    /// Reads one line without its terminating `\r\n` or `\n`.
    fn read_line(&mut self) -> Result<Vec<u8>, ParseError> {
        loop {
            if let Some(i) = self.available().iter().position(|&b| b == b'\n') {
                let mut line = self.available()[..i].to_vec();
                self.pos += i + 1;
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }
            if self.available().len() > MAX_HEADER_BYTES {
                return Err(ParseError::Multipart("header line too long".into()));
            }
            if !self.fill()? {
                return Err(ParseError::Multipart("unexpected end of part headers".into()));
            }
        }
    }

    fn read_headers(&mut self) -> Result<PartHeaders, ParseError> {
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut total = 0usize;
        loop {
            let line = self.read_line()?;
            total += line.len();
            if total > MAX_HEADER_BYTES {
                return Err(ParseError::Multipart("part headers too large".into()));
            }
            if line.is_empty() {
                return Ok(PartHeaders(headers));
            }
            let line = String::from_utf8(line)
                .map_err(|_| ParseError::Multipart("part header is not UTF-8".into()))?;
            if line.starts_with([' ', '\t']) {
                let (_, value) = headers.last_mut().ok_or_else(|| {
                    ParseError::Multipart("continuation line before first header".into())
                })?;
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::Multipart(format!("malformed part header {line:?}")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    /// Reads part body bytes up to the next delimiter. Returns `Ok(0)` once
    /// the part is exhausted.
    fn read_body(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.state != State::InPart || out.is_empty() {
            return Ok(0);
        }
        loop {
            let data = self.available();
            if let Some(i) = find(data, &self.delimiter) {
                let end = if i > 0 && data[i - 1] == b'\r' { i - 1 } else { i };
                if end == 0 {
                    self.pos += i + self.delimiter.len();
                    self.state = State::Boundary;
                    return Ok(0);
                }
                let n = end.min(out.len());
                out[..n].copy_from_slice(&data[..n]);
                self.pos += n;
                return Ok(n);
            }
            let safe = data.len().saturating_sub(self.delimiter.len());
            if safe > 0 {
                let n = safe.min(out.len());
                out[..n].copy_from_slice(&data[..n]);
                self.pos += n;
                return Ok(n);
            }
            if !self.fill()? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "multipart stream ended inside a part",
                ));
            }
        }
    }
}

/// One part of a multipart stream. Reading yields the raw part body.
pub struct Part<'a, R: Read> {
    reader: &'a mut MultipartReader<R>,
    headers: PartHeaders,
}

impl<R: Read> Part<'_, R> {
    #[must_use]
    pub fn headers(&self) -> &PartHeaders {
        &self.headers
    }
}

impl<R: Read> Read for Part<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_body(buf)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
