//! Bridges the synchronous multipart encoder to an async byte stream.
//!
//! The encoder runs on a blocking task and writes into one end of an
//! in-memory pipe; the other end is exposed as a stream of `Bytes` that
//! both the HTTP server (response bodies) and the client (request bodies)
//! consume. Attachment sources are never read whole into memory.

use std::io::Write;

use tokio::io::DuplexStream;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::{debug, warn};
use xroad_core::{AttachmentSet, Envelope, ToXml};

/// Capacity of the in-memory pipe between the encoder and the body stream.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Stream of encoded multipart bytes.
pub type MultipartStream = ReaderStream<DuplexStream>;

/// Encodes `envelope` and the files of `set` into a byte stream.
///
/// Must be called from within a Tokio runtime. An encode failure halfway
/// through is logged and ends the stream early; the missing close
/// delimiter makes the truncation visible to the receiver.
pub fn multipart_stream<B>(set: AttachmentSet, envelope: Envelope<B>) -> MultipartStream
where
    B: ToXml + Send + 'static,
{
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    let sink = SyncIoBridge::new(writer);
    tokio::task::spawn_blocking(move || {
        let files = set.len();
        match set.write_to(&envelope, sink) {
            Ok(mut sink) => match sink.flush() {
                Ok(()) => debug!(files, "multipart body written"),
                Err(e) => warn!(error = %e, "multipart body could not be flushed"),
            },
            Err(e) => warn!(error = %e, "multipart body aborted"),
        }
    });
    ReaderStream::new(reader)
}
