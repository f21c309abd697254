//! Consume-once message bodies
//!
//! A `Body` is a lazy sequence of byte chunks pulled from a `BodySource`.
//! It can be read exactly once, either as a whole (`bytes`, `text`, `json`),
//! chunk by chunk (`chunk`), or pushed into a `Sink` (`pipe_to`).
//!
//! State machine:
//!
//! ```text
//! Idle --first read--> Streaming --exhausted--> Consumed
//!   \                      |
//!    +------ failure ------+-----> Errored
//! ```
//!
//! Reads in `Consumed` or `Errored` fail with `Error::BodyAlreadyConsumed`.

use super::{Error, Result};
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::{self, Read, Write};

/// Content type attached to text bodies without an explicit one
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// Producer of body chunks
///
/// `Ok(None)` signals the end of the body. Implementations release their
/// resources when dropped, which is how an abandoned body closes its
/// connection.
pub trait BodySource: Send {
    /// Pull the next chunk
    fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Exact remaining length, when known up front
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// Consumer side of `Body::pipe_to`
///
/// `write` returns `false` when the sink wants the producer to pause;
/// the body then calls `wait_ready` before pulling the next chunk.
pub trait Sink {
    /// Accept a chunk, reporting whether more can be taken right away
    fn write(&mut self, chunk: &[u8]) -> io::Result<bool>;

    /// Block until the sink is ready for more data
    fn wait_ready(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Signal that no more data will follow
    fn end(&mut self) -> io::Result<()>;
}

/// Sink over any `std::io::Write` (files, sockets, buffers)
pub struct WriteSink<W: Write> {
    writer: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        WriteSink { writer }
    }

    /// Get a reference to the underlying writer
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consume the sink and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriteSink<W> {
    fn write(&mut self, chunk: &[u8]) -> io::Result<bool> {
        self.writer.write_all(chunk)?;
        Ok(true)
    }

    fn end(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Body source over a blocking reader, sent with chunked framing unless a
/// length is given
pub struct ReaderSource<R: Read + Send> {
    reader: R,
    len: Option<u64>,
    buf_size: usize,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R, len: Option<u64>) -> Self {
        ReaderSource {
            reader,
            len,
            buf_size: super::READ_BUF_SIZE,
        }
    }
}

impl<R: Read + Send> BodySource for ReaderSource<R> {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; self.buf_size];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(Bytes::from(buf)));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::network("reading request body", e)),
            }
        }
    }

    fn size_hint(&self) -> Option<u64> {
        self.len
    }
}

/// Body source over an iterator of chunks
pub struct IterSource<I> {
    chunks: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Result<Bytes>> + Send,
{
    pub fn new(chunks: I) -> Self {
        IterSource { chunks }
    }
}

impl<I> BodySource for IterSource<I>
where
    I: Iterator<Item = Result<Bytes>> + Send,
{
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.chunks.next().transpose()
    }
}

/// Body lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Idle,
    Streaming,
    Consumed,
    Errored,
}

enum Inner {
    Empty,
    Full(Bytes),
    Stream(Box<dyn BodySource>),
}

/// HTTP message body
pub struct Body {
    inner: Inner,
    state: BodyState,
    limit: Option<u64>,
    delivered: u64,
    overflowed: bool,
    content_type: Option<&'static str>,
}

impl Body {
    fn with_inner(inner: Inner) -> Self {
        Body {
            inner,
            state: BodyState::Idle,
            limit: None,
            delivered: 0,
            overflowed: false,
            content_type: None,
        }
    }

    /// An empty body
    pub fn empty() -> Self {
        Self::with_inner(Inner::Empty)
    }

    /// A body over in-memory bytes
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::with_inner(Inner::Full(bytes.into()))
    }

    /// A UTF-8 text body; requests carrying it default to a text content type
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut body = Self::from_bytes(text.into().into_bytes());
        body.content_type = Some(TEXT_CONTENT_TYPE);
        body
    }

    /// A streamed body
    pub fn from_source(source: impl BodySource + 'static) -> Self {
        Self::with_inner(Inner::Stream(Box::new(source)))
    }

    /// A streamed body over an already boxed source
    pub fn from_boxed(source: Box<dyn BodySource>) -> Self {
        Self::with_inner(Inner::Stream(source))
    }

    /// A streamed body read from a blocking reader
    pub fn from_reader(reader: impl Read + Send + 'static, len: Option<u64>) -> Self {
        Self::from_source(ReaderSource::new(reader, len))
    }

    /// Enforce a maximum number of delivered bytes (`None` = unlimited)
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit.filter(|l| *l > 0);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> BodyState {
        self.state
    }

    /// True once any read has started
    pub fn body_used(&self) -> bool {
        self.state != BodyState::Idle
    }

    /// Exact length, when known without reading
    pub fn content_length(&self) -> Option<u64> {
        match &self.inner {
            Inner::Empty => Some(0),
            Inner::Full(bytes) => Some(bytes.len() as u64),
            Inner::Stream(source) => source.size_hint(),
        }
    }

    /// Content type implied by how the body was built
    pub fn content_type(&self) -> Option<&'static str> {
        self.content_type
    }

    /// Copy an untouched in-memory body; streamed bodies cannot be replayed
    pub fn try_clone(&self) -> Option<Body> {
        if self.state != BodyState::Idle {
            return None;
        }
        let inner = match &self.inner {
            Inner::Empty => Inner::Empty,
            Inner::Full(bytes) => Inner::Full(bytes.clone()),
            Inner::Stream(_) => return None,
        };
        let mut body = Self::with_inner(inner);
        body.limit = self.limit;
        body.content_type = self.content_type;
        Some(body)
    }

    /// Pull the next chunk (`Ok(None)` at the end)
    pub fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            BodyState::Consumed | BodyState::Errored => return Err(Error::BodyAlreadyConsumed),
            BodyState::Idle => self.state = BodyState::Streaming,
            BodyState::Streaming => {}
        }

        if self.overflowed {
            return Err(self.fail(self.size_error()));
        }

        let chunk = loop {
            match self.pull() {
                Ok(Some(chunk)) if chunk.is_empty() => continue,
                Ok(chunk) => break chunk,
                Err(e) => return Err(self.fail(e)),
            }
        };

        let Some(mut chunk) = chunk else {
            self.state = BodyState::Consumed;
            self.inner = Inner::Empty;
            return Ok(None);
        };

        if let Some(limit) = self.limit {
            let allowed = limit - self.delivered;
            if chunk.len() as u64 > allowed {
                if allowed == 0 {
                    return Err(self.fail(self.size_error()));
                }
                // Hand out what still fits; the next read reports the overflow
                chunk.truncate(allowed as usize);
                self.overflowed = true;
            }
        }

        self.delivered += chunk.len() as u64;
        Ok(Some(chunk))
    }

    /// Read the whole body into one buffer
    pub fn bytes(&mut self) -> Result<Bytes> {
        self.ensure_unused()?;

        let mut buf = BytesMut::with_capacity(
            self.content_length().unwrap_or(0).min(1 << 20) as usize,
        );
        while let Some(chunk) = self.chunk()? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Read the body as UTF-8 text; invalid sequences become U+FFFD
    pub fn text(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes[..]);
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read the body as text in the named charset
    ///
    /// Supports UTF-8 and the single-byte ISO-8859-1 / US-ASCII family.
    pub fn text_with_charset(&mut self, charset: &str) -> Result<String> {
        match charset.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => self.text(),
            "iso-8859-1" | "iso8859-1" | "latin1" | "l1" | "us-ascii" | "ascii" => {
                let bytes = self.bytes()?;
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            other => Err(Error::Decode {
                encoding: "charset",
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported charset {:?}", other),
                ),
            }),
        }
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(Error::InvalidJson)
    }

    /// Stream the body into a sink without buffering it whole
    ///
    /// Returns the number of bytes delivered.
    pub fn pipe_to<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<u64> {
        self.ensure_unused()?;

        let mut total = 0u64;
        while let Some(chunk) = self.chunk()? {
            total += chunk.len() as u64;
            let ready = sink.write(&chunk).map_err(|e| self.fail(Error::Sink(e)))?;
            if !ready {
                sink.wait_ready().map_err(|e| self.fail(Error::Sink(e)))?;
            }
        }
        sink.end().map_err(Error::Sink)?;
        Ok(total)
    }

    fn ensure_unused(&self) -> Result<()> {
        if self.state == BodyState::Idle {
            Ok(())
        } else {
            Err(Error::BodyAlreadyConsumed)
        }
    }

    fn pull(&mut self) -> Result<Option<Bytes>> {
        match &mut self.inner {
            Inner::Empty => Ok(None),
            Inner::Full(_) => match std::mem::replace(&mut self.inner, Inner::Empty) {
                Inner::Full(bytes) => Ok(Some(bytes)),
                _ => Ok(None),
            },
            Inner::Stream(source) => source.next_chunk(),
        }
    }

    /// Move to `Errored`, releasing the source
    fn fail(&mut self, err: Error) -> Error {
        self.state = BodyState::Errored;
        self.inner = Inner::Empty;
        err
    }

    fn size_error(&self) -> Error {
        Error::MaxSizeExceeded {
            limit: self.limit.unwrap_or_default(),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            Inner::Empty => "empty",
            Inner::Full(_) => "bytes",
            Inner::Stream(_) => "stream",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("state", &self.state)
            .field("limit", &self.limit)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Body::from_bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::from_text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::from_text(text)
    }
}
