//! Content decoding
//!
//! `ContentDecoder` wraps a body source and inflates it according to the
//! response's `Content-Encoding`. Decompression happens as chunks are
//! pulled, so a corrupt stream surfaces as `Error::Decode` on the read that
//! hits it rather than when the response is built.
//!
//! The decoders read from the wrapped source through [`SourceReader`] and
//! write into a fixed buffer, so one call to `next_chunk` yields at most
//! `READ_BUF_SIZE` bytes however well the input compresses.

use super::body::BodySource;
use super::{Error, Headers, Result, READ_BUF_SIZE};
use bytes::{Buf, Bytes};
use flate2::bufread::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::{self, BufRead, Read};

/// Internal input buffer size for the brotli reader
const BROTLI_BUFFER_SIZE: usize = 4096;

/// Supported content codings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    /// Map a `Content-Encoding` value; unknown codings yield `None`
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Encoding::Gzip),
            "deflate" | "x-deflate" => Some(Encoding::Deflate),
            "br" => Some(Encoding::Brotli),
            _ => None,
        }
    }

    /// Look up the coding declared by a header set
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        headers
            .get_first("Content-Encoding")
            .and_then(Encoding::from_header)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
        }
    }
}

/// Blocking `BufRead` over a body source
///
/// Holds at most one source chunk. Source errors travel through the
/// decoders as the payload of an `io::Error` and are unwrapped again by
/// `ContentDecoder`.
struct SourceReader {
    source: Box<dyn BodySource>,
    current: Bytes,
    eof: bool,
}

impl SourceReader {
    fn new(source: Box<dyn BodySource>) -> Self {
        SourceReader {
            source,
            current: Bytes::new(),
            eof: false,
        }
    }
}

impl BufRead for SourceReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.current.is_empty() && !self.eof {
            match self.source.next_chunk().map_err(io::Error::other)? {
                Some(chunk) => self.current = chunk,
                None => self.eof = true,
            }
        }
        Ok(&self.current)
    }

    fn consume(&mut self, amt: usize) {
        self.current.advance(amt.min(self.current.len()));
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

enum Inflater {
    /// Nothing read yet. The gzip decoder parses its header on
    /// construction, so decoders are built on the first pull.
    Pending(SourceReader),
    Gzip(GzDecoder<SourceReader>),
    Zlib(ZlibDecoder<SourceReader>),
    RawDeflate(DeflateDecoder<SourceReader>),
    Brotli(Box<brotli::Decompressor<SourceReader>>),
    Done,
}

impl Inflater {
    /// Build the decoder for `encoding`; an empty body stays empty
    fn start(mut reader: SourceReader, encoding: Encoding) -> io::Result<Self> {
        let first = reader.fill_buf()?.first().copied();
        let Some(first) = first else {
            return Ok(Inflater::Done);
        };

        Ok(match encoding {
            Encoding::Gzip => Inflater::Gzip(GzDecoder::new(reader)),
            // Servers send either zlib framing (RFC 1950) or a raw deflate
            // stream for `deflate`
            Encoding::Deflate if first & 0x0F == 0x08 => Inflater::Zlib(ZlibDecoder::new(reader)),
            Encoding::Deflate => Inflater::RawDeflate(DeflateDecoder::new(reader)),
            Encoding::Brotli => Inflater::Brotli(Box::new(brotli::Decompressor::new(
                reader,
                BROTLI_BUFFER_SIZE,
            ))),
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Inflater::Gzip(d) => d.read(buf),
            Inflater::Zlib(d) => d.read(buf),
            Inflater::RawDeflate(d) => d.read(buf),
            Inflater::Brotli(d) => d.read(buf),
            Inflater::Pending(_) | Inflater::Done => Ok(0),
        }
    }
}

/// Body source that inflates another source
pub struct ContentDecoder {
    encoding: Encoding,
    inflater: Inflater,
}

impl ContentDecoder {
    pub fn new(inner: Box<dyn BodySource>, encoding: Encoding) -> Self {
        ContentDecoder {
            encoding,
            inflater: Inflater::Pending(SourceReader::new(inner)),
        }
    }

    /// Wrap `source` if `headers` declare a supported coding; otherwise
    /// hand the source back untouched
    pub fn wrap(source: Box<dyn BodySource>, headers: &Headers) -> Box<dyn BodySource> {
        match Encoding::from_headers(headers) {
            Some(encoding) => {
                tracing::trace!("decoding {} response body", encoding.as_str());
                Box::new(ContentDecoder::new(source, encoding))
            }
            None => source,
        }
    }

    /// Give back a source error carried through the decoder unchanged;
    /// anything else is a decoding failure
    fn decode_error(&self, err: io::Error) -> Error {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Decode {
                encoding: self.encoding.as_str(),
                source: err,
            };
        }
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(source)) => *source,
            _ => Error::Decode {
                encoding: self.encoding.as_str(),
                source: io::Error::other("body source failed"),
            },
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Inflater::Pending(_) = self.inflater {
            let pending = std::mem::replace(&mut self.inflater, Inflater::Done);
            if let Inflater::Pending(reader) = pending {
                self.inflater = Inflater::start(reader, self.encoding)?;
            }
        }
        loop {
            match self.inflater.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }
}

impl BodySource for ContentDecoder {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        match self.fill(&mut buf) {
            Ok(0) => {
                self.inflater = Inflater::Done;
                Ok(None)
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
            Err(e) => {
                self.inflater = Inflater::Done;
                Err(self.decode_error(e))
            }
        }
    }
}
