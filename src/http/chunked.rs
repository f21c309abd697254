//! Chunked transfer encoding support
//!
//! `ChunkedEncoder` frames request bodies of unknown length;
//! `ChunkedDecoder` incrementally unframes response bodies as bytes arrive
//! from the connection.

use super::{Error, Result, CRLF, MAX_HEAD_SIZE};
use std::io::{self, Write};

/// Longest chunk-size line accepted (size, extensions and CRLF)
const MAX_SIZE_LINE: usize = 1024;

/// Chunked encoder
///
/// Encodes data in HTTP chunked transfer encoding format
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data; empty chunks are skipped since a zero-size
    /// chunk would terminate the body
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())
    }

    /// Write the last-chunk marker and the empty trailer section
    pub fn finish(&mut self) -> io::Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Frame a single chunk into a fresh buffer
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + 12);
    let mut encoder = ChunkedEncoder::new(&mut frame);
    // Writes into a Vec cannot fail
    let _ = encoder.write_chunk(data);
    frame
}

/// The terminating zero-size chunk
pub fn last_chunk() -> &'static [u8] {
    b"0\r\n\r\n"
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    /// `seen` counts trailer bytes consumed so far
    Trailer { seen: usize },
    Complete,
}

/// Result of one `ChunkedDecoder::decode` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Input bytes consumed
    pub consumed: usize,
    /// Payload bytes written to the output
    pub decoded: usize,
    /// The terminating chunk and trailers have been seen
    pub complete: bool,
}

/// Incremental chunked decoder
///
/// Feed it whatever arrived from the wire; it consumes as much as it can
/// and reports how many input bytes were used. Unconsumed input must be
/// presented again together with the next read.
pub struct ChunkedDecoder {
    state: DecoderState,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::Size,
        }
    }

    /// Decode from `input` into `output`
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        let mut pos = 0;
        let mut out = 0;

        loop {
            match self.state {
                DecoderState::Size => {
                    let Some(line_end) = find_crlf(&input[pos..]) else {
                        if input.len() - pos > MAX_SIZE_LINE {
                            return Err(Error::Parse("Chunk size line too long".to_string()));
                        }
                        break;
                    };
                    let line = String::from_utf8_lossy(&input[pos..pos + line_end]);
                    let size_str = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size_str, 16).map_err(|_| {
                        Error::Parse(format!("Invalid chunk size: {:?}", size_str))
                    })?;

                    pos += line_end + 2;
                    self.state = if size == 0 {
                        DecoderState::Trailer { seen: 0 }
                    } else {
                        DecoderState::Data { remaining: size }
                    };
                }

                DecoderState::Data { remaining } => {
                    let available = (input.len() - pos).min(output.len() - out);
                    let take = (remaining.min(available as u64)) as usize;
                    if take == 0 {
                        break;
                    }

                    output[out..out + take].copy_from_slice(&input[pos..pos + take]);
                    pos += take;
                    out += take;

                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        DecoderState::DataEnd
                    } else {
                        DecoderState::Data { remaining }
                    };
                }

                DecoderState::DataEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::Parse("Expected CRLF after chunk data".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::Size;
                }

                DecoderState::Trailer { seen } => {
                    // Trailer fields are skipped line by line up to the empty
                    // line; the section is bounded like a response head
                    let line_end = find_crlf(&input[pos..]);
                    let pending = line_end.map_or(input.len() - pos, |end| end + 2);
                    if seen + pending > MAX_HEAD_SIZE {
                        return Err(Error::Parse("Chunked trailer section too long".to_string()));
                    }
                    let Some(line_end) = line_end else {
                        break;
                    };
                    pos += line_end + 2;
                    self.state = if line_end == 0 {
                        DecoderState::Complete
                    } else {
                        DecoderState::Trailer {
                            seen: seen + line_end + 2,
                        }
                    };
                }

                DecoderState::Complete => break,
            }
        }

        Ok(Progress {
            consumed: pos,
            decoded: out,
            complete: self.state == DecoderState::Complete,
        })
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Find CRLF in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decode a complete chunked body held in memory
pub fn decode_chunked_body(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = vec![0u8; input.len()];
    let progress = decoder.decode(input, &mut output)?;

    if !progress.complete {
        return Err(Error::Parse("Incomplete chunked body".to_string()));
    }

    output.truncate(progress.decoded);
    Ok(output)
}

/// Encode data as a chunked body split into `chunk_size` pieces
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut output = Vec::new();
    for chunk in data.chunks(chunk_size.max(1)) {
        output.extend_from_slice(&encode_chunk(chunk));
    }
    output.extend_from_slice(last_chunk());
    output
}
