//! HTTP response head parsing
//!
//! The parser accumulates bytes until the blank line that ends the head,
//! then hands back the parsed head together with whatever body bytes
//! arrived in the same reads.

use super::{Error, Headers, Result, Status, Version, MAX_HEADERS, MAX_HEAD_SIZE};

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS [REASON]
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!("Invalid status line: {:?}", line)));
    }

    let version = Version::parse(parts[0])?;
    if parts[1].len() != 3 {
        return Err(Error::Parse(format!("Invalid status code: {}", parts[1])));
    }
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(status_code)?;
    let reason = match parts.get(2) {
        Some(reason) => reason.trim().to_string(),
        None => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Parsed status line and headers
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: Status,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    /// Whether the server allows the connection to be reused
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers.get("Connection").unwrap_or_default();
        let has_token = |token: &str| {
            connection
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };
        match self.version {
            Version::Http11 => !has_token("close"),
            Version::Http10 => has_token("keep-alive"),
        }
    }

    /// Whether the body uses chunked transfer coding
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("Transfer-Encoding")
            .and_then(|te| te.rsplit(',').next().map(|last| last.trim().eq_ignore_ascii_case("chunked")))
            .unwrap_or(false)
    }

    /// Declared body length, validated
    pub fn content_length(&self) -> Result<Option<u64>> {
        let values = self.headers.get_all("Content-Length");
        let Some(first) = values.first() else {
            return Ok(None);
        };
        let length = first
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", first)))?;
        if values.iter().any(|v| v.trim() != first.trim()) {
            return Err(Error::Parse("Conflicting Content-Length headers".to_string()));
        }
        Ok(Some(length))
    }
}

/// Incremental response head parser
pub struct ResponseParser {
    buffer: Vec<u8>,
    scanned: usize,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        ResponseParser {
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Feed data to the parser
    ///
    /// Returns `Ok(Some((head, rest)))` once the head is complete, where
    /// `rest` holds the bytes that followed it, `Ok(None)` if more data is
    /// needed, or `Err` on a malformed or oversized head.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<(ResponseHead, Vec<u8>)>> {
        self.buffer.extend_from_slice(data);

        // Resume the terminator search where the last one left off
        let start = self.scanned.saturating_sub(3);
        let Some(end) = self.buffer[start..]
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| start + p)
        else {
            if self.buffer.len() > MAX_HEAD_SIZE {
                return Err(Error::Parse("Response head too large".to_string()));
            }
            self.scanned = self.buffer.len();
            return Ok(None);
        };

        if end + 4 > MAX_HEAD_SIZE {
            return Err(Error::Parse("Response head too large".to_string()));
        }

        let head = parse_head(&self.buffer[..end + 2])?;
        let rest = self.buffer.split_off(end + 4);
        self.reset();
        Ok(Some((head, rest)))
    }

    /// Reset the parser for reuse
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a head whose every line, including the last, ends in CRLF
fn parse_head(mut buf: &[u8]) -> Result<ResponseHead> {
    let mut next_line = || -> Option<String> {
        let pos = find_crlf(buf)?;
        let line = String::from_utf8_lossy(&buf[..pos]).into_owned();
        buf = &buf[pos + 2..];
        Some(line)
    };

    let status_line =
        next_line().ok_or_else(|| Error::Parse("Missing status line".to_string()))?;
    let (version, status, reason) = parse_status_line(&status_line)?;

    let mut headers = Headers::new();
    while let Some(line) = next_line() {
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(Error::Parse("Obsolete header line folding".to_string()));
        }
        if headers.len() >= MAX_HEADERS {
            return Err(Error::Parse(format!("More than {} headers", MAX_HEADERS)));
        }
        let (name, value) = Headers::parse_header_line(&line)?;
        headers.push_raw(name, value);
    }

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}
