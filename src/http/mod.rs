//! HTTP/1.1 fetch engine
//!
//! This module provides the client side of a Fetch-compatible HTTP stack:
//! request and response descriptors, consume-once bodies, content decoding,
//! redirect handling, and the transfer engine that drives an exchange over
//! a transport.
//!
//! # Architecture
//!
//! The I/O layer uses the session operations pattern, so the engine never
//! cares whether it talks to plain TCP, TLS, or a test double:
//!
//! - `Connection` trait defines operations (poll, read, write, close)
//! - `Transport` opens connections for an `Origin` (scheme + authority)
//! - `HttpSession` drives a connection in bounded poll slices and checks
//!   the exchange's `AbortScope` between slices, which is how timeouts and
//!   cancellation are observed
//!
//! On top of that:
//!
//! - `Client` (transfer engine) writes the request, parses the response
//!   head, wires the response body to the connection and loops over
//!   redirects
//! - `ContentDecoder` inflates gzip/deflate/br lazily, chunk by chunk
//! - `RedirectPolicy` decides whether a 3xx is followed, returned or
//!   rejected
//!
//! # Examples
//!
//! ```no_run
//! use vfetch::http::{Client, Method, Request};
//!
//! let client = Client::new().unwrap();
//! let request = Request::builder("https://httpbin.org/post")
//!     .method(Method::Post)
//!     .header("Content-Type", "application/json")
//!     .body(r#"{"a":1}"#)
//!     .build()
//!     .unwrap();
//!
//! let mut response = client.execute(request).unwrap();
//! let json: serde_json::Value = response.json().unwrap();
//! println!("{}", json);
//! ```

pub mod abort;
pub mod body;
pub mod chunked;
pub mod client;
pub mod decoder;
pub mod fetch;
pub mod headers;
pub mod message;
pub mod parser;
pub mod pool;
pub mod redirect;
pub mod request;
pub mod response;
pub mod session;
pub mod tls;

pub use abort::{AbortScope, CancellationToken};
pub use body::{Body, BodySource, Sink, WriteSink};
pub use client::{Client, ClientBuilder, ClientConfig};
pub use decoder::{ContentDecoder, Encoding};
pub use headers::Headers;
pub use message::{Method, Status, Version};
pub use parser::{ResponseHead, ResponseParser};
pub use pool::ConnectionPool;
pub use redirect::{RedirectAction, RedirectMode, RedirectPolicy};
pub use request::{Request, RequestBuilder};
pub use response::Response;
pub use session::{Connection, HttpSession, NetTransport, Origin, PollEvents, Scheme, Transport};

use std::time::Duration;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    #[error("Invalid header value for {name}: {value:?}")]
    InvalidHeaderValue { name: String, value: String },

    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Body has already been consumed")]
    BodyAlreadyConsumed,

    #[error("Content size exceeded the limit of {limit} bytes")]
    MaxSizeExceeded { limit: u64 },

    #[error("Failed to decode {encoding} content: {source}")]
    Decode {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Maximum redirect count of {limit} reached at {url}")]
    TooManyRedirects { limit: u32, url: String },

    #[error("Redirect mode is set to error, refusing {status} redirect from {url} to {location}")]
    RedirectNotAllowed {
        status: u16,
        url: String,
        location: String,
    },

    #[error("Invalid redirect location {location:?}: {reason}")]
    InvalidRedirectUrl { location: String, reason: String },

    #[error("Cannot follow {status} redirect with a streamed request body")]
    UnsupportedRedirect { status: u16 },

    #[error("Network error: {context}: {source}")]
    Network {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request was cancelled{}", cancel_suffix(.reason))]
    Cancelled { reason: Option<String> },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Sink error: {0}")]
    Sink(#[source] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),
}

impl Error {
    /// Build a network error from an I/O failure
    pub fn network(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Network {
            context: context.into(),
            source,
        }
    }

    /// Connection closed before the expected end of a message
    pub(crate) fn premature_close(context: &str) -> Self {
        Error::network(
            context,
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "premature close"),
        )
    }

    /// True for timeout and caller-initiated cancellation
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Cancelled { .. })
    }

    /// True for errors raised while talking to the peer
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network { .. })
    }
}

fn cancel_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {}", reason),
        None => String::new(),
    }
}

/// Maximum number of headers per response head
pub const MAX_HEADERS: usize = 100;

/// Maximum size of a response head (status line and headers)
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Default maximum number of redirects followed
pub const DEFAULT_FOLLOW: u32 = 20;

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// Read buffer size for connection reads
pub(crate) const READ_BUF_SIZE: usize = 8192;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_classification() {
        assert!(Error::Timeout(Duration::from_millis(5)).is_abort());
        assert!(Error::Cancelled { reason: None }.is_abort());
        assert!(!Error::BodyAlreadyConsumed.is_abort());
        assert!(Error::premature_close("reading body").is_network());
    }

    #[test]
    fn test_cancelled_message() {
        let err = Error::Cancelled {
            reason: Some("user left".to_string()),
        };
        assert_eq!(err.to_string(), "Request was cancelled: user left");
        assert_eq!(
            Error::Cancelled { reason: None }.to_string(),
            "Request was cancelled"
        );
    }
}
