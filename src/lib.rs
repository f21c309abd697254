//! vfetch - Fetch-compatible HTTP client engine
//!
//! This crate provides a `fetch`-style HTTP/1.1 client: requests and
//! responses with consume-once bodies, transparent content decoding,
//! redirect policies, size limits, timeouts and cancellation, all running
//! over a pluggable transport.
//!
//! ```no_run
//! use vfetch::{fetch, FetchOptions};
//!
//! let mut response = fetch("https://example.com/", FetchOptions::default()).unwrap();
//! println!("{} {}", response.status(), response.text().unwrap());
//! ```

pub mod http;

pub use http::fetch::{fetch, FetchOptions};
pub use http::{
    Body, CancellationToken, Client, ClientBuilder, Error, Headers, Method, RedirectMode,
    Request, Response, Result, Sink,
};
