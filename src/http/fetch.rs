//! `fetch(url, options)` entry point

use super::abort::CancellationToken;
use super::body::Body;
use super::client::Client;
use super::redirect::RedirectMode;
use super::request::Request;
use super::response::Response;
use super::session::Transport;
use super::{Headers, Method, Result, DEFAULT_FOLLOW};
use std::sync::Arc;
use std::time::Duration;

/// Options for a single fetch
///
/// Defaults: GET, no headers, no body, follow up to 20 redirects, no
/// timeout, no size limit, compression on.
pub struct FetchOptions {
    pub method: Method,
    pub headers: Headers,
    pub body: Option<Body>,
    pub redirect: RedirectMode,
    pub signal: Option<CancellationToken>,
    /// Maximum number of redirects followed
    pub follow: u32,
    /// Per-hop timeout
    pub timeout: Option<Duration>,
    pub compress: bool,
    /// Maximum response body size in bytes
    pub size: Option<u64>,
    /// Transport to use instead of the network
    pub transport: Option<Arc<dyn Transport>>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            method: Method::Get,
            headers: Headers::new(),
            body: None,
            redirect: RedirectMode::Follow,
            signal: None,
            follow: DEFAULT_FOLLOW,
            timeout: None,
            compress: true,
            size: None,
            transport: None,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn follow(mut self, follow: u32) -> Self {
        self.follow = follow;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Timeout in milliseconds; 0 disables it
    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Maximum response body size; 0 disables the limit
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size).filter(|s| *s > 0);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the request these options describe
    pub fn into_request(self, url: &str) -> Result<Request> {
        let mut builder = Request::builder(url)
            .method(self.method)
            .headers(self.headers)
            .redirect(self.redirect)
            .follow(self.follow)
            .compress(self.compress);
        if let Some(body) = self.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(size) = self.size {
            builder = builder.size(size);
        }
        if let Some(signal) = self.signal {
            builder = builder.signal(signal);
        }
        builder.build()
    }
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body.is_some())
            .field("redirect", &self.redirect)
            .field("follow", &self.follow)
            .field("timeout", &self.timeout)
            .field("compress", &self.compress)
            .field("size", &self.size)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

/// Fetch a resource
///
/// Uses a one-shot client that closes its connection after the response;
/// reuse a [`Client`] to keep connections alive across requests.
pub fn fetch(url: &str, mut options: FetchOptions) -> Result<Response> {
    let mut builder = Client::builder().keep_alive(false);
    if let Some(transport) = options.transport.take() {
        builder = builder.transport(transport);
    }
    builder.build()?.execute(options.into_request(url)?)
}
