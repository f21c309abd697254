//! Request descriptor
//!
//! A `Request` is immutable once built. Following a redirect never edits
//! it: the redirect policy derives a new one from its parts.

use super::abort::CancellationToken;
use super::body::Body;
use super::redirect::RedirectMode;
use super::session::Scheme;
use super::{Error, Headers, Method, Result, DEFAULT_FOLLOW};
use std::time::Duration;
use url::Url;

/// Everything about a request except its body
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub redirect: RedirectMode,
    /// Maximum number of redirects followed
    pub follow: u32,
    /// Per-hop timeout; `None` disables it
    pub timeout: Option<Duration>,
    /// Maximum delivered body size; `None` disables it
    pub size: Option<u64>,
    /// Advertise and decode gzip/deflate/br
    pub compress: bool,
    pub signal: Option<CancellationToken>,
}

impl RequestParts {
    /// Request target for the request line: path plus query
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// HTTP request descriptor
#[derive(Debug)]
pub struct Request {
    parts: RequestParts,
    body: Option<Body>,
}

impl Request {
    /// Start building a request for `url`
    pub fn builder(url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(url.as_ref())
    }

    /// A plain GET request
    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        Self::builder(url).build()
    }

    /// Assemble a request from parts, validating the combination
    pub fn from_parts(parts: RequestParts, body: Option<Body>) -> Result<Self> {
        Scheme::parse(parts.url.scheme())?;
        if !parts.url.has_host() {
            return Err(Error::InvalidUrl(format!("{} has no host", parts.url)));
        }
        if body.is_some() && !parts.method.allows_body() {
            return Err(Error::InvalidRequest(format!(
                "{} request cannot have a body",
                parts.method
            )));
        }
        Ok(Request { parts, body })
    }

    pub fn into_parts(self) -> (RequestParts, Option<Body>) {
        (self.parts, self.body)
    }

    pub fn parts(&self) -> &RequestParts {
        &self.parts
    }

    pub fn method(&self) -> Method {
        self.parts.method
    }

    pub fn url(&self) -> &Url {
        &self.parts.url
    }

    pub fn headers(&self) -> &Headers {
        &self.parts.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn redirect(&self) -> RedirectMode {
        self.parts.redirect
    }

    pub fn follow(&self) -> u32 {
        self.parts.follow
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.parts.timeout
    }

    pub fn size(&self) -> Option<u64> {
        self.parts.size
    }

    pub fn compress(&self) -> bool {
        self.parts.compress
    }

    pub fn signal(&self) -> Option<&CancellationToken> {
        self.parts.signal.as_ref()
    }
}

/// Builder for requests
///
/// Setters never fail; the first invalid input is remembered and returned
/// from `build`.
#[derive(Debug)]
pub struct RequestBuilder {
    url: String,
    method: Method,
    headers: Headers,
    body: Option<Body>,
    redirect: RedirectMode,
    follow: u32,
    timeout: Option<Duration>,
    size: Option<u64>,
    compress: bool,
    signal: Option<CancellationToken>,
    error: Option<Error>,
}

impl RequestBuilder {
    fn new(url: &str) -> Self {
        RequestBuilder {
            url: url.to_string(),
            method: Method::Get,
            headers: Headers::new(),
            body: None,
            redirect: RedirectMode::Follow,
            follow: DEFAULT_FOLLOW,
            timeout: None,
            size: None,
            compress: true,
            signal: None,
            error: None,
        }
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the method by name (case-insensitive)
    pub fn method_str(mut self, method: &str) -> Self {
        match method.parse() {
            Ok(method) => self.method = method,
            Err(e) => self.fail(e),
        }
        self
    }

    /// Append a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Err(e) = self.headers.append(name, value) {
            self.fail(e);
        }
        self
    }

    /// Replace all headers
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn redirect(mut self, mode: RedirectMode) -> Self {
        self.redirect = mode;
        self
    }

    /// Maximum number of redirects to follow
    pub fn follow(mut self, follow: u32) -> Self {
        self.follow = follow;
        self
    }

    /// Per-hop timeout; a zero duration disables it
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Maximum response body size in bytes; 0 disables the limit
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size).filter(|s| *s > 0);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Validate and build the request
    pub fn build(self) -> Result<Request> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", self.url, e)))?;

        Request::from_parts(
            RequestParts {
                method: self.method,
                url,
                headers: self.headers,
                redirect: self.redirect,
                follow: self.follow,
                timeout: self.timeout,
                size: self.size,
                compress: self.compress,
                signal: self.signal,
            },
            self.body,
        )
    }
}
