//! Response descriptor

use super::body::{Body, Sink};
use super::parser::ResponseHead;
use super::{Headers, Result, Status, Version};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

/// HTTP response
///
/// Status and headers are available as soon as the head arrived; the body
/// streams from the connection and can be consumed once. A body that fails
/// midway leaves status and headers intact.
#[derive(Debug)]
pub struct Response {
    status: Status,
    status_text: String,
    version: Version,
    headers: Headers,
    url: Url,
    redirected: bool,
    body: Body,
}

impl Response {
    pub(crate) fn new(head: ResponseHead, url: Url, redirected: bool, body: Body) -> Self {
        Response {
            status: head.status,
            status_text: head.reason,
            version: head.version,
            headers: head.headers,
            url,
            redirected,
            body,
        }
    }

    /// Status code
    pub fn status(&self) -> u16 {
        self.status.code()
    }

    /// Reason phrase sent by the server
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True for 2xx statuses
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// True if at least one redirect was followed
    pub fn redirected(&self) -> bool {
        self.redirected
    }

    /// Final URL, after redirects
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn body_used(&self) -> bool {
        self.body.body_used()
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn bytes(&mut self) -> Result<Bytes> {
        self.body.bytes()
    }

    /// Body as text; the charset from `Content-Type` is honored when it is
    /// one the body decoder knows, UTF-8 otherwise
    pub fn text(&mut self) -> Result<String> {
        match self.charset() {
            Some(charset) if !charset.eq_ignore_ascii_case("utf-8") => {
                match self.body.text_with_charset(&charset) {
                    Err(super::Error::Decode { .. }) if !self.body.body_used() => self.body.text(),
                    other => other,
                }
            }
            _ => self.body.text(),
        }
    }

    pub fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.body.json()
    }

    /// Stream the body into `sink`, returning the byte count
    pub fn pipe_to<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<u64> {
        self.body.pipe_to(sink)
    }

    fn charset(&self) -> Option<String> {
        let content_type = self.headers.get_first("Content-Type")?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_string())
        })
    }
}
