//! Transfer engine
//!
//! `Client::execute` runs one logical fetch: for every hop it opens (or
//! reuses) a connection, writes the request, reads the response head and
//! wires the response body to the connection. The redirect policy then
//! either ends the loop or supplies the next request.
//!
//! Each hop gets its own `AbortScope`, so the timeout restarts on every
//! redirect. The final hop's scope moves into the response body and keeps
//! guarding reads until the body is complete.

use super::abort::AbortScope;
use super::body::{Body, BodySource};
use super::chunked::{encode_chunk, last_chunk, ChunkedDecoder};
use super::decoder::ContentDecoder;
use super::fetch::FetchOptions;
use super::message::encode_request_head;
use super::parser::{ResponseHead, ResponseParser};
use super::pool::{ConnectionPool, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_IDLE, DEFAULT_MAX_IDLE_PER_HOST};
use super::redirect::{RedirectAction, RedirectPolicy};
use super::request::{Request, RequestParts};
use super::response::Response;
use super::session::{HttpSession, NetTransport, Origin, Transport};
use super::tls::TlsConfig;
use super::{Error, Headers, Method, Result, READ_BUF_SIZE};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sent unless the request sets its own `User-Agent`
    pub user_agent: String,
    /// Upper bound for establishing a connection
    pub connect_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
    pub pool_max_idle: usize,
    pub pool_idle_timeout: Option<Duration>,
    /// Reuse connections; when off every request sends `Connection: close`
    pub keep_alive: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            user_agent: concat!("vfetch/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            pool_max_idle: DEFAULT_MAX_IDLE,
            pool_idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            keep_alive: true,
        }
    }
}

/// Builder for clients
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    tls: Option<TlsConfig>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    pub fn pool_max_idle(mut self, max: usize) -> Self {
        self.config.pool_max_idle = max;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// TLS settings for the default transport
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Replace the default network transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<Client> {
        let transport: Arc<dyn Transport> = match (self.transport, self.tls) {
            (Some(transport), _) => transport,
            (None, Some(tls)) => Arc::new(NetTransport::with_tls(tls)),
            (None, None) => Arc::new(NetTransport::new()?),
        };

        let pool = self.config.keep_alive.then(|| {
            Arc::new(
                ConnectionPool::new(
                    self.config.pool_max_idle_per_host,
                    self.config.pool_max_idle,
                )
                .with_idle_timeout(self.config.pool_idle_timeout),
            )
        });

        Ok(Client {
            config: Arc::new(self.config),
            transport,
            pool,
        })
    }
}

/// HTTP client
///
/// Cheap to clone; clones share configuration, transport and connection
/// pool, and may be used from several threads at once.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    pool: Option<Arc<ConnectionPool>>,
}

impl Client {
    /// Client with default configuration
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch `url` with fetch-style options
    ///
    /// A transport given in the options replaces this client's transport
    /// for the call, without pooling.
    pub fn fetch(&self, url: &str, mut options: FetchOptions) -> Result<Response> {
        let transport = options.transport.take();
        let request = options.into_request(url)?;
        match transport {
            Some(transport) => Client {
                config: Arc::clone(&self.config),
                transport,
                pool: None,
            }
            .execute(request),
            None => self.execute(request),
        }
    }

    /// Execute a request, following redirects as its mode dictates
    pub fn execute(&self, request: Request) -> Result<Response> {
        let mut policy = RedirectPolicy::new(request.redirect(), request.follow());
        let mut request = request;

        loop {
            let (parts, body) = request.into_parts();
            let replay = body.as_ref().and_then(Body::try_clone);
            let streamed = body.is_some() && replay.is_none();

            tracing::debug!("{} {}", parts.method, parts.url);
            let (mut head, response_body) = self.exchange(&parts, body)?;

            match policy.decide(&parts, replay, streamed, head.status, &mut head.headers)? {
                RedirectAction::Follow(next) => {
                    // Unread redirect bodies close their connection on drop
                    drop(response_body);
                    request = next;
                }
                RedirectAction::Final => {
                    tracing::debug!("{} {} -> {}", parts.method, parts.url, head.status.code());
                    let redirected = policy.followed() > 0;
                    return Ok(Response::new(head, parts.url, redirected, response_body));
                }
            }
        }
    }

    /// Close all idle pooled connections
    pub fn close_idle(&self) {
        if let Some(pool) = &self.pool {
            pool.close_idle();
        }
    }

    /// Idle connections currently pooled
    pub fn idle_connections(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.total_idle())
    }

    /// One request/response exchange on one connection
    fn exchange(&self, parts: &RequestParts, body: Option<Body>) -> Result<(ResponseHead, Body)> {
        let origin = Origin::from_url(&parts.url)?;
        let mut scope = AbortScope::new(parts.timeout, parts.signal.clone());
        scope.check()?;

        let conn = match self.pool.as_ref().and_then(|pool| pool.checkout(&origin)) {
            Some(conn) => conn,
            None => {
                let timeout = match (self.config.connect_timeout, scope.remaining()) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                match self.transport.connect(&origin, timeout) {
                    Ok(conn) => conn,
                    Err(e) => {
                        // A connect that outlived the request timeout is a timeout
                        scope.check()?;
                        return Err(e);
                    }
                }
            }
        };

        let mut session = HttpSession::new(conn);
        let sent = self.send_request(&mut session, &mut scope, parts, &origin, body);
        let received = sent.and_then(|_| read_head(&mut session, &mut scope));
        let (head, rest) = match received {
            Ok(received) => received,
            Err(e) => {
                if e.is_abort() {
                    tracing::debug!("{} {} aborted: {}", parts.method, parts.url, e);
                } else {
                    tracing::debug!("closing connection to {} after error: {}", origin, e);
                }
                let _ = session.close();
                return Err(e);
            }
        };

        let framing = if parts.method == Method::Head || head.status.forbids_body() {
            Framing::Empty
        } else if head.is_chunked() {
            Framing::Chunked(ChunkedDecoder::new())
        } else {
            match head.content_length() {
                Ok(Some(length)) => Framing::Length { remaining: length },
                Ok(None) => Framing::Eof,
                Err(e) => {
                    let _ = session.close();
                    return Err(e);
                }
            }
        };

        let release = match (&self.pool, &framing) {
            (Some(pool), framing) if head.keep_alive() && !matches!(framing, Framing::Eof) => {
                Some(Release {
                    pool: Arc::clone(pool),
                    origin,
                })
            }
            _ => None,
        };

        let decode = parts.compress && !matches!(framing, Framing::Empty);
        let source: Box<dyn BodySource> =
            Box::new(ConnectionBody::new(session, scope, rest, framing, release));
        let source = if decode {
            ContentDecoder::wrap(source, &head.headers)
        } else {
            source
        };

        Ok((head, Body::from_boxed(source).with_limit(parts.size)))
    }

    /// Headers actually sent: the caller's, plus defaults and framing
    fn request_headers(
        &self,
        parts: &RequestParts,
        origin: &Origin,
        body: Option<&Body>,
    ) -> Result<(Headers, bool)> {
        let mut headers = parts.headers.clone();

        set_default(&mut headers, "Host", &origin.authority())?;
        set_default(&mut headers, "User-Agent", &self.config.user_agent)?;
        set_default(&mut headers, "Accept", "*/*")?;
        if parts.compress {
            set_default(&mut headers, "Accept-Encoding", "gzip, deflate, br")?;
        }
        let connection = if self.pool.is_some() { "keep-alive" } else { "close" };
        set_default(&mut headers, "Connection", connection)?;

        let mut chunked = false;
        match body {
            Some(body) => {
                if let Some(content_type) = body.content_type() {
                    set_default(&mut headers, "Content-Type", content_type)?;
                }
                if !headers.has("Content-Length") {
                    match body.content_length() {
                        Some(length) => headers.set("Content-Length", &length.to_string())?,
                        None => {
                            headers.set("Transfer-Encoding", "chunked")?;
                            chunked = true;
                        }
                    }
                }
            }
            None if parts.method.expects_body() => {
                set_default(&mut headers, "Content-Length", "0")?
            }
            None => {}
        }

        Ok((headers, chunked))
    }

    fn send_request(
        &self,
        session: &mut HttpSession,
        scope: &mut AbortScope,
        parts: &RequestParts,
        origin: &Origin,
        body: Option<Body>,
    ) -> Result<()> {
        let (headers, chunked) = self.request_headers(parts, origin, body.as_ref())?;
        let head = encode_request_head(parts.method, &parts.target(), &headers);
        session.write_all(&head, scope)?;

        let Some(mut body) = body else {
            return Ok(());
        };
        while let Some(chunk) = body.chunk()? {
            if chunked {
                session.write_all(&encode_chunk(&chunk), scope)?;
            } else {
                session.write_all(&chunk, scope)?;
            }
        }
        if chunked {
            session.write_all(last_chunk(), scope)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

fn set_default(headers: &mut Headers, name: &str, value: &str) -> Result<()> {
    if !headers.has(name) {
        headers.set(name, value)?;
    }
    Ok(())
}

/// Read the response head, skipping interim 1xx responses
///
/// Returns the head and any body bytes that arrived with it.
fn read_head(session: &mut HttpSession, scope: &mut AbortScope) -> Result<(ResponseHead, Vec<u8>)> {
    let mut parser = ResponseParser::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut input = Vec::new();

    loop {
        if input.is_empty() {
            let n = session.read(&mut buf, scope)?;
            if n == 0 {
                return Err(Error::premature_close("reading response head"));
            }
            input.extend_from_slice(&buf[..n]);
        }

        match parser.parse(&input)? {
            None => input.clear(),
            Some((head, rest)) => {
                let code = head.status.code();
                if head.status.is_informational() && code != 101 {
                    tracing::trace!("skipping interim {} response", code);
                    input = rest;
                    continue;
                }
                return Ok((head, rest));
            }
        }
    }
}

/// How the end of a response body is found
enum Framing {
    /// No body at all (HEAD, 1xx, 204, 304)
    Empty,
    Length { remaining: u64 },
    Chunked(ChunkedDecoder),
    /// Read until the server closes the connection
    Eof,
}

/// Where a cleanly finished connection goes back to
struct Release {
    pool: Arc<ConnectionPool>,
    origin: Origin,
}

/// Response body streaming from the connection
///
/// Owns the connection until the body ends. A complete body on a reusable
/// connection hands it back to the pool; errors, aborts and early drops
/// close it.
struct ConnectionBody {
    session: Option<HttpSession>,
    scope: AbortScope,
    buffered: Vec<u8>,
    framing: Framing,
    release: Option<Release>,
    size_hint: Option<u64>,
}

impl ConnectionBody {
    fn new(
        session: HttpSession,
        scope: AbortScope,
        buffered: Vec<u8>,
        framing: Framing,
        release: Option<Release>,
    ) -> Self {
        let size_hint = match &framing {
            Framing::Empty => Some(0),
            Framing::Length { remaining } => Some(*remaining),
            _ => None,
        };
        let mut body = ConnectionBody {
            session: Some(session),
            scope,
            buffered,
            framing,
            release,
            size_hint,
        };
        if matches!(body.framing, Framing::Empty | Framing::Length { remaining: 0 }) {
            body.finish();
        }
        body
    }

    /// Read more bytes from the connection into the buffer
    fn fill(&mut self) -> Result<usize> {
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };
        let mut buf = [0u8; READ_BUF_SIZE];
        let n = session.read(&mut buf, &mut self.scope)?;
        self.buffered.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn pull(&mut self) -> Result<Option<Bytes>> {
        match self.framing {
            Framing::Empty => Ok(None),

            Framing::Length { remaining: left } => {
                if left == 0 {
                    return Ok(None);
                }
                if self.buffered.is_empty() && self.fill()? == 0 {
                    return Err(Error::premature_close("reading response body"));
                }
                let take = (self.buffered.len() as u64).min(left) as usize;
                let chunk = Bytes::copy_from_slice(&self.buffered[..take]);
                self.buffered.drain(..take);
                self.framing = Framing::Length {
                    remaining: left - take as u64,
                };
                Ok(Some(chunk))
            }

            Framing::Chunked(_) => loop {
                let Framing::Chunked(decoder) = &mut self.framing else {
                    return Ok(None);
                };
                if !self.buffered.is_empty() {
                    // Decoded output never exceeds the input
                    let mut out = vec![0u8; self.buffered.len()];
                    let progress = decoder.decode(&self.buffered, &mut out)?;
                    self.buffered.drain(..progress.consumed);
                    if progress.decoded > 0 {
                        out.truncate(progress.decoded);
                        return Ok(Some(Bytes::from(out)));
                    }
                    if progress.complete {
                        return Ok(None);
                    }
                    if progress.consumed > 0 {
                        continue;
                    }
                } else if decoder.is_complete() {
                    return Ok(None);
                }
                if self.fill()? == 0 {
                    return Err(Error::premature_close("reading chunked response body"));
                }
            },

            Framing::Eof => {
                if self.buffered.is_empty() && self.fill()? == 0 {
                    return Ok(None);
                }
                Ok(Some(Bytes::from(std::mem::take(&mut self.buffered))))
            }
        }
    }

    /// The body ended cleanly
    fn finish(&mut self) {
        self.scope.disarm();
        let Some(mut session) = self.session.take() else {
            return;
        };
        match self.release.take() {
            // Stray bytes after the body mean the connection is out of sync
            Some(release) if self.buffered.is_empty() => {
                release.pool.checkin(&release.origin, session.into_inner());
            }
            _ => {
                let _ = session.close();
            }
        }
    }

    /// The body failed; the connection state is undefined
    fn abandon(&mut self, error: &Error) {
        self.scope.disarm();
        if let Some(mut session) = self.session.take() {
            if error.is_abort() {
                tracing::debug!("response body aborted: {}", error);
            } else {
                tracing::debug!("closing connection after body error: {}", error);
            }
            let _ = session.close();
        }
    }
}

impl BodySource for ConnectionBody {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.pull() {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(e) => {
                self.abandon(&e);
                Err(e)
            }
        }
    }

    fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }
}

impl Drop for ConnectionBody {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            tracing::trace!("response body dropped unread, closing connection");
            let _ = session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::abort::CancellationToken;
    use crate::http::redirect::RedirectMode;
    use crate::http::session::mock::{MockConnection, MockTransport};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::thread;

    fn client(transport: &Arc<MockTransport>) -> Client {
        Client::builder()
            .transport(Arc::clone(transport) as Arc<dyn Transport>)
            .build()
            .unwrap()
    }

    fn one_shot(transport: &Arc<MockTransport>) -> Client {
        Client::builder()
            .transport(Arc::clone(transport) as Arc<dyn Transport>)
            .keep_alive(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_simple_get() {
        let transport =
            MockTransport::responses(&[b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi"]);
        let mut response = one_shot(&transport)
            .execute(Request::get("https://x/ok").unwrap())
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(!response.redirected());
        assert_eq!(response.text().unwrap(), "hi");

        let sent = transport.request(0);
        assert!(sent.starts_with("GET /ok HTTP/1.1\r\n"));
        assert!(sent.contains("Host: x\r\n"));
        assert!(sent.contains("Accept: */*\r\n"));
        assert!(sent.contains("Accept-Encoding: gzip, deflate, br\r\n"));
        assert!(sent.contains("Connection: close\r\n"));
        assert!(sent.ends_with("\r\n\r\n"));
        assert_eq!(transport.origins.lock().unwrap()[0].port, 443);
    }

    #[test]
    fn test_follows_relative_redirect() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 301 Moved Permanently\r\nLocation: /new\r\nContent-Length: 0\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\ndone",
        ]);
        let mut response = one_shot(&transport)
            .execute(Request::get("https://x/old").unwrap())
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(response.redirected());
        assert!(response.url().as_str().ends_with("/new"));
        assert_eq!(response.text().unwrap(), "done");
        assert!(transport.request(1).starts_with("GET /new HTTP/1.1\r\n"));
    }

    #[test]
    fn test_303_after_post_becomes_get() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 303 See Other\r\nLocation: /result\r\nContent-Length: 0\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
        ]);
        let request = Request::builder("http://x/submit")
            .method(Method::Post)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("a=1")
            .build()
            .unwrap();
        one_shot(&transport).execute(request).unwrap();

        assert!(transport.request(0).ends_with("\r\n\r\na=1"));
        let second = transport.request(1);
        assert!(second.starts_with("GET /result HTTP/1.1\r\n"));
        assert!(!second.contains("Content-Type"));
        assert!(!second.contains("Content-Length"));
        assert!(second.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_307_replays_post_body() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 307 Temporary Redirect\r\nLocation: /again\r\nContent-Length: 0\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
        ]);
        let request = Request::builder("http://x/")
            .method(Method::Post)
            .body("payload")
            .build()
            .unwrap();
        one_shot(&transport).execute(request).unwrap();

        let second = transport.request(1);
        assert!(second.starts_with("POST /again HTTP/1.1\r\n"));
        assert!(second.contains("Content-Length: 7\r\n"));
        assert!(second.contains("Content-Type: text/plain;charset=UTF-8\r\n"));
        assert!(second.ends_with("payload"));
    }

    #[test]
    fn test_streamed_body_is_chunked_and_not_replayed() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 308 Permanent Redirect\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n",
        ]);
        let chunks: Vec<Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cde"))];
        let request = Request::builder("http://x/a")
            .method(Method::Put)
            .body(Body::from_source(crate::http::body::IterSource::new(
                chunks.into_iter(),
            )))
            .build()
            .unwrap();

        let result = one_shot(&transport).execute(request);
        assert!(matches!(result, Err(Error::UnsupportedRedirect { status: 308 })));

        let sent = transport.request(0);
        assert!(sent.contains("Transfer-Encoding: chunked\r\n"));
        assert!(sent.ends_with("\r\n\r\n2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n"));
    }

    fn redirect_chain(hops: usize) -> Arc<MockTransport> {
        let redirect: &[u8] = b"HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n";
        let done: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let mut responses = vec![redirect; hops];
        responses.push(done);
        MockTransport::responses(&responses)
    }

    #[test]
    fn test_follow_limit() {
        let transport = redirect_chain(3);
        let request = Request::builder("http://x/").follow(3).build().unwrap();
        assert_eq!(one_shot(&transport).execute(request).unwrap().status(), 200);

        let transport = redirect_chain(3);
        let request = Request::builder("http://x/").follow(2).build().unwrap();
        let result = one_shot(&transport).execute(request);
        assert!(matches!(result, Err(Error::TooManyRedirects { limit: 2, .. })));
        // The third redirect was received but not followed
        assert_eq!(transport.connect_count(), 3);
    }

    #[test]
    fn test_manual_mode_returns_redirect() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\n\r\n",
        ]);
        let request = Request::builder("http://x/here")
            .redirect(RedirectMode::Manual)
            .build()
            .unwrap();
        let response = one_shot(&transport).execute(request).unwrap();

        assert_eq!(response.status(), 302);
        assert!(!response.redirected());
        assert_eq!(
            response.headers().get_first("Location"),
            Some("http://x/elsewhere")
        );
    }

    #[test]
    fn test_error_mode_rejects_redirect() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 301 Moved\r\nLocation: /elsewhere\r\nContent-Length: 0\r\n\r\n",
        ]);
        let request = Request::builder("http://x/")
            .redirect(RedirectMode::Error)
            .build()
            .unwrap();
        let result = one_shot(&transport).execute(request);
        let Err(Error::RedirectNotAllowed {
            status, location, ..
        }) = result
        else {
            panic!("expected the redirect to be refused")
        };
        assert_eq!(status, 301);
        assert_eq!(location, "http://x/elsewhere");
    }

    #[test]
    fn test_size_limit_delivers_exactly_limit() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789",
        ]);
        let request = Request::builder("http://x/").size(4).build().unwrap();
        let mut response = one_shot(&transport).execute(request).unwrap();

        let body = response.body_mut();
        assert_eq!(body.chunk().unwrap().unwrap(), Bytes::from_static(b"0123"));
        assert!(matches!(
            body.chunk(),
            Err(Error::MaxSizeExceeded { limit: 4 })
        ));
        assert!(matches!(body.chunk(), Err(Error::BodyAlreadyConsumed)));
        // Status and headers survive the body failure
        assert_eq!(response.status(), 200);
    }

    #[test]
    fn test_timeout_while_waiting_for_head() {
        let transport = MockTransport::new(vec![MockConnection::silent()]);
        let request = Request::builder("http://x/")
            .timeout(Duration::from_millis(80))
            .build()
            .unwrap();
        let result = one_shot(&transport).execute(request);
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_timeout_covers_body() {
        let mut conn = MockConnection::new(&[b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"]);
        conn.eof_when_empty = false;
        let closed = Arc::clone(&conn.closed);
        let transport = MockTransport::new(vec![conn]);
        let request = Request::builder("http://x/")
            .timeout(Duration::from_millis(80))
            .build()
            .unwrap();
        let mut response = one_shot(&transport).execute(request).unwrap();

        assert!(matches!(response.text(), Err(Error::Timeout(_))));
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_cancellation() {
        let transport = MockTransport::new(vec![MockConnection::silent()]);
        let token = CancellationToken::new();
        let request = Request::builder("http://x/")
            .signal(token.clone())
            .build()
            .unwrap();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel_with_reason("user aborted");
        });
        let result = one_shot(&transport).execute(request);
        canceller.join().unwrap();

        match result {
            Err(Error::Cancelled { reason }) => assert_eq!(reason.as_deref(), Some("user aborted")),
            other => panic!("unexpected: {:?}", other.map(|r| r.status())),
        }
    }

    #[test]
    fn test_already_cancelled_never_connects() {
        let transport = MockTransport::new(vec![]);
        let token = CancellationToken::new();
        token.cancel();
        let request = Request::builder("http://x/").signal(token).build().unwrap();

        let result = one_shot(&transport).execute(request);
        assert!(matches!(result, Err(Error::Cancelled { reason: None })));
        assert_eq!(transport.connect_count(), 0);
    }

    #[test]
    fn test_gzip_chunked_response() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed hello").unwrap();
        let gz = encoder.finish().unwrap();

        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        wire.extend_from_slice(&crate::http::chunked::encode_chunked_body(&gz, 5));
        let conn = MockConnection::new(&[&wire[..]]);
        let transport = MockTransport::new(vec![conn]);

        let mut response = one_shot(&transport)
            .execute(Request::get("http://x/").unwrap())
            .unwrap();
        assert_eq!(response.text().unwrap(), "compressed hello");
    }

    #[test]
    fn test_endless_chunked_trailer_fails() {
        let mut wire =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\nX-Trailer: "
                .to_vec();
        wire.extend(std::iter::repeat(b'a').take(crate::http::MAX_HEAD_SIZE + 1));
        let transport = MockTransport::new(vec![MockConnection::new(&[&wire[..]])]);

        let mut response = one_shot(&transport)
            .execute(Request::get("http://x/").unwrap())
            .unwrap();
        assert!(matches!(response.bytes(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_compress_off_leaves_body_encoded() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 3\r\n\r\nraw",
        ]);
        let request = Request::builder("http://x/").compress(false).build().unwrap();
        let mut response = one_shot(&transport).execute(request).unwrap();

        assert!(!transport.request(0).contains("Accept-Encoding"));
        assert_eq!(response.text().unwrap(), "raw");
    }

    #[test]
    fn test_interim_response_skipped() {
        let transport = MockTransport::new(vec![MockConnection::new(&[
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        ])]);
        let mut response = one_shot(&transport)
            .execute(Request::get("http://x/").unwrap())
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().unwrap(), "ok");
    }

    #[test]
    fn test_head_response_has_no_body() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n",
        ]);
        let request = Request::builder("http://x/")
            .method(Method::Head)
            .build()
            .unwrap();
        let mut response = one_shot(&transport).execute(request).unwrap();
        assert!(response.bytes().unwrap().is_empty());
    }

    #[test]
    fn test_premature_close() {
        let transport = MockTransport::responses(&[
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc",
        ]);
        let mut response = one_shot(&transport)
            .execute(Request::get("http://x/").unwrap())
            .unwrap();
        let err = response.text().unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_body_until_eof() {
        let transport = MockTransport::new(vec![MockConnection::new(&[
            b"HTTP/1.0 200 OK\r\n\r\nfirst ",
            b"second",
        ])]);
        let mut response = one_shot(&transport)
            .execute(Request::get("http://x/").unwrap())
            .unwrap();
        assert_eq!(response.text().unwrap(), "first second");
    }

    #[test]
    fn test_post_without_body_sends_zero_length() {
        let transport =
            MockTransport::responses(&[b"HTTP/1.1 204 No Content\r\n\r\n"]);
        let request = Request::builder("http://x/")
            .method(Method::Post)
            .build()
            .unwrap();
        let response = one_shot(&transport).execute(request).unwrap();
        assert_eq!(response.status(), 204);
        assert!(transport.request(0).contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_keep_alive_reuses_connection() {
        let conn = MockConnection::scripted(&[
            &[b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none"],
            &[
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
                b"3\r\ntwo\r\n0\r\n\r\n",
            ],
        ]);
        let transport = MockTransport::new(vec![conn]);
        let client = client(&transport);

        let mut first = client.execute(Request::get("http://x/1").unwrap()).unwrap();
        assert_eq!(first.text().unwrap(), "one");
        assert_eq!(client.idle_connections(), 1);

        let mut second = client.execute(Request::get("http://x/2").unwrap()).unwrap();
        assert_eq!(second.text().unwrap(), "two");
        assert_eq!(transport.connect_count(), 1);
        assert!(transport.request(0).contains("Connection: keep-alive\r\n"));

        client.close_idle();
        assert_eq!(client.idle_connections(), 0);
    }

    #[test]
    fn test_unread_body_is_not_pooled() {
        let conn = MockConnection::scripted(&[&[
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none",
        ]]);
        let closed = Arc::clone(&conn.closed);
        let transport = MockTransport::new(vec![conn]);
        let client = client(&transport);

        let response = client.execute(Request::get("http://x/").unwrap()).unwrap();
        drop(response);
        assert_eq!(client.idle_connections(), 0);
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_connection_close_is_honored() {
        let transport = MockTransport::new(vec![MockConnection::scripted(&[&[
            b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok",
        ]])]);
        let client = client(&transport);
        let mut response = client.execute(Request::get("http://x/").unwrap()).unwrap();
        assert_eq!(response.text().unwrap(), "ok");
        assert_eq!(client.idle_connections(), 0);
    }

    #[test]
    fn test_custom_headers_win() {
        let transport =
            MockTransport::responses(&[b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"]);
        let request = Request::builder("http://x:8080/")
            .header("user-agent", "custom/1")
            .header("Accept", "application/json")
            .build()
            .unwrap();
        one_shot(&transport).execute(request).unwrap();

        let sent = transport.request(0);
        assert!(sent.contains("Host: x:8080\r\n"));
        assert!(sent.contains("user-agent: custom/1\r\n"));
        assert!(!sent.contains("vfetch/"));
        assert!(sent.contains("Accept: application/json\r\n"));
    }

    #[test]
    fn test_malformed_head() {
        let transport = MockTransport::responses(&[b"garbage\r\n\r\n"]);
        let result = one_shot(&transport).execute(Request::get("http://x/").unwrap());
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_connect_failure_is_network_error() {
        let transport = MockTransport::new(vec![]);
        let result = one_shot(&transport).execute(Request::get("http://x/").unwrap());
        assert!(matches!(result, Err(Error::Network { .. })));
    }
}
