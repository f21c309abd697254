//! Connection abstraction
//!
//! The engine never opens sockets directly. A `Transport` turns an
//! `Origin` into a boxed `Connection`, and `HttpSession` drives that
//! connection in short poll slices so the exchange's `AbortScope` is
//! consulted between every wait. Plain TCP, TLS and in-memory test doubles
//! all plug in at the `Connection` trait.

use super::abort::AbortScope;
use super::tls::{TlsConfig, TlsConnection};
use super::{Error, Result, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use url::{Host, Url};

/// Connection operations
///
/// `poll` reports readiness without consuming anything; `read` returning
/// 0 means the peer closed its side.
pub trait Connection: Send {
    /// Returns true if the connection is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// poll(2) a single descriptor; an interrupted wait counts as not ready
pub(crate) fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLERR, POLLHUP, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1);

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(Error::network("poll", err));
    }

    // Hangups and errors are "ready": the following read or write reports them
    Ok(result > 0 && pfd.revents & (pfd.events | POLLERR | POLLHUP) != 0)
}

/// URL scheme supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Parse a URL scheme; anything but http/https is rejected
    pub fn parse(scheme: &str) -> Result<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => DEFAULT_HTTP_PORT,
            Scheme::Https => DEFAULT_HTTPS_PORT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Scheme and authority of a request; the connection pool key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Origin {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// Extract the origin of an absolute http(s) URL
    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = Scheme::parse(url.scheme())?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::InvalidUrl(format!("{} has no host", url))),
        };
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(Origin { scheme, host, port })
    }

    /// Value for the `Host` header; the port is omitted when it is the
    /// scheme's default
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        write!(f, "{}://{}:{}", self.scheme.as_str(), host, self.port)
    }
}

/// Opens connections to origins
///
/// Implementations must be shareable across threads; the client holds one
/// behind an `Arc`.
pub trait Transport: Send + Sync {
    fn connect(&self, origin: &Origin, timeout: Option<Duration>) -> Result<Box<dyn Connection>>;
}

/// HTTP session driving a connection under an abort scope
pub struct HttpSession {
    conn: Box<dyn Connection>,
}

impl HttpSession {
    pub fn new(conn: Box<dyn Connection>) -> Self {
        HttpSession { conn }
    }

    /// Wait for `events`, checking the scope between poll slices
    fn wait(&mut self, events: PollEvents, scope: &mut AbortScope) -> Result<()> {
        loop {
            scope.check()?;
            if self.conn.poll(events, Some(scope.slice()))? {
                return Ok(());
            }
        }
    }

    /// Read whatever is available; 0 means EOF
    pub fn read(&mut self, buf: &mut [u8], scope: &mut AbortScope) -> Result<usize> {
        self.wait(PollEvents::Read, scope)?;
        self.conn.read(buf)
    }

    /// Write part of `buf`
    pub fn write(&mut self, buf: &[u8], scope: &mut AbortScope) -> Result<usize> {
        self.wait(PollEvents::Write, scope)?;
        self.conn.write(buf)
    }

    /// Write all of `buf`
    pub fn write_all(&mut self, mut buf: &[u8], scope: &mut AbortScope) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf, scope)? {
                0 => {
                    return Err(Error::network(
                        "writing request",
                        io::Error::new(io::ErrorKind::WriteZero, "connection accepted no data"),
                    ))
                }
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        self.conn.close()
    }

    /// Take the connection back, e.g. to return it to the pool
    pub fn into_inner(self) -> Box<dyn Connection> {
        self.conn
    }
}

/// Plain TCP connection
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        TcpConnection { stream }
    }
}

impl Connection for TcpConnection {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream
            .read(buf)
            .map_err(|e| Error::network("TCP read", e))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream
            .write(buf)
            .map_err(|e| Error::network("TCP write", e))
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => {
                Err(Error::network("TCP close", e))
            }
            _ => Ok(()),
        }
    }
}

/// Default transport: system resolver, TCP via socket2, TLS via OpenSSL
#[derive(Debug, Clone)]
pub struct NetTransport {
    tls: TlsConfig,
}

impl NetTransport {
    /// Transport with default TLS settings (peer verification on)
    pub fn new() -> Result<Self> {
        Ok(Self::with_tls(TlsConfig::client().build()?))
    }

    pub fn with_tls(tls: TlsConfig) -> Self {
        NetTransport { tls }
    }

    fn connect_tcp(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        match timeout {
            Some(timeout) => socket.connect_timeout(&addr.into(), timeout)?,
            None => socket.connect(&addr.into())?,
        }
        Ok(socket.into())
    }
}

impl Transport for NetTransport {
    fn connect(&self, origin: &Origin, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        let context = format!("connecting to {}", origin);
        let addrs: Vec<SocketAddr> = (origin.host.as_str(), origin.port)
            .to_socket_addrs()
            .map_err(|e| Error::network(format!("resolving {}", origin.host), e))?
            .collect();

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        let mut stream = None;
        for addr in addrs {
            match Self::connect_tcp(addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::trace!("connect to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }
        let stream = stream.ok_or_else(|| Error::network(context, last_err))?;

        match origin.scheme {
            Scheme::Http => Ok(Box::new(TcpConnection::new(stream))),
            Scheme::Https => {
                let tls = TlsConnection::connect(&self.tls, &origin.host, stream, timeout)?;
                Ok(Box::new(tls))
            }
        }
    }
}
