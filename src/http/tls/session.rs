//! TLS connections
//!
//! `TlsConnection` implements `Connection` over an OpenSSL stream, so the
//! session layer drives HTTPS exactly like plain TCP.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{poll_fd, Connection, PollEvents};
use crate::http::{Error, Result};
use openssl::ssl::SslStream;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS-encrypted connection
pub struct TlsConnection {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsConnection {
    /// Perform the client handshake over a connected stream
    ///
    /// `host` is sent as SNI and checked against the certificate when the
    /// configuration verifies peers. The handshake is bounded by `timeout`.
    pub fn connect(
        config: &TlsConfig,
        host: &str,
        stream: TcpStream,
        timeout: Option<Duration>,
    ) -> std::result::Result<Self, TlsError> {
        let handshake_failed = |reason: String| TlsError::HandshakeFailed {
            host: host.to_string(),
            reason,
        };

        stream
            .set_read_timeout(timeout)
            .and_then(|_| stream.set_write_timeout(timeout))
            .map_err(|e| handshake_failed(e.to_string()))?;

        let mut ssl = config.connector.configure()?;
        ssl.set_verify_hostname(config.verify_peer);
        let stream = ssl
            .connect(host, stream)
            .map_err(|e| handshake_failed(e.to_string()))?;

        // Session reads are bounded by poll, not by socket timeouts
        stream
            .get_ref()
            .set_read_timeout(None)
            .and_then(|_| stream.get_ref().set_write_timeout(None))
            .map_err(|e| handshake_failed(e.to_string()))?;

        tracing::debug!(
            "TLS established with {} ({})",
            host,
            stream.ssl().version_str()
        );

        Ok(TlsConnection {
            stream,
            failed: false,
        })
    }

    /// Protocol selected through ALPN, if any
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.stream.ssl().selected_alpn_protocol()
    }
}

impl Connection for TlsConnection {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        // Decrypted bytes may already be buffered inside OpenSSL
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(|e| {
            self.failed = true;
            Error::network("TLS read", e)
        })
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::network("TLS write", e)
        })
    }

    fn close(&mut self) -> Result<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }
        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => {
                Err(Error::network("TLS close", e))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_handshake_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // A plain-text peer answers the ClientHello with garbage
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        });

        let config = TlsConfig::client().build().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let result = TlsConnection::connect(
            &config,
            "localhost",
            stream,
            Some(Duration::from_secs(2)),
        );

        assert!(matches!(result, Err(TlsError::HandshakeFailed { .. })));
        server.join().unwrap();
    }
}
