//! TLS support for HTTPS requests
//!
//! Client side only. `TlsConfig` holds the OpenSSL connector settings
//! (version range, ciphers, ALPN, trust anchors, verification) and
//! `TlsConnection` implements the `Connection` trait for encrypted I/O, so
//! everything above the session layer is unaware of TLS.
//!
//! Peer verification, including host name checks, is on by default.
//!
//! # Examples
//!
//! ```no_run
//! use vfetch::http::tls::{TlsConfig, TlsVersion};
//! use vfetch::http::Client;
//!
//! let tls = TlsConfig::client()
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .ca_file("internal-ca.pem")
//!     .build()
//!     .unwrap();
//!
//! let client = Client::builder().tls(tls).build().unwrap();
//! ```

pub mod config;
pub mod session;

pub use config::{ClientConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use session::TlsConnection;
