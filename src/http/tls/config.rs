//! TLS client configuration

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use std::path::PathBuf;
use std::str::FromStr;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    pub(crate) fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Case-insensitive, with or without the `v`
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Handshake with {host} failed: {reason}")]
    HandshakeFailed { host: String, reason: String },
}

/// TLS client configuration (immutable after building)
///
/// Cheap to clone; every connection derives its own session from the
/// shared connector.
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) connector: SslConnector,
    pub(crate) verify_peer: bool,
}

impl TlsConfig {
    /// Start a client configuration with certificate and hostname
    /// verification enabled
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Whether peer certificates are verified
    pub fn verifies_peer(&self) -> bool {
        self.verify_peer
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("verify_peer", &self.verify_peer)
            .finish_non_exhaustive()
    }
}

/// Client configuration builder
///
/// Settings are collected first and applied to OpenSSL in `build`, which
/// is where any OpenSSL failure surfaces.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
    ciphersuites: Option<String>,
    alpn: Vec<String>,
    verify_peer: bool,
    ca_file: Option<PathBuf>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            min_version: Some(TlsVersion::Tls12),
            max_version: None,
            cipher_list: None,
            ciphersuites: None,
            alpn: vec!["http/1.1".to_string()],
            verify_peer: true,
            ca_file: None,
        }
    }

    /// Pin a single TLS version
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphersuites = Some(ciphers.into());
        self
    }

    /// Replace the advertised ALPN protocols
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Accept any certificate and any host name; only for test servers
    pub fn danger_accept_invalid_certs(self) -> Self {
        self.verify_peer(false)
    }

    /// Trust the CA certificates in a PEM file in addition to the
    /// system store
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "minimum version {} is above maximum {}",
                    min.as_str(),
                    max.as_str()
                )));
            }
        }

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_min_proto_version(self.min_version.map(TlsVersion::to_openssl_version))?;
        builder.set_max_proto_version(self.max_version.map(TlsVersion::to_openssl_version))?;

        if let Some(ciphers) = &self.cipher_list {
            builder.set_cipher_list(ciphers)?;
        }
        if let Some(ciphers) = &self.ciphersuites {
            builder.set_ciphersuites(ciphers)?;
        }

        if !self.alpn.is_empty() {
            // Wire format is length-prefixed
            let mut alpn_bytes = Vec::new();
            for proto in &self.alpn {
                let len = u8::try_from(proto.len()).map_err(|_| {
                    TlsError::InvalidConfig(format!("ALPN protocol too long: {}", proto))
                })?;
                alpn_bytes.push(len);
                alpn_bytes.extend_from_slice(proto.as_bytes());
            }
            builder.set_alpn_protos(&alpn_bytes)?;
        }

        if let Some(path) = &self.ca_file {
            builder.set_ca_file(path)?;
        }

        builder.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        Ok(TlsConfig {
            connector: builder.build(),
            verify_peer: self.verify_peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("tlsv1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("TLS1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert!("SSLv3".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn test_client_defaults_verify() {
        let config = TlsConfig::client().build().unwrap();
        assert!(config.verifies_peer());

        let config = TlsConfig::client()
            .danger_accept_invalid_certs()
            .build()
            .unwrap();
        assert!(!config.verifies_peer());
    }

    #[test]
    fn test_version_range() {
        let config = TlsConfig::client()
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .build();
        assert!(config.is_ok());

        let inverted = TlsConfig::client()
            .version_range(TlsVersion::Tls13, TlsVersion::Tls12)
            .build();
        assert!(matches!(inverted, Err(TlsError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_cipher_list() {
        let result = TlsConfig::client().cipher_list("NOT-A-CIPHER").build();
        assert!(matches!(result, Err(TlsError::OpenSsl(_))));
    }
}
