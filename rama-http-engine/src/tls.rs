//! TLS termination and ALPN-based protocol selection (§3, §6).
//!
//! The handshake runs to completion while the socket is still in blocking
//! mode, using [`rustls::Stream::complete_io`] directly — no `tokio-rustls`,
//! no executor. Once the handshake is done the socket is switched to
//! non-blocking and the connection is rewrapped in a [`rustls::StreamOwned`],
//! whose `Read`/`Write` impls naturally surface
//! `io::ErrorKind::WouldBlock` from then on, same as a plain socket.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use rama_error::{BoxError, ErrorContext, OpaqueError};
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection, StreamOwned};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};

/// ALPN identifier offered/accepted for HTTP/2.
pub const ALPN_H2: &[u8] = b"h2";
/// ALPN identifier offered/accepted for HTTP/1.1.
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Which ALPN protocols a listener or peer is willing to negotiate, mirroring
/// the `http_ver` tri-state (§6 "`H2_HTTP_V2_TRY` is not supported").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnPolicy {
    /// Offer both; HTTP/2 if negotiated, HTTP/1.1 otherwise.
    Negotiate,
    /// Require HTTP/2; any other (or no) ALPN selection is a setup error.
    Http2Only,
    /// Require HTTP/1.1; treat an `h2` ALPN selection as a setup error.
    Http11Only,
}

impl AlpnPolicy {
    fn wire_protocols(self) -> Vec<Vec<u8>> {
        match self {
            Self::Negotiate => vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()],
            Self::Http2Only => vec![ALPN_H2.to_vec()],
            Self::Http11Only => vec![ALPN_HTTP11.to_vec()],
        }
    }
}

/// TLS material for one listener (server) or peer (client).
pub struct TlsConfig {
    server: Option<Arc<ServerConfig>>,
    client: Option<Arc<ClientConfig>>,
}

impl TlsConfig {
    /// Builds server-side TLS config from a PEM certificate chain and key,
    /// offering `alpn` during negotiation.
    pub fn server_from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        alpn: AlpnPolicy,
    ) -> Result<Self, BoxError> {
        let certs = load_certs(cert_pem)?;
        let key = load_private_key(key_pem)?;

        let mut cfg = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("build server tls config")?;
        cfg.alpn_protocols = alpn.wire_protocols();

        Ok(Self {
            server: Some(Arc::new(cfg)),
            client: None,
        })
    }

    /// Builds client-side TLS config using the platform's native root store,
    /// offering `alpn` during negotiation.
    pub fn client_native_roots(alpn: AlpnPolicy) -> Result<Self, BoxError> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            roots
                .add(cert)
                .context("add native root certificate")?;
        }
        let mut cfg = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        cfg.alpn_protocols = alpn.wire_protocols();

        Ok(Self {
            server: None,
            client: Some(Arc::new(cfg)),
        })
    }

    #[must_use]
    pub fn is_server(&self) -> bool {
        self.server.is_some()
    }
}

fn load_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, BoxError> {
    rustls_pemfile::certs(&mut io::Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .context("parse certificate chain")
}

fn load_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, BoxError> {
    let key = rustls_pemfile::private_key(&mut io::Cursor::new(pem)).context("parse private key")?;
    key.ok_or_else(|| OpaqueError::from_display("no private key found in pem input").into())
}

/// A completed TLS session, owning the underlying socket.
pub enum TlsStream {
    Server(StreamOwned<ServerConnection, TcpStream>),
    Client(StreamOwned<ClientConnection, TcpStream>),
}

impl TlsStream {
    /// Runs the server-side handshake to completion on a still-blocking
    /// `sock`, then switches it non-blocking for ongoing use.
    pub fn accept(config: &TlsConfig, sock: TcpStream) -> Result<Self, BoxError> {
        let server_cfg = config
            .server
            .clone()
            .ok_or_else(|| OpaqueError::from_display("tls config has no server material"))?;
        let mut conn = ServerConnection::new(server_cfg).context("create tls server connection")?;
        let mut sock = sock;
        crate::transport::set_cloexec(sock.as_raw_fd()).context("set close-on-exec")?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock).context("tls server handshake io")?;
        }
        sock.set_nonblocking(true).context("set socket non-blocking after handshake")?;
        Ok(Self::Server(StreamOwned::new(conn, sock)))
    }

    /// Runs the client-side handshake to completion on a still-blocking
    /// `sock`, then switches it non-blocking for ongoing use.
    pub fn connect(config: &TlsConfig, server_name: &str, sock: TcpStream) -> Result<Self, BoxError> {
        let client_cfg = config
            .client
            .clone()
            .ok_or_else(|| OpaqueError::from_display("tls config has no client material"))?;
        let name = ServerName::try_from(server_name.to_owned()).context("invalid tls server name")?;
        let mut conn =
            ClientConnection::new(client_cfg, name).context("create tls client connection")?;
        let mut sock = sock;
        crate::transport::set_cloexec(sock.as_raw_fd()).context("set close-on-exec")?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock).context("tls client handshake io")?;
        }
        sock.set_nonblocking(true).context("set socket non-blocking after handshake")?;
        Ok(Self::Client(StreamOwned::new(conn, sock)))
    }

    /// The negotiated ALPN protocol, if any.
    #[must_use]
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Self::Server(s) => s.conn.alpn_protocol(),
            Self::Client(s) => s.conn.alpn_protocol(),
        }
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Server(s) => s.read(buf),
            Self::Client(s) => s.read(buf),
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Server(s) => s.write(buf),
            Self::Client(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Server(s) => s.flush(),
            Self::Client(s) => s.flush(),
        }
    }
}

impl AsRawFd for TlsStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Server(s) => s.sock.as_raw_fd(),
            Self::Client(s) => s.sock.as_raw_fd(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_policy_wire_protocols() {
        assert_eq!(
            AlpnPolicy::Negotiate.wire_protocols(),
            vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()]
        );
        assert_eq!(AlpnPolicy::Http2Only.wire_protocols(), vec![ALPN_H2.to_vec()]);
        assert_eq!(
            AlpnPolicy::Http11Only.wire_protocols(),
            vec![ALPN_HTTP11.to_vec()]
        );
    }
}
