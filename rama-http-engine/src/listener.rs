//! A bound, listening socket that accepts inbound connections and starts a
//! server-side [`Session`] for each one (§3, §5).
//!
//! Mirrors `h2_listen`/`h2_sess_init_server`: parse `host:port`, bind with
//! `SO_REUSEADDR`, mark the listening fd close-on-exec and non-blocking,
//! then on every accept apply the same per-connection setup a client
//! session gets (`TCP_NODELAY`, non-blocking, optional TLS handshake,
//! `Session::new_server_*`).

use std::net::{TcpListener as StdTcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

use rama_error::{BoxError, ErrorContext};
use rama_net::address::Authority;
use socket2::{Domain, Socket, Type};
use tracing::{debug, warn};

use crate::settings::Http2Settings;
use crate::session::Session;
use crate::tls::TlsConfig;
use crate::transport::{apply_listener_opts, apply_socket_opts, Transport};
use crate::ProtocolVersion;

/// What an application's accept hook decides to do with a newly accepted
/// connection, before the session is even constructed (§5 "accept_cb").
pub enum AcceptDecision {
    Accept,
    Reject,
}

/// Static configuration for a [`Listener`] (§5).
pub struct ListenerConfig {
    pub authority: Authority,
    pub protocol: ProtocolVersion,
    pub tls: Option<TlsConfig>,
    pub settings: Http2Settings,
}

/// A bound, listening socket (§3, §5).
pub struct Listener {
    config: ListenerConfig,
    socket: StdTcpListener,
    accept_hook: Option<Box<dyn FnMut(std::net::SocketAddr) -> AcceptDecision>>,
}

impl Listener {
    /// Binds and starts listening on `config.authority` (§5 `h2_listen`).
    pub fn bind(config: ListenerConfig) -> Result<Self, BoxError> {
        let target = config.authority.to_string();
        let addr = target
            .to_socket_addrs()
            .context("resolve listener authority")?
            .next()
            .context("listener authority resolved to no addresses")?;

        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None).context("create listening socket")?;
        apply_listener_opts(&socket).context("apply listener socket options")?;
        socket.bind(&addr.into()).context("bind listener socket")?;
        socket.listen(1024).context("listen on socket")?;

        Ok(Self {
            config,
            socket: socket.into(),
            accept_hook: None,
        })
    }

    pub fn set_accept_hook(
        &mut self,
        hook: Box<dyn FnMut(std::net::SocketAddr) -> AcceptDecision>,
    ) {
        self.accept_hook = Some(hook);
    }

    /// Accepts every connection currently pending, returning the sessions
    /// created for accepted ones. Stops at the first `WouldBlock` (no more
    /// pending) or a hard accept error (logged and ignored: the listener
    /// stays up, same as the original treating `accept` failures as
    /// non-fatal).
    pub fn accept_ready(&mut self) -> Vec<Session> {
        let mut sessions = Vec::new();
        loop {
            match self.socket.accept() {
                Ok((sock, peer_addr)) => {
                    if let Some(hook) = &mut self.accept_hook
                        && matches!(hook(peer_addr), AcceptDecision::Reject)
                    {
                        continue;
                    }
                    match self.start_session(sock) {
                        Ok(session) => sessions.push(session),
                        Err(e) => warn!(error = %e, peer = %peer_addr, "failed to start accepted session"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
        sessions
    }

    fn start_session(&self, sock: std::net::TcpStream) -> Result<Session, BoxError> {
        let transport = match &self.config.tls {
            Some(tls) => {
                let stream = crate::tls::TlsStream::accept(tls, sock).context("tls accept")?;
                debug!(alpn = ?stream.alpn_protocol(), "tls handshake complete");
                Transport::tls(stream)
            }
            None => {
                apply_socket_opts(&sock).context("apply socket options")?;
                Transport::Plain(sock)
            }
        };
        Ok(match self.config.protocol {
            ProtocolVersion::Http2 => Session::new_server_http2(transport, &self.config.settings),
            ProtocolVersion::Http1 | ProtocolVersion::Http2Try => {
                Session::new_server_http1(transport)
            }
        })
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_accept_one_plain_connection() {
        let listener = Listener::bind(ListenerConfig {
            authority: "127.0.0.1:0".parse().unwrap(),
            protocol: ProtocolVersion::Http1,
            tls: None,
            settings: Http2Settings::default(),
        })
        .unwrap();
        // port 0 means any given port was actually used; re-derive it.
        let local = listener.socket.local_addr().unwrap();

        let client = std::net::TcpStream::connect(local).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut listener = listener;
        let sessions = listener.accept_ready();
        assert_eq!(sessions.len(), 1);
        drop(client);
    }
}
