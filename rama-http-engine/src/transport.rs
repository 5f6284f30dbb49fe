//! The byte-level transport underneath a [`crate::Session`]: a plain
//! non-blocking TCP socket, or one wrapped in a TLS stream (§3, §6).
//!
//! Both variants expose the same `Read + Write` surface so the rest of the
//! engine (`WriteBuffer::flush`, the HTTP/1.1 parser feed loop, the h2
//! bridge) never has to branch on TLS. Socket-level knobs (`TCP_NODELAY`,
//! non-blocking mode) are applied once, at construction, the way the
//! original sets them right after `accept`/`connect`.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};

use socket2::Socket;

use crate::tls::TlsStream;

/// The transport underneath one session: plain TCP, or TLS over TCP.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Transport {
    /// Wraps an already-connected/accepted [`TcpStream`], applying
    /// `TCP_NODELAY` and non-blocking mode.
    pub fn plain(stream: TcpStream) -> io::Result<Self> {
        apply_socket_opts(&stream)?;
        Ok(Self::Plain(stream))
    }

    /// Wraps a completed [`TlsStream`] (handshake already done, see
    /// [`crate::tls`]).
    #[must_use]
    pub fn tls(stream: TlsStream) -> Self {
        Self::Tls(Box::new(stream))
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// The negotiated ALPN protocol, if any (TLS only).
    #[must_use]
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Self::Plain(_) => None,
            Self::Tls(t) => t.alpn_protocol(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(t) => t.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(t) => t.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(t) => t.flush(),
        }
    }
}

impl AsRawFd for Transport {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Plain(s) => s.as_raw_fd(),
            Self::Tls(t) => t.as_raw_fd(),
        }
    }
}

/// Applies the socket options the original sets on every accepted/connected
/// fd before handing it to the session: disable Nagle, close-on-exec, go
/// non-blocking (§6 "Socket options").
pub(crate) fn apply_socket_opts(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    set_cloexec(stream.as_raw_fd())?;
    stream.set_nonblocking(true)?;
    Ok(())
}

/// Sets `FD_CLOEXEC` on a raw fd via `fcntl`. `std::net::TcpStream` has no
/// portable setter for this, unlike [`socket2::Socket`] (used for listeners);
/// accepted/connected plain sockets go through `libc` directly instead,
/// matching the original setting this right after `accept`/`connect`.
pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Applies listener-side socket options via [`socket2`]: address reuse
/// before bind, `FD_CLOEXEC` and non-blocking mode after.
pub(crate) fn apply_listener_opts(socket: &Socket) -> io::Result<()> {
    socket.set_reuse_address(true)?;
    socket.set_cloexec(true)?;
    socket.set_nonblocking(true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn plain_transport_applies_nodelay_and_nonblocking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        let t = Transport::plain(server).unwrap();
        assert!(!t.is_tls());
        assert!(t.alpn_protocol().is_none());
        drop(client);
    }
}
