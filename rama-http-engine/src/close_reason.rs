//! Disposition tag assigned to a [`crate::Session`] before it is reaped by the
//! [`crate::EventLoop`].
//!
//! A `CloseReason` is never propagated as a [`rama_error`] value: per the
//! session error model, every I/O or protocol failure reduces to "assign a
//! reason, return a negative progress count, let the loop reap it next pass".

use std::fmt;

/// Why a [`crate::Session`] is being torn down.
///
/// Assigned exactly once, by whichever of `recv`/`send`/`terminate` first
/// observes the condition; later assignments are ignored (first reason wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The socket returned a hard error other than would-block.
    SocketError,
    /// `recv` returned 0: the peer closed its write side.
    SocketEof,
    /// The TLS layer reported a non-retryable error.
    TlsError,
    /// The HTTP/2 codec reported a fatal error.
    H2CodecError,
    /// The HTTP/2 codec cleanly reported end of stream (no more to send, and
    /// it no longer wants to read).
    H2CodecEnd,
    /// HTTP/1.1: the connection is not keep-alive capable and has nothing
    /// left to read or write.
    HttpEnd,
    /// The HTTP/1.1 parser hit malformed input.
    HttpError,
    /// [`crate::Session::terminate`] was called and has fully drained.
    ByTerminate,
}

impl CloseReason {
    /// Whether this reason indicates an abnormal, as opposed to a graceful,
    /// shutdown. Used only for log level selection.
    #[must_use]
    pub fn is_abnormal(self) -> bool {
        !matches!(
            self,
            Self::SocketEof | Self::H2CodecEnd | Self::HttpEnd | Self::ByTerminate
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SocketError => "socket-error",
            Self::SocketEof => "socket-eof",
            Self::TlsError => "tls-error",
            Self::H2CodecError => "h2-codec-error",
            Self::H2CodecEnd => "h2-codec-end",
            Self::HttpEnd => "http-end",
            Self::HttpError => "http-error",
            Self::ByTerminate => "by-terminate",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_classification() {
        assert!(CloseReason::SocketError.is_abnormal());
        assert!(CloseReason::TlsError.is_abnormal());
        assert!(CloseReason::H2CodecError.is_abnormal());
        assert!(CloseReason::HttpError.is_abnormal());
        assert!(!CloseReason::SocketEof.is_abnormal());
        assert!(!CloseReason::H2CodecEnd.is_abnormal());
        assert!(!CloseReason::HttpEnd.is_abnormal());
        assert!(!CloseReason::ByTerminate.is_abnormal());
    }

    #[test]
    fn display_matches_taxonomy() {
        assert_eq!(CloseReason::SocketError.to_string(), "socket-error");
        assert_eq!(CloseReason::ByTerminate.to_string(), "by-terminate");
    }
}
