//! A single-threaded, cooperative session I/O engine that multiplexes
//! HTTP/2 streams and HTTP/1.1 messages over plain TCP or TLS.
//!
//! This crate owns the hard part of a dual-protocol proxy/server: the
//! per-connection write pipeline that never drops or duplicates bytes under
//! partial send, an incremental HTTP/1.1 parser, a readiness-multiplexed
//! event loop, and a client-side pool ([`Peer`]) that load-balances and
//! reconnects sessions to one authority.
//!
//! HTTP/2 framing itself is delegated to the [`h2`] crate; TLS is delegated
//! to [`rustls`]; address parsing is delegated to [`rama_net::address`].
//! Everything else — pacing bytes onto the wire, accumulating and parsing
//! HTTP/1.1 messages, and deciding when a session lives or dies — is this
//! crate's job.
//!
//! # Threading model
//!
//! Every [`Context`] is driven by exactly one [`EventLoop`] on exactly one
//! thread. There is no internal synchronization: callbacks may freely
//! re-enter any public API except [`EventLoop::run`] itself.

#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

mod accumulator;
mod buffer;
mod close_reason;
mod context;
mod date;
mod event_loop;
mod h2_bridge;
mod listener;
mod message;
mod parser;
mod peer;
mod session;
mod settings;
mod stream;
mod tls;
mod transport;

pub use accumulator::ReadAccumulator;
pub use buffer::{DeferredSlice, SendChunk, SendSource, WriteBuffer};
pub use close_reason::CloseReason;
pub use context::{Context, ContextConfig};
pub use event_loop::EventLoop;
pub use listener::{AcceptDecision, Listener, ListenerConfig};
pub use message::{Message11, MessageKind};
pub use parser::MessageParser11;
pub use peer::{Peer, PeerConfig, PeerKey, PeerTls, SessionKey};
pub use session::{ProtocolVersion, RequestHandler, ResponseHandler, Session, SessionCounters, SessionRole};
pub use settings::Http2Settings;
pub use stream::{Stream, StreamFreeFn, StreamKey};
pub use tls::TlsConfig;

/// Default size of [`ReadAccumulator`]'s growth-triggered free threshold.
pub const DEFAULT_ACCUMULATOR_FREE_THRESHOLD: usize = 16 * 1024;

/// Receive buffer size used by [`Session::recv`] for one `read`/`recv` call.
pub const H2_RD_BUF_SIZE: usize = 64 * 1024;

/// Capacity of [`WriteBuffer`]'s coalesce buffer.
pub const H2_WR_BUF_SIZE: usize = 16 * 1024;

/// Maximum time, in milliseconds, the event loop blocks in one readiness wait.
pub const EVENT_LOOP_WAIT_MS: i32 = 100;
