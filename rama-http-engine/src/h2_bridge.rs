//! Bridges the `h2` crate's async codec onto this engine's synchronous,
//! single-threaded event loop (§4.4, §6 "HTTP/2 via the `h2` crate").
//!
//! `h2::client`/`h2::server` are written against `tokio::io::{AsyncRead,
//! AsyncWrite}` and `std::future::Future`, but nothing here runs a tokio
//! runtime or any executor. Instead:
//!
//! - [`MemoryIo`] is an in-process substitute transport: two
//!   `VecDeque<u8>` buffers (inbound/outbound) behind `Rc<RefCell<_>>`,
//!   implementing the tokio I/O traits directly against memory, never
//!   touching a real socket. It is cheaply [`Clone`]: every clone shares the
//!   same queues, so the instance moved into `builder.handshake(io)` (which
//!   `h2` then owns for the life of the connection) and the instance this
//!   module keeps around to feed/drain bytes stay in sync.
//! - `Session::recv` copies bytes read from the real transport into
//!   `MemoryIo`'s inbound queue, then this module polls the `h2` connection
//!   future once with a no-op [`Waker`] — `h2` drains what it can from
//!   inbound and appends wire bytes to outbound.
//! - [`Http2Bridge`] implements [`crate::buffer::SendSource`] directly over
//!   `MemoryIo`'s outbound queue (via [`Http2Bridge::io_mut`]), so
//!   [`crate::buffer::WriteBuffer`] drains it exactly like the HTTP/1.1
//!   per-stream body walk.
//!
//! A no-op waker is correct here because nothing ever actually parks: every
//! poll happens synchronously in response to real readiness (socket
//! readable/writable) or a fresh local write, and a spurious `Pending` just
//! means "nothing more to do this tick" — the caller already waits for the
//! next readiness event before polling again.
//!
//! Acknowledged simplification (see `SPEC_FULL.md` §9 open questions): this
//! bridge surfaces headers, data, and stream end, enough to drive full
//! request/response bodies, but does not expose trailers or push promises.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll, Waker};

use bytes::Bytes;
use h2::client::{ResponseFuture, SendRequest};
use h2::server::SendResponse;
use h2::{RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::buffer::{DeferredSlice, SendChunk, SendSource};
use crate::message::Message11;
use crate::settings::Http2Settings;
use crate::H2_WR_BUF_SIZE;

/// In-process duplex buffer standing in for a real async socket.
///
/// Cloning shares the underlying queues (see the module docs): it exists
/// purely so the handle handed to `h2`'s handshake/connection future and the
/// handle this module retains for feeding/draining bytes refer to the same
/// memory.
#[derive(Default, Clone)]
pub struct MemoryIo {
    inbound: Rc<RefCell<VecDeque<u8>>>,
    outbound: Rc<RefCell<VecDeque<u8>>>,
    /// Scratch copy of the front of `outbound`, valid until the next `peek`.
    /// Not shared across clones: each handle re-populates it from the shared
    /// queue on demand.
    scratch: Vec<u8>,
}

impl MemoryIo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes just read from the real transport, for `h2` to consume
    /// on its next poll.
    pub fn feed_inbound(&mut self, data: &[u8]) {
        self.inbound.borrow_mut().extend(data);
    }

    /// Bytes still waiting to be handed to the real transport.
    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.borrow().len()
    }
}

impl AsyncRead for MemoryIo {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let mut inbound = this.inbound.borrow_mut();
        if inbound.is_empty() {
            return Poll::Pending;
        }
        let n = buf.remaining().min(inbound.len());
        let drained: Vec<u8> = inbound.drain(..n).collect();
        buf.put_slice(&drained);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MemoryIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.get_mut().outbound.borrow_mut().extend(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Drains `io`'s outbound queue as a [`SendSource`], coalescing small wire
/// chunks and deferring ones too large to be worth copying into the
/// coalesce buffer.
impl SendSource for MemoryIo {
    fn peek(&mut self) -> SendChunk<'_> {
        let outbound = self.outbound.borrow();
        if outbound.is_empty() {
            return SendChunk::None;
        }
        self.scratch.clear();
        let (a, b) = outbound.as_slices();
        self.scratch.extend_from_slice(a);
        self.scratch.extend_from_slice(b);
        drop(outbound);
        if self.scratch.len() > H2_WR_BUF_SIZE / 2 {
            SendChunk::Deferred(DeferredSlice::new(&self.scratch))
        } else {
            SendChunk::Coalescable(&self.scratch)
        }
    }

    fn consume(&mut self, n: usize) {
        self.outbound.borrow_mut().drain(..n);
    }
}

/// One event surfaced by draining the `h2` connection this tick.
pub enum Http2Event {
    /// A new request (server) or response (client) headers frame.
    Headers { stream_id: u32, message: Message11 },
    /// A body chunk for an already-announced stream.
    Data { stream_id: u32, bytes: Bytes },
    /// The peer closed its half of a stream (end of body/trailers).
    StreamEnd { stream_id: u32 },
    /// The connection itself ended or errored.
    ConnectionClosed,
}

/// Either side of an HTTP/2 connection, past the handshake, plus the memory
/// transport `h2` reads/writes through.
pub enum Http2Bridge {
    Server(ServerBridge),
    Client(ClientBridge),
}

pub struct ServerBridge {
    io: MemoryIo,
    conn: h2::server::Connection<MemoryIo, Bytes>,
    awaiting_response: HashMap<u32, SendResponse<Bytes>>,
    open_send: HashMap<u32, SendStream<Bytes>>,
    open_recv: HashMap<u32, RecvStream>,
}

pub struct ClientBridge {
    io: MemoryIo,
    conn: h2::client::Connection<MemoryIo>,
    handle: SendRequest<Bytes>,
    awaiting_response: VecDeque<(u32, ResponseFuture)>,
    open_send: HashMap<u32, SendStream<Bytes>>,
    open_recv: HashMap<u32, RecvStream>,
}

impl Http2Bridge {
    /// The memory transport this bridge reads/writes through: feed inbound
    /// bytes before [`Self::poll_once`], drain outbound via [`SendSource`]
    /// after it.
    pub fn io_mut(&mut self) -> &mut MemoryIo {
        match self {
            Self::Server(s) => &mut s.io,
            Self::Client(c) => &mut c.io,
        }
    }

    /// Read-only view of the memory transport, for checking outbound
    /// backlog without needing a mutable borrow.
    #[must_use]
    pub fn io(&self) -> &MemoryIo {
        match self {
            Self::Server(s) => &s.io,
            Self::Client(c) => &c.io,
        }
    }

    /// Drives the underlying `h2` connection one tick with a no-op waker.
    /// Returns the events surfaced this tick; an empty vec means nothing
    /// new, not necessarily that the connection is idle.
    pub fn poll_once(&mut self) -> Result<Vec<Http2Event>, h2::Error> {
        let waker = Waker::noop();
        let mut cx = TaskContext::from_waker(waker);
        let mut events = Vec::new();

        match self {
            Self::Server(s) => {
                loop {
                    match s.conn.poll_accept(&mut cx) {
                        Poll::Ready(Some(Ok((request, respond)))) => {
                            let stream_id: u32 = request.body().stream_id().into();
                            let message = request_to_message(&request);
                            let (_, body) = request.into_parts();
                            s.open_recv.insert(stream_id, body);
                            s.awaiting_response.insert(stream_id, respond);
                            events.push(Http2Event::Headers { stream_id, message });
                        }
                        Poll::Ready(Some(Err(_)) | None) => {
                            events.push(Http2Event::ConnectionClosed);
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
                drain_recv_streams(&mut s.open_recv, &mut cx, &mut events);
            }
            Self::Client(c) => {
                match Pin::new(&mut c.conn).poll(&mut cx) {
                    Poll::Ready(_) => events.push(Http2Event::ConnectionClosed),
                    Poll::Pending => {}
                }

                let mut still_waiting = VecDeque::new();
                while let Some((stream_id, mut fut)) = c.awaiting_response.pop_front() {
                    match Pin::new(&mut fut).poll(&mut cx) {
                        Poll::Ready(Ok(response)) => {
                            let message = response_to_message(&response);
                            let (_, body) = response.into_parts();
                            c.open_recv.insert(stream_id, body);
                            events.push(Http2Event::Headers { stream_id, message });
                        }
                        Poll::Ready(Err(_)) => {
                            events.push(Http2Event::StreamEnd { stream_id });
                        }
                        Poll::Pending => still_waiting.push_back((stream_id, fut)),
                    }
                }
                c.awaiting_response = still_waiting;

                drain_recv_streams(&mut c.open_recv, &mut cx, &mut events);
            }
        }

        Ok(events)
    }

    /// Sends a client request's headers, returning the stream id used to
    /// correlate later events and body writes. `end_of_stream` closes the
    /// request body immediately (no body to send).
    pub fn send_request(&mut self, message: &Message11, end_of_stream: bool) -> Result<u32, h2::Error> {
        match self {
            Self::Server(_) => Err(stream_gone_error()),
            Self::Client(c) => {
                let request = message_to_request(message)?;
                let (response_fut, send_stream) = c.handle.send_request(request, end_of_stream)?;
                let stream_id: u32 = send_stream.stream_id().into();
                if !end_of_stream {
                    c.open_send.insert(stream_id, send_stream);
                }
                c.awaiting_response.push_back((stream_id, response_fut));
                Ok(stream_id)
            }
        }
    }

    /// Sends a server response's headers for `stream_id`. `end_of_stream`
    /// closes the response body immediately (no body to send).
    pub fn send_response(
        &mut self,
        stream_id: u32,
        message: &Message11,
        end_of_stream: bool,
    ) -> Result<(), h2::Error> {
        match self {
            Self::Client(_) => Err(stream_gone_error()),
            Self::Server(s) => {
                let mut respond = s.awaiting_response.remove(&stream_id).ok_or_else(stream_gone_error)?;
                let response = message_to_response(message)?;
                let send_stream = respond.send_response(response, end_of_stream)?;
                if !end_of_stream {
                    s.open_send.insert(stream_id, send_stream);
                }
                Ok(())
            }
        }
    }

    /// Writes (part of) a body chunk to an already-headers-sent stream.
    /// `end_of_stream` marks this as the final chunk.
    pub fn send_data(&mut self, stream_id: u32, data: Bytes, end_of_stream: bool) -> Result<(), h2::Error> {
        let open_send = match self {
            Self::Server(s) => &mut s.open_send,
            Self::Client(c) => &mut c.open_send,
        };
        let send_stream = open_send.get_mut(&stream_id).ok_or_else(stream_gone_error)?;
        send_stream.send_data(data, end_of_stream)?;
        if end_of_stream {
            open_send.remove(&stream_id);
        }
        Ok(())
    }
}

fn stream_gone_error() -> h2::Error {
    h2::Error::from(h2::Reason::STREAM_CLOSED)
}

fn drain_recv_streams(
    open: &mut HashMap<u32, RecvStream>,
    cx: &mut TaskContext<'_>,
    events: &mut Vec<Http2Event>,
) {
    let mut finished = Vec::new();
    for (&stream_id, recv) in open.iter_mut() {
        loop {
            match recv.poll_data(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let _ = recv.flow_control().release_capacity(bytes.len());
                    events.push(Http2Event::Data { stream_id, bytes });
                }
                Poll::Ready(Some(Err(_)) | None) => {
                    events.push(Http2Event::StreamEnd { stream_id });
                    finished.push(stream_id);
                    break;
                }
                Poll::Pending => break,
            }
        }
    }
    for stream_id in finished {
        open.remove(&stream_id);
    }
}

fn request_to_message<Body>(request: &http::Request<Body>) -> Message11 {
    let mut message = Message11::new_request();
    message.set_method(request.method().as_str());
    message.set_path(request.uri().path_and_query().map_or("/", http::uri::PathAndQuery::as_str));
    message.set_scheme(request.uri().scheme_str().unwrap_or("https"));
    if let Some(authority) = request.uri().authority() {
        message.set_authority(authority.as_str());
    }
    copy_headers(request.headers(), &mut message);
    message
}

fn response_to_message<Body>(response: &http::Response<Body>) -> Message11 {
    let mut message = Message11::new_response();
    message.set_status(response.status().as_u16());
    copy_headers(response.headers(), &mut message);
    message
}

fn copy_headers(headers: &http::HeaderMap, message: &mut Message11) {
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            message.add_header(name.as_str(), v);
        }
    }
}

fn message_to_request(message: &Message11) -> Result<http::Request<()>, h2::Error> {
    let uri = format!("{}://{}{}", message.scheme(), message.authority(), message.path());
    let mut builder = http::Request::builder().method(message.method()).uri(uri);
    for (name, value) in message.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(()).map_err(|_| stream_gone_error())
}

fn message_to_response(message: &Message11) -> Result<http::Response<()>, h2::Error> {
    let mut builder = http::Response::builder().status(message.status());
    for (name, value) in message.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(()).map_err(|_| stream_gone_error())
}

/// An in-flight `h2` handshake, driven one tick at a time until it resolves
/// into a full [`Http2Bridge`].
pub enum HandshakeDriver {
    Server(
        MemoryIo,
        Pin<Box<dyn Future<Output = Result<h2::server::Connection<MemoryIo, Bytes>, h2::Error>>>>,
    ),
    Client(
        MemoryIo,
        Pin<Box<dyn Future<Output = Result<(SendRequest<Bytes>, h2::client::Connection<MemoryIo>), h2::Error>>>>,
    ),
}

/// Starts the server-side handshake future.
pub fn server_handshake(settings: &Http2Settings) -> HandshakeDriver {
    let io = MemoryIo::new();
    let shared = io.clone();
    let mut builder = h2::server::Builder::new();
    settings.apply_to_server(&mut builder);
    HandshakeDriver::Server(shared, Box::pin(builder.handshake(io)))
}

/// Starts the client-side handshake future.
pub fn client_handshake(settings: &Http2Settings) -> HandshakeDriver {
    let io = MemoryIo::new();
    let shared = io.clone();
    let mut builder = h2::client::Builder::new();
    settings.apply_to_client(&mut builder);
    HandshakeDriver::Client(shared, Box::pin(builder.handshake(io)))
}

impl HandshakeDriver {
    /// The handshake's own memory transport: feed inbound bytes before each
    /// poll, drain outbound (the preamble / initial `SETTINGS` frame) same
    /// as a completed bridge. Shares its queues with the `MemoryIo` moved
    /// into the handshake future itself, so bytes fed/drained here are what
    /// `h2` actually reads/writes.
    pub fn io_mut(&mut self) -> &mut MemoryIo {
        match self {
            Self::Server(io, _) | Self::Client(io, _) => io,
        }
    }

    /// Polls once. Returns the completed bridge once the handshake
    /// resolves; `Ok(None)` means keep waiting for more inbound bytes.
    pub fn poll_once(&mut self) -> Result<Option<Http2Bridge>, h2::Error> {
        let waker = Waker::noop();
        let mut cx = TaskContext::from_waker(waker);
        match self {
            Self::Server(io, fut) => match fut.as_mut().poll(&mut cx) {
                Poll::Ready(Ok(conn)) => Ok(Some(Http2Bridge::Server(ServerBridge {
                    io: std::mem::take(io),
                    conn,
                    awaiting_response: HashMap::new(),
                    open_send: HashMap::new(),
                    open_recv: HashMap::new(),
                }))),
                Poll::Ready(Err(e)) => Err(e),
                Poll::Pending => Ok(None),
            },
            Self::Client(io, fut) => match fut.as_mut().poll(&mut cx) {
                Poll::Ready(Ok((handle, conn))) => Ok(Some(Http2Bridge::Client(ClientBridge {
                    io: std::mem::take(io),
                    conn,
                    handle,
                    awaiting_response: VecDeque::new(),
                    open_send: HashMap::new(),
                    open_recv: HashMap::new(),
                }))),
                Poll::Ready(Err(e)) => Err(e),
                Poll::Pending => Ok(None),
            },
        }
    }
}
