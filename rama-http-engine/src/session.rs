//! The protocol-agnostic connection object (§3, §4.3, §4.6).
//!
//! A [`Session`] owns exactly one transport (plain or TLS), speaks either
//! HTTP/2 (via [`crate::h2_bridge::Http2Bridge`]) or HTTP/1.1 (via
//! [`MessageParser11`] over a [`ReadAccumulator`]), and drives both
//! directions through [`WriteBuffer`]. It never talks to the readiness
//! backend directly — [`crate::EventLoop`] calls `recv`/`send` in response to
//! readiness and reaps the session when either returns a negative progress
//! count or a close-reason has been assigned.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;

use slab::Slab;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

use crate::accumulator::ReadAccumulator;
use crate::buffer::{DeferredSlice, SendChunk, SendSource, WriteBuffer};
use crate::close_reason::CloseReason;
use crate::h2_bridge::{HandshakeDriver, Http2Bridge, Http2Event};
use crate::message::Message11;
use crate::parser::{MessageParser11, ParseProgress};
use crate::peer::PeerKey;
use crate::settings::Http2Settings;
use crate::stream::{Stream, StreamFreeFn, StreamKey};
use crate::transport::Transport;
use crate::H2_RD_BUF_SIZE;

/// Whether a [`Session`] is the connecting or accepting side (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// Negotiated (or about-to-be-negotiated) protocol (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    Http1,
    Http2,
    /// Reserved, not implemented upstream (§9 "`H2_HTTP_V2_TRY`"):
    /// HTTP/1.1 with an upgrade attempt to HTTP/2. Rejected at construction.
    Http2Try,
}

/// Termination lifecycle (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Live,
    WaitRsp,
    Immediate,
}

/// Called when a server request or client response has been fully received.
pub type RequestHandler = Box<dyn FnMut(&mut Session, StreamKey)>;
/// See [`RequestHandler`].
pub type ResponseHandler = Box<dyn FnMut(&mut Session, StreamKey)>;

enum Proto {
    Http1 {
        acc: ReadAccumulator,
        parser: MessageParser11,
    },
    Http2Handshake(HandshakeDriver),
    Http2(Http2Bridge),
}

/// The protocol-agnostic connection object (§3).
pub struct Session {
    role: SessionRole,
    transport: Transport,
    proto: Proto,
    write_buf: WriteBuffer,
    streams: Slab<Stream>,
    /// Submission order, doubling as HTTP/1.1 pipelining order (§3 "the list
    /// order equals request submission order").
    order: VecDeque<StreamKey>,
    h2_stream_ids: HashMap<u32, StreamKey>,

    req_cnt: u64,
    rsp_cnt: u64,
    rsp_rst_cnt: u64,
    strm_close_cnt: u64,

    termination: Termination,
    send_pending: bool,
    close_reason: Option<CloseReason>,
    begin: Instant,

    peer_key: Option<PeerKey>,
    request_handler: Option<RequestHandler>,
    response_handler: Option<ResponseHandler>,
}

/// Snapshot of a session's lifetime counters, handed to [`crate::Peer`] and
/// to free hooks when a session is reaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCounters {
    pub req_cnt: u64,
    pub rsp_cnt: u64,
    pub rsp_rst_cnt: u64,
    pub strm_close_cnt: u64,
}

impl Session {
    /// Starts a client-side HTTP/1.1 session over an already-connected,
    /// non-blocking transport.
    #[must_use]
    pub fn new_client_http1(transport: Transport) -> Self {
        Self::new(SessionRole::Client, transport, Proto::Http1 {
            acc: ReadAccumulator::new(),
            parser: MessageParser11::new(false),
        })
    }

    /// Starts a server-side HTTP/1.1 session over an already-accepted,
    /// non-blocking transport.
    #[must_use]
    pub fn new_server_http1(transport: Transport) -> Self {
        Self::new(SessionRole::Server, transport, Proto::Http1 {
            acc: ReadAccumulator::new(),
            parser: MessageParser11::new(true),
        })
    }

    /// Starts a client-side HTTP/2 handshake over an already-connected,
    /// non-blocking transport. The handshake completes lazily as `recv`/
    /// `send` are driven by the event loop.
    #[must_use]
    pub fn new_client_http2(transport: Transport, settings: &Http2Settings) -> Self {
        Self::new(
            SessionRole::Client,
            transport,
            Proto::Http2Handshake(crate::h2_bridge::client_handshake(settings)),
        )
    }

    /// Starts a server-side HTTP/2 handshake, see
    /// [`Self::new_client_http2`].
    #[must_use]
    pub fn new_server_http2(transport: Transport, settings: &Http2Settings) -> Self {
        Self::new(
            SessionRole::Server,
            transport,
            Proto::Http2Handshake(crate::h2_bridge::server_handshake(settings)),
        )
    }

    fn new(role: SessionRole, transport: Transport, proto: Proto) -> Self {
        Self {
            role,
            transport,
            proto,
            write_buf: WriteBuffer::new(),
            streams: Slab::new(),
            order: VecDeque::new(),
            h2_stream_ids: HashMap::new(),
            req_cnt: 0,
            rsp_cnt: 0,
            rsp_rst_cnt: 0,
            strm_close_cnt: 0,
            termination: Termination::Live,
            send_pending: false,
            close_reason: None,
            begin: Instant::now(),
            peer_key: None,
            request_handler: None,
            response_handler: None,
        }
    }

    pub fn set_request_handler(&mut self, handler: RequestHandler) {
        self.request_handler = Some(handler);
    }

    pub fn set_response_handler(&mut self, handler: ResponseHandler) {
        self.response_handler = Some(handler);
    }

    pub(crate) fn set_peer_key(&mut self, key: PeerKey) {
        self.peer_key = Some(key);
    }

    #[must_use]
    pub fn peer_key(&self) -> Option<PeerKey> {
        self.peer_key
    }

    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.role
    }

    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        match &self.proto {
            Proto::Http1 { .. } => ProtocolVersion::Http1,
            Proto::Http2Handshake(_) | Proto::Http2(_) => ProtocolVersion::Http2,
        }
    }

    #[must_use]
    pub fn req_cnt(&self) -> u64 {
        self.req_cnt
    }

    #[must_use]
    pub fn rsp_cnt(&self) -> u64 {
        self.rsp_cnt
    }

    #[must_use]
    pub fn rsp_rst_cnt(&self) -> u64 {
        self.rsp_rst_cnt
    }

    #[must_use]
    pub fn strm_close_cnt(&self) -> u64 {
        self.strm_close_cnt
    }

    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            req_cnt: self.req_cnt,
            rsp_cnt: self.rsp_cnt,
            rsp_rst_cnt: self.rsp_rst_cnt,
            strm_close_cnt: self.strm_close_cnt,
        }
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Wall-clock time since this session was created, for lifetime
    /// logging and [`crate::Peer`] throughput accounting.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.begin.elapsed()
    }

    #[must_use]
    pub fn send_pending(&self) -> bool {
        self.send_pending
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        !matches!(self.termination, Termination::Live)
    }

    #[must_use]
    pub fn stream(&self, key: StreamKey) -> Option<&Stream> {
        self.streams.get(key)
    }

    #[must_use]
    pub fn stream_mut(&mut self, key: StreamKey) -> Option<&mut Stream> {
        self.streams.get_mut(key)
    }

    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.transport.as_raw_fd()
    }

    /// Marks this session for reaping with [`CloseReason::HttpEnd`] without
    /// touching the transport (§4.7): used by the event loop's poll-mode
    /// pre-wait check, which must reap a session whose interest mask is
    /// already empty before it is ever added to the poll set.
    pub fn close_as_http_end(&mut self) {
        self.set_close_reason(CloseReason::HttpEnd);
    }

    fn set_close_reason(&mut self, reason: CloseReason) {
        // first reason wins (§7 "assigned exactly once").
        if self.close_reason.is_none() {
            if reason.is_abnormal() {
                warn!(reason = %reason, "session closing abnormally");
            } else {
                debug!(reason = %reason, "session closing");
            }
            self.close_reason = Some(reason);
        }
    }

    fn mark_send_pending(&mut self) {
        self.send_pending = true;
    }

    fn clear_send_pending(&mut self) {
        self.send_pending = false;
    }

    /// Whether the event loop should keep polling this session for
    /// readability (§4.7).
    #[must_use]
    pub fn wants_read(&self) -> bool {
        if self.close_reason.is_some() {
            return false;
        }
        match &self.proto {
            Proto::Http1 { .. } => {
                !matches!(self.termination, Termination::Immediate)
            }
            Proto::Http2Handshake(_) | Proto::Http2(_) => true,
        }
    }

    /// Whether the event loop should arm write-readiness (§4.7, §9
    /// "`send_pending` semantics").
    #[must_use]
    pub fn wants_write(&self) -> bool {
        self.send_pending
    }

    /// HTTP/1.1 only: true once there is nothing left to read or write and
    /// the connection is not keep-alive eligible, so the loop should reap it
    /// with `http-end` (§4.7).
    #[must_use]
    pub fn is_http1_exhausted(&self) -> bool {
        matches!(self.proto, Proto::Http1 { .. })
            && !self.wants_read()
            && !self.wants_write()
            && self.close_reason.is_none()
    }

    // ---- submission (application -> session) ----------------------------

    /// Submits an outbound request. Client-side only; servers respond to an
    /// already-received request stream via [`Self::respond`].
    ///
    /// For HTTP/1.1 this serializes `message`'s head via
    /// [`Message11::encode_request_head`] and appends `body` into a fresh
    /// [`Stream`]'s outbound buffer. For HTTP/2 it drives the codec bridge
    /// directly. Returns the new stream's key, or `None` if the session has
    /// no usable protocol state yet (the H2 handshake hasn't completed), has
    /// already started terminating, or is server-side.
    pub fn submit(
        &mut self,
        message: Message11,
        body: Vec<u8>,
        user_data: Option<(Box<dyn std::any::Any>, StreamFreeFn)>,
    ) -> Option<StreamKey> {
        if self.is_terminated() || self.role != SessionRole::Client {
            return None;
        }
        match &mut self.proto {
            Proto::Http1 { .. } => {
                let pseudo_id = 2 * self.req_cnt as u32 + 1;
                let mut stream = Stream::new(pseudo_id);
                let mut head = message.encode_request_head();
                head.extend_from_slice(&body);
                stream.set_send_body(head);
                stream.message = Some(message);
                if let Some((data, free_fn)) = user_data {
                    stream.set_user_data(data, free_fn);
                }
                let key = self.streams.insert(stream);
                self.order.push_back(key);
                self.req_cnt += 1;
                self.mark_send_pending();
                Some(key)
            }
            Proto::Http2(bridge) => {
                let end_of_stream = body.is_empty();
                let stream_id = match bridge.send_request(&message, end_of_stream) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(error = %e, "h2 send_request failed");
                        self.set_close_reason(CloseReason::H2CodecError);
                        return None;
                    }
                };
                if !end_of_stream && bridge.send_data(stream_id, body.into(), true).is_err() {
                    self.set_close_reason(CloseReason::H2CodecError);
                    return None;
                }
                let mut stream = Stream::new(stream_id);
                stream.message = Some(message);
                if let Some((data, free_fn)) = user_data {
                    stream.set_user_data(data, free_fn);
                }
                let key = self.streams.insert(stream);
                self.h2_stream_ids.insert(stream_id, key);
                self.req_cnt += 1;
                if let Err(e) = bridge.poll_once() {
                    warn!(error = %e, "h2 poll after submit failed");
                    self.set_close_reason(CloseReason::H2CodecError);
                }
                self.mark_send_pending();
                Some(key)
            }
            Proto::Http2Handshake(_) => None,
        }
    }

    /// Server-only: sends a response for an already-received HTTP/2 or
    /// HTTP/1.1 request stream.
    pub fn respond(&mut self, stream: StreamKey, message: Message11, body: Vec<u8>) -> bool {
        if self.role != SessionRole::Server || self.is_terminated() {
            return false;
        }
        match &mut self.proto {
            Proto::Http1 { .. } => {
                let Some(s) = self.streams.get_mut(stream) else {
                    return false;
                };
                if s.response_set {
                    return false;
                }
                let mut head = message.encode_response_head();
                head.extend_from_slice(&body);
                s.set_send_body(head);
                s.response_set = true;
                self.rsp_cnt += 1;
                self.mark_send_pending();
                true
            }
            Proto::Http2(bridge) => {
                let Some(s) = self.streams.get(stream) else {
                    return false;
                };
                let h2_stream_id = s.id;
                let end_of_stream = body.is_empty();
                if bridge.send_response(h2_stream_id, &message, end_of_stream).is_err() {
                    self.set_close_reason(CloseReason::H2CodecError);
                    return false;
                }
                if !end_of_stream && bridge.send_data(h2_stream_id, body.into(), true).is_err() {
                    self.set_close_reason(CloseReason::H2CodecError);
                    return false;
                }
                self.rsp_cnt += 1;
                if let Err(e) = bridge.poll_once() {
                    warn!(error = %e, "h2 poll after respond failed");
                    self.set_close_reason(CloseReason::H2CodecError);
                }
                self.mark_send_pending();
                true
            }
            Proto::Http2Handshake(_) => false,
        }
    }

    // ---- recv -------------------------------------------------------------

    /// Reads up to [`H2_RD_BUF_SIZE`] bytes and forwards them to the
    /// protocol layer (§4.3). Returns the number of bytes read, or a
    /// negative value once [`Self::close_reason`] has been assigned.
    pub fn recv(&mut self) -> i64 {
        if self.close_reason.is_some() {
            return -1;
        }
        let mut buf = vec![0u8; H2_RD_BUF_SIZE];
        let n = match self.transport.read(&mut buf) {
            Ok(0) => {
                self.set_close_reason(CloseReason::SocketEof);
                return -1;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
                return 0;
            }
            Err(e) => {
                let reason = if self.transport.is_tls() {
                    CloseReason::TlsError
                } else {
                    CloseReason::SocketError
                };
                trace!(error = %e, "recv failed");
                self.set_close_reason(reason);
                return -1;
            }
        };
        buf.truncate(n);
        self.handle_inbound(&buf);
        if self.close_reason.is_some() { -1 } else { n as i64 }
    }

    fn handle_inbound(&mut self, data: &[u8]) {
        match &mut self.proto {
            Proto::Http1 { .. } => self.drive_http1(data),
            Proto::Http2Handshake(_) => self.drive_h2_handshake(data),
            Proto::Http2(_) => self.drive_h2(data),
        }
    }

    fn drive_http1(&mut self, data: &[u8]) {
        let Proto::Http1 { acc, .. } = &mut self.proto else { return };
        acc.append(data);
        loop {
            let Proto::Http1 { acc, parser } = &mut self.proto else { return };
            let is_server = self.role == SessionRole::Server;
            let tls_active = self.transport.is_tls();
            match parser.advance(acc, is_server, tls_active) {
                Ok(ParseProgress::NeedMore) => break,
                Ok(ParseProgress::Complete(message)) => {
                    self.dispatch_http1(message);
                    if self.close_reason.is_some() || self.is_terminated() {
                        break;
                    }
                }
                Err(_) => {
                    self.set_close_reason(CloseReason::HttpError);
                    break;
                }
            }
        }
        if let Proto::Http1 { acc, .. } = &mut self.proto {
            acc.shrink_if_idle();
        }
    }

    fn dispatch_http1(&mut self, message: Message11) {
        if self.role == SessionRole::Server {
            let pseudo_id = 2 * self.req_cnt as u32 + 1;
            let mut stream = Stream::new(pseudo_id);
            stream.message = Some(message);
            let key = self.streams.insert(stream);
            self.order.push_back(key);
            self.req_cnt += 1;
            self.invoke_request_handler(key);
        } else {
            let Some(key) = self.order.pop_front() else {
                // response with no matching request: drop it, same as the
                // original's implicit "unexpected response" tolerance.
                return;
            };
            if let Some(stream) = self.streams.get_mut(key) {
                stream.message = Some(message);
            }
            self.rsp_cnt += 1;
            self.invoke_response_handler(key);
            if let Some(stream) = self.streams.try_remove(key) {
                drop(stream);
            }
            self.strm_close_cnt += 1;
        }
    }

    fn invoke_request_handler(&mut self, key: StreamKey) {
        if let Some(mut handler) = self.request_handler.take() {
            handler(self, key);
            self.request_handler = Some(handler);
        }
    }

    fn invoke_response_handler(&mut self, key: StreamKey) {
        if let Some(mut handler) = self.response_handler.take() {
            handler(self, key);
            self.response_handler = Some(handler);
        }
    }

    fn drive_h2_handshake(&mut self, data: &[u8]) {
        let Proto::Http2Handshake(driver) = &mut self.proto else { return };
        driver.io_mut().feed_inbound(data);
        match driver.poll_once() {
            Ok(Some(bridge)) => {
                self.proto = Proto::Http2(bridge);
                self.mark_send_pending();
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "h2 handshake failed");
                self.set_close_reason(CloseReason::H2CodecError);
            }
        }
    }

    fn drive_h2(&mut self, data: &[u8]) {
        let Proto::Http2(bridge) = &mut self.proto else { return };
        bridge.io_mut().feed_inbound(data);
        let events = match bridge.poll_once() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "h2 codec error");
                self.set_close_reason(CloseReason::H2CodecError);
                return;
            }
        };
        for event in events {
            self.handle_h2_event(event);
        }
        self.mark_send_pending();
    }

    fn handle_h2_event(&mut self, event: Http2Event) {
        match event {
            Http2Event::Headers { stream_id, message } => {
                let mut stream = Stream::new(stream_id);
                stream.message = Some(message);
                let key = self.streams.insert(stream);
                self.h2_stream_ids.insert(stream_id, key);
                if self.role == SessionRole::Server {
                    self.req_cnt += 1;
                }
                // Dispatch waits for `StreamEnd` so the handler sees the
                // full body, matching the HTTP/1.1 completion contract.
            }
            Http2Event::Data { stream_id, bytes } => {
                if let Some(&key) = self.h2_stream_ids.get(&stream_id)
                    && let Some(stream) = self.streams.get_mut(key)
                    && let Some(message) = stream.message.as_mut()
                {
                    message.append_body(&bytes);
                }
            }
            Http2Event::StreamEnd { stream_id } => {
                if let Some(&key) = self.h2_stream_ids.get(&stream_id) {
                    if self.role == SessionRole::Server {
                        self.invoke_request_handler(key);
                    } else {
                        self.invoke_response_handler(key);
                        self.h2_stream_ids.remove(&stream_id);
                        if let Some(stream) = self.streams.try_remove(key) {
                            drop(stream);
                        }
                        self.strm_close_cnt += 1;
                    }
                }
            }
            Http2Event::ConnectionClosed => {
                self.set_close_reason(CloseReason::H2CodecEnd);
            }
        }
    }

    // ---- send ---------------------------------------------------------

    /// Drains as much staged output as possible (§4.1, §4.3): pump+flush in
    /// a loop while positive progress is made. Returns total bytes written,
    /// or a negative value once a close-reason has been assigned.
    pub fn send(&mut self) -> i64 {
        if self.close_reason.is_some() {
            return -1;
        }
        let mut total = 0i64;
        loop {
            let progress = match &mut self.proto {
                Proto::Http1 { .. } => self.pump_and_flush_http1(),
                Proto::Http2(_) => self.pump_and_flush_http2(),
                Proto::Http2Handshake(driver) => {
                    flush_handshake_io(driver.io_mut(), &mut self.write_buf, &mut self.transport)
                }
            };
            match progress {
                Ok(0) => break,
                Ok(n) => total += n as i64,
                Err(reason) => {
                    self.set_close_reason(reason);
                    return -1;
                }
            }
        }

        if self.write_buf.is_drained() && !self.codec_wants_write() {
            self.clear_send_pending();
        } else {
            self.mark_send_pending();
        }

        if matches!(self.termination, Termination::Immediate) && self.write_buf.is_drained() {
            self.set_close_reason(CloseReason::ByTerminate);
        }

        total
    }

    fn codec_wants_write(&self) -> bool {
        matches!(&self.proto, Proto::Http2(bridge) if bridge.io().outbound_len() > 0)
    }

    fn pump_and_flush_http1(&mut self) -> Result<usize, CloseReason> {
        let is_server = self.role == SessionRole::Server;
        let mut completed = Vec::new();
        {
            let mut source = Http1SendSource {
                role: self.role,
                streams: &mut self.streams,
                order: &mut self.order,
                completed: &mut completed,
                last_peeked: None,
            };
            self.write_buf.pump(&mut source);
        }
        let result = {
            let mut source = Http1SendSource {
                role: self.role,
                streams: &mut self.streams,
                order: &mut self.order,
                completed: &mut completed,
                last_peeked: None,
            };
            self.write_buf.flush(&mut source, &mut self.transport)
        };
        for key in completed {
            if let Some(stream) = self.streams.try_remove(key) {
                drop(stream);
            }
            if is_server {
                self.strm_close_cnt += 1;
            }
        }
        map_io_result(result)
    }

    fn pump_and_flush_http2(&mut self) -> Result<usize, CloseReason> {
        let Proto::Http2(bridge) = &mut self.proto else {
            return Ok(0);
        };
        let io = bridge.io_mut();
        self.write_buf.pump(io);
        let result = self.write_buf.flush(io, &mut self.transport);
        map_io_result(result)
    }

    // ---- terminate ------------------------------------------------------

    /// Initiates termination (§4.6). `wait_rsp` requests a graceful
    /// half-close when requests are still in flight; otherwise shuts the
    /// transport down fully immediately.
    pub fn terminate(&mut self, wait_rsp: bool) {
        if self.is_terminated() {
            return;
        }
        let client_has_outstanding =
            self.role == SessionRole::Client && self.req_cnt > self.rsp_cnt;

        if wait_rsp && client_has_outstanding {
            debug!("terminate: wait for outstanding responses");
            self.termination = Termination::WaitRsp;
            match &mut self.proto {
                Proto::Http2(_) => {
                    // GOAWAY submission deferred upstream (§4.6, §9): the
                    // original's own attempt was disabled because it "seems
                    // not working"; we keep the no-op and just wait for
                    // responses to arrive or the transport to end.
                }
                _ => {
                    if let Err(e) = shutdown_write(&self.transport) {
                        trace!(error = %e, "half-close failed");
                    }
                }
            }
        } else {
            debug!("terminate: immediate");
            self.termination = Termination::Immediate;
            match &mut self.proto {
                Proto::Http2(bridge) => {
                    if let Err(e) = bridge.poll_once() {
                        warn!(error = %e, "h2 poll during terminate failed");
                    }
                }
                _ => {
                    if let Err(e) = shutdown_both(&self.transport) {
                        trace!(error = %e, "full shutdown failed");
                    }
                }
            }
            self.mark_send_pending();
        }
    }

    /// Whether a `wait_rsp` session has drained its outstanding responses
    /// (or the transport has ended) and can now be reaped.
    #[must_use]
    pub fn wait_rsp_satisfied(&self) -> bool {
        !matches!(self.termination, Termination::WaitRsp) || self.req_cnt <= self.rsp_cnt
    }
}

fn map_io_result(result: io::Result<usize>) -> Result<usize, CloseReason> {
    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(_) => Err(CloseReason::SocketError),
    }
}

fn flush_handshake_io(
    io: &mut crate::h2_bridge::MemoryIo,
    write_buf: &mut WriteBuffer,
    transport: &mut Transport,
) -> Result<usize, CloseReason> {
    write_buf.pump(io);
    map_io_result(write_buf.flush(io, transport))
}

fn shutdown_write(transport: &Transport) -> io::Result<()> {
    match transport {
        Transport::Plain(s) => s.shutdown(std::net::Shutdown::Write),
        Transport::Tls(_) => Ok(()), // rustls has no partial-shutdown primitive we can drive non-blocking.
    }
}

fn shutdown_both(transport: &Transport) -> io::Result<()> {
    match transport {
        Transport::Plain(s) => s.shutdown(std::net::Shutdown::Both),
        Transport::Tls(_) => Ok(()),
    }
}

/// [`SendSource`] over the HTTP/1.1 per-session stream list (§4.1).
///
/// The server only ever looks at the front of `order`: HTTP/1.1 has no
/// multiplexing, so the response to request *N* cannot be written before
/// request *N-1*'s response has been written, even if it became ready first
/// (classic head-of-line blocking, true to the wire protocol). The client
/// walks past streams whose request body is already fully handed off but
/// whose response hasn't arrived yet, to the next one with unsent body data
/// — this is what lets a client pipeline several requests onto one session
/// before any response comes back. Drained client entries stay in `order`
/// rather than being discarded, since [`Session::dispatch_http1`]'s
/// response-matching path still needs them in strict FIFO position.
struct Http1SendSource<'a> {
    role: SessionRole,
    streams: &'a mut Slab<Stream>,
    order: &'a mut VecDeque<StreamKey>,
    /// Server streams whose response was fully handed to [`WriteBuffer`]
    /// this call; the caller removes them from `streams` and updates
    /// counters afterward (kept out of this type to dodge a double
    /// mutable borrow of `Session`).
    completed: &'a mut Vec<StreamKey>,
    /// The stream [`Self::consume`] should advance: whichever one
    /// [`Self::peek`] last returned bytes for. Only ever differs from
    /// `order.front()` on the client side, where `peek` can walk past the
    /// front to find the next stream with unsent body data.
    last_peeked: Option<StreamKey>,
}

impl SendSource for Http1SendSource<'_> {
    fn peek(&mut self) -> SendChunk<'_> {
        if self.role == SessionRole::Server {
            loop {
                let Some(&key) = self.order.front() else {
                    return SendChunk::None;
                };
                let Some(stream) = self.streams.get(key) else {
                    self.order.pop_front();
                    continue;
                };
                if !stream.response_set {
                    // head of line: nothing to send until this one's
                    // response is set, even if a later stream is ready.
                    return SendChunk::None;
                }
                if stream.send_drained() {
                    self.order.pop_front();
                    self.completed.push(key);
                    continue;
                }
                self.last_peeked = Some(key);
                let bytes = stream.send_remaining();
                return if bytes.len() > crate::H2_WR_BUF_SIZE / 2 {
                    SendChunk::Deferred(DeferredSlice::new(bytes))
                } else {
                    SendChunk::Coalescable(bytes)
                };
            }
        }

        for &key in self.order.iter() {
            let Some(stream) = self.streams.get(key) else {
                continue;
            };
            if stream.send_drained() {
                // request fully handed off; wait for the response before
                // this entry leaves the queue, but keep scanning for a
                // later stream with unsent body data.
                continue;
            }
            self.last_peeked = Some(key);
            let bytes = stream.send_remaining();
            return if bytes.len() > crate::H2_WR_BUF_SIZE / 2 {
                SendChunk::Deferred(DeferredSlice::new(bytes))
            } else {
                SendChunk::Coalescable(bytes)
            };
        }
        SendChunk::None
    }

    fn consume(&mut self, n: usize) {
        if let Some(key) = self.last_peeked
            && let Some(stream) = self.streams.get_mut(key)
        {
            stream.advance_send(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::rc::Rc;
    use std::cell::RefCell;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nodelay(true).unwrap();
        server.set_nodelay(true).unwrap();
        (client, server)
    }

    #[test]
    fn server_dispatches_one_request_with_expected_fields() {
        let (client, server) = loopback_pair();
        let mut session = Session::new_server_http1(Transport::plain(server).unwrap());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        session.set_request_handler(Box::new(move |sess, key| {
            let message = sess.stream(key).unwrap().message.clone().unwrap();
            seen2.borrow_mut().push((
                message.method().to_owned(),
                message.path().to_owned(),
                message.authority().to_owned(),
                message.body_len(),
            ));
        }));

        let mut writer = &client;
        writer
            .write_all(b"GET /a HTTP/1.1\r\nHost: x:1\r\nContent-Length: 0\r\n\r\n")
            .unwrap();

        // give the loopback socket a moment to deliver bytes
        std::thread::sleep(std::time::Duration::from_millis(20));
        let n = session.recv();
        assert!(n > 0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("GET".to_owned(), "/a".to_owned(), "x:1".to_owned(), 0));
        assert_eq!(session.req_cnt(), 1);
    }

    #[test]
    fn client_dispatches_response_and_frees_stream() {
        let (client, server) = loopback_pair();
        let mut session = Session::new_client_http1(Transport::plain(client).unwrap());

        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        session.set_response_handler(Box::new(move |sess, key| {
            *seen2.borrow_mut() = sess.stream(key).and_then(|s| s.message.clone()).map(|m| m.status());
        }));

        session
            .submit(Message11::new_request(), Vec::new(), None)
            .unwrap();
        assert_eq!(session.req_cnt(), 1);
        assert!(session.send() >= 0);

        let mut server = server;
        let mut buf = [0u8; 256];
        std::thread::sleep(std::time::Duration::from_millis(20));
        let n = server.read(&mut buf).unwrap();
        assert!(n > 0);

        server.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(session.recv() > 0);

        assert_eq!(*seen.borrow(), Some(204));
        assert_eq!(session.rsp_cnt(), 1);
        assert_eq!(session.strm_close_cnt(), 1);
    }

    #[test]
    fn client_pipelines_second_request_before_first_response_arrives() {
        let (client, server) = loopback_pair();
        let mut session = Session::new_client_http1(Transport::plain(client).unwrap());
        session.set_response_handler(Box::new(|_, _| {}));

        session
            .submit(Message11::new_request(), Vec::new(), None)
            .unwrap();
        session
            .submit(Message11::new_request(), Vec::new(), None)
            .unwrap();
        assert_eq!(session.req_cnt(), 2);
        assert!(session.send() >= 0);

        let mut server = server;
        let mut buf = [0u8; 512];
        std::thread::sleep(std::time::Duration::from_millis(20));
        let n = server.read(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..n]);
        assert_eq!(
            received.matches("HTTP/1.1").count(),
            2,
            "both requests should be on the wire before either response arrives: {received}"
        );
    }

    #[test]
    fn malformed_request_sets_http_error_close_reason() {
        let (client, server) = loopback_pair();
        let mut session = Session::new_server_http1(Transport::plain(server).unwrap());
        let mut writer = &client;
        writer.write_all(b"GARBAGE LINE\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        session.recv();
        assert_eq!(session.close_reason(), Some(CloseReason::HttpError));
    }

    #[test]
    fn terminate_wait_rsp_keeps_session_alive_until_response_arrives() {
        let (client, server) = loopback_pair();
        let mut session = Session::new_client_http1(Transport::plain(client).unwrap());
        session.set_response_handler(Box::new(|_, _| {}));
        session.submit(Message11::new_request(), Vec::new(), None).unwrap();
        session.send();

        session.terminate(true);
        assert!(!session.wait_rsp_satisfied());

        let mut server = server;
        let mut buf = [0u8; 256];
        std::thread::sleep(std::time::Duration::from_millis(20));
        let _ = server.read(&mut buf).unwrap();
        server.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        session.recv();

        assert!(session.wait_rsp_satisfied());
    }
}
