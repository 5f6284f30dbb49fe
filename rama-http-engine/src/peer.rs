//! Client-side connection pool to one authority (§5).
//!
//! A [`Peer`] keeps `sess_num` sessions open to the same authority and
//! round-robins outbound requests across the active ones, rotating a
//! session out for a fresh reconnect once it has carried
//! `req_thr_for_reconn` requests. Sessions themselves live in the owning
//! [`crate::Context`]'s session slab; a `Peer` only remembers which slab
//! keys are its own and which of its fixed-size slots they currently
//! occupy, mirroring `h2_peer`'s `sess[]`/`act_sess[]` arrays in the
//! original.

use std::net::TcpStream;

use rama_error::{BoxError, ErrorContext, OpaqueError};
use rama_net::address::Authority;
use slab::Slab;
use tracing::warn;

use crate::session::{Session, SessionCounters, SessionRole};
use crate::settings::Http2Settings;
use crate::tls::TlsConfig;
use crate::transport::Transport;
use crate::ProtocolVersion;

/// Stable handle to a [`Peer`] inside a [`crate::Context`]'s slab.
pub type PeerKey = usize;
/// Stable handle to a [`Session`] inside a [`crate::Context`]'s slab.
pub type SessionKey = usize;

/// TLS material and server name used when a [`Peer`] connects.
pub struct PeerTls {
    pub config: TlsConfig,
    pub server_name: String,
}

/// Static configuration for a [`Peer`] (§5).
pub struct PeerConfig {
    pub authority: Authority,
    pub protocol: ProtocolVersion,
    pub tls: Option<PeerTls>,
    pub settings: Http2Settings,
    /// Number of sessions kept open concurrently.
    pub sess_num: usize,
    /// Rotate a session out for reconnect once it has carried this many
    /// requests. Forced to `0` (never rotate) when `sess_num == 1` (§5
    /// "a lone session has nothing to round-robin onto while it drains").
    pub req_thr_for_reconn: u64,
}

struct Slot {
    session: Option<SessionKey>,
    active: bool,
}

/// Client-side session pool to one authority (§5).
pub struct Peer {
    config: PeerConfig,
    slots: Vec<Slot>,
    act_sess_num: usize,
    next_sess_idx: usize,
    /// `0` = live, `1` = terminated (immediate), `2` = terminated
    /// (graceful, waiting on in-flight responses), matching the original's
    /// tri-state `is_terminated`.
    terminated: u8,

    req_cnt: u64,
    rsp_cnt: u64,
    rsp_rst_cnt: u64,
    strm_close_cnt: u64,
}

impl Peer {
    /// Builds an idle peer with no sessions yet; call [`Self::connect`] to
    /// populate its slots.
    #[must_use]
    pub fn new(mut config: PeerConfig) -> Self {
        if config.sess_num <= 1 && config.req_thr_for_reconn != 0 {
            warn!("req_thr_for_reconn forced to 0: sess_num is 1, nothing to rotate onto");
            config.req_thr_for_reconn = 0;
        }
        let sess_num = config.sess_num.max(1);
        Self {
            config,
            slots: (0..sess_num)
                .map(|_| Slot {
                    session: None,
                    active: false,
                })
                .collect(),
            act_sess_num: 0,
            next_sess_idx: 0,
            terminated: 0,
            req_cnt: 0,
            rsp_cnt: 0,
            rsp_rst_cnt: 0,
            strm_close_cnt: 0,
        }
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated != 0
    }

    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.act_sess_num
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

    /// Opens (or re-opens) every empty slot, inserting new [`Session`]s into
    /// `sessions`. Fails only if not a single connection attempt succeeded
    /// (§5 "`h2_peer_connect`": partial success is tolerated).
    pub fn connect(
        &mut self,
        sessions: &mut Slab<Session>,
        peer_key: PeerKey,
    ) -> Result<(), BoxError> {
        for i in 0..self.slots.len() {
            if self.slots[i].session.is_some() {
                continue;
            }
            match self.connect_one() {
                Ok(mut session) => {
                    session.set_peer_key(peer_key);
                    let key = sessions.insert(session);
                    self.slots[i] = Slot {
                        session: Some(key),
                        active: true,
                    };
                    self.act_sess_num += 1;
                }
                Err(e) => {
                    warn!(error = %e, "peer connect attempt failed");
                }
            }
        }
        if self.act_sess_num == 0 {
            return Err(OpaqueError::from_display("peer failed to establish any session").into());
        }
        Ok(())
    }

    fn connect_one(&self) -> Result<Session, BoxError> {
        let target = self.config.authority.to_string();
        let sock = TcpStream::connect(&target).context("connect to peer authority")?;
        let transport = match &self.config.tls {
            Some(tls) => {
                let stream = crate::tls::TlsStream::connect(&tls.config, &tls.server_name, sock)
                    .context("tls handshake with peer")?;
                Transport::tls(stream)
            }
            None => Transport::plain(sock).context("apply socket options")?,
        };
        Ok(match self.config.protocol {
            ProtocolVersion::Http2 => Session::new_client_http2(transport, &self.config.settings),
            ProtocolVersion::Http1 | ProtocolVersion::Http2Try => {
                Session::new_client_http1(transport)
            }
        })
    }

    /// Picks the next active session in round-robin order and submits a
    /// request to it, rotating a session out for reconnect if it has
    /// carried `req_thr_for_reconn` requests and enough other sessions
    /// remain active to absorb load (§5 "`h2_peer_send_request`").
    ///
    /// Returns the chosen session's key and the new stream's key, or
    /// `None` if no active session is available.
    pub fn send_request(
        &mut self,
        sessions: &mut Slab<Session>,
        message: crate::message::Message11,
        body: Vec<u8>,
    ) -> Option<(SessionKey, crate::stream::StreamKey)> {
        if self.terminated != 0 || self.slots.is_empty() {
            return None;
        }
        let n = self.slots.len();
        // Fixed base for this call: every candidate index and the final
        // cursor update derive from this one snapshot, never from the live
        // field, so a mid-scan rotate-out can't shift the base later
        // iterations compute from.
        let nsi = self.next_sess_idx;
        let mut chosen = None;
        let mut last_i = 0;
        for i in 0..n {
            last_i = i;
            let idx = (nsi + i) % n;
            if !self.slots[idx].active {
                continue;
            }
            let Some(session_key) = self.slots[idx].session else {
                continue;
            };
            let Some(session) = sessions.get_mut(session_key) else {
                continue;
            };
            if session.req_cnt() >= self.config.req_thr_for_reconn
                && self.config.req_thr_for_reconn > 0
                && self.act_sess_num >= self.config.sess_num
            {
                // rotate this one out; keep scanning for one to actually use.
                session.terminate(true);
                self.slots[idx].active = false;
                self.act_sess_num = self.act_sess_num.saturating_sub(1);
                continue;
            }
            chosen = Some((idx, session_key));
            break;
        }
        self.next_sess_idx = (nsi + last_i + 1) % n;

        let (_, session_key) = chosen?;
        let session = sessions.get_mut(session_key)?;
        let stream_key = session.submit(message, body, None)?;
        self.req_cnt += 1;
        Some((session_key, stream_key))
    }

    /// Called by [`crate::Context`] when one of this peer's sessions has
    /// been reaped: folds its lifetime counters into the peer total,
    /// frees the slot, and reconnects in its place unless the peer itself
    /// is terminated or the service is shutting down (§5
    /// `peer_sess_free_cb`).
    pub fn on_session_freed(
        &mut self,
        sessions: &mut Slab<Session>,
        peer_key: PeerKey,
        session_key: SessionKey,
        counters: SessionCounters,
        service_live: bool,
    ) {
        self.req_cnt += counters.req_cnt;
        self.rsp_cnt += counters.rsp_cnt;
        self.rsp_rst_cnt += counters.rsp_rst_cnt;
        self.strm_close_cnt += counters.strm_close_cnt;

        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.session == Some(session_key))
        {
            if slot.active {
                self.act_sess_num = self.act_sess_num.saturating_sub(1);
            }
            slot.session = None;
            slot.active = false;
        }

        if self.terminated == 0 && service_live {
            match self.connect_one() {
                Ok(mut session) => {
                    session.set_peer_key(peer_key);
                    let key = sessions.insert(session);
                    if let Some(slot) = self.slots.iter_mut().find(|s| s.session.is_none()) {
                        slot.session = Some(key);
                        slot.active = true;
                        self.act_sess_num += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "peer reconnect after session free failed");
                }
            }
        }
    }

    /// Deactivates every slot and terminates every still-live session,
    /// regardless of any individual failure (§5 `h2_peer_terminate`).
    pub fn terminate(&mut self, sessions: &mut Slab<Session>, wait_rsp: bool) {
        self.terminated = if wait_rsp { 2 } else { 1 };
        for slot in &mut self.slots {
            slot.active = false;
            if let Some(key) = slot.session
                && let Some(session) = sessions.get_mut(key)
            {
                session.terminate(wait_rsp);
            }
        }
        self.act_sess_num = 0;
    }

    #[must_use]
    pub fn role(&self) -> SessionRole {
        SessionRole::Client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn test_config(sess_num: usize, req_thr: u64) -> PeerConfig {
        PeerConfig {
            authority: "127.0.0.1:1".parse().unwrap(),
            protocol: ProtocolVersion::Http1,
            tls: None,
            settings: Http2Settings::default(),
            sess_num,
            req_thr_for_reconn: req_thr,
        }
    }

    fn loopback_session() -> Session {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let _ = listener.accept().unwrap();
        Session::new_client_http1(Transport::plain(client).unwrap())
    }

    #[test]
    fn single_session_forces_reconn_threshold_to_zero() {
        let peer = Peer::new(test_config(1, 5));
        assert_eq!(peer.config.req_thr_for_reconn, 0);
        assert_eq!(peer.slots.len(), 1);
    }

    #[test]
    fn connect_fails_when_every_attempt_fails() {
        let mut sessions = Slab::new();
        let mut peer = Peer::new(test_config(2, 0));
        // port 1 is reserved and will refuse/fail to connect in virtually
        // every sandboxed test environment.
        let result = peer.connect(&mut sessions, 0);
        assert!(result.is_err());
        assert_eq!(peer.active_session_count(), 0);
    }

    #[test]
    fn round_robin_visits_every_slot_once_per_full_rotation() {
        let mut sessions = Slab::new();
        let mut peer = Peer::new(test_config(3, 0));
        for slot in &mut peer.slots {
            let key = sessions.insert(loopback_session());
            slot.session = Some(key);
            slot.active = true;
        }
        peer.act_sess_num = 3;

        let mut picked = Vec::new();
        for _ in 0..6 {
            let (session_key, _) = peer
                .send_request(&mut sessions, crate::message::Message11::new_request(), Vec::new())
                .unwrap();
            let idx = peer
                .slots
                .iter()
                .position(|s| s.session == Some(session_key))
                .unwrap();
            picked.push(idx);
        }
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn round_robin_does_not_skip_a_slot_after_a_mid_scan_rotation() {
        let mut sessions = Slab::new();
        let mut peer = Peer::new(test_config(3, 1));
        for slot in &mut peer.slots {
            let key = sessions.insert(loopback_session());
            slot.session = Some(key);
            slot.active = true;
        }
        peer.act_sess_num = 3;

        let mut picked = Vec::new();
        for _ in 0..4 {
            let (session_key, _) = peer
                .send_request(&mut sessions, crate::message::Message11::new_request(), Vec::new())
                .unwrap();
            let idx = peer
                .slots
                .iter()
                .position(|s| s.session == Some(session_key))
                .unwrap();
            picked.push(idx);
        }
        // the first full rotation visits each slot once in order; the 4th
        // call rotates slot 0 out (it just hit the threshold) and must
        // land on slot 1 next, not skip straight to slot 2.
        assert_eq!(picked, vec![0, 1, 2, 1]);
    }
}
