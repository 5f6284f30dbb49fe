//! Owns every [`Listener`], [`Session`], and [`Peer`] driven by one
//! [`crate::EventLoop`] (§3, §5).
//!
//! A `Context` is the `h2_ctx` of the original: the single place that knows
//! about every live connection on this thread. It holds no readiness-backend
//! state itself — that belongs to [`crate::EventLoop`], which borrows a
//! `Context` for the duration of `run`.

use slab::Slab;

use crate::listener::{Listener, ListenerConfig};
use crate::peer::{Peer, PeerConfig, PeerKey, SessionKey};
use crate::session::Session;

/// Stable handle to a [`Listener`] inside a [`Context`]'s slab.
pub type ListenerKey = usize;

/// Default protocol and verbosity applied when a component's own config
/// doesn't override them (§5, §6).
pub struct ContextConfig {
    pub verbose: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { verbose: false }
    }
}

/// Everything one [`crate::EventLoop`] thread drives (§3).
pub struct Context {
    config: ContextConfig,
    listeners: Slab<Listener>,
    sessions: Slab<Session>,
    peers: Slab<Peer>,
    /// Mirrors `h2_ctx.service_flag`: cleared by [`Self::stop`], checked by
    /// the event loop at the top of every iteration.
    service_flag: bool,
}

impl Context {
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            listeners: Slab::new(),
            sessions: Slab::new(),
            peers: Slab::new(),
            service_flag: true,
        }
    }

    #[must_use]
    pub fn verbose(&self) -> bool {
        self.config.verbose
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.service_flag
    }

    /// Requests that [`crate::EventLoop::run`] stop after its current
    /// iteration (§5 "service_flag").
    pub fn stop(&mut self) {
        self.service_flag = false;
    }

    pub fn add_listener(&mut self, config: ListenerConfig) -> Result<ListenerKey, rama_error::BoxError> {
        let listener = Listener::bind(config)?;
        Ok(self.listeners.insert(listener))
    }

    pub fn add_peer(&mut self, config: PeerConfig) -> PeerKey {
        let key = self.peers.vacant_key();
        let mut peer = Peer::new(config);
        // connect() needs the key up front so fresh sessions can record
        // their owning peer; failure to connect at all is surfaced to the
        // caller, same as `h2_peer_connect`'s own fallibility.
        let _ = peer.connect(&mut self.sessions, key);
        self.peers.insert(peer);
        key
    }

    #[must_use]
    pub fn listeners(&self) -> &Slab<Listener> {
        &self.listeners
    }

    pub fn listeners_mut(&mut self) -> &mut Slab<Listener> {
        &mut self.listeners
    }

    #[must_use]
    pub fn sessions(&self) -> &Slab<Session> {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut Slab<Session> {
        &mut self.sessions
    }

    #[must_use]
    pub fn peers(&self) -> &Slab<Peer> {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut Slab<Peer> {
        &mut self.peers
    }

    pub fn insert_session(&mut self, session: Session) -> SessionKey {
        self.sessions.insert(session)
    }

    /// Removes a session from the slab and, if it belonged to a [`Peer`],
    /// folds its counters back and lets the peer decide whether to
    /// reconnect (§5 `peer_sess_free_cb`).
    pub fn reap_session(&mut self, key: SessionKey) {
        let Some(session) = self.sessions.try_remove(key) else {
            return;
        };
        if let Some(peer_key) = session.peer_key()
            && let Some(peer) = self.peers.get_mut(peer_key)
        {
            let counters = session.counters();
            peer.on_session_freed(&mut self.sessions, peer_key, key, counters, self.service_flag);
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_has_no_work_and_is_running() {
        let ctx = Context::new(ContextConfig::default());
        assert!(ctx.is_running());
        assert_eq!(ctx.session_count(), 0);
        assert_eq!(ctx.listener_count(), 0);
    }

    #[test]
    fn stop_clears_running_flag() {
        let mut ctx = Context::new(ContextConfig::default());
        ctx.stop();
        assert!(!ctx.is_running());
    }
}
