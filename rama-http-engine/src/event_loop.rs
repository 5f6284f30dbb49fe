//! The readiness-multiplexed loop that drives a [`Context`]'s listeners,
//! sessions, and peers to completion (§3, §5).
//!
//! Mirrors `h2_ctx_run`: on Linux an edge-triggered `epoll` backend is used,
//! elsewhere a level-triggered `poll` backend. Both implement
//! [`ReadinessBackend`] so the dispatch loop itself is backend-agnostic.
//! Every iteration follows the same order the original hard-codes for both
//! of its own backends: accept pending connections, `recv` each readable
//! session (reaping it on negative progress), *always* attempt a `send`
//! afterwards regardless of which readiness bit actually fired (the
//! original's `EPOLLOUT || EPOLLIN` / `POLLOUT || POLLIN` guard is
//! unconditionally true — §9), then reap on error/hangup.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use crate::context::Context;
use crate::EVENT_LOOP_WAIT_MS;

/// Identifies what a registered fd belongs to, packed into the backend's
/// opaque per-registration tag (`epoll_event.u64`, or carried alongside a
/// `pollfd` entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Listener(usize),
    Session(usize),
}

impl Token {
    const SESSION_BIT: u64 = 1 << 63;

    fn encode(self) -> u64 {
        match self {
            Token::Listener(key) => key as u64,
            Token::Session(key) => Self::SESSION_BIT | key as u64,
        }
    }

    fn decode(raw: u64) -> Self {
        if raw & Self::SESSION_BIT != 0 {
            Token::Session((raw & !Self::SESSION_BIT) as usize)
        } else {
            Token::Listener(raw as usize)
        }
    }
}

/// One fd's readiness as reported by a [`ReadinessBackend`] wait.
struct ReadyEvent {
    token: Token,
    readable: bool,
    writable: bool,
    error: bool,
    hup: bool,
    rdhup: bool,
}

/// A readiness-notification mechanism: `epoll` on Linux, `poll` elsewhere
/// (§5 "EPOLL_MODE").
trait ReadinessBackend {
    fn add(&mut self, fd: RawFd, token: Token, read: bool, write: bool) -> io::Result<()>;
    fn modify(&mut self, fd: RawFd, token: Token, read: bool, write: bool) -> io::Result<()>;
    fn remove(&mut self, fd: RawFd) -> io::Result<()>;
    fn wait(&mut self, timeout_ms: i32) -> io::Result<Vec<ReadyEvent>>;
}

#[cfg(target_os = "linux")]
mod epoll_backend {
    use super::{ReadinessBackend, ReadyEvent, Token};
    use std::io;
    use std::os::fd::RawFd;

    /// Edge-triggered `epoll` backend (§5).
    pub(super) struct EpollBackend {
        epfd: RawFd,
    }

    impl EpollBackend {
        pub(super) fn new() -> io::Result<Self> {
            let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if epfd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { epfd })
        }

        fn events_for(read: bool, write: bool) -> u32 {
            let mut bits = libc::EPOLLET as u32;
            if read {
                bits |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
            }
            if write {
                bits |= libc::EPOLLOUT as u32;
            }
            bits
        }

        fn ctl(&mut self, op: i32, fd: RawFd, token: Token, read: bool, write: bool) -> io::Result<()> {
            let mut ev = libc::epoll_event {
                events: Self::events_for(read, write),
                u64: token.encode(),
            };
            let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    impl ReadinessBackend for EpollBackend {
        fn add(&mut self, fd: RawFd, token: Token, read: bool, write: bool) -> io::Result<()> {
            self.ctl(libc::EPOLL_CTL_ADD, fd, token, read, write)
        }

        fn modify(&mut self, fd: RawFd, token: Token, read: bool, write: bool) -> io::Result<()> {
            self.ctl(libc::EPOLL_CTL_MOD, fd, token, read, write)
        }

        fn remove(&mut self, fd: RawFd) -> io::Result<()> {
            let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                // the fd may already be gone (closed before we got to
                // unregister it); that's not a failure worth surfacing.
                if err.raw_os_error() == Some(libc::ENOENT) || err.raw_os_error() == Some(libc::EBADF) {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }

        fn wait(&mut self, timeout_ms: i32) -> io::Result<Vec<ReadyEvent>> {
            let mut raw = [libc::epoll_event { events: 0, u64: 0 }; 256];
            let n = unsafe { libc::epoll_wait(self.epfd, raw.as_mut_ptr(), raw.len() as i32, timeout_ms) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(Vec::new());
                }
                return Err(err);
            }
            let mut out = Vec::with_capacity(n as usize);
            for ev in &raw[..n as usize] {
                let bits = ev.events as i32;
                out.push(ReadyEvent {
                    token: Token::decode(ev.u64),
                    readable: bits & libc::EPOLLIN != 0,
                    writable: bits & libc::EPOLLOUT != 0,
                    error: bits & libc::EPOLLERR != 0,
                    hup: bits & libc::EPOLLHUP != 0,
                    rdhup: bits & libc::EPOLLRDHUP != 0,
                });
            }
            Ok(out)
        }
    }

    impl Drop for EpollBackend {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.epfd);
            }
        }
    }
}

/// Level-triggered, portable `poll` backend (§5 "not EPOLL_MODE").
///
/// Unlike `epoll`, `poll` has no persistent kernel-side registration: every
/// `wait` rebuilds the full `pollfd` array from whatever was last
/// `add`/`modify`d. `POLLRDHUP` isn't part of the call's own portable event
/// set (it's a Linux-only addition even to `poll`), so a peer half-close is
/// only ever observed here as a plain readable-then-EOF on the next `recv`.
struct PollBackend {
    fds: Vec<(RawFd, Token, bool, bool)>,
}

impl PollBackend {
    fn new() -> Self {
        Self { fds: Vec::new() }
    }
}

impl ReadinessBackend for PollBackend {
    fn add(&mut self, fd: RawFd, token: Token, read: bool, write: bool) -> io::Result<()> {
        self.fds.retain(|(existing, ..)| *existing != fd);
        self.fds.push((fd, token, read, write));
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, token: Token, read: bool, write: bool) -> io::Result<()> {
        self.add(fd, token, read, write)
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.fds.retain(|(existing, ..)| *existing != fd);
        Ok(())
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<Vec<ReadyEvent>> {
        let mut pollfds: Vec<libc::pollfd> = self
            .fds
            .iter()
            .map(|(fd, _, read, write)| {
                let mut events: i16 = 0;
                if *read {
                    events |= libc::POLLIN as i16;
                }
                if *write {
                    events |= libc::POLLOUT as i16;
                }
                libc::pollfd { fd: *fd, events, revents: 0 }
            })
            .collect();

        if pollfds.is_empty() {
            return Ok(Vec::new());
        }

        let n = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut out = Vec::new();
        for (pfd, (_, token, ..)) in pollfds.iter().zip(self.fds.iter()) {
            if pfd.revents == 0 {
                continue;
            }
            let revents = pfd.revents as i32;
            out.push(ReadyEvent {
                token: *token,
                readable: revents & libc::POLLIN != 0,
                writable: revents & libc::POLLOUT != 0,
                error: revents & libc::POLLERR != 0,
                hup: revents & (libc::POLLHUP | libc::POLLNVAL) != 0,
                rdhup: false,
            });
        }
        Ok(out)
    }
}

/// Drives one [`Context`] to completion on the current thread (§3, §5).
pub struct EventLoop {
    backend: Box<dyn ReadinessBackend>,
    /// Last (read, write) interest registered for each fd, so the loop only
    /// calls `modify` when interest actually changed.
    registered: HashMap<RawFd, (bool, bool)>,
}

impl EventLoop {
    /// Picks `epoll` on Linux, `poll` everywhere else.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            backend: Self::select_backend()?,
            registered: HashMap::new(),
        })
    }

    #[cfg(target_os = "linux")]
    fn select_backend() -> io::Result<Box<dyn ReadinessBackend>> {
        Ok(Box::new(epoll_backend::EpollBackend::new()?))
    }

    #[cfg(not(target_os = "linux"))]
    fn select_backend() -> io::Result<Box<dyn ReadinessBackend>> {
        Ok(Box::new(PollBackend::new()))
    }

    /// Runs until `ctx.stop()` is called or there is nothing left to
    /// service (no listeners and no sessions registered for any interest).
    pub fn run(&mut self, ctx: &mut Context) -> io::Result<()> {
        while ctx.is_running() {
            self.register_listeners(ctx)?;
            self.sync_sessions(ctx)?;

            if self.registered.is_empty() {
                break;
            }

            let events = self.backend.wait(EVENT_LOOP_WAIT_MS)?;
            for event in events {
                match event.token {
                    Token::Listener(key) => self.service_listener(ctx, key, &event),
                    Token::Session(key) => self.service_session(ctx, key, &event),
                }
            }
        }
        Ok(())
    }

    fn register_listeners(&mut self, ctx: &Context) -> io::Result<()> {
        for (key, listener) in ctx.listeners().iter() {
            let fd = listener.as_raw_fd();
            if !self.registered.contains_key(&fd) {
                self.backend.add(fd, Token::Listener(key), true, false)?;
                self.registered.insert(fd, (true, false));
            }
        }
        Ok(())
    }

    /// Recomputes read/write interest for every live session, registering
    /// new ones and updating changed ones. A session whose interest mask is
    /// already empty is reaped immediately as `http-end`, mirroring the
    /// original's poll-mode pre-wait check: such a session is never even
    /// added to this tick's wait set (§4.7).
    fn sync_sessions(&mut self, ctx: &mut Context) -> io::Result<()> {
        let keys: Vec<usize> = ctx.sessions().iter().map(|(key, _)| key).collect();
        let mut to_reap = Vec::new();

        for key in keys {
            let Some(session) = ctx.sessions_mut().get_mut(key) else {
                continue;
            };
            if session.close_reason().is_some() {
                to_reap.push(key);
                continue;
            }
            if session.is_http1_exhausted() {
                session.close_as_http_end();
                to_reap.push(key);
                continue;
            }
            let want_read = session.wants_read();
            let want_write = session.wants_write();
            if !want_read && !want_write {
                session.close_as_http_end();
                to_reap.push(key);
                continue;
            }

            let fd = session.as_raw_fd();
            match self.registered.get(&fd).copied() {
                Some(prev) if prev == (want_read, want_write) => {}
                Some(_) => {
                    self.backend.modify(fd, Token::Session(key), want_read, want_write)?;
                    self.registered.insert(fd, (want_read, want_write));
                }
                None => {
                    self.backend.add(fd, Token::Session(key), want_read, want_write)?;
                    self.registered.insert(fd, (want_read, want_write));
                }
            }
        }

        for key in to_reap {
            self.unregister_and_reap(ctx, key);
        }
        Ok(())
    }

    fn service_listener(&mut self, ctx: &mut Context, key: usize, event: &ReadyEvent) {
        if !event.readable {
            return;
        }
        let Some(listener) = ctx.listeners_mut().get_mut(key) else {
            return;
        };
        for session in listener.accept_ready() {
            ctx.insert_session(session);
        }
    }

    /// `recv` on readability, then — regardless of which bit actually fired
    /// — attempt a `send`. The original's own guard here
    /// (`EPOLLOUT || EPOLLIN` / `POLLOUT || POLLIN`) is unconditionally
    /// true, so every tick that woke the session up at all gets a send
    /// attempt (§9).
    fn service_session(&mut self, ctx: &mut Context, key: usize, event: &ReadyEvent) {
        let mut reap = false;
        {
            let Some(session) = ctx.sessions_mut().get_mut(key) else {
                return;
            };
            if event.readable && session.recv() < 0 {
                reap = true;
            }
            if !reap && (event.readable || event.writable) && session.send() < 0 {
                reap = true;
            }
            if !reap && (event.error || event.hup || event.rdhup) {
                reap = true;
            }
        }
        if reap {
            self.unregister_and_reap(ctx, key);
        }
    }

    fn unregister_and_reap(&mut self, ctx: &mut Context, key: usize) {
        if let Some(session) = ctx.sessions().get(key) {
            let fd = session.as_raw_fd();
            let _ = self.backend.remove(fd);
            self.registered.remove(&fd);
        }
        ctx.reap_session(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::transport::Transport;

    #[test]
    fn token_encode_decode_roundtrips() {
        assert_eq!(Token::decode(Token::Listener(7).encode()), Token::Listener(7));
        assert_eq!(Token::decode(Token::Session(42).encode()), Token::Session(42));
        assert_eq!(Token::decode(Token::Session(0).encode()), Token::Session(0));
    }

    #[test]
    fn event_loop_with_no_registered_work_returns_immediately() {
        let mut ctx = Context::new(ContextConfig::default());
        let mut event_loop = EventLoop::new().unwrap();
        event_loop.run(&mut ctx).unwrap();
        assert_eq!(ctx.session_count(), 0);
    }

    #[test]
    fn sync_sessions_reaps_a_session_with_an_assigned_close_reason() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server_sock, _) = listener.accept().unwrap();
        drop(client); // triggers EOF on the next recv

        let mut session = crate::session::Session::new_server_http1(Transport::plain(server_sock).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(session.recv() < 0);
        assert!(session.close_reason().is_some());

        let mut ctx = Context::new(ContextConfig::default());
        ctx.insert_session(session);
        assert_eq!(ctx.session_count(), 1);

        let mut event_loop = EventLoop::new().unwrap();
        event_loop.sync_sessions(&mut ctx).unwrap();
        assert_eq!(ctx.session_count(), 0);
    }
}
