//! Per-request/response state (§3).
//!
//! Streams live in a [`slab::Slab`] owned by [`crate::Session`]; `StreamKey`
//! is the stable index into that slab. List order (submission order, which
//! doubles as HTTP/1.1 pipelining order) is tracked separately by the
//! session as a `VecDeque<StreamKey>`, per `SPEC_FULL.md` §3's
//! representation note — slab iteration order is not load-bearing.

use crate::message::Message11;

/// Stable handle to a [`Stream`] inside a [`crate::Session`]'s slab.
pub type StreamKey = usize;

/// User-supplied per-stream teardown hook, given the stream's user data.
pub type StreamFreeFn = Box<dyn FnOnce(Box<dyn std::any::Any>)>;

/// One request/response pair within a session (HTTP/2), or one item in the
/// pipelined queue (HTTP/1.1).
pub struct Stream {
    /// HTTP/2 stream id, or `2 * req_cnt + 1` for server-side HTTP/1.1
    /// pseudo-streams (§3).
    pub id: u32,
    /// Inbound message: the request (server) or response (client) as parsed
    /// or received so far.
    pub message: Option<Message11>,
    /// Outbound body bytes staged for `WriteBuffer` to drain, plus how much
    /// of it has already been handed off.
    send_body: Vec<u8>,
    send_body_used: usize,
    /// HTTP/1.1 server: whether the response has been set and is eligible
    /// to be drained by the write pipeline (§4.1).
    pub response_set: bool,
    user_data: Option<Box<dyn std::any::Any>>,
    free_fn: Option<StreamFreeFn>,
}

impl Stream {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            message: None,
            send_body: Vec::new(),
            send_body_used: 0,
            response_set: false,
            user_data: None,
            free_fn: None,
        }
    }

    pub fn set_user_data(&mut self, data: Box<dyn std::any::Any>, free_fn: StreamFreeFn) {
        self.user_data = Some(data);
        self.free_fn = Some(free_fn);
    }

    #[must_use]
    pub fn user_data(&self) -> Option<&dyn std::any::Any> {
        self.user_data.as_deref()
    }

    /// Stages `body` for sending; replaces any previous unsent body.
    pub fn set_send_body(&mut self, body: Vec<u8>) {
        self.send_body = body;
        self.send_body_used = 0;
    }

    /// The unsent suffix of the outbound body buffer.
    #[must_use]
    pub fn send_remaining(&self) -> &[u8] {
        &self.send_body[self.send_body_used..]
    }

    /// Marks `n` bytes of the outbound body as handed off to the write
    /// pipeline.
    pub fn advance_send(&mut self, n: usize) {
        self.send_body_used = (self.send_body_used + n).min(self.send_body.len());
    }

    /// Whether every staged outbound byte has been handed off.
    #[must_use]
    pub fn send_drained(&self) -> bool {
        self.send_body_used >= self.send_body.len()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let (Some(free_fn), Some(data)) = (self.free_fn.take(), self.user_data.take()) {
            free_fn(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_body_cursor_advances_and_reports_drained() {
        let mut s = Stream::new(1);
        s.set_send_body(b"hello".to_vec());
        assert!(!s.send_drained());
        assert_eq!(s.send_remaining(), b"hello");
        s.advance_send(3);
        assert_eq!(s.send_remaining(), b"lo");
        s.advance_send(10);
        assert!(s.send_drained());
        assert_eq!(s.send_remaining(), b"");
    }

    #[test]
    fn free_fn_runs_on_drop() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let freed = Rc::new(RefCell::new(false));
        let freed2 = freed.clone();
        let mut s = Stream::new(3);
        s.set_user_data(
            Box::new(42i32),
            Box::new(move |_| {
                *freed2.borrow_mut() = true;
            }),
        );
        drop(s);
        assert!(*freed.borrow());
    }
}
