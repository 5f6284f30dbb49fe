//! The HTTP/1.1 message type produced by [`crate::MessageParser11`].
//!
//! `spec.md` §1 scopes the richer request/response message type (the thing
//! with a full [`http`] body abstraction) out of this crate's core — only
//! its constructors and accessors are used. `Message11` is that minimal
//! surface: header storage plus the handful of fields the parser fills in
//! as it goes, close to `h2_msg` in the original.

use smol_str::SmolStr;

/// Whether a [`Message11`] is an outbound/inbound request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// One HTTP/1.1 request or response, as accumulated by the incremental
/// parser or constructed by the application for sending.
#[derive(Debug, Clone, Default)]
pub struct Message11 {
    kind: Option<MessageKind>,
    method: SmolStr,
    path: SmolStr,
    scheme: SmolStr,
    authority: SmolStr,
    status: u16,
    headers: Vec<(SmolStr, SmolStr)>,
    body: Vec<u8>,
}

impl Message11 {
    /// An empty request, ready to be filled in by the parser or by a caller
    /// building a request to send.
    #[must_use]
    pub fn new_request() -> Self {
        Self {
            kind: Some(MessageKind::Request),
            ..Default::default()
        }
    }

    /// An empty response, ready to be filled in by the parser or by a caller
    /// building a response to send.
    #[must_use]
    pub fn new_response() -> Self {
        Self {
            kind: Some(MessageKind::Response),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        self.kind
    }

    pub fn set_method(&mut self, method: impl Into<SmolStr>) {
        self.method = method.into();
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_path(&mut self, path: impl Into<SmolStr>) {
        self.path = path.into();
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_scheme(&mut self, scheme: impl Into<SmolStr>) {
        self.scheme = scheme.into();
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_authority(&mut self, authority: impl Into<SmolStr>) {
        self.authority = authority.into();
    }

    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Appends a header. Reserved headers (`host`, `content-length`) are
    /// consumed separately by the parser and never land here.
    pub fn add_header(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.headers.push((name.into(), value.into()));
    }

    #[must_use]
    pub fn headers(&self) -> &[(SmolStr, SmolStr)] {
        &self.headers
    }

    /// Case-insensitive header lookup; returns the first match.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    pub fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Serializes the request-line, headers, and a `Content-Length` derived
    /// from the current body, as raw HTTP/1.1 wire bytes (§6). The body
    /// itself is *not* appended — callers append it separately so a large
    /// body doesn't have to be copied twice into the head buffer.
    ///
    /// This is the write-side counterpart to `parser::parse_request_line` /
    /// `parse_header_line`: the richer message type with its own wire codec
    /// is out of scope (§1), but something in this crate has to turn a
    /// constructed [`Message11`] into bytes for [`crate::Stream`]'s outbound
    /// buffer, so this minimal inverse of the parser fills that gap.
    #[must_use]
    pub fn encode_request_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.headers.len() * 32);
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");
        if !self.authority.is_empty() {
            out.extend_from_slice(b"Host: ");
            out.extend_from_slice(self.authority.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        encode_headers_and_tail(&self.headers, self.body.len(), &mut out);
        out
    }

    /// Serializes the status-line and headers, same split as
    /// [`Self::encode_request_head`]. Unless the caller already set one, a
    /// `Date:` header is added from [`crate::date::now_rfc1123`], matching
    /// every real HTTP/1.1 server response (RFC 7231 §7.1.1.2).
    #[must_use]
    pub fn encode_response_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + self.headers.len() * 32);
        let mut buf = itoa::Buffer::new();
        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(buf.format(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");
        if self.header("date").is_none() {
            out.extend_from_slice(b"Date: ");
            out.extend_from_slice(crate::date::now_rfc1123().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        encode_headers_and_tail(&self.headers, self.body.len(), &mut out);
        out
    }
}

fn encode_headers_and_tail(headers: &[(SmolStr, SmolStr)], body_len: usize, out: &mut Vec<u8>) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"Content-Length: ");
    let mut buf = itoa::Buffer::new();
    out.extend_from_slice(buf.format(body_len).as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut msg = Message11::new_request();
        msg.add_header("Content-Type", "text/plain");
        assert_eq!(msg.header("content-type"), Some("text/plain"));
        assert_eq!(msg.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(msg.header("missing"), None);
    }

    #[test]
    fn body_accumulates() {
        let mut msg = Message11::new_response();
        msg.append_body(b"hel");
        msg.append_body(b"lo");
        assert_eq!(msg.body(), b"hello");
        assert_eq!(msg.body_len(), 5);
    }

    #[test]
    fn request_head_round_trips_through_the_parser() {
        let mut msg = Message11::new_request();
        msg.set_method("GET");
        msg.set_path("/a");
        msg.set_authority("x:1");
        msg.append_body(b"");
        let head = msg.encode_request_head();
        assert_eq!(head, b"GET /a HTTP/1.1\r\nHost: x:1\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn response_head_includes_content_length_of_current_body() {
        let mut msg = Message11::new_response();
        msg.set_status(200);
        msg.append_body(b"hi");
        let head = msg.encode_response_head();
        let text = String::from_utf8(head).unwrap();
        assert!(text.starts_with("HTTP/1.1 200\r\nDate: "));
        assert!(text.ends_with("\r\nContent-Length: 2\r\n\r\n"));
    }

    #[test]
    fn response_head_skips_date_header_if_already_set() {
        let mut msg = Message11::new_response();
        msg.set_status(200);
        msg.add_header("Date", "Sun, 06 Nov 1994 08:49:37 GMT");
        let head = msg.encode_response_head();
        assert_eq!(
            head,
            b"HTTP/1.1 200\r\nDate: Sun, 06 Nov 1994 08:49:37 GMT\r\nContent-Length: 0\r\n\r\n"
        );
    }
}
