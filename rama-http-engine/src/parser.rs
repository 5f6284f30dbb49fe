//! HTTP/1.1 incremental parser (§4.2).
//!
//! Documented, acknowledged gaps (carried over from the original
//! implementation, see `SPEC_FULL.md` §4.2 and §9): no multi-line header
//! folding, no `Transfer-Encoding: chunked`, no `Connection:` handling.
//! `Content-Length` is parsed leniently (stops at the first non-digit,
//! same as the original's `atoi`), not strictly.

use memchr::memchr;

use crate::accumulator::ReadAccumulator;
use crate::message::Message11;

/// One incremental parser driving a single session's message stream
/// (`NEED_HEADER_FIRST_LINE -> NEED_HEADER_MORE_LINES -> NEED_BODY ->
/// COMPLETE`, restarted after each dispatch).
pub struct MessageParser11 {
    state: State,
    content_length: usize,
    message: Message11,
    /// `Host:` header value, applied to `message`'s authority once the
    /// first line itself has already claimed the scheme.
    host_header: Option<String>,
}

enum State {
    FirstLine,
    Headers,
    Body,
}

/// Result of feeding more bytes to the parser.
pub enum ParseProgress {
    /// More bytes are needed before a message (or the next line) is ready.
    NeedMore,
    /// One full message was parsed and dispatched from the accumulator.
    Complete(Message11),
}

/// Malformed first line or header line (§8 "Parser resilience").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError;

impl MessageParser11 {
    #[must_use]
    pub fn new(is_server: bool) -> Self {
        Self {
            state: State::FirstLine,
            content_length: 0,
            message: if is_server {
                Message11::new_request()
            } else {
                Message11::new_response()
            },
            host_header: None,
        }
    }

    /// Resets the parser to begin a fresh message, reusing no state from the
    /// previous one. Called after every dispatch.
    pub fn reset(&mut self, is_server: bool) {
        self.state = State::FirstLine;
        self.content_length = 0;
        self.host_header = None;
        self.message = if is_server {
            Message11::new_request()
        } else {
            Message11::new_response()
        };
    }

    /// Attempts to advance parsing using the unparsed tail of `acc`,
    /// consuming bytes from it as it goes (§4.2 "accumulator policy": the
    /// parser must not start a new message until the previous one is fully
    /// dispatched, and it only consumes as far as it can validate).
    ///
    /// `is_server` selects request-line vs. status-line parsing for the
    /// first line; `tls_active` picks `https`/`http` for server requests.
    pub fn advance(
        &mut self,
        acc: &mut ReadAccumulator,
        is_server: bool,
        tls_active: bool,
    ) -> Result<ParseProgress, ParseError> {
        loop {
            match self.state {
                State::FirstLine => match take_line(acc) {
                    None => return Ok(ParseProgress::NeedMore),
                    Some(line) => {
                        if is_server {
                            parse_request_line(&line, &mut self.message, tls_active)?;
                        } else {
                            parse_status_line(&line, &mut self.message)?;
                        }
                        self.state = State::Headers;
                    }
                },
                State::Headers => match take_line(acc) {
                    None => return Ok(ParseProgress::NeedMore),
                    Some(line) => {
                        if line.is_empty() {
                            self.state = State::Body;
                            if is_server {
                                if let Some(host) = self.host_header.take() {
                                    self.message.set_authority(host);
                                }
                            }
                        } else {
                            parse_header_line(&line, is_server, &mut self.message, &mut self.content_length, &mut self.host_header)?;
                        }
                    }
                },
                State::Body => {
                    if self.content_length > 0 && self.message.body_len() == 0 {
                        if acc.unparsed().len() < self.content_length {
                            return Ok(ParseProgress::NeedMore);
                        }
                        let body = acc.unparsed()[..self.content_length].to_vec();
                        acc.advance(self.content_length);
                        self.message.set_body(body);
                    }
                    if self.message.body_len() == self.content_length {
                        let finished = std::mem::replace(
                            &mut self.message,
                            if is_server {
                                Message11::new_request()
                            } else {
                                Message11::new_response()
                            },
                        );
                        self.state = State::FirstLine;
                        self.content_length = 0;
                        self.host_header = None;
                        return Ok(ParseProgress::Complete(finished));
                    }
                    return Ok(ParseProgress::NeedMore);
                }
            }
        }
    }
}

/// Pulls one LF-delimited line (trailing CR dropped) from the accumulator's
/// unparsed tail, advancing its `used` cursor past it. Returns `None` if no
/// full line is available yet.
fn take_line(acc: &mut ReadAccumulator) -> Option<Vec<u8>> {
    let unparsed = acc.unparsed();
    let nl = memchr(b'\n', unparsed)?;
    let mut end = nl;
    if end > 0 && unparsed[end - 1] == b'\r' {
        end -= 1;
    }
    let line = unparsed[..end].to_vec();
    acc.advance(nl + 1);
    Some(line)
}

fn parse_request_line(line: &[u8], msg: &mut Message11, tls_active: bool) -> Result<(), ParseError> {
    const SUFFIX: &[u8] = b"HTTP/1.1";
    if line.len() < SUFFIX.len() || !line[line.len() - SUFFIX.len()..].eq_ignore_ascii_case(SUFFIX) {
        return Err(ParseError);
    }
    let mut rest = &line[..line.len() - SUFFIX.len()];
    while matches!(rest.last(), Some(b' ' | b'\t')) {
        rest = &rest[..rest.len() - 1];
    }
    let method_end = rest
        .iter()
        .position(|&b| b == b' ' || b == b'\t')
        .ok_or(ParseError)?;
    let method = &rest[..method_end];
    if method.is_empty() {
        return Err(ParseError);
    }
    let mut path_start = method_end;
    while matches!(rest.get(path_start), Some(b' ' | b'\t')) {
        path_start += 1;
    }
    let path = &rest[path_start..];
    if path.is_empty() {
        return Err(ParseError);
    }
    msg.set_method(String::from_utf8_lossy(method).into_owned());
    msg.set_path(String::from_utf8_lossy(path).into_owned());
    msg.set_scheme(if tls_active { "https" } else { "http" });
    Ok(())
}

fn parse_status_line(line: &[u8], msg: &mut Message11) -> Result<(), ParseError> {
    if line.len() < 3 {
        return Err(ParseError);
    }
    let d = &line[..3];
    if !(b'1'..=b'5').contains(&d[0]) || !d[1].is_ascii_digit() || !d[2].is_ascii_digit() {
        return Err(ParseError);
    }
    if line.len() > 3 && line[3] != b' ' && line[3] != b'\t' {
        return Err(ParseError);
    }
    let status = u16::from(d[0] - b'0') * 100 + u16::from(d[1] - b'0') * 10 + u16::from(d[2] - b'0');
    msg.set_status(status);
    Ok(())
}

fn parse_header_line(
    line: &[u8],
    is_server: bool,
    msg: &mut Message11,
    content_length: &mut usize,
    host_header: &mut Option<String>,
) -> Result<(), ParseError> {
    let colon = memchr(b':', line).ok_or(ParseError)?;
    let name = &line[..colon];
    let mut value = &line[colon + 1..];
    while matches!(value.first(), Some(b' ' | b'\t')) {
        value = &value[1..];
    }
    while matches!(value.last(), Some(b' ' | b'\t')) {
        value = &value[..value.len() - 1];
    }
    let value = String::from_utf8_lossy(value).into_owned();

    if is_server && name.eq_ignore_ascii_case(b"host") {
        *host_header = Some(value);
    } else if name.eq_ignore_ascii_case(b"content-length") {
        // Lenient: stop at first non-digit, no error on garbage (the
        // original's `atoi`; acknowledged gap, see module docs).
        *content_length = value
            .bytes()
            .take_while(u8::is_ascii_digit)
            .fold(0usize, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as usize));
    } else {
        let name = String::from_utf8_lossy(name).into_owned();
        msg.add_header(name, value);
    }
    Ok(())
}
