//! The two-tier send pipeline: a fixed coalesce buffer plus a deferred
//! borrowed slice for chunks too large to coalesce (§4.1).
//!
//! The borrow-stability contract ("once a chunk doesn't fit, the next
//! transport write must consume from the exact same bytes") is upheld
//! without storing a raw pointer: [`WriteBuffer`] only remembers *how many*
//! bytes are outstanding in the deferred tier. The bytes themselves are
//! re-fetched from the live [`SendSource`] on every retry via
//! [`SendSource::peek`], which is contractually required to keep returning
//! the same unconsumed bytes until [`SendSource::consume`] reports progress.
//! This is the safe-Rust realization of the `DeferredSlice { origin, offset,
//! len }` strategy from `spec.md` §9: the "origin" is simply "whichever
//! source is passed to this call", since a session only ever drains one
//! source at a time.

use std::io::{self, Write};

use crate::H2_WR_BUF_SIZE;

/// A chunk of bytes offered by a [`SendSource`].
pub enum SendChunk<'a> {
    /// The source has nothing ready to send right now.
    None,
    /// Small enough to copy into the coalesce buffer and forget immediately.
    Coalescable(&'a [u8]),
    /// Too large (or otherwise unsuitable) to coalesce. Must be handed back
    /// byte-identical on every call until fully consumed.
    Deferred(DeferredSlice<'a>),
}

/// A borrowed byte range awaiting transport, too large for the coalesce
/// buffer. See the module docs for how its "borrowed pointer" semantics are
/// made safe.
pub struct DeferredSlice<'a>(&'a [u8]);

impl<'a> DeferredSlice<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0
    }
}

/// One producer of outbound bytes for a [`crate::Session`]: either the HTTP/2
/// codec bridge or the HTTP/1.1 per-stream body walk (§4.1).
pub trait SendSource {
    /// Returns the next chunk of bytes ready to send. Must return the exact
    /// same unconsumed bytes on repeated calls until [`Self::consume`]
    /// reports some of them sent.
    fn peek(&mut self) -> SendChunk<'_>;

    /// Reports `n` bytes of the most recently peeked chunk as sent, and
    /// advances the source past them.
    fn consume(&mut self, n: usize);
}

/// Per-session two-tier send staging area (§3, §4.1).
pub struct WriteBuffer {
    merge_data: Box<[u8]>,
    merge_size: usize,
    /// Outstanding byte count in the deferred tier; `0` means nothing
    /// deferred. The bytes themselves live in whichever [`SendSource`] is
    /// passed to [`Self::pump`]/[`Self::flush`].
    deferred_size: usize,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            merge_data: vec![0u8; H2_WR_BUF_SIZE].into_boxed_slice(),
            merge_size: 0,
            deferred_size: 0,
        }
    }

    /// Bytes currently staged in the coalesce buffer.
    #[must_use]
    pub fn merge_size(&self) -> usize {
        self.merge_size
    }

    /// Bytes currently outstanding in the deferred tier.
    #[must_use]
    pub fn deferred_size(&self) -> usize {
        self.deferred_size
    }

    /// Whether both tiers are empty: nothing staged, nothing deferred.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.merge_size == 0 && self.deferred_size == 0
    }

    /// Pulls chunks from `source` into the coalesce buffer until it is full,
    /// the source is empty, or a non-coalescable chunk appears (§4.1 step 1-2).
    ///
    /// Does nothing if a deferred chunk is still outstanding: stream order
    /// must be preserved, so the deferred chunk must drain before pulling
    /// the next one.
    pub fn pump(&mut self, source: &mut dyn SendSource) {
        if self.deferred_size > 0 {
            return;
        }
        loop {
            if self.merge_size >= self.merge_data.len() {
                break;
            }
            match source.peek() {
                SendChunk::None => break,
                SendChunk::Coalescable(bytes) => {
                    let n = bytes.len();
                    if n == 0 {
                        source.consume(0);
                        break;
                    }
                    if self.merge_size + n <= self.merge_data.len() {
                        self.merge_data[self.merge_size..self.merge_size + n].copy_from_slice(bytes);
                        self.merge_size += n;
                        source.consume(n);
                    } else {
                        self.deferred_size = n;
                        break;
                    }
                }
                SendChunk::Deferred(slice) => {
                    self.deferred_size = slice.as_bytes().len();
                    break;
                }
            }
        }
    }

    /// Sends what is staged in two phases: the coalesce buffer, then the
    /// deferred chunk (§4.1). Returns the total bytes actually written to
    /// `w` this call. A `WouldBlock` error is swallowed and reported as a
    /// (possibly zero) partial send; any other error is propagated and the
    /// caller must assign a close-reason.
    pub fn flush(&mut self, source: &mut dyn SendSource, w: &mut dyn Write) -> io::Result<usize> {
        let mut total_sent = 0usize;

        if self.merge_size > 0 {
            match w.write(&self.merge_data[..self.merge_size]) {
                Ok(sent) => {
                    total_sent += sent;
                    if sent < self.merge_size {
                        self.merge_data.copy_within(sent..self.merge_size, 0);
                        self.merge_size -= sent;
                        return Ok(total_sent);
                    }
                    self.merge_size = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total_sent),
                Err(e) => return Err(e),
            }
        }

        if self.deferred_size > 0 {
            let chunk = match source.peek() {
                SendChunk::None => {
                    // source released the bytes without us consuming them;
                    // nothing more we can do this call.
                    self.deferred_size = 0;
                    return Ok(total_sent);
                }
                SendChunk::Coalescable(bytes) | SendChunk::Deferred(DeferredSlice(bytes)) => bytes,
            };
            let take = chunk.len().min(self.deferred_size);
            match w.write(&chunk[..take]) {
                Ok(sent) => {
                    total_sent += sent;
                    source.consume(sent);
                    self.deferred_size -= sent;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total_sent),
                Err(e) => return Err(e),
            }
        }

        Ok(total_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A fake source that yields chunks from a preset list, optionally
    /// returning `WouldBlock`-worthy starvation by going empty mid-stream.
    struct VecSource {
        chunks: VecDeque<Vec<u8>>,
        cur: Option<Vec<u8>>,
        cur_used: usize,
    }

    impl VecSource {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
                cur: None,
                cur_used: 0,
            }
        }
    }

    impl SendSource for VecSource {
        fn peek(&mut self) -> SendChunk<'_> {
            if self.cur.is_none() {
                self.cur = self.chunks.pop_front();
                self.cur_used = 0;
            }
            match &self.cur {
                None => SendChunk::None,
                Some(data) => {
                    let rest = &data[self.cur_used..];
                    if rest.len() <= 64 {
                        SendChunk::Coalescable(rest)
                    } else {
                        SendChunk::Deferred(DeferredSlice::new(rest))
                    }
                }
            }
        }

        fn consume(&mut self, n: usize) {
            self.cur_used += n;
            if let Some(data) = &self.cur
                && self.cur_used >= data.len()
            {
                self.cur = None;
                self.cur_used = 0;
            }
        }
    }

    /// A fake socket that accepts at most `chunk` bytes per write and can be
    /// told to would-block for the next N writes.
    struct ChunkedSink {
        out: Vec<u8>,
        max_write: usize,
        block_next: usize,
    }

    impl Write for ChunkedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.block_next > 0 {
                self.block_next -= 1;
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.max_write);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn small_chunks_coalesce_and_drain_fully() {
        let mut wb = WriteBuffer::new();
        let mut source = VecSource::new(vec![b"GET / HTTP/1.1\r\n".to_vec(), b"\r\n".to_vec()]);
        let mut sink = ChunkedSink {
            out: Vec::new(),
            max_write: 1024,
            block_next: 0,
        };

        wb.pump(&mut source);
        assert_eq!(wb.merge_size(), 18);
        let sent = wb.flush(&mut source, &mut sink).unwrap();
        assert_eq!(sent, 18);
        assert!(wb.is_drained());
        assert_eq!(sink.out, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn large_chunk_defers_and_survives_short_writes() {
        let mut wb = WriteBuffer::new();
        let big = vec![b'x'; 1024];
        let mut source = VecSource::new(vec![big.clone()]);
        let mut sink = ChunkedSink {
            out: Vec::new(),
            max_write: 7,
            block_next: 0,
        };

        wb.pump(&mut source);
        assert_eq!(wb.deferred_size(), 1024);

        let mut total = 0usize;
        for _ in 0..2000 {
            let sent = wb.flush(&mut source, &mut sink).unwrap();
            total += sent;
            if wb.is_drained() {
                break;
            }
            wb.pump(&mut source);
        }
        assert_eq!(total, 1024);
        assert_eq!(sink.out, big);
        assert!(wb.is_drained());
    }

    #[test]
    fn would_block_preserves_unsent_suffix_at_same_address() {
        let mut wb = WriteBuffer::new();
        let mut source = VecSource::new(vec![b"hello".to_vec()]);
        let mut sink = ChunkedSink {
            out: Vec::new(),
            max_write: 1024,
            block_next: 1,
        };

        wb.pump(&mut source);
        let sent = wb.flush(&mut source, &mut sink).unwrap();
        assert_eq!(sent, 0);
        assert_eq!(wb.merge_size(), 5);

        let sent = wb.flush(&mut source, &mut sink).unwrap();
        assert_eq!(sent, 5);
        assert_eq!(sink.out, b"hello");
    }

    #[test]
    fn no_loss_no_dup_under_random_short_writes() {
        // property-style check: many small producer chunks through a sink
        // that writes at most 3 bytes per call, never would-blocking.
        let mut wb = WriteBuffer::new();
        let expected: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let mut source = VecSource::new(
            expected
                .chunks(17)
                .map(<[u8]>::to_vec)
                .collect::<Vec<_>>(),
        );
        let mut sink = ChunkedSink {
            out: Vec::new(),
            max_write: 3,
            block_next: 0,
        };

        loop {
            wb.pump(&mut source);
            if wb.is_drained() {
                break;
            }
            wb.flush(&mut source, &mut sink).unwrap();
        }
        assert_eq!(sink.out, expected);
    }
}
