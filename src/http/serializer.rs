//! Request wire encoding, resumable across partial writes.
//!
//! The serializer produces the head and then body segments of at most
//! `SEGMENT_SIZE` payload bytes. The caller writes whatever `pending`
//! returns, reports how much actually went out via `advance`, and repeats
//! until `is_done`. A short write simply leaves bytes pending; nothing is
//! re-read from the body source.

use std::io::Read;

use crate::base::NetError;
use crate::http::body::ByteStream;
use crate::http::headers::HeaderMap;

/// Payload bytes per body segment.
pub const SEGMENT_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WritePhase {
    Head,
    Body,
    Done,
}

pub struct RequestSerializer {
    buf: Vec<u8>,
    offset: usize,
    /// Payload bytes inside `buf` (framing excluded), credited to the
    /// progress counter once the segment is fully written.
    pending_payload: u64,
    phase: WritePhase,
    source: Option<Box<dyn ByteStream>>,
    chunked: bool,
    final_chunk_sent: bool,
    body_sent: u64,
    body_total: Option<u64>,
}

impl RequestSerializer {
    /// Build the request head and prepare body streaming.
    ///
    /// Adds the body framing header the source calls for: `Content-Length`
    /// when the size is known, `Transfer-Encoding: chunked` otherwise. The
    /// source is rewound first so a retried request re-sends from the start.
    pub fn new(
        method: &str,
        target: &str,
        version: &str,
        headers: &HeaderMap,
        mut source: Option<Box<dyn ByteStream>>,
    ) -> Result<Self, NetError> {
        let mut body_total = None;
        let mut chunked = false;
        if let Some(stream) = source.as_mut() {
            if stream.seekable() {
                stream.rewind()?;
            }
            match stream.len() {
                Some(len) => body_total = Some(len),
                None => chunked = true,
            }
        }

        let mut head = format!("{} {} {}\r\n", method, target, version);
        for (key, value) in headers.iter() {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        if let Some(total) = body_total {
            head.push_str(&format!("Content-Length: {}\r\n", total));
        } else if chunked {
            head.push_str("Transfer-Encoding: chunked\r\n");
        } else if matches!(method, "POST" | "PUT") {
            // Body-less POST/PUT still declares an explicit zero length.
            head.push_str("Content-Length: 0\r\n");
        }
        head.push_str("\r\n");

        Ok(Self {
            buf: head.into_bytes(),
            offset: 0,
            pending_payload: 0,
            phase: WritePhase::Head,
            source,
            chunked,
            final_chunk_sent: false,
            body_sent: 0,
            body_total,
        })
    }

    /// Bytes awaiting transmission; refills from the body source when the
    /// current segment is exhausted. Empty means the request is fully
    /// serialized.
    pub fn pending(&mut self) -> Result<&[u8], NetError> {
        if self.offset >= self.buf.len() {
            self.refill()?;
        }
        Ok(&self.buf[self.offset..])
    }

    /// Record that `n` bytes of the pending segment were written.
    pub fn advance(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.buf.len());
        if self.offset >= self.buf.len() {
            self.body_sent += self.pending_payload;
            self.pending_payload = 0;
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == WritePhase::Done && self.offset >= self.buf.len()
    }

    /// Body bytes confirmed sent and the total, if known.
    pub fn progress(&self) -> (u64, Option<u64>) {
        (self.body_sent, self.body_total)
    }

    /// Hand the body source back, for auth retries that must re-send it.
    pub fn into_body(self) -> Option<Box<dyn ByteStream>> {
        self.source
    }

    fn refill(&mut self) -> Result<(), NetError> {
        self.buf.clear();
        self.offset = 0;
        match self.phase {
            WritePhase::Head => {
                self.phase = if self.source.is_some() {
                    WritePhase::Body
                } else {
                    WritePhase::Done
                };
                if self.phase == WritePhase::Body {
                    self.fill_body_segment()?;
                }
            }
            WritePhase::Body => self.fill_body_segment()?,
            WritePhase::Done => {}
        }
        Ok(())
    }

    fn fill_body_segment(&mut self) -> Result<(), NetError> {
        let Some(source) = self.source.as_mut() else {
            self.phase = WritePhase::Done;
            return Ok(());
        };
        let mut payload = vec![0u8; SEGMENT_SIZE];
        let n = read_full(source.as_mut(), &mut payload)?;
        payload.truncate(n);
        if n == 0 {
            if self.chunked && !self.final_chunk_sent {
                self.buf.extend_from_slice(b"0\r\n\r\n");
                self.final_chunk_sent = true;
            }
            self.phase = WritePhase::Done;
            return Ok(());
        }
        if self.chunked {
            self.buf.extend_from_slice(format!("{:x}\r\n", n).as_bytes());
            self.buf.extend_from_slice(&payload);
            self.buf.extend_from_slice(b"\r\n");
        } else {
            self.buf = payload;
        }
        self.pending_payload = n as u64;
        Ok(())
    }
}

/// Read until the buffer is full or the stream ends. A body source may hand
/// out fewer bytes per call than asked for.
fn read_full(stream: &mut dyn ByteStream, buf: &mut [u8]) -> Result<usize, NetError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// Unsized upload sources wrap any `Read`; used for streaming bodies whose
// length is unknown up front.
pub struct ReaderStream<R: Read + Send + Sync> {
    inner: R,
}

impl<R: Read + Send + Sync> ReaderStream<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send + Sync> ByteStream for ReaderStream<R> {
    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        false
    }

    fn seekable(&self) -> bool {
        false
    }

    fn len(&self) -> Option<u64> {
        None
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }

    fn write(&mut self, _data: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "read-only stream",
        ))
    }

    fn rewind(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unseekable stream",
        ))
    }

    fn seek(&mut self, _pos: std::io::SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unseekable stream",
        ))
    }

    fn close(&mut self) {}
}
