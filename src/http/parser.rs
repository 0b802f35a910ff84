//! Response wire parsing, resumable across arbitrary read fragmentation.
//!
//! The parser only handles framing. It emits raw header lines without
//! interpreting them; once the head is complete the caller (which knows the
//! request method and has parsed `Content-Length` / `Transfer-Encoding`)
//! supplies a `BodyPlan`, and the parser then emits decoded-framing body
//! bytes until the message ends. Feeding one byte at a time produces the
//! same event stream as feeding everything at once.

use flate2::write::{GzDecoder, ZlibDecoder};
use std::io::Write;

use crate::base::NetError;

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPlan {
    /// No body follows (HEAD response or `Content-Length: 0`).
    None,
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Exactly this many bytes.
    Length(u64),
    /// Body runs until the peer closes the connection.
    UntilClose,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseEvent {
    /// One complete header line, status line included, CRLF stripped.
    HeaderLine(String),
    /// Blank line reached; call `set_body_plan` before feeding more.
    HeadComplete,
    /// De-framed body bytes.
    BodyData(Vec<u8>),
    /// Message complete. `excess` counts bytes past the declared end that
    /// were discarded.
    Complete { excess: u64 },
}

#[derive(Debug)]
enum ChunkPhase {
    /// Accumulating the hex size digits, up to the CR.
    SizeHex,
    /// Expecting the LF after the size.
    SizeLf { last: bool },
    /// Consuming chunk payload.
    Data { remaining: u64 },
    /// Expecting the CRLF that closes a data chunk.
    DataCr,
    DataLf,
    /// Expecting the final CRLF after the zero-size chunk.
    FinalCr,
    FinalLf,
}

#[derive(Debug)]
enum State {
    Head,
    /// Head done; waiting for the caller to pick a body plan.
    AwaitPlan,
    Chunked { phase: ChunkPhase, hex: String },
    Length { expected: u64, received: u64 },
    UntilClose,
    Done { excess: u64 },
}

pub struct ResponseParser {
    state: State,
    buf: Vec<u8>,
    body_received: u64,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self { state: State::Head, buf: Vec::new(), body_received: 0 }
    }

    /// De-framed body bytes seen so far.
    pub fn body_received(&self) -> u64 {
        self.body_received
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done { .. })
    }

    /// Feed received bytes; returns the events they unlock.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ParseEvent>, NetError> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();
        self.run(&mut events)?;
        Ok(events)
    }

    /// Install the body plan after `HeadComplete`. Leftover bytes already
    /// received are processed immediately.
    pub fn set_body_plan(&mut self, plan: BodyPlan) -> Result<Vec<ParseEvent>, NetError> {
        if !matches!(self.state, State::AwaitPlan) {
            return Err(NetError::Protocol(
                "body plan set before the head completed".into(),
            ));
        }
        self.state = match plan {
            BodyPlan::None => State::Done { excess: 0 },
            BodyPlan::Chunked => {
                State::Chunked { phase: ChunkPhase::SizeHex, hex: String::new() }
            }
            BodyPlan::Length(0) => State::Done { excess: 0 },
            BodyPlan::Length(expected) => State::Length { expected, received: 0 },
            BodyPlan::UntilClose => State::UntilClose,
        };
        let mut events = Vec::new();
        if let State::Done { .. } = self.state {
            self.discard_excess();
            let excess = match self.state {
                State::Done { excess } => excess,
                _ => 0,
            };
            events.push(ParseEvent::Complete { excess });
            return Ok(events);
        }
        self.run(&mut events)?;
        Ok(events)
    }

    /// The peer closed the connection. Succeeds only when close is what
    /// delimits the body; any other state means the response was cut short.
    pub fn finish_eof(&mut self) -> Result<Vec<ParseEvent>, NetError> {
        match self.state {
            State::Done { .. } => Ok(Vec::new()),
            State::UntilClose => {
                self.state = State::Done { excess: 0 };
                Ok(vec![ParseEvent::Complete { excess: 0 }])
            }
            _ => Err(NetError::RemoteClosed),
        }
    }

    fn run(&mut self, events: &mut Vec<ParseEvent>) -> Result<(), NetError> {
        loop {
            match &mut self.state {
                State::Head => {
                    let Some(pos) = find_crlf(&self.buf) else { return Ok(()) };
                    let line_bytes: Vec<u8> = self.buf.drain(..pos + 2).collect();
                    let line = String::from_utf8_lossy(&line_bytes[..pos]).into_owned();
                    if line.is_empty() {
                        self.state = State::AwaitPlan;
                        events.push(ParseEvent::HeadComplete);
                        return Ok(());
                    }
                    events.push(ParseEvent::HeaderLine(line));
                }
                State::AwaitPlan => return Ok(()),
                State::Chunked { .. } => {
                    if !self.run_chunked(events)? {
                        return Ok(());
                    }
                }
                State::Length { expected, received } => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let want = (*expected - *received) as usize;
                    let take = want.min(self.buf.len());
                    let data: Vec<u8> = self.buf.drain(..take).collect();
                    *received += take as u64;
                    self.body_received += take as u64;
                    let done = *received >= *expected;
                    events.push(ParseEvent::BodyData(data));
                    if done {
                        self.state = State::Done { excess: 0 };
                        self.discard_excess();
                        let excess = match self.state {
                            State::Done { excess } => excess,
                            _ => 0,
                        };
                        events.push(ParseEvent::Complete { excess });
                        return Ok(());
                    }
                }
                State::UntilClose => {
                    if !self.buf.is_empty() {
                        let data: Vec<u8> = self.buf.drain(..).collect();
                        self.body_received += data.len() as u64;
                        events.push(ParseEvent::BodyData(data));
                    }
                    return Ok(());
                }
                State::Done { .. } => {
                    self.discard_excess();
                    return Ok(());
                }
            }
        }
    }

    /// Advance the chunked decoder. Returns false when starved of input.
    fn run_chunked(&mut self, events: &mut Vec<ParseEvent>) -> Result<bool, NetError> {
        let State::Chunked { phase, hex } = &mut self.state else {
            return Ok(false);
        };
        loop {
            match phase {
                ChunkPhase::SizeHex => {
                    let mut consumed = 0;
                    let mut found_cr = false;
                    for &byte in self.buf.iter() {
                        consumed += 1;
                        if byte == b'\r' {
                            found_cr = true;
                            break;
                        }
                        if !byte.is_ascii_hexdigit() {
                            return Err(NetError::Protocol(format!(
                                "invalid chunk size character 0x{:02x}",
                                byte
                            )));
                        }
                        hex.push(byte as char);
                        // 8 hex digits already allow a 4 GiB chunk; longer is
                        // garbage or an attack.
                        if hex.len() > 8 {
                            return Err(NetError::Protocol(
                                "chunk size field too long".into(),
                            ));
                        }
                    }
                    self.buf.drain(..consumed);
                    if !found_cr {
                        return Ok(false);
                    }
                    if hex.is_empty() {
                        return Err(NetError::Protocol("empty chunk size".into()));
                    }
                    let size = u64::from_str_radix(hex, 16)
                        .map_err(|_| NetError::Protocol("bad chunk size".into()))?;
                    hex.clear();
                    *phase = ChunkPhase::SizeLf { last: size == 0 };
                    if size > 0 {
                        // Stash the size through the LF state transition.
                        hex.push_str(&format!("{:x}", size));
                    }
                }
                ChunkPhase::SizeLf { last } => {
                    let Some(&byte) = self.buf.first() else { return Ok(false) };
                    self.buf.drain(..1);
                    if byte != b'\n' {
                        return Err(NetError::Protocol("chunk size not CRLF terminated".into()));
                    }
                    if *last {
                        *phase = ChunkPhase::FinalCr;
                    } else {
                        let remaining = u64::from_str_radix(hex, 16)
                            .map_err(|_| NetError::Protocol("bad chunk size".into()))?;
                        hex.clear();
                        *phase = ChunkPhase::Data { remaining };
                    }
                }
                ChunkPhase::Data { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(false);
                    }
                    let take = (*remaining as usize).min(self.buf.len());
                    let data: Vec<u8> = self.buf.drain(..take).collect();
                    *remaining -= take as u64;
                    self.body_received += take as u64;
                    let chunk_done = *remaining == 0;
                    events.push(ParseEvent::BodyData(data));
                    if chunk_done {
                        *phase = ChunkPhase::DataCr;
                    }
                }
                ChunkPhase::DataCr => {
                    let Some(&byte) = self.buf.first() else { return Ok(false) };
                    self.buf.drain(..1);
                    if byte != b'\r' {
                        return Err(NetError::Protocol("chunk data not CRLF terminated".into()));
                    }
                    *phase = ChunkPhase::DataLf;
                }
                ChunkPhase::DataLf => {
                    let Some(&byte) = self.buf.first() else { return Ok(false) };
                    self.buf.drain(..1);
                    if byte != b'\n' {
                        return Err(NetError::Protocol("chunk data not CRLF terminated".into()));
                    }
                    *phase = ChunkPhase::SizeHex;
                }
                ChunkPhase::FinalCr => {
                    let Some(&byte) = self.buf.first() else { return Ok(false) };
                    self.buf.drain(..1);
                    if byte != b'\r' {
                        return Err(NetError::Protocol("missing final chunk CRLF".into()));
                    }
                    *phase = ChunkPhase::FinalLf;
                }
                ChunkPhase::FinalLf => {
                    let Some(&byte) = self.buf.first() else { return Ok(false) };
                    self.buf.drain(..1);
                    if byte != b'\n' {
                        return Err(NetError::Protocol("missing final chunk CRLF".into()));
                    }
                    self.state = State::Done { excess: 0 };
                    self.discard_excess();
                    let excess = match self.state {
                        State::Done { excess } => excess,
                        _ => 0,
                    };
                    events.push(ParseEvent::Complete { excess });
                    return Ok(true);
                }
            }
        }
    }

    /// Anything buffered past the end of the message is counted and dropped.
    fn discard_excess(&mut self) {
        if let State::Done { excess } = &mut self.state {
            *excess += self.buf.len() as u64;
            self.buf.clear();
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming content decoder for `Content-Encoding: gzip` / `deflate`.
pub enum ContentDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl ContentDecoder {
    /// Pick a decoder from the `Content-Encoding` header value.
    pub fn from_encoding(encoding: Option<&str>) -> Self {
        match encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
            Some("gzip") | Some("x-gzip") => ContentDecoder::Gzip(GzDecoder::new(Vec::new())),
            Some("deflate") => ContentDecoder::Deflate(ZlibDecoder::new(Vec::new())),
            _ => ContentDecoder::Identity,
        }
    }

    /// Push compressed bytes through; returns whatever decoded cleanly.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>, NetError> {
        match self {
            ContentDecoder::Identity => Ok(data.to_vec()),
            ContentDecoder::Gzip(dec) => {
                dec.write_all(data)
                    .map_err(|e| NetError::ContentDecoding(e.to_string()))?;
                Ok(std::mem::take(dec.get_mut()))
            }
            ContentDecoder::Deflate(dec) => {
                dec.write_all(data)
                    .map_err(|e| NetError::ContentDecoding(e.to_string()))?;
                Ok(std::mem::take(dec.get_mut()))
            }
        }
    }

    /// Flush the tail of the compressed stream.
    pub fn finish(&mut self) -> Result<Vec<u8>, NetError> {
        match std::mem::replace(self, ContentDecoder::Identity) {
            ContentDecoder::Identity => Ok(Vec::new()),
            ContentDecoder::Gzip(dec) => dec
                .finish()
                .map_err(|e| NetError::ContentDecoding(e.to_string())),
            ContentDecoder::Deflate(dec) => dec
                .finish()
                .map_err(|e| NetError::ContentDecoding(e.to_string())),
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
