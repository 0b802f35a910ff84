//! Byte sources and sinks for request and response bodies.
//!
//! The transport never assumes a body lives in memory: an upload source may
//! be a buffer, a file, or any reader-like object, and a download sink may be
//! memory or a file on disk. `ByteStream` is the seam both sides share.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A byte stream usable as a request body source or response body sink.
pub trait ByteStream: Send + Sync {
    /// Whether bytes can be read out of this stream.
    fn readable(&self) -> bool;

    /// Whether bytes can be written into this stream.
    fn writable(&self) -> bool;

    /// Whether `seek`/`rewind` are supported.
    fn seekable(&self) -> bool;

    /// Total byte length, if known. `None` selects chunked transfer coding
    /// when used as an upload source.
    fn len(&self) -> Option<u64>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Reset the cursor to the start of the stream.
    fn rewind(&mut self) -> io::Result<()>;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Release underlying resources. Further operations may fail.
    fn close(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// Growable in-memory stream.
pub struct MemoryStream {
    inner: Cursor<Vec<u8>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self { inner: Cursor::new(Vec::new()) }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { inner: Cursor::new(data.into()) }
    }

    /// Borrow the full buffer regardless of cursor position.
    pub fn bytes(&self) -> &[u8] {
        self.inner.get_ref()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStream for MemoryStream {
    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        true
    }

    fn seekable(&self) -> bool {
        true
    }

    fn len(&self) -> Option<u64> {
        Some(self.inner.get_ref().len() as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.inner.write(data)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.inner.set_position(0);
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    fn close(&mut self) {
        self.inner = Cursor::new(Vec::new());
    }
}

/// File-backed stream, used for uploads from disk and `save_to` downloads.
pub struct FileStream {
    file: Option<File>,
    path: PathBuf,
    /// True if the transport created this file (rather than the caller
    /// handing over an existing one). Only created files are deleted when an
    /// aborted download leaves them empty.
    created: bool,
}

impl FileStream {
    /// Open an existing file for reading (upload source).
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { file: Some(file), path, created: false })
    }

    /// Create (or truncate) a file for writing (download sink).
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
        Ok(Self { file: Some(file), path, created: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn was_created(&self) -> bool {
        self.created
    }
}

impl ByteStream for FileStream {
    fn readable(&self) -> bool {
        self.file.is_some()
    }

    fn writable(&self) -> bool {
        self.created && self.file.is_some()
    }

    fn seekable(&self) -> bool {
        true
    }

    fn len(&self) -> Option<u64> {
        self.file.as_ref().and_then(|f| f.metadata().ok()).map(|m| m.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.read(buf),
            None => Ok(0),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.write(data),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed")),
        }
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.file.as_mut() {
            Some(f) => f.seek(pos),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed")),
        }
    }

    fn close(&mut self) {
        self.file = None;
    }
}

/// Where decoded response body bytes land.
///
/// Defaults to memory; `Request::save_to` switches it to a file. An aborted
/// exchange whose file sink is still empty removes the file again so failed
/// downloads do not leave zero-byte droppings behind.
pub enum BodySink {
    Memory(MemoryStream),
    File(FileStream),
}

impl BodySink {
    pub fn memory() -> Self {
        BodySink::Memory(MemoryStream::new())
    }

    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(BodySink::File(FileStream::create(path)?))
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let stream: &mut dyn ByteStream = match self {
            BodySink::Memory(m) => m,
            BodySink::File(f) => f,
        };
        let mut rest = data;
        while !rest.is_empty() {
            let n = stream.write(rest)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "body sink full"));
            }
            rest = &rest[n..];
        }
        Ok(())
    }

    pub fn size(&self) -> u64 {
        match self {
            BodySink::Memory(m) => m.len().unwrap_or(0),
            BodySink::File(f) => f.len().unwrap_or(0),
        }
    }

    /// Discard everything written so far. Used when an automatic auth retry
    /// replaces the challenge body with the real response.
    pub fn truncate(&mut self) -> io::Result<()> {
        match self {
            BodySink::Memory(m) => {
                m.close();
                Ok(())
            }
            BodySink::File(f) => {
                if let Some(file) = f.file.as_mut() {
                    file.set_len(0)?;
                    file.seek(SeekFrom::Start(0))?;
                }
                Ok(())
            }
        }
    }

    /// Copy of the bytes collected so far. For file sinks this re-reads the
    /// file; used by digest auth-int which needs the challenge body hash.
    pub fn content(&mut self) -> io::Result<Vec<u8>> {
        match self {
            BodySink::Memory(m) => Ok(m.bytes().to_vec()),
            BodySink::File(f) => {
                let mut out = Vec::new();
                if let Some(file) = f.file.as_mut() {
                    let pos = file.stream_position()?;
                    file.seek(SeekFrom::Start(0))?;
                    file.read_to_end(&mut out)?;
                    file.seek(SeekFrom::Start(pos))?;
                }
                Ok(out)
            }
        }
    }

    /// On abort: a freshly created, still-empty file target is deleted.
    pub fn discard_on_abort(&mut self) {
        if let BodySink::File(f) = self {
            if f.was_created() && f.len().unwrap_or(0) == 0 {
                let path = f.path.clone();
                f.close();
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
