//! Random-access byte sources the container decoder reads from.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// A named resource that can be read at arbitrary offsets.
///
/// `tell` and `seek` come from [`Seek`]; `length` is the total size in bytes.
/// `close` releases the underlying handle; reads after it fail.
pub trait SeekableInput: Read + Seek + Send {
    fn length(&mut self) -> io::Result<u64>;

    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "byte source is closed")
}

/// A local file.
pub struct SeekableFile {
    file: Option<File>,
    len: u64,
}

impl SeekableFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Some(file),
            len,
        })
    }
}

impl Read for SeekableFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.as_mut().ok_or_else(closed)?.read(buf)
    }
}

impl Seek for SeekableFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.as_mut().ok_or_else(closed)?.seek(pos)
    }
}

impl SeekableInput for SeekableFile {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.len)
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the handle closes it.
        self.file = None;
        Ok(())
    }
}

/// An in-memory byte buffer.
pub struct SeekableBytes {
    cursor: Cursor<Vec<u8>>,
}

impl SeekableBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }
}

impl Read for SeekableBytes {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for SeekableBytes {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl SeekableInput for SeekableBytes {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// Turns the resource path of a split into an open byte source.
pub trait SourceOpener {
    fn open(&self, path: &str) -> io::Result<Box<dyn SeekableInput>>;
}

/// Opens paths on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsOpener;

impl SourceOpener for FsOpener {
    fn open(&self, path: &str) -> io::Result<Box<dyn SeekableInput>> {
        Ok(Box::new(SeekableFile::open(path)?))
    }
}

impl<F> SourceOpener for F
where
    F: Fn(&str) -> io::Result<Box<dyn SeekableInput>>,
{
    fn open(&self, path: &str) -> io::Result<Box<dyn SeekableInput>> {
        self(path)
    }
}

/// Buffered view of a source that tracks the logical read position itself,
/// so asking for the offset never costs a syscall.
pub(crate) struct TrackedInput {
    inner: BufReader<Box<dyn SeekableInput>>,
    pos: u64,
}

impl TrackedInput {
    pub(crate) fn new(source: Box<dyn SeekableInput>, capacity: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(capacity, source),
            pos: 0,
        }
    }

    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset != self.pos {
            self.inner.seek(SeekFrom::Start(offset))?;
            self.pos = offset;
        }
        Ok(())
    }

    /// Next byte, or `None` at end of input.
    pub(crate) fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.read(&mut b)? {
            0 => Ok(None),
            _ => Ok(Some(b[0])),
        }
    }

    pub(crate) fn source_mut(&mut self) -> &mut dyn SeekableInput {
        self.inner.get_mut().as_mut()
    }
}

impl Read for TrackedInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}
