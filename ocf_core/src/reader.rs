use std::io::{self, Read};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::codec::{Codec, CodecRegistry};
use crate::datum::{self, Datum, MAX_ZERO_WIDTH_ITEMS};
use crate::error::{OcfError, Result};
use crate::format::{Header, DEFAULT_BUFFER_SIZE, SYNC_SIZE};
use crate::schema::NamedTypes;
use crate::source::{SeekableInput, TrackedInput};
use crate::varint;

/// Sequential block decoder for object container files.
///
/// # Open sequence
/// 1. Read the magic bytes, the metadata map and the sync marker.
/// 2. Parse the embedded schema and resolve the named codec.
/// 3. Leave the source positioned at the first block (`header.data_start`).
///
/// # Access pattern
/// Blocks are read whole and in order with [`read_next_block`]; records are
/// then decoded out of the returned [`DataBlock`] with [`decode_one`]. To start
/// somewhere other than the first block, [`seek_to_sync`] scans forward from an
/// arbitrary offset to the next block boundary. Nothing is ever read backwards.
///
/// [`read_next_block`]: ContainerReader::read_next_block
/// [`decode_one`]: ContainerReader::decode_one
/// [`seek_to_sync`]: ContainerReader::seek_to_sync
pub struct ContainerReader {
    input: TrackedInput,
    header: Header,
    codec: Arc<dyn Codec>,
    names: NamedTypes,
    /// Whether a record can encode in zero bytes, which loosens the record-count check.
    empty_records: bool,
    length: u64,
    /// Offset of the next unread block: just past the last sync marker consumed.
    block_start: u64,
    /// Compressed payload of the block being read; reused across blocks.
    scratch: Vec<u8>,
}

impl ContainerReader {
    /// Open a container over `source` with the default read buffer.
    pub fn open(source: Box<dyn SeekableInput>, codecs: &dyn CodecRegistry) -> Result<Self> {
        Self::open_with_capacity(source, codecs, DEFAULT_BUFFER_SIZE)
    }

    /// Open a container, placing a `buffer_size` read buffer in front of `source`.
    pub fn open_with_capacity(
        mut source: Box<dyn SeekableInput>,
        codecs: &dyn CodecRegistry,
        buffer_size: usize,
    ) -> Result<Self> {
        let length = source.length()?;
        io::Seek::rewind(&mut source)?;
        let mut input = TrackedInput::new(source, buffer_size.max(SYNC_SIZE));

        let header = Header::read_from(&mut input)?;
        let codec = codecs.resolve(&header.codec)?;
        debug!(
            codec = codec.name(),
            data_start = header.data_start,
            length,
            schema = %header.schema,
            "opened container"
        );

        Ok(Self {
            block_start: header.data_start,
            input,
            names: NamedTypes::collect(&header.schema),
            empty_records: header.schema.encodes_empty(),
            header,
            codec,
            length,
            scratch: Vec::new(),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Total size of the underlying source in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Current byte offset in the source.
    pub fn tell(&self) -> u64 {
        self.input.position()
    }

    /// Offset of the next block that [`read_next_block`](Self::read_next_block) would read.
    pub fn block_start(&self) -> u64 {
        self.block_start
    }

    /// Position at the first block boundary at or after `target`.
    ///
    /// Scans forward byte by byte for the sync marker and returns the offset
    /// just past it, i.e. where the following block begins. Returns the file
    /// length when no marker starts at or after `target`. A `target` of 0 needs
    /// no scan: the first block begins where the header ends.
    pub fn seek_to_sync(&mut self, target: u64) -> Result<u64> {
        if target == 0 {
            self.input.seek_to(self.header.data_start)?;
            self.block_start = self.header.data_start;
            return Ok(self.block_start);
        }
        if target >= self.length {
            self.input.seek_to(self.length)?;
            self.block_start = self.length;
            return Ok(self.length);
        }

        self.input.seek_to(target)?;
        let sync = self.header.sync;
        let mut window = [0u8; SYNC_SIZE];
        let mut seen = 0usize;
        while let Some(b) = self.input.read_byte()? {
            window.copy_within(1.., 0);
            window[SYNC_SIZE - 1] = b;
            seen += 1;
            if seen >= SYNC_SIZE && window == sync {
                self.block_start = self.input.position();
                debug!(target, found = self.block_start, "synced to block boundary");
                return Ok(self.block_start);
            }
        }

        debug!(target, "no sync marker before end of file");
        self.block_start = self.length;
        Ok(self.length)
    }

    /// Read and decompress the block at the current position.
    ///
    /// Returns `Ok(None)` at end of file. On success the source is positioned
    /// past the block's trailing sync marker, which is verified against the
    /// header's.
    pub fn read_next_block(&mut self) -> Result<Option<DataBlock>> {
        let offset = self.input.position();
        if offset >= self.length {
            return Ok(None);
        }

        let count = varint::read_long(&mut self.input).map_err(|e| block_io(offset, "record count", e))?;
        if count < 0 {
            return Err(corrupt(offset, format!("negative record count {count}")));
        }
        let size = varint::read_long(&mut self.input).map_err(|e| block_io(offset, "byte length", e))?;
        let available = self.length.saturating_sub(self.input.position());
        if size < 0 || size as u64 > available.saturating_sub(SYNC_SIZE as u64) {
            return Err(corrupt(
                offset,
                format!("byte length {size} does not fit in the {available} bytes left"),
            ));
        }

        self.scratch.resize(size as usize, 0);
        self.input
            .read_exact(&mut self.scratch)
            .map_err(|e| block_io(offset, "payload", e))?;

        let mut sync = [0u8; SYNC_SIZE];
        self.input
            .read_exact(&mut sync)
            .map_err(|e| block_io(offset, "sync marker", e))?;
        if sync != self.header.sync {
            return Err(corrupt(offset, "trailing sync marker does not match header".to_string()));
        }

        let mut data = Vec::new();
        self.codec
            .decompress_block(&self.scratch, &mut data)
            .map_err(|e| corrupt(offset, e.to_string()))?;

        // Every record takes at least a byte unless the schema encodes in none.
        let limit = if self.empty_records {
            MAX_ZERO_WIDTH_ITEMS as u64
        } else {
            data.len() as u64
        };
        if count as u64 > limit {
            return Err(corrupt(
                offset,
                format!("{count} records cannot fit in {} decompressed bytes", data.len()),
            ));
        }

        self.block_start = self.input.position();
        if count == 0 {
            warn!(offset, "block holds no records");
        }
        trace!(
            offset,
            records = count,
            compressed = size,
            raw = data.len(),
            "read block"
        );

        Ok(Some(DataBlock {
            offset,
            end: self.block_start,
            record_count: count as u64,
            remaining: count as u64,
            data,
            pos: 0,
        }))
    }

    /// Decode the next record of `block` with the file's schema.
    ///
    /// Once the last record is decoded, every byte of the block must have been
    /// consumed; leftovers mean the block is corrupt.
    pub fn decode_one(&self, block: &mut DataBlock) -> Result<Datum> {
        if block.remaining == 0 {
            return Err(OcfError::Deserialization(format!(
                "block at offset {} has no records left",
                block.offset
            )));
        }
        let mut rest = &block.data[block.pos..];
        let record = datum::decode_with(&self.header.schema, &self.names, &mut rest)?;
        block.pos = block.data.len() - rest.len();
        block.remaining -= 1;

        if block.remaining == 0 && block.pos != block.data.len() {
            return Err(corrupt(
                block.offset,
                format!(
                    "{} bytes left over after the last record",
                    block.data.len() - block.pos
                ),
            ));
        }
        Ok(record)
    }

    /// Iterate over every record from the current block boundary to the end of the file.
    pub fn records(&mut self) -> Records<'_> {
        Records {
            reader: self,
            block: None,
            done: false,
        }
    }

    /// Release the byte source. Reads after this fail.
    pub fn close(&mut self) -> Result<()> {
        self.input.source_mut().close()?;
        Ok(())
    }
}

fn corrupt(offset: u64, reason: String) -> OcfError {
    OcfError::CorruptBlock { offset, reason }
}

/// Running out of bytes or a malformed varint mid-block is corruption; any
/// other I/O failure is passed through.
fn block_io(offset: u64, what: &str, e: io::Error) -> OcfError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => corrupt(offset, format!("file ends inside block {what}")),
        io::ErrorKind::InvalidData => corrupt(offset, format!("bad {what}: {e}")),
        _ => OcfError::Io(e),
    }
}

/// One decompressed block and the decode position within it.
#[derive(Debug)]
pub struct DataBlock {
    /// Offset of the block's record count in the file.
    pub offset: u64,
    /// Offset just past the block's trailing sync marker.
    pub end: u64,
    pub record_count: u64,
    remaining: u64,
    data: Vec<u8>,
    pos: usize,
}

impl DataBlock {
    /// Records not yet decoded.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Decompressed payload size in bytes.
    pub fn raw_len(&self) -> usize {
        self.data.len()
    }
}

/// Whole-file record iterator returned by [`ContainerReader::records`].
///
/// Stops after the first error.
pub struct Records<'a> {
    reader: &'a mut ContainerReader,
    block: Option<DataBlock>,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<Datum>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(block) = self.block.as_mut().filter(|b| b.remaining > 0) {
                let item = self.reader.decode_one(block);
                self.done = item.is_err();
                return Some(item);
            }
            match self.reader.read_next_block() {
                Ok(Some(block)) => self.block = Some(block),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
