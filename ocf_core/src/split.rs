use tracing::debug;

use crate::datum::Datum;
use crate::error::{OcfError, Result};
use crate::format::SYNC_SIZE;
use crate::reader::{ContainerReader, DataBlock};

/// A byte window of a larger file assigned to one reader.
pub trait InputSplit {
    /// Identifier of the file the split belongs to.
    fn path(&self) -> &str;

    /// First byte of the window.
    fn start(&self) -> u64;

    /// Number of bytes in the window.
    fn length(&self) -> u64;
}

/// A plain split descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSplit {
    pub path: String,
    pub start: u64,
    pub length: u64,
}

impl FileSplit {
    pub fn new(path: impl Into<String>, start: u64, length: u64) -> Self {
        Self {
            path: path.into(),
            start,
            length,
        }
    }

    /// One past the last byte of the window, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }
}

impl InputSplit for FileSplit {
    fn path(&self) -> &str {
        &self.path
    }

    fn start(&self) -> u64 {
        self.start
    }

    fn length(&self) -> u64 {
        self.length
    }
}

/// `[start, end)` with `end` clamped to the file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRange {
    pub start: u64,
    pub end: u64,
}

impl SplitRange {
    pub fn new(start: u64, length: u64, file_length: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(length).min(file_length),
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Restricts a [`ContainerReader`] to the blocks a split owns and tracks progress.
///
/// A block belongs to the split in which the sync marker preceding it begins
/// (for the first block, the header's own marker). Blocks are consumed whole:
/// once admitted, every record in the block is returned even if the block
/// extends past the split end.
#[derive(Debug)]
pub struct SplitCursor {
    range: SplitRange,
    /// Where reading actually began: the first block boundary at or after `range.start`.
    effective_start: u64,
    /// Offset just past the most recently admitted block.
    current_offset: u64,
    block: Option<DataBlock>,
    decoded: u64,
    past_end: bool,
}

impl SplitCursor {
    /// Position `reader` at the first block this split owns.
    pub fn initialize(reader: &mut ContainerReader, start: u64, length: u64) -> Result<Self> {
        let range = SplitRange::new(start, length, reader.length());
        let effective_start = reader.seek_to_sync(range.start)?;
        debug!(
            start = range.start,
            end = range.end,
            effective_start,
            "split cursor initialized"
        );
        Ok(Self {
            range,
            effective_start,
            current_offset: effective_start,
            block: None,
            decoded: 0,
            past_end: false,
        })
    }

    pub fn range(&self) -> SplitRange {
        self.range
    }

    pub fn effective_start(&self) -> u64 {
        self.effective_start
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Records decoded so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Records left in the block currently being consumed.
    pub fn remaining_in_block(&self) -> u64 {
        self.block.as_ref().map_or(0, DataBlock::remaining)
    }

    pub fn is_past_end(&self) -> bool {
        self.past_end
    }

    /// Whether another record can be returned, reading the next block if the
    /// current one is used up and the split still owns it.
    pub fn has_more(&mut self, reader: &mut ContainerReader) -> Result<bool> {
        loop {
            if self.past_end {
                return Ok(false);
            }
            if self.remaining_in_block() > 0 {
                return Ok(true);
            }
            if !self.owns_next_block(reader) {
                self.finish();
                return Ok(false);
            }
            match reader.read_next_block()? {
                Some(block) => {
                    self.current_offset = block.end;
                    self.block = Some(block);
                }
                None => {
                    self.finish();
                    return Ok(false);
                }
            }
        }
    }

    /// The next block begins `SYNC_SIZE` bytes after its marker; the split
    /// owns it only if that marker starts before `end`.
    fn owns_next_block(&self, reader: &ContainerReader) -> bool {
        let next = reader.block_start();
        next < self.range.end.saturating_add(SYNC_SIZE as u64) && next < reader.length()
    }

    fn finish(&mut self) {
        self.past_end = true;
        self.block = None;
        debug!(
            end = self.range.end,
            offset = self.current_offset,
            records = self.decoded,
            "split exhausted"
        );
    }

    /// Decode the next record. Only valid after `has_more` returned true.
    pub fn next_record(&mut self, reader: &ContainerReader) -> Result<Datum> {
        let block = self
            .block
            .as_mut()
            .filter(|b| b.remaining() > 0)
            .ok_or_else(|| OcfError::IllegalState("no record available; call has_more first".into()))?;
        let record = reader.decode_one(block)?;
        self.decoded += 1;
        Ok(record)
    }

    /// Fraction of the split consumed, in `[0.0, 1.0]`.
    ///
    /// 0.0 until the first record is decoded and 1.0 once the split is
    /// exhausted; in between, the distance from the split start to the end of
    /// the current block over the split length. Never decreases.
    pub fn progress(&self) -> f32 {
        if self.past_end {
            return 1.0;
        }
        if self.decoded == 0 || self.range.is_empty() {
            return 0.0;
        }
        let consumed = self.current_offset.saturating_sub(self.range.start);
        (consumed as f64 / self.range.len() as f64).min(1.0) as f32
    }
}
