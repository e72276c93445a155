use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::codec::CodecRegistry;
use crate::config::ReaderConfig;
use crate::datum::{Datum, FromDatum};
use crate::error::{OcfError, Result};
use crate::format::Header;
use crate::keyvalue;
use crate::reader::ContainerReader;
use crate::schema::Schema;
use crate::source::SourceOpener;
use crate::split::{InputSplit, SplitCursor};

/// Lifecycle of a [`RecordReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Uninitialized,
    Initialized,
    /// Inside `advance`; a reader left here by a failed `advance` is unusable.
    Advancing,
    HasCurrent,
    Exhausted,
    Closed,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a decoded record is turned into the key and value a reader exposes.
pub trait RecordProjection {
    type Key;
    type Value;

    /// Check the file's embedded schema against the configuration before any
    /// record is read.
    fn validate(file_schema: &Schema, config: &ReaderConfig) -> Result<()>;

    fn project(record: Datum) -> Result<(Self::Key, Self::Value)>;
}

fn check_type<T: FromDatum>(schema: &Schema) -> Result<()> {
    if T::accepts(schema) {
        Ok(())
    } else {
        Err(OcfError::SchemaMismatch {
            expected: type_name::<T>().to_string(),
            found: schema.canonical_form(),
        })
    }
}

/// Records are `{key, value}` pairs; the reader exposes the two fields.
pub struct KeyValueProjection<K, V>(PhantomData<fn() -> (K, V)>);

impl<K: FromDatum, V: FromDatum> RecordProjection for KeyValueProjection<K, V> {
    type Key = K;
    type Value = V;

    fn validate(file_schema: &Schema, config: &ReaderConfig) -> Result<()> {
        let value_schema = config.require_value_schema()?;
        check_type::<K>(&config.key_schema)?;
        check_type::<V>(value_schema)?;
        keyvalue::validate(file_schema, &config.key_schema, value_schema)
    }

    fn project(record: Datum) -> Result<(K, V)> {
        let (key, value) = keyvalue::split(record)?;
        Ok((K::from_datum(key)?, V::from_datum(value)?))
    }
}

/// The whole record is the key; there is no value.
pub struct KeyProjection<T>(PhantomData<fn() -> T>);

impl<T: FromDatum> RecordProjection for KeyProjection<T> {
    type Key = T;
    type Value = ();

    fn validate(file_schema: &Schema, config: &ReaderConfig) -> Result<()> {
        check_type::<T>(&config.key_schema)?;
        if file_schema != &config.key_schema {
            return Err(OcfError::SchemaMismatch {
                expected: config.key_schema.canonical_form(),
                found: file_schema.canonical_form(),
            });
        }
        Ok(())
    }

    fn project(record: Datum) -> Result<(T, ())> {
        Ok((T::from_datum(record)?, ()))
    }
}

pub type KeyValueRecordReader<K, V> = RecordReader<KeyValueProjection<K, V>>;
pub type KeyRecordReader<T> = RecordReader<KeyProjection<T>>;

struct Active {
    reader: ContainerReader,
    cursor: SplitCursor,
}

/// Reads the records of one split, one at a time.
///
/// ```text
/// Uninitialized ──initialize──▶ Initialized ──advance──▶ HasCurrent ⇄ advance
///                                                         │
///                                     advance = false ──▶ Exhausted
/// any state ──close──▶ Closed
/// ```
///
/// Single-owner and synchronous: every call blocks for its I/O and
/// decompression, and one instance serves exactly one split.
pub struct RecordReader<P: RecordProjection> {
    codecs: Arc<dyn CodecRegistry>,
    state: ReaderState,
    active: Option<Active>,
    current: Option<(P::Key, P::Value)>,
    /// Progress reported at the moment of `close`.
    closed_progress: f32,
}

impl<P: RecordProjection> RecordReader<P> {
    pub fn new(codecs: Arc<dyn CodecRegistry>) -> Self {
        Self {
            codecs,
            state: ReaderState::Uninitialized,
            active: None,
            current: None,
            closed_progress: 0.0,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Header of the open container, once initialized.
    pub fn header(&self) -> Option<&Header> {
        self.active.as_ref().map(|a| a.reader.header())
    }

    /// Open the split's file, validate its schema and position at the first
    /// block the split owns.
    ///
    /// On failure nothing is retained and the reader stays uninitialized.
    pub fn initialize(
        &mut self,
        split: &dyn InputSplit,
        config: &ReaderConfig,
        opener: &dyn SourceOpener,
    ) -> Result<()> {
        if self.state != ReaderState::Uninitialized {
            return Err(OcfError::IllegalState(format!(
                "initialize called in state {}",
                self.state
            )));
        }

        let path = split.path();
        let start = split.start();
        let length = split.length();

        let source = opener.open(path)?;
        let mut reader =
            ContainerReader::open_with_capacity(source, self.codecs.as_ref(), config.buffer_size)?;
        P::validate(&reader.header().schema, config)?;
        let cursor = SplitCursor::initialize(&mut reader, start, length)?;

        debug!(path, start, length, "record reader initialized");
        self.active = Some(Active { reader, cursor });
        self.state = ReaderState::Initialized;
        Ok(())
    }

    /// Move to the next record of the split.
    ///
    /// Returns `false` once the split is exhausted, and keeps returning `false`
    /// on later calls.
    pub fn advance(&mut self) -> Result<bool> {
        match self.state {
            ReaderState::Initialized | ReaderState::HasCurrent => {}
            ReaderState::Exhausted => return Ok(false),
            other => {
                return Err(OcfError::IllegalState(format!("advance called in state {other}")));
            }
        }

        self.state = ReaderState::Advancing;
        self.current = None;
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| OcfError::IllegalState("reader has no open container".into()))?;

        if !active.cursor.has_more(&mut active.reader)? {
            self.state = ReaderState::Exhausted;
            return Ok(false);
        }
        let record = active.cursor.next_record(&active.reader)?;
        self.current = Some(P::project(record)?);
        self.state = ReaderState::HasCurrent;
        Ok(true)
    }

    fn current(&self) -> Result<&(P::Key, P::Value)> {
        match (&self.state, &self.current) {
            (ReaderState::HasCurrent, Some(current)) => Ok(current),
            _ => Err(OcfError::IllegalState(format!(
                "no current record in state {}",
                self.state
            ))),
        }
    }

    /// Key of the current record.
    pub fn current_key(&self) -> Result<&P::Key> {
        self.current().map(|(k, _)| k)
    }

    /// Value of the current record.
    pub fn current_value(&self) -> Result<&P::Value> {
        self.current().map(|(_, v)| v)
    }

    /// Fraction of the split consumed, in `[0.0, 1.0]`.
    pub fn progress(&self) -> f32 {
        match self.state {
            ReaderState::Uninitialized | ReaderState::Initialized => 0.0,
            ReaderState::Exhausted => 1.0,
            ReaderState::Closed => self.closed_progress,
            ReaderState::Advancing | ReaderState::HasCurrent => self
                .active
                .as_ref()
                .map_or(0.0, |a| a.cursor.progress()),
        }
    }

    /// Release the byte source. Safe to call in any state and more than once.
    ///
    /// Only a failure to release the source itself is reported.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ReaderState::Closed {
            return Ok(());
        }
        self.closed_progress = self.progress();
        self.state = ReaderState::Closed;
        self.current = None;
        match self.active.take() {
            Some(mut active) => {
                debug!(records = active.cursor.decoded(), "record reader closed");
                active.reader.close()
            }
            None => Ok(()),
        }
    }
}

impl<P: RecordProjection> Drop for RecordReader<P> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
