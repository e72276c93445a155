pub mod codec;
pub mod config;
pub mod datum;
pub mod error;
pub mod format;
pub mod keyvalue;
pub mod reader;
pub mod record_reader;
pub mod schema;
pub mod source;
pub mod split;
pub mod varint;

pub use codec::{Codec, CodecRegistry};
pub use config::ReaderConfig;
pub use datum::{Datum, FromDatum};
pub use error::{OcfError, Result};
pub use format::{Header, MAGIC, SYNC_SIZE};
pub use reader::{ContainerReader, DataBlock};
pub use record_reader::{KeyRecordReader, KeyValueRecordReader, ReaderState, RecordReader};
pub use schema::{NamedTypes, Schema};
pub use source::{FsOpener, SeekableBytes, SeekableFile, SeekableInput, SourceOpener};
pub use split::{FileSplit, InputSplit, SplitCursor, SplitRange};
