//! Error taxonomy shared by the container decoder, split cursor and record readers.

use thiserror::Error;

/// The error type for every fallible operation in `ocf_core` and the bundled codecs.
#[derive(Debug, Error)]
pub enum OcfError {
    /// Read or seek failure from the underlying byte source, passed through unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic bytes or unreadable metadata in the file header.
    #[error("corrupt container header: {0}")]
    CorruptHeader(String),

    /// The header names a codec no registered implementation handles.
    #[error("unsupported codec '{0}'")]
    UnsupportedCodec(String),

    /// The schema embedded in the file disagrees with the one the caller expects.
    #[error("schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    /// A caller-supplied schema could not be parsed.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Malformed block framing, a payload that fails to decompress, or a bad trailing sync marker.
    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    /// Raised by codecs; the decoder rewraps it as [`OcfError::CorruptBlock`].
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Record bytes do not parse according to the schema.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A decoded record lacks a field the projection needs.
    #[error("record has no field '{0}'")]
    FieldMissing(&'static str),

    /// An operation was called in a state that does not permit it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Reader configuration is incomplete or unparseable.
    #[error("invalid reader configuration: {0}")]
    Config(String),
}

/// A convenience `Result` alias using [`OcfError`].
pub type Result<T> = std::result::Result<T, OcfError>;
