use std::sync::Arc;

use crate::error::Result;

/// Block decompression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by the stable name stored under `avro.codec` in the header.
/// - Decompresses one block payload at a time with no state carried between
///   blocks. This is what lets a split reader start at any block boundary.
pub trait Codec: Send + Sync {
    /// Codec name as written in the file header.
    fn name(&self) -> &'static str;

    /// Decompress one block payload into `out`, replacing its contents.
    ///
    /// Failures are reported as [`crate::OcfError::Decompression`]; the
    /// container decoder attaches the block offset.
    fn decompress_block(&self, compressed: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

/// Resolves the codec named in a file header.
///
/// Implemented for any `Fn(&str) -> Result<Arc<dyn Codec>>`, so
/// `ocf_codecs::codec_by_name` can be passed directly.
pub trait CodecRegistry: Send + Sync {
    /// Fails with [`crate::OcfError::UnsupportedCodec`] for unknown names.
    fn resolve(&self, name: &str) -> Result<Arc<dyn Codec>>;
}

impl<F> CodecRegistry for F
where
    F: Fn(&str) -> Result<Arc<dyn Codec>> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Result<Arc<dyn Codec>> {
        self(name)
    }
}
