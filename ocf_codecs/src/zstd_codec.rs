use ocf_core::codec::Codec;
use ocf_core::format::CODEC_ZSTANDARD;
use ocf_core::{OcfError, Result};
use tracing::trace;

/// Zstandard block codec.
///
/// Each block payload is one complete zstd frame, so any block can be
/// decompressed without touching its neighbours.
pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        CODEC_ZSTANDARD
    }

    fn decompress_block(&self, compressed: &[u8], out: &mut Vec<u8>) -> Result<()> {
        // The frame carries its own content size, so there is nothing to pre-size.
        *out = zstd::decode_all(compressed)
            .map_err(|e| OcfError::Decompression(format!("zstandard: {e}")))?;
        trace!(compressed = compressed.len(), raw = out.len(), "decoded zstd block");
        Ok(())
    }
}
