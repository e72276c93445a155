use ocf_core::codec::Codec;
use ocf_core::format::CODEC_NULL;
use ocf_core::Result;

/// Identity codec: blocks are stored verbatim.
pub struct NullCodec;

impl Codec for NullCodec {
    fn name(&self) -> &'static str {
        CODEC_NULL
    }

    fn decompress_block(&self, compressed: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        out.extend_from_slice(compressed);
        Ok(())
    }
}
