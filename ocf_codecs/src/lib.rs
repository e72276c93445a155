mod deflate_codec;
mod null_codec;
mod snappy_codec;
mod zstd_codec;

pub use deflate_codec::DeflateCodec;
pub use null_codec::NullCodec;
pub use snappy_codec::SnappyCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use ocf_core::format::{CODEC_DEFLATE, CODEC_NULL, CODEC_SNAPPY, CODEC_ZSTANDARD};
use ocf_core::{Codec, OcfError, Result};

/// Resolve a codec from the name stored under `avro.codec`.
///
/// Passed to the container decoder and record readers as their
/// [`ocf_core::CodecRegistry`], so the codec is chosen from the file header.
pub fn codec_by_name(name: &str) -> Result<Arc<dyn Codec>> {
    match name {
        CODEC_NULL => Ok(Arc::new(NullCodec)),
        CODEC_DEFLATE => Ok(Arc::new(DeflateCodec)),
        CODEC_SNAPPY => Ok(Arc::new(SnappyCodec)),
        CODEC_ZSTANDARD => Ok(Arc::new(ZstdCodec)),
        other => Err(OcfError::UnsupportedCodec(other.to_string())),
    }
}

/// Every codec name `codec_by_name` understands.
pub const SUPPORTED_CODECS: &[&str] = &[CODEC_NULL, CODEC_DEFLATE, CODEC_SNAPPY, CODEC_ZSTANDARD];
