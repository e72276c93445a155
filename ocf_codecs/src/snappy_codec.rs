use ocf_core::codec::Codec;
use ocf_core::format::CODEC_SNAPPY;
use ocf_core::{OcfError, Result};
use tracing::trace;

/// Length of the CRC-32 trailer after the snappy payload.
const CRC_LEN: usize = 4;

/// Raw snappy blocks followed by a big-endian CRC-32 of the uncompressed bytes.
///
/// Fastest of the bundled decoders; the checksum is verified on every block.
pub struct SnappyCodec;

impl Codec for SnappyCodec {
    fn name(&self) -> &'static str {
        CODEC_SNAPPY
    }

    fn decompress_block(&self, compressed: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if compressed.len() < CRC_LEN {
            return Err(OcfError::Decompression(format!(
                "snappy block of {} bytes is too short for its checksum",
                compressed.len()
            )));
        }
        let (payload, trailer) = compressed.split_at(compressed.len() - CRC_LEN);

        *out = snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| OcfError::Decompression(format!("snappy: {e}")))?;

        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(out);
        if expected != actual {
            return Err(OcfError::Decompression(format!(
                "snappy checksum mismatch: expected {expected:08x}, got {actual:08x}"
            )));
        }
        trace!(compressed = compressed.len(), raw = out.len(), "decoded snappy block");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(raw: &[u8]) -> Vec<u8> {
        let mut block = snap::raw::Encoder::new().compress_vec(raw).unwrap();
        block.extend_from_slice(&crc32fast::hash(raw).to_be_bytes());
        block
    }

    #[test]
    fn decodes_and_verifies_checksum() {
        let raw = b"aaaaaaaaaaaaaaaabbbbbbbbbbbbbbbb".repeat(8);
        let mut out = Vec::new();
        SnappyCodec.decompress_block(&encode(&raw), &mut out).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let mut block = encode(b"payload");
        let last = block.len() - 1;
        block[last] ^= 0x01;
        let err = SnappyCodec.decompress_block(&block, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("checksum"), "got {err}");
    }

    #[test]
    fn short_block_is_rejected() {
        assert!(SnappyCodec.decompress_block(&[1, 2], &mut Vec::new()).is_err());
    }
}
