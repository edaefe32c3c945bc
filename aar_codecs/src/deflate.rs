use std::io::{Read, Write};

use aar_core::Codec;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// zlib-framed deflate, the byte compressor behind every AAR block.
///
/// Each block becomes one complete zlib stream, so any block can be inflated
/// without its neighbours.
pub struct DeflateCodec {
    /// Compression level (0 = store, 9 = smallest).
    pub level: u32,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl DeflateCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(raw.len() / 2 + 16),
            Compression::new(self.level),
        );
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(compressed.len() * 2);
        ZlibDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(|e| anyhow::anyhow!("inflate error: {}", e))?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_shrinks_repetitive_input() {
        let codec = DeflateCodec::default();
        let raw = b"abcabcabc".repeat(500);
        let packed = codec.compress_block(&raw).unwrap();
        assert!(packed.len() < raw.len() / 10);
        assert_eq!(codec.decompress_block(&packed).unwrap(), raw);
    }

    #[test]
    fn empty_block_is_a_valid_stream() {
        let codec = DeflateCodec::default();
        let packed = codec.compress_block(&[]).unwrap();
        assert!(!packed.is_empty());
        assert!(codec.decompress_block(&packed).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = DeflateCodec::default()
            .decompress_block(&[0xFF; 16])
            .unwrap_err();
        assert!(err.to_string().starts_with("inflate error"));
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(DeflateCodec::new(42).level, 9);
    }
}
