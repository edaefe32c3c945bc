use aar_core::Codec;

/// No-op codec: stores blocks verbatim, with no compression.
///
/// Useful for:
/// - Checking archive framing independently of any compressor.
/// - Tests that need to predict the exact archive bytes.
///
/// Archives written with it are not readable by the default deflate decoder.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
