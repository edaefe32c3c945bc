/// Byte compressor used for every AAR block.
///
/// Each `Codec` implementation:
/// - Compresses/decompresses one block at a time with no state carried
///   between calls. Blocks of an archive never share a dictionary; that is
///   what lets them run on different workers.
/// - Is shared across worker threads, hence `Send + Sync`.
///
/// The archive format records no codec identifier, so an archive can only be
/// decoded with the codec it was encoded with.
pub trait Codec: Send + Sync {
    /// Human-readable codec name for logs and CLI display.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single independent block.
    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>>;
}
