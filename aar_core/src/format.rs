//! On-disk layout of an AAR archive.
//!
//! ```text
//! [len 0: u32 BE][block 0 payload] [len 1: u32 BE][block 1 payload] ... [len 63][block 63]
//! ```
//!
//! There is no magic number, version, or block count. A reader has to know
//! [`NUM_BLOCKS`] out of band, which also means a random file whose first 64
//! length prefixes happen to add up to its size decodes as far as the codec
//! lets it. Archives written by older releases depend on this layout, so it
//! stays as is.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{AarError, Result};

/// Every archive holds exactly this many records.
pub const NUM_BLOCKS: usize = 64;

/// Size of the big-endian length prefix in front of each block payload.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// File extension of AAR archives, without the dot.
pub const EXTENSION: &str = "aar";

// ── Partition ──────────────────────────────────────────────────────────────

/// How a source file is cut into [`NUM_BLOCKS`] blocks.
///
/// The first `NUM_BLOCKS - 1` blocks get `source_len / (NUM_BLOCKS - 1)`
/// bytes each and the last block takes the remainder. When the source length
/// is an exact multiple of `NUM_BLOCKS - 1` the last block is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub source_len: u64,
    pub bytes_per_block: u64,
    pub remainder: u64,
}

/// Byte range of one block within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
}

impl Partition {
    /// Returns `None` when the source is shorter than [`NUM_BLOCKS`] bytes.
    pub fn for_len(source_len: u64) -> Option<Self> {
        if source_len < NUM_BLOCKS as u64 {
            return None;
        }
        let divisor = (NUM_BLOCKS - 1) as u64;
        Some(Self {
            source_len,
            bytes_per_block: source_len / divisor,
            remainder: source_len % divisor,
        })
    }

    pub fn span(&self, index: usize) -> BlockSpan {
        debug_assert!(index < NUM_BLOCKS);
        let len = if index == NUM_BLOCKS - 1 {
            self.remainder
        } else {
            self.bytes_per_block
        };
        BlockSpan {
            index,
            offset: index as u64 * self.bytes_per_block,
            len,
        }
    }

    pub fn spans(&self) -> impl Iterator<Item = BlockSpan> + '_ {
        (0..NUM_BLOCKS).map(move |index| self.span(index))
    }
}

// ── Length prefix ──────────────────────────────────────────────────────────

/// Encode a compressed block length, refusing anything that overflows `u32`.
pub fn encode_length(index: usize, len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len32 = u32::try_from(len).map_err(|_| AarError::BlockTooLarge { index, len })?;
    Ok(len32.to_be_bytes())
}

pub fn decode_length(buf: [u8; LENGTH_PREFIX_SIZE]) -> u32 {
    u32::from_be_bytes(buf)
}

// ── Paths ──────────────────────────────────────────────────────────────────

/// `movie.mkv` -> `movie.mkv.aar`
pub fn archive_path_for(path: &Path) -> PathBuf {
    append_extension(path, EXTENSION)
}

/// `movie.mkv.aar` -> `movie.mkv`. `None` if the name does not end in `.aar`
/// or nothing is left once the suffix is removed.
pub fn restored_path_for(path: &Path) -> Option<PathBuf> {
    strip_extension(path, EXTENSION)
}

/// Appends `.ext` to the full file name, keeping any existing extension.
pub fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Removes a trailing `.ext` (case-sensitive) from the file name.
pub fn strip_extension(path: &Path, ext: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(ext)?.strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

// ── Record scanning ────────────────────────────────────────────────────────

/// Location of one record inside an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordEntry {
    pub index: usize,
    /// Offset of the payload (just past the length prefix).
    pub offset: u64,
    pub compressed_len: u32,
}

/// Sequential reader over the length-prefixed records of an archive.
///
/// Block boundaries are only discoverable by reading the previous prefix, so
/// callers must alternate [`next_header`](Self::next_header) with either
/// [`read_payload`](Self::read_payload) or [`skip_payload`](Self::skip_payload).
pub struct RecordReader<R> {
    inner: R,
    total_len: u64,
    offset: u64,
    next_index: usize,
}

impl<R: Read> RecordReader<R> {
    /// `total_len` is the archive size in bytes; lengths are checked against
    /// it before any payload buffer is allocated.
    pub fn new(inner: R, total_len: u64) -> Self {
        Self {
            inner,
            total_len,
            offset: 0,
            next_index: 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.total_len.saturating_sub(self.offset)
    }

    /// Reads the next length prefix, or returns `None` once all
    /// [`NUM_BLOCKS`] records have been seen.
    pub fn next_header(&mut self) -> Result<Option<RecordEntry>> {
        if self.next_index == NUM_BLOCKS {
            return Ok(None);
        }
        let index = self.next_index;
        if self.remaining() < LENGTH_PREFIX_SIZE as u64 {
            return Err(AarError::Truncated { index });
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        read_block_bytes(&mut self.inner, &mut prefix, index)?;
        self.offset += LENGTH_PREFIX_SIZE as u64;

        let len = decode_length(prefix);
        let remaining = self.remaining();
        if len as u64 > remaining {
            return Err(AarError::ImplausibleLength {
                index,
                len: len as u64,
                remaining,
            });
        }

        self.next_index += 1;
        Ok(Some(RecordEntry {
            index,
            offset: self.offset,
            compressed_len: len,
        }))
    }

    pub fn read_payload(&mut self, entry: &RecordEntry) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; entry.compressed_len as usize];
        read_block_bytes(&mut self.inner, &mut payload, entry.index)?;
        self.offset += entry.compressed_len as u64;
        Ok(payload)
    }

    pub fn skip_payload(&mut self, entry: &RecordEntry) -> Result<()> {
        let want = entry.compressed_len as u64;
        let skipped = io::copy(&mut (&mut self.inner).take(want), &mut io::sink())?;
        if skipped != want {
            return Err(AarError::Truncated { index: entry.index });
        }
        self.offset += want;
        Ok(())
    }

    /// Checks that nothing follows the last record. Returns the archive size.
    pub fn finish(self) -> Result<u64> {
        let trailing = self.remaining();
        if trailing > 0 {
            return Err(AarError::TrailingData { trailing });
        }
        Ok(self.offset)
    }
}

fn read_block_bytes<R: Read>(reader: &mut R, buf: &mut [u8], index: usize) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => AarError::Truncated { index },
        _ => AarError::Io(e),
    })
}

/// Walks all record headers without decompressing anything.
pub fn scan_records<R: Read>(reader: R, total_len: u64) -> Result<Vec<RecordEntry>> {
    let mut records = RecordReader::new(reader, total_len);
    let mut entries = Vec::with_capacity(NUM_BLOCKS);
    while let Some(entry) = records.next_header()? {
        records.skip_payload(&entry)?;
        entries.push(entry);
    }
    records.finish()?;
    Ok(entries)
}
