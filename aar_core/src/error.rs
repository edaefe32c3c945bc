use std::path::PathBuf;

use thiserror::Error;

use crate::format::NUM_BLOCKS;

/// Everything that can go wrong while encoding, decoding, or running a batch.
#[derive(Debug, Error)]
pub enum AarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} is not a file", path.display())]
    NotAFile { path: PathBuf },

    #[error("file too small (<{}B): {} is {len} bytes", NUM_BLOCKS, path.display())]
    TooSmall { path: PathBuf, len: u64 },

    #[error("not an .aar file: {}", path.display())]
    NotAnArchive { path: PathBuf },

    #[error("not a .{expected} file: {}", path.display())]
    WrongExtension { path: PathBuf, expected: &'static str },

    #[error("unrecognized archive type: {}", path.display())]
    UnknownArchive { path: PathBuf },

    #[error("archive truncated inside block {index}")]
    Truncated { index: usize },

    #[error("block {index} declares {len} bytes but only {remaining} remain in the archive")]
    ImplausibleLength { index: usize, len: u64, remaining: u64 },

    #[error("{trailing} unexpected bytes after the last block")]
    TrailingData { trailing: u64 },

    #[error("block {index} compressed to {len} bytes, which overflows the 32-bit length prefix")]
    BlockTooLarge { index: usize, len: usize },

    #[error("block {index} codec failure: {source}")]
    Codec {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("block {index} was dropped before its job completed")]
    BlockLost { index: usize },

    #[error("worker pool is shut down; no new work accepted")]
    PoolClosed,

    #[error("worker pool could not start any threads")]
    NoWorkers,

    #[error("a batch is already running")]
    Busy,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AarError>,
    },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// How the batch orchestrator treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input is not something this step can work on. Reported and skipped.
    Precondition,
    /// The input looked right but its content is damaged.
    Corruption,
    /// The file system failed underneath us.
    Io,
    /// Pool, channel, or foreign-library failures.
    Internal,
}

impl AarError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AarError::NotAFile { .. }
            | AarError::TooSmall { .. }
            | AarError::NotAnArchive { .. }
            | AarError::WrongExtension { .. }
            | AarError::UnknownArchive { .. } => ErrorKind::Precondition,
            AarError::Truncated { .. }
            | AarError::ImplausibleLength { .. }
            | AarError::TrailingData { .. }
            | AarError::Codec { .. } => ErrorKind::Corruption,
            AarError::Io(_) => ErrorKind::Io,
            AarError::Context { source, .. } => source.kind(),
            AarError::BlockTooLarge { .. }
            | AarError::BlockLost { .. }
            | AarError::PoolClosed
            | AarError::NoWorkers
            | AarError::Busy
            | AarError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn is_precondition(&self) -> bool {
        self.kind() == ErrorKind::Precondition
    }
}

pub type Result<T> = std::result::Result<T, AarError>;
