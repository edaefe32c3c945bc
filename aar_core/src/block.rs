//! One-shot hand-off of a block's payload from a worker to the assembler.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{AarError, Result};

/// Creates the two ends of an archive block.
///
/// The [`BlockCompleter`] moves into the worker job; the [`BlockFuture`] stays
/// with the thread that writes the output. The payload travels through a
/// single-slot channel, so it cannot be observed before it is ready.
pub fn archive_block(index: usize) -> (BlockCompleter, BlockFuture) {
    let (tx, rx) = bounded(1);
    (BlockCompleter { tx }, BlockFuture { index, rx })
}

/// Write side. Consumed by [`complete`](Self::complete), so a block is filled
/// at most once.
pub struct BlockCompleter {
    tx: Sender<Result<Vec<u8>>>,
}

impl BlockCompleter {
    pub fn complete(self, payload: Result<Vec<u8>>) {
        // The assembler may already have given up on this file.
        let _ = self.tx.send(payload);
    }
}

/// Read side, owned by the assembling thread.
pub struct BlockFuture {
    index: usize,
    rx: Receiver<Result<Vec<u8>>>,
}

impl BlockFuture {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Blocks until the worker has produced this block's payload.
    ///
    /// A job that panicked or was dropped without completing surfaces as
    /// [`AarError::BlockLost`] instead of hanging the caller.
    pub fn wait(self) -> Result<Vec<u8>> {
        match self.rx.recv() {
            Ok(payload) => payload,
            Err(_) => Err(AarError::BlockLost { index: self.index }),
        }
    }
}
