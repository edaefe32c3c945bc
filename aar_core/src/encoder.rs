use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::block::{archive_block, BlockFuture};
use crate::codec::Codec;
use crate::error::{AarError, Result};
use crate::format::{archive_path_for, encode_length, Partition, NUM_BLOCKS};
use crate::output::StagedOutput;
use crate::pool::WorkerPool;
use crate::progress::{NoProgress, ProgressCounter, ProgressSink};
use crate::task::{FileStep, StepReport};

/// Parallel AAR encoder.
///
/// # Encode sequence
/// 1. Check the input is a readable regular file of at least
///    [`NUM_BLOCKS`] bytes. Nothing is written if it is not.
/// 2. Cut it into [`NUM_BLOCKS`] spans (see [`Partition`]), read each span in
///    order and hand it to the pool as its own compression job.
/// 3. Walk the block futures in index order, appending
///    `[u32 BE length][payload]` for each one as it becomes ready.
///
/// Step 3 is where out-of-order worker completion turns back into an
/// in-order byte stream: the writer only ever waits on the next index.
pub struct Encoder {
    pool: WorkerPool,
    codec: Arc<dyn Codec>,
}

/// Outcome of one successful encode.
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub source_len: u64,
    pub archive_len: u64,
    pub elapsed: Duration,
}

impl EncodeReport {
    /// Compression ratio (source / archive).
    pub fn ratio(&self) -> f64 {
        if self.archive_len == 0 {
            return 1.0;
        }
        self.source_len as f64 / self.archive_len as f64
    }

    pub fn status_message(&self) -> String {
        format!("Compression took: {:.3} s", self.elapsed.as_secs_f64())
    }
}

impl Encoder {
    pub fn new(pool: WorkerPool, codec: Arc<dyn Codec>) -> Self {
        Self { pool, codec }
    }

    /// Encode `input` into the sibling file `<input>.aar`.
    pub fn encode(&self, input: &Path) -> Result<EncodeReport> {
        self.encode_to(input, &archive_path_for(input), Arc::new(NoProgress))
    }

    /// Encode `input` into `output`, reporting `(finished_blocks, NUM_BLOCKS)`
    /// to `progress` as workers complete.
    pub fn encode_to(
        &self,
        input: &Path,
        output: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<EncodeReport> {
        let started = Instant::now();

        let not_a_file = || AarError::NotAFile {
            path: input.to_path_buf(),
        };
        if !fs::metadata(input).map(|m| m.is_file()).unwrap_or(false) {
            return Err(not_a_file());
        }
        let mut file = File::open(input).map_err(|_| not_a_file())?;
        let source_len = file.metadata()?.len();

        let partition = Partition::for_len(source_len).ok_or_else(|| AarError::TooSmall {
            path: input.to_path_buf(),
            len: source_len,
        })?;
        tracing::debug!(
            input = %input.display(),
            source_len,
            bytes_per_block = partition.bytes_per_block,
            last_block = partition.remainder,
            codec = self.codec.name(),
            "encoding"
        );

        // ── Read spans and fan out ──────────────────────────────────────────
        let counter = ProgressCounter::new(NUM_BLOCKS as u64, progress);
        let mut pending = Vec::with_capacity(NUM_BLOCKS);
        for span in partition.spans() {
            let mut raw = vec![0u8; span.len as usize];
            file.read_exact(&mut raw)?;
            pending.push(self.submit(span.index, raw, &counter)?);
        }
        drop(file);

        // ── Assemble in index order ─────────────────────────────────────────
        let mut out = StagedOutput::create(output)?;
        for block in pending {
            let index = block.index();
            let payload = block.wait()?;
            out.write_all(&encode_length(index, payload.len())?)?;
            out.write_all(&payload)?;
        }
        let archive_len = out.commit()?;

        let report = EncodeReport {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            source_len,
            archive_len,
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            output = %output.display(),
            archive_len,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "encoded"
        );
        Ok(report)
    }

    fn submit(
        &self,
        index: usize,
        raw: Vec<u8>,
        counter: &Arc<ProgressCounter>,
    ) -> Result<BlockFuture> {
        let (completer, future) = archive_block(index);
        let codec = Arc::clone(&self.codec);
        let counter = Arc::clone(counter);
        self.pool.submit(move || {
            let compressed = codec
                .compress_block(&raw)
                .map_err(|source| AarError::Codec { index, source });
            counter.tick();
            completer.complete(compressed);
        })?;
        Ok(future)
    }
}

impl FileStep for Encoder {
    fn describe(&self) -> &'static str {
        "AAR compression"
    }

    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport> {
        let report = self.encode_to(path, &archive_path_for(path), progress)?;
        Ok(StepReport {
            message: report.status_message(),
            output: report.output,
        })
    }
}
