use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::block::{archive_block, BlockFuture};
use crate::codec::Codec;
use crate::error::{AarError, Result};
use crate::format::{restored_path_for, RecordReader, NUM_BLOCKS};
use crate::output::StagedOutput;
use crate::pool::WorkerPool;
use crate::progress::{NoProgress, ProgressCounter, ProgressSink};
use crate::task::{FileStep, StepReport};

/// Parallel AAR decoder.
///
/// Unlike the encoder it cannot cut its input up front: each block's start is
/// only known after reading the previous length prefix. The scan is therefore
/// sequential, and every payload is handed to the pool the moment it has been
/// read, so decompression of early blocks overlaps with reading later ones.
///
/// A damaged archive (short read, length past end of file, bytes after the
/// last record, payload the codec rejects) fails the whole file and leaves no
/// output behind.
pub struct Decoder {
    pool: WorkerPool,
    codec: Arc<dyn Codec>,
}

/// Outcome of one successful decode.
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub archive_len: u64,
    pub restored_len: u64,
    pub elapsed: Duration,
}

impl DecodeReport {
    pub fn status_message(&self) -> String {
        format!("Decompression took: {:.3} s", self.elapsed.as_secs_f64())
    }
}

impl Decoder {
    pub fn new(pool: WorkerPool, codec: Arc<dyn Codec>) -> Self {
        Self { pool, codec }
    }

    /// Decode `input` (which must end in `.aar`) next to itself, with the
    /// suffix removed.
    pub fn decode(&self, input: &Path) -> Result<DecodeReport> {
        let output = self.output_path(input)?;
        self.decode_to(input, &output, Arc::new(NoProgress))
    }

    fn output_path(&self, input: &Path) -> Result<PathBuf> {
        let not_an_archive = || AarError::NotAnArchive {
            path: input.to_path_buf(),
        };
        let output = restored_path_for(input).ok_or_else(not_an_archive)?;
        if !fs::metadata(input).map(|m| m.is_file()).unwrap_or(false) {
            return Err(not_an_archive());
        }
        Ok(output)
    }

    /// Decode `input` into `output`, reporting `(finished_blocks, NUM_BLOCKS)`.
    pub fn decode_to(
        &self,
        input: &Path,
        output: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<DecodeReport> {
        let started = Instant::now();

        let file = File::open(input)?;
        let archive_len = file.metadata()?.len();
        tracing::debug!(
            input = %input.display(),
            archive_len,
            codec = self.codec.name(),
            "decoding"
        );

        // ── Scan and fan out ────────────────────────────────────────────────
        let counter = ProgressCounter::new(NUM_BLOCKS as u64, progress);
        let mut records = RecordReader::new(BufReader::new(file), archive_len);
        let mut pending = Vec::with_capacity(NUM_BLOCKS);
        while let Some(entry) = records.next_header()? {
            let payload = records.read_payload(&entry)?;
            pending.push(self.submit(entry.index, payload, &counter)?);
        }
        records.finish()?;

        // ── Assemble in index order ─────────────────────────────────────────
        let mut out = StagedOutput::create(output)?;
        for block in pending {
            let raw = block.wait()?;
            out.write_all(&raw)?;
        }
        let restored_len = out.commit()?;

        let report = DecodeReport {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            archive_len,
            restored_len,
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            output = %output.display(),
            restored_len,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "decoded"
        );
        Ok(report)
    }

    fn submit(
        &self,
        index: usize,
        compressed: Vec<u8>,
        counter: &Arc<ProgressCounter>,
    ) -> Result<BlockFuture> {
        let (completer, future) = archive_block(index);
        let codec = Arc::clone(&self.codec);
        let counter = Arc::clone(counter);
        self.pool.submit(move || {
            let raw = codec
                .decompress_block(&compressed)
                .map_err(|source| AarError::Codec { index, source });
            counter.tick();
            completer.complete(raw);
        })?;
        Ok(future)
    }
}

impl FileStep for Decoder {
    fn describe(&self) -> &'static str {
        "AAR decompression"
    }

    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport> {
        let output = self.output_path(path)?;
        let report = self.decode_to(path, &output, progress)?;
        Ok(StepReport {
            message: report.status_message(),
            output: report.output,
        })
    }
}
