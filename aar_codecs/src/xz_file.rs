use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use aar_core::format::{append_extension, strip_extension};
use aar_core::output::StagedOutput;
use aar_core::{AarError, FileStep, ProgressSink, Result, StepReport};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::{took, COPY_BUFFER_SIZE};

pub const XZ_EXTENSION: &str = "xz";

/// Single-stream LZMA2 compression of one file into `<file>.xz`.
pub struct XzCompress {
    /// liblzma preset, 0 (fast) to 9 (small).
    pub preset: u32,
}

impl Default for XzCompress {
    fn default() -> Self {
        Self { preset: 6 }
    }
}

impl FileStep for XzCompress {
    fn describe(&self) -> &'static str {
        "XZ compression"
    }

    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport> {
        let started = Instant::now();
        if !fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
            return Err(AarError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let output = append_extension(path, XZ_EXTENSION);
        compress(path, &output, self.preset.min(9), progress.as_ref())
            .map_err(|e| e.with_context("encoding xz stream"))?;

        Ok(StepReport {
            output,
            message: took("Compression", started),
        })
    }
}

fn compress(path: &Path, output: &Path, preset: u32, progress: &dyn ProgressSink) -> Result<()> {
    let mut input = File::open(path)?;
    let total = input.metadata()?.len();

    let mut encoder = XzEncoder::new(StagedOutput::create(output)?, preset);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut done = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n])?;
        done += n as u64;
        progress.report(done, total);
    }
    let written = encoder.finish()?.commit()?;
    tracing::debug!(input = %path.display(), source_len = total, written, "xz written");
    Ok(())
}

/// Restores `<file>.xz` to `<file>`. Concatenated streams are decoded one
/// after another, as `xz -d` does.
pub struct XzDecompress;

impl FileStep for XzDecompress {
    fn describe(&self) -> &'static str {
        "XZ decompression"
    }

    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport> {
        let started = Instant::now();
        let wrong_extension = || AarError::WrongExtension {
            path: path.to_path_buf(),
            expected: XZ_EXTENSION,
        };
        let output = strip_extension(path, XZ_EXTENSION).ok_or_else(wrong_extension)?;
        if !fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
            return Err(wrong_extension());
        }
        decompress(path, &output, progress.as_ref())
            .map_err(|e| e.with_context("decoding xz stream"))?;

        Ok(StepReport {
            output,
            message: took("Decompression", started),
        })
    }
}

fn decompress(path: &Path, output: &Path, progress: &dyn ProgressSink) -> Result<()> {
    let file = File::open(path)?;
    let total = file.metadata()?.len();
    let mut decoder = XzDecoder::new_multi_decoder(BufReader::new(file));
    let mut out = StagedOutput::create(output)?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        progress.report(decoder.total_in(), total);
    }
    let restored = out.commit()?;
    tracing::debug!(input = %path.display(), restored, "xz decoded");
    Ok(())
}
