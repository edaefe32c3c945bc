use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use aar_core::{
    AarError, Decoder, Encoder, FileStep, ProgressSink, Result, StepReport, WorkerPool,
};

use crate::deflate::DeflateCodec;
use crate::xz_file::{XzCompress, XzDecompress, XZ_EXTENSION};
use crate::zip_file::{ZipCompress, ZipDecompress, JAR_EXTENSION, ZIP_EXTENSION};

/// What a batch does to each selected path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ZipCompress,
    XzCompress,
    AarCompress,
    /// Pick the decompressor from each file's extension.
    Decompress,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "zip" => Ok(Self::ZipCompress),
            "xz" => Ok(Self::XzCompress),
            "aar" => Ok(Self::AarCompress),
            "auto" | "decompress" => Ok(Self::Decompress),
            other => Err(format!("unknown mode '{other}'; expected zip, xz, aar, or auto")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ZipCompress => "zip",
            Self::XzCompress => "xz",
            Self::AarCompress => "aar",
            Self::Decompress => "auto",
        })
    }
}

/// Tunables for the steps built by [`step_for`].
#[derive(Debug, Clone, Copy)]
pub struct StepOptions {
    pub xz_preset: u32,
    pub deflate_level: u32,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            xz_preset: 6,
            deflate_level: 6,
        }
    }
}

/// Builds the per-file step for `mode`. AAR steps share `pool`.
pub fn step_for(mode: Mode, pool: &WorkerPool, options: &StepOptions) -> Arc<dyn FileStep> {
    match mode {
        Mode::ZipCompress => Arc::new(ZipCompress),
        Mode::XzCompress => Arc::new(XzCompress {
            preset: options.xz_preset,
        }),
        Mode::AarCompress => Arc::new(Encoder::new(
            pool.clone(),
            Arc::new(DeflateCodec::new(options.deflate_level)),
        )),
        Mode::Decompress => Arc::new(AutoDecompress::new(pool, options)),
    }
}

/// Decompresses `.aar`, `.xz`, `.zip` and `.jar` files, choosing per file.
pub struct AutoDecompress {
    aar: Decoder,
    xz: XzDecompress,
    zip: ZipDecompress,
}

impl AutoDecompress {
    pub fn new(pool: &WorkerPool, options: &StepOptions) -> Self {
        Self {
            aar: Decoder::new(
                pool.clone(),
                Arc::new(DeflateCodec::new(options.deflate_level)),
            ),
            xz: XzDecompress,
            zip: ZipDecompress,
        }
    }

    fn pick(&self, path: &Path) -> Option<&dyn FileStep> {
        let ext = path.extension()?.to_str()?;
        match ext {
            aar_core::EXTENSION => Some(&self.aar),
            XZ_EXTENSION => Some(&self.xz),
            ZIP_EXTENSION | JAR_EXTENSION => Some(&self.zip),
            _ => None,
        }
    }
}

impl FileStep for AutoDecompress {
    fn describe(&self) -> &'static str {
        "decompression"
    }

    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport> {
        match self.pick(path) {
            Some(step) => step.run(path, progress),
            None => Err(AarError::UnknownArchive {
                path: path.to_path_buf(),
            }),
        }
    }
}
