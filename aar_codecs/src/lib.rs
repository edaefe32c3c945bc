mod deflate;
mod mode;
mod passthrough;
mod xz_file;
mod zip_file;

pub use deflate::DeflateCodec;
pub use mode::{step_for, AutoDecompress, Mode, StepOptions};
pub use passthrough::PassThroughCodec;
pub use xz_file::{XzCompress, XzDecompress, XZ_EXTENSION};
pub use zip_file::{ZipCompress, ZipDecompress, JAR_EXTENSION, ZIP_EXTENSION};

use std::time::Instant;

/// Read buffer for the streaming XZ steps.
const COPY_BUFFER_SIZE: usize = 8 * 1024;

fn took(verb: &str, started: Instant) -> String {
    format!("{verb} took: {:.3} s", started.elapsed().as_secs_f64())
}
