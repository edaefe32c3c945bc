use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{AarError, Result};

/// Output file that only appears at its final path once it is complete.
///
/// Bytes go to a hidden temporary file next to the target. [`commit`]
/// flushes and renames it into place; dropping a `StagedOutput` without
/// committing removes the temporary file, so a failed encode or decode never
/// leaves a truncated result behind.
///
/// The file is created with the same mode as [`File::create`] (`0o666` minus
/// the umask on Unix) rather than the private mode temp files get by default.
///
/// [`File::create`]: std::fs::File::create
///
/// [`commit`]: StagedOutput::commit
pub struct StagedOutput {
    writer: BufWriter<NamedTempFile>,
    target: PathBuf,
}

impl StagedOutput {
    pub fn create(target: &Path) -> Result<Self> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix(".aar-partial-");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }
        let temp = builder.tempfile_in(dir)?;
        Ok(Self {
            writer: BufWriter::with_capacity(1 << 20, temp),
            target: target.to_path_buf(),
        })
    }

    /// Flushes, syncs, and moves the file to its target, replacing whatever
    /// was there. Returns the number of bytes written.
    pub fn commit(self) -> Result<u64> {
        let temp = self
            .writer
            .into_inner()
            .map_err(|e| AarError::Io(e.into_error()))?;
        temp.as_file().sync_all()?;
        let len = temp.as_file().metadata()?.len();
        temp.persist(&self.target)
            .map_err(|e| AarError::Io(e.error))?;
        Ok(len)
    }
}

impl Write for StagedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Seek for StagedOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.writer.seek(pos)
    }
}
