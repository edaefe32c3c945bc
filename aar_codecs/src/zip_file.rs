use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use aar_core::format::{append_extension, strip_extension};
use aar_core::output::StagedOutput;
use aar_core::{AarError, FileStep, ProgressSink, Result, StepReport};
use anyhow::Context;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::took;

pub const ZIP_EXTENSION: &str = "zip";
pub const JAR_EXTENSION: &str = "jar";

/// Packs a file, or a whole directory tree, into `<path>.zip`.
///
/// Entry names are relative to the input's parent, so `photos/` is stored as
/// `photos/a.jpg`, `photos/2024/b.jpg`, ...
pub struct ZipCompress;

impl FileStep for ZipCompress {
    fn describe(&self) -> &'static str {
        "ZIP compression"
    }

    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport> {
        let started = Instant::now();
        let meta = fs::metadata(path).map_err(|_| AarError::NotAFile {
            path: path.to_path_buf(),
        })?;

        let entries: Vec<PathBuf> = if meta.is_dir() {
            WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .map(|entry| entry.map(|e| e.into_path()))
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("walk {}", path.display()))?
        } else {
            vec![path.to_path_buf()]
        };
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let output = append_extension(path, ZIP_EXTENSION);

        let mut zip = ZipWriter::new(StagedOutput::create(&output)?);
        let total = entries.len() as u64;
        for (i, entry) in entries.iter().enumerate() {
            let name = entry_name(base, entry);
            if entry.is_dir() {
                zip.add_directory(name.as_str(), options(0))
                    .with_context(|| format!("add directory {name}"))?;
            } else {
                let mut file = File::open(entry)?;
                let len = file.metadata()?.len();
                zip.start_file(name.as_str(), options(len))
                    .with_context(|| format!("add file {name}"))?;
                io::copy(&mut file, &mut zip)?;
            }
            progress.report(i as u64 + 1, total);
        }
        zip.finish().context("finish zip")?.commit()?;
        tracing::debug!(input = %path.display(), entries = total, "zip written");

        Ok(StepReport {
            output,
            message: took("Compression", started),
        })
    }
}

fn options(len: u64) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(len > u32::MAX as u64)
}

/// Forward-slash name of `entry` relative to `base`.
fn entry_name(base: &Path, entry: &Path) -> String {
    let relative = entry.strip_prefix(base).unwrap_or(entry);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extracts a `.zip` or `.jar` into the directory that holds it.
///
/// Entries are unpacked into a hidden staging directory first and only moved
/// into place once every entry has been read and checked, so a damaged
/// archive leaves the destination untouched. Files that already exist are
/// replaced.
pub struct ZipDecompress;

impl FileStep for ZipDecompress {
    fn describe(&self) -> &'static str {
        "ZIP decompression"
    }

    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport> {
        let started = Instant::now();
        let is_jar = strip_extension(path, JAR_EXTENSION).is_some();
        let recognised = is_jar || strip_extension(path, ZIP_EXTENSION).is_some();
        if !recognised || !fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
            return Err(AarError::WrongExtension {
                path: path.to_path_buf(),
                expected: if is_jar { JAR_EXTENSION } else { ZIP_EXTENSION },
            });
        }
        let dest = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let staging = tempfile::Builder::new()
            .prefix(".aar-partial-")
            .tempdir_in(&dest)?;
        extract(path, staging.path(), progress.as_ref())?;
        move_into_place(staging.path(), &dest)
            .map_err(|e| e.with_context("moving extracted entries"))?;
        tracing::debug!(archive = %path.display(), dest = %dest.display(), "zip extracted");

        Ok(StepReport {
            output: dest,
            message: took("Decompression", started),
        })
    }
}

fn extract(path: &Path, into: &Path, progress: &dyn ProgressSink) -> Result<()> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("read zip directory of {}", path.display()))?;
    let total = archive.len() as u64;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("read entry {i}"))?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                anyhow::anyhow!("entry {} escapes the target directory", entry.name())
            })?;
        let target = into.join(&relative);
        let written = if entry.is_dir() {
            fs::create_dir_all(&target)
        } else {
            copy_entry(&mut entry, &target)
        };
        written
            .map_err(|e| AarError::from(e).with_context(format!("extracting {}", entry.name())))?;
        progress.report(i as u64 + 1, total);
    }
    Ok(())
}

fn copy_entry(entry: &mut impl io::Read, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(entry, &mut out)?;
    Ok(())
}

/// Moves the staged tree under `dest`, merging into existing directories.
fn move_into_place(staging: &Path, dest: &Path) -> Result<()> {
    let entries: Vec<walkdir::DirEntry> = WalkDir::new(staging)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .context("walk staged entries")?;
    for entry in entries {
        let relative = entry.path().strip_prefix(staging).unwrap_or(entry.path());
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::rename(entry.path(), &target)?;
        }
    }
    Ok(())
}
