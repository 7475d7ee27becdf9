//! Export of a working directory as a timestamped folder or zip archive.

use crate::error::CoreError;
use crate::fsutil::{is_within, relative_string};
use crate::project::copy_contents;
use anyhow::Context;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const EXPORT_PREFIX: &str = "captioner_export";

/// `captioner_export_<source name>_<YYYYmmdd_HHMMSS>`
pub fn export_name(source: &Path, at: DateTime<Local>) -> anyhow::Result<String> {
    let name = source
        .file_name()
        .ok_or_else(|| CoreError::InvalidInput(format!("cannot export {}", source.display())))?
        .to_string_lossy();
    Ok(format!(
        "{}_{}_{}",
        EXPORT_PREFIX,
        name,
        at.format("%Y%m%d_%H%M%S")
    ))
}

/// Copies `source` to a new folder (or `.zip`) under `destination` and returns its path.
/// Partial output is left in place if a copy fails midway.
pub fn export_directory(source: &Path, destination: &Path, as_zip: bool) -> anyhow::Result<PathBuf> {
    if !source.exists() {
        return Err(CoreError::NotFound(source.to_path_buf()).into());
    }
    if !source.is_dir() {
        return Err(CoreError::NotADirectory(source.to_path_buf()).into());
    }
    if is_within(destination, source) {
        return Err(CoreError::InvalidInput(format!(
            "export destination {} lies inside the source directory",
            destination.display()
        ))
        .into());
    }
    fs::create_dir_all(destination)
        .with_context(|| format!("creating {}", destination.display()))?;

    let name = export_name(&crate::fsutil::normalize(source), Local::now())?;
    if as_zip {
        let target = destination.join(format!("{name}.zip"));
        let files = zip_directory(source, &target)?;
        info!(path = %target.display(), files, "exported archive");
        Ok(target)
    } else {
        let target = destination.join(name);
        let bytes = copy_contents(source, &target)?;
        info!(path = %target.display(), bytes, "exported directory");
        Ok(target)
    }
}

/// Writes every file and directory under `src` into a deflated archive at
/// `zip_path`, with forward-slash entry names. Returns the file count.
pub fn zip_directory(src: &Path, zip_path: &Path) -> anyhow::Result<u64> {
    let file = fs::File::create(zip_path)
        .with_context(|| format!("creating {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let dir_options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    let file_options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut count = 0u64;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        let name = relative_string(entry.path(), src);
        if entry.file_type().is_dir() {
            zip.add_directory(name, dir_options)?;
        } else {
            zip.start_file(name, file_options)?;
            let mut input = fs::File::open(entry.path())
                .with_context(|| format!("opening {}", entry.path().display()))?;
            io::copy(&mut input, &mut zip)
                .with_context(|| format!("archiving {}", entry.path().display()))?;
            count += 1;
        }
    }
    zip.finish().context("finalizing archive")?;
    Ok(count)
}
