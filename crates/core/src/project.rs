//! Working copies ("projects") kept under the application's data root.

use crate::error::CoreError;
use crate::fsutil::{is_within, normalize};
use crate::models::ProjectDirectory;
use anyhow::Context;
use chrono::{DateTime, Utc};
use fs_extra::dir::{get_size, CopyOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Copies the contents of `source` into `destination`, clearing any existing
/// destination first. Not rolled back on failure.
/// `destination` must be disjoint from `source`.
pub fn duplicate_directory(source: &Path, destination: &Path) -> anyhow::Result<PathBuf> {
    if !source.exists() {
        return Err(CoreError::NotFound(source.to_path_buf()).into());
    }
    if !source.is_dir() {
        return Err(CoreError::NotADirectory(source.to_path_buf()).into());
    }
    if is_within(destination, source) {
        return Err(CoreError::InvalidInput(format!(
            "destination {} lies inside the source directory",
            destination.display()
        ))
        .into());
    }
    if is_within(source, destination) {
        return Err(CoreError::InvalidInput(format!(
            "destination {} contains the source directory",
            destination.display()
        ))
        .into());
    }
    if destination.exists() {
        fs::remove_dir_all(destination)
            .with_context(|| format!("clearing {}", destination.display()))?;
    }
    let bytes = copy_contents(source, destination)?;
    info!(
        from = %source.display(),
        to = %destination.display(),
        bytes,
        "directory duplicated"
    );
    Ok(destination.to_path_buf())
}

/// Copies everything under `source` into `destination`, which must not exist
/// yet. Returns the number of bytes copied.
pub(crate) fn copy_contents(source: &Path, destination: &Path) -> anyhow::Result<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let options = CopyOptions::new().overwrite(true).copy_inside(true);
    fs_extra::dir::copy(source, destination, &options).with_context(|| {
        format!("copying {} to {}", source.display(), destination.display())
    })
}

#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Duplicates `source` into `<root>/<source name>`, replacing an older copy.
    pub fn import(&self, source: &Path) -> anyhow::Result<PathBuf> {
        let source = normalize(source);
        let name = source
            .file_name()
            .ok_or_else(|| CoreError::InvalidInput(format!("cannot import {}", source.display())))?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        duplicate_directory(&source, &self.root.join(name))
    }

    /// Every directory directly under the root, newest first.
    pub fn list(&self) -> anyhow::Result<Vec<ProjectDirectory>> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)
                .with_context(|| format!("creating {}", self.root.display()))?;
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("reading {}", self.root.display()))?;

        let mut projects = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable project entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let meta = match fs::metadata(&path) {
                Ok(m) => m,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping project without metadata");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let size_bytes = get_size(&path).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "project size unavailable");
                0
            });
            let modified = meta.modified().ok();
            projects.push((
                modified,
                ProjectDirectory {
                    id: name.clone(),
                    name,
                    size_bytes,
                    modified: format_time(modified),
                    created: format_time(meta.created().ok()),
                    path,
                },
            ));
        }
        Ok(newest_first(projects))
    }

    /// Deletes a project directory. Only directories strictly inside the root qualify.
    pub fn delete(&self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            return Err(CoreError::NotFound(path.to_path_buf()).into());
        }
        if !path.is_dir() {
            return Err(CoreError::NotADirectory(path.to_path_buf()).into());
        }
        let target = normalize(path);
        let root = normalize(&self.root);
        if target == root || !target.starts_with(&root) {
            return Err(CoreError::OutsideWorkingRoot(path.to_path_buf()).into());
        }
        fs::remove_dir_all(&target).with_context(|| format!("deleting {}", target.display()))?;
        info!(path = %target.display(), "project deleted");
        Ok(())
    }

    /// A project name (directory under the root) or any existing directory path.
    pub fn resolve(&self, name_or_path: &str) -> anyhow::Result<PathBuf> {
        let by_name = self.root.join(name_or_path);
        if !name_or_path.contains(['/', '\\']) && by_name.is_dir() {
            return Ok(by_name);
        }
        let path = PathBuf::from(name_or_path);
        if path.is_dir() {
            return Ok(path);
        }
        Err(CoreError::NotFound(path).into())
    }
}

/// Sorts on the raw modification time; entries without one go last.
fn newest_first(mut projects: Vec<(Option<SystemTime>, ProjectDirectory)>) -> Vec<ProjectDirectory> {
    projects.sort_by(|(ta, a), (tb, b)| tb.cmp(ta).then_with(|| a.name.cmp(&b.name)));
    projects.into_iter().map(|(_, p)| p).collect()
}

fn format_time(time: Option<SystemTime>) -> String {
    match time {
        Some(t) => DateTime::<Utc>::from(t).format(TIME_FORMAT).to_string(),
        None => "Unknown".to_string(),
    }
}
