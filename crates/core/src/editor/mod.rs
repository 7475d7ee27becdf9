//! In-place media editing: image/video crop and video trim.
//!
//! Every edit writes into a scratch sibling first and then swaps it over the
//! original with [`commit_replacement`].

pub mod crop;
pub mod progress;
pub mod trim;

pub use crop::{crop_image, crop_video, save_image_data_url, CropParams};
pub use progress::EditProgress;
pub use trim::{trim_video, TrimRange};

use crate::fsutil::tagged_sibling;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SCRATCH_TAG: &str = "captioner-tmp";
pub const BACKUP_TAG: &str = "captioner-bak";

/// Globs matching leftover scratch and backup files; excluded from listings.
pub const SCRATCH_PATTERNS: &[&str] = &["*.captioner-tmp.*", "*.captioner-bak.*"];

pub fn scratch_path(path: &Path) -> PathBuf {
    tagged_sibling(path, SCRATCH_TAG)
}

pub fn backup_path(path: &Path) -> PathBuf {
    tagged_sibling(path, BACKUP_TAG)
}

/// Replaces `original` with `produced`: back up, rename over, restore the
/// backup if the rename fails, then drop the backup.
pub fn commit_replacement(original: &Path, produced: &Path) -> anyhow::Result<()> {
    let backup = backup_path(original);
    fs::copy(original, &backup)
        .with_context(|| format!("backing up {}", original.display()))?;

    if let Err(err) = fs::rename(produced, original) {
        warn!(path = %original.display(), error = %err, "replace failed, restoring backup");
        if let Err(restore) = fs::copy(&backup, original) {
            warn!(path = %original.display(), error = %restore, "restore from backup failed");
        }
        let _ = fs::remove_file(produced);
        let _ = fs::remove_file(&backup);
        return Err(err).with_context(|| format!("replacing {}", original.display()));
    }

    if let Err(err) = fs::remove_file(&backup) {
        warn!(path = %backup.display(), error = %err, "could not remove backup");
    }
    debug!(path = %original.display(), "replaced");
    Ok(())
}
