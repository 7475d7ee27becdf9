//! Storage layer: application data root and on-disk layout.
//!
//! Holds data-root resolution and small JSON persistence helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DATA_DIR_ENV: &str = "CAPTIONER_DATA_DIR";
const APP_DIR_NAME: &str = "captioner";

#[derive(Debug, Clone)]
pub struct AppDirs {
    root: PathBuf,
}

impl AppDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Explicit override first, then `CAPTIONER_DATA_DIR`, then the platform data dir.
    pub fn resolve(override_root: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(root) = override_root {
            return Ok(Self::new(root));
        }
        if let Some(root) = std::env::var_os(DATA_DIR_ENV) {
            return Ok(Self::new(PathBuf::from(root)));
        }
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| anyhow::anyhow!("could not determine a data directory"))?;
        Ok(Self::new(base.join(APP_DIR_NAME)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn working_dir(&self) -> PathBuf {
        self.root.join("working")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join("thumbnails")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Creates the root and its fixed subdirectories. Safe to run repeatedly.
    pub fn ensure(&self) -> anyhow::Result<()> {
        for dir in [self.root.clone(), self.working_dir(), self.thumbnails_dir()] {
            fs::create_dir_all(&dir)?;
        }
        debug!(root = %self.root.display(), "data root ready");
        Ok(())
    }
}

/// Returns `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Writes pretty JSON through a sibling temp file so readers never see a torn document.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
