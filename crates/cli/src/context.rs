//! Per-invocation state: data root, settings and the services built from them.

use captioner_core::config::{self, Settings};
use captioner_core::ffmpeg::Ffmpeg;
use captioner_core::pipeline;
use captioner_core::project::ProjectStore;
use captioner_core::scanner::ScanOptions;
use captioner_core::thumbnail::Thumbnailer;
use providers::CaptionProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::AppDirs;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AppContext {
    pub dirs: AppDirs,
    pub settings_path: PathBuf,
    pub settings: Settings,
}

impl AppContext {
    pub fn load(data_dir: Option<&Path>, settings_file: Option<&Path>) -> anyhow::Result<Self> {
        let dirs = AppDirs::resolve(data_dir)?;
        dirs.ensure()?;
        let settings_path = settings_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.settings_path());
        let settings = config::load(Some(&settings_path))?;
        debug!(root = %dirs.root().display(), settings = %settings_path.display(), "context ready");
        Ok(Self {
            dirs,
            settings_path,
            settings,
        })
    }

    pub fn projects(&self) -> ProjectStore {
        ProjectStore::new(self.dirs.working_dir())
    }

    pub fn ffmpeg(&self) -> Ffmpeg {
        Ffmpeg::from_settings(&self.settings)
    }

    pub fn thumbnailer(&self) -> Thumbnailer {
        Thumbnailer::new(self.ffmpeg()).with_cache(self.dirs.thumbnails_dir())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::from_settings(&self.settings)
    }

    /// A project name under the working root, or a directory path.
    pub fn resolve_dir(&self, arg: &str) -> anyhow::Result<PathBuf> {
        self.projects().resolve(arg)
    }

    pub fn provider(&self, name: Option<&str>) -> anyhow::Result<Arc<dyn CaptionProvider>> {
        pipeline::resolve_provider(&self.settings, name)
    }

    /// Settings as stored on disk, without environment overrides.
    pub fn stored_settings(&self) -> anyhow::Result<Settings> {
        Ok(storage::read_json::<Settings>(&self.settings_path)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        config::save(&self.settings_path, settings)
    }
}
