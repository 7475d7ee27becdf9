//! Lists the media files of a working directory.

use crate::error::CoreError;
use crate::fsutil::{is_hidden, relative_string};
use crate::models::{MediaFile, MediaKind};
use crate::sidecar::{has_caption, sidecar_path};
use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recursive: bool,
    pub exclude: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            exclude: crate::editor::SCRATCH_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ScanOptions {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            recursive: settings.recursive,
            exclude: settings.exclude.clone(),
        }
    }
}

/// Images and videos under `dir`, sorted by relative path. Hidden entries and
/// excluded globs are skipped; unreadable entries are logged and skipped.
pub fn list_media(dir: &Path, opts: &ScanOptions) -> anyhow::Result<Vec<MediaFile>> {
    if !dir.exists() {
        return Err(CoreError::NotFound(dir.to_path_buf()).into());
    }
    if !dir.is_dir() {
        return Err(CoreError::NotADirectory(dir.to_path_buf()).into());
    }
    let excludes = build_globset(&opts.exclude)?;

    let mut walker = WalkDir::new(dir).follow_links(true);
    if !opts.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    let entries = walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), dir, &excludes));
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = MediaKind::from_path(path) else {
            continue;
        };
        let relative = relative_string(path, dir);
        files.push(MediaFile {
            id: format!("{}-{}", kind.as_str(), relative),
            name: entry.file_name().to_string_lossy().to_string(),
            path: path.to_path_buf(),
            relative_path: relative,
            kind,
            has_caption: has_caption(path),
        });
    }
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    debug!(dir = %dir.display(), count = files.len(), "media listed");
    Ok(files)
}

/// Removes a media file and, best effort, its caption sidecar.
pub fn delete_media(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        return Err(CoreError::NotFound(path.to_path_buf()).into());
    }
    if !path.is_file() {
        return Err(CoreError::NotAFile(path.to_path_buf()).into());
    }
    fs::remove_file(path).with_context(|| format!("deleting {}", path.display()))?;
    let sidecar = sidecar_path(path);
    if sidecar.exists() {
        if let Err(err) = fs::remove_file(&sidecar) {
            warn!(path = %sidecar.display(), error = %err, "caption sidecar not removed");
        }
    }
    info!(path = %path.display(), "media deleted");
    Ok(())
}

/// Renames a media file within its directory, carrying the sidecar along.
/// `new_name` must be a bare file name of the same media kind.
pub fn rename_media(path: &Path, new_name: &str) -> anyhow::Result<PathBuf> {
    if !path.is_file() {
        return Err(CoreError::NotFound(path.to_path_buf()).into());
    }
    let bare = Path::new(new_name);
    if new_name.is_empty()
        || bare.file_name().map(|n| n != bare.as_os_str()).unwrap_or(true)
    {
        return Err(CoreError::InvalidInput(format!("not a plain file name: {new_name:?}")).into());
    }
    let from_kind = MediaKind::from_path(path).ok_or_else(|| CoreError::UnsupportedMedia(path.to_path_buf()))?;
    if MediaKind::from_path(bare) != Some(from_kind) {
        return Err(CoreError::InvalidInput(format!(
            "{new_name} is not a {} file name",
            from_kind.as_str()
        ))
        .into());
    }
    let target = path.with_file_name(new_name);
    if target.exists() {
        return Err(CoreError::InvalidInput(format!("{} already exists", target.display())).into());
    }
    // `b.png` shares `b.txt` with an existing `b.jpg`; never overwrite its caption.
    let old_sidecar = sidecar_path(path);
    let new_sidecar = sidecar_path(&target);
    let carry_sidecar = old_sidecar.exists() && old_sidecar != new_sidecar;
    if carry_sidecar && new_sidecar.exists() {
        return Err(CoreError::InvalidInput(format!(
            "caption {} already belongs to another file",
            new_sidecar.display()
        ))
        .into());
    }

    fs::rename(path, &target)
        .with_context(|| format!("renaming {} to {}", path.display(), target.display()))?;
    if carry_sidecar {
        if let Err(err) = fs::rename(&old_sidecar, &new_sidecar) {
            warn!(path = %old_sidecar.display(), error = %err, "caption sidecar not renamed");
        }
    }
    info!(from = %path.display(), to = %target.display(), "media renamed");
    Ok(target)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| CoreError::InvalidInput(format!("bad exclude pattern {pat:?}: {e}")))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, root: &Path, excludes: &GlobSet) -> bool {
    if is_hidden(path) {
        return false;
    }
    !is_excluded(path, root, excludes)
}

fn is_excluded(path: &Path, root: &Path, excludes: &GlobSet) -> bool {
    if let Some(name) = path.file_name() {
        if excludes.is_match(name) {
            return true;
        }
    }
    excludes.is_match(relative_string(path, root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn lists_media_sorted_with_captions() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        touch(&root.join("b.png"));
        touch(&root.join("b.txt"));
        touch(&root.join("a.MP4"));
        touch(&root.join("sub/c.webp"));
        touch(&root.join("notes.md"));
        touch(&root.join(".hidden/d.png"));
        touch(&root.join(".e.jpg"));
        touch(&root.join("b.captioner-tmp.png"));

        let files = list_media(root, &ScanOptions::default()).unwrap();
        let rels: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["a.MP4", "b.png", "sub/c.webp"]);
        assert_eq!(files[0].kind, MediaKind::Video);
        assert_eq!(files[0].id, "video-a.MP4");
        assert!(files[1].has_caption);
        assert!(!files[2].has_caption);
        assert_eq!(files[2].name, "c.webp");
    }

    #[test]
    fn non_recursive_and_exclude() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        touch(&root.join("a.png"));
        touch(&root.join("raw/b.png"));
        touch(&root.join("keep/c.gif"));

        let flat = ScanOptions {
            recursive: false,
            exclude: vec![],
        };
        assert_eq!(list_media(root, &flat).unwrap().len(), 1);

        let opts = ScanOptions {
            recursive: true,
            exclude: vec!["raw".into()],
        };
        let rels: Vec<_> = list_media(root, &opts)
            .unwrap()
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        assert_eq!(rels, vec!["a.png", "keep/c.gif"]);
    }

    #[test]
    fn listing_a_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.png");
        touch(&file);
        assert!(list_media(&file, &ScanOptions::default()).is_err());
        assert!(list_media(&temp.path().join("missing"), &ScanOptions::default()).is_err());
    }

    #[test]
    fn delete_removes_sidecar_too() {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("a.png");
        touch(&media);
        touch(&temp.path().join("a.txt"));
        delete_media(&media).unwrap();
        assert!(!media.exists());
        assert!(!temp.path().join("a.txt").exists());
        assert!(delete_media(&media).is_err());
    }

    #[test]
    fn rename_carries_sidecar() {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("a.png");
        touch(&media);
        fs::write(temp.path().join("a.txt"), "cap").unwrap();

        let target = rename_media(&media, "b.jpg").unwrap();
        assert_eq!(target, temp.path().join("b.jpg"));
        assert_eq!(fs::read_to_string(temp.path().join("b.txt")).unwrap(), "cap");
        assert!(!temp.path().join("a.txt").exists());

        assert!(rename_media(&target, "c.mp4").is_err());
        assert!(rename_media(&target, "../c.png").is_err());
        touch(&temp.path().join("d.png"));
        assert!(rename_media(&target, "d.png").is_err());
    }

    #[test]
    fn rename_refuses_to_take_another_files_caption() {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("a.png");
        touch(&media);
        fs::write(temp.path().join("a.txt"), "caption of a").unwrap();
        touch(&temp.path().join("b.jpg"));
        fs::write(temp.path().join("b.txt"), "caption of b.jpg").unwrap();

        let err = rename_media(&media, "b.png").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::InvalidInput(_))
        ));
        assert!(media.exists());
        assert!(!temp.path().join("b.png").exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("b.txt")).unwrap(),
            "caption of b.jpg"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("a.txt")).unwrap(),
            "caption of a"
        );
    }

    #[test]
    fn rename_keeps_shared_sidecar_when_only_extension_changes() {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("a.png");
        touch(&media);
        fs::write(temp.path().join("a.txt"), "cap").unwrap();

        rename_media(&media, "a.jpg").unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).unwrap(), "cap");
    }
}
