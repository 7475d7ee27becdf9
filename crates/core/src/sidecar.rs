//! Caption sidecars: `<basename>.txt` next to each media file.

use crate::models::CaptionOutcome;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn sidecar_path(media: &Path) -> PathBuf {
    media.with_extension("txt")
}

pub fn has_caption(media: &Path) -> bool {
    sidecar_path(media).is_file()
}

/// Caption text, or an empty string when no sidecar exists.
pub fn read_caption(media: &Path) -> anyhow::Result<String> {
    let path = sidecar_path(media);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Overwrites the sidecar with `content`, creating parent directories as needed.
pub fn write_caption(media: &Path, content: &str) -> anyhow::Result<PathBuf> {
    let path = sidecar_path(media);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), bytes = content.len(), "caption saved");
    Ok(path)
}

/// Writes a sidecar for every successful outcome. Write failures are logged
/// and skipped; returns how many sidecars were written.
pub fn save_outcomes(outcomes: &[CaptionOutcome]) -> usize {
    let mut written = 0;
    for outcome in outcomes {
        let Some(caption) = outcome.caption.as_deref() else {
            continue;
        };
        match write_caption(&outcome.path, caption) {
            Ok(_) => written += 1,
            Err(err) => warn!(path = %outcome.path.display(), error = %err, "caption not saved"),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_replaces_extension() {
        assert_eq!(sidecar_path(Path::new("/w/a/cat.JPG")), PathBuf::from("/w/a/cat.txt"));
        assert_eq!(sidecar_path(Path::new("clip.tar.mp4")), PathBuf::from("clip.tar.txt"));
    }

    #[test]
    fn write_then_read_is_exact() {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("nested/dir/cat.png");
        assert!(!has_caption(&media));
        assert_eq!(read_caption(&media).unwrap(), "");

        let text = "a cat, sitting\non a mat  \n";
        write_caption(&media, text).unwrap();
        assert!(has_caption(&media));
        assert_eq!(read_caption(&media).unwrap(), text);

        write_caption(&media, "short").unwrap();
        assert_eq!(read_caption(&media).unwrap(), "short");
    }

    #[test]
    fn save_outcomes_skips_failures() {
        let temp = tempfile::tempdir().unwrap();
        let ok = temp.path().join("a.png");
        let bad = temp.path().join("b.png");
        let outcomes = vec![
            CaptionOutcome::ok(ok.clone(), "caption a".into()),
            CaptionOutcome::failed(bad.clone(), "timeout".into()),
        ];
        assert_eq!(save_outcomes(&outcomes), 1);
        assert_eq!(read_caption(&ok).unwrap(), "caption a");
        assert!(!has_caption(&bad));
    }
}
