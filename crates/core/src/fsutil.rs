//! Path helpers shared by the scanner, projects, export and editing.

use std::path::{Path, PathBuf};

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// `path` relative to `base`, with forward slashes on every platform.
pub fn relative_string(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Canonical form of `path`; for paths that do not exist yet, the canonical
/// form of the nearest existing ancestor with the remainder appended.
pub fn normalize(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            normalize(parent).join(name)
        }
        _ => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// True when `inner` is `outer` or lies beneath it.
pub fn is_within(inner: &Path, outer: &Path) -> bool {
    normalize(inner).starts_with(normalize(outer))
}

/// Path next to `path` with `tag` inserted before the extension,
/// e.g. `clip.mp4` + `captioner-tmp` -> `clip.captioner-tmp.mp4`.
pub fn tagged_sibling(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}.{}", stem, tag),
    };
    path.with_file_name(name)
}
