use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub relative_path: String,
    #[serde(rename = "file_type")]
    pub kind: MediaKind,
    pub has_caption: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDirectory {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: String,
    pub created: String,
}

/// Result of captioning one file in a batch. Exactly one of `caption`/`error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionOutcome {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaptionOutcome {
    pub fn ok(path: PathBuf, caption: String) -> Self {
        Self {
            path,
            caption: Some(caption),
            error: None,
        }
    }

    pub fn failed(path: PathBuf, error: String) -> Self {
        Self {
            path,
            caption: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.caption.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailOutcome {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(MediaKind::from_path(Path::new("a/B.JPG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("clip.webm")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("clip.MOV")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn media_file_serializes_kind_as_file_type() {
        let file = MediaFile {
            id: "image-a.png".into(),
            name: "a.png".into(),
            path: PathBuf::from("/w/a.png"),
            relative_path: "a.png".into(),
            kind: MediaKind::Image,
            has_caption: false,
        };
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["file_type"], "image");
        assert_eq!(value["has_caption"], false);
    }
}
