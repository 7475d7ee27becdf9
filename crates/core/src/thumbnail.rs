//! JPEG thumbnails for images and videos, with an optional on-disk cache.

use crate::error::CoreError;
use crate::ffmpeg::Ffmpeg;
use crate::models::{MediaKind, ThumbnailOutcome};
use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const JPEG_QUALITY: u8 = 80;
/// Files above this size get two-pass downsampling when much larger than the target.
const LARGE_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct Thumbnailer {
    ffmpeg: Ffmpeg,
    cache_dir: Option<PathBuf>,
}

impl Thumbnailer {
    pub fn new(ffmpeg: Ffmpeg) -> Self {
        Self {
            ffmpeg,
            cache_dir: None,
        }
    }

    pub fn with_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// JPEG bytes of a thumbnail fitting in `max_size` x `max_size`.
    pub fn thumbnail(&self, path: &Path, max_size: u32) -> anyhow::Result<Vec<u8>> {
        if max_size == 0 {
            return Err(CoreError::InvalidInput("thumbnail size must be positive".into()).into());
        }
        let meta = fs::metadata(path).map_err(|_| CoreError::NotFound(path.to_path_buf()))?;
        if !meta.is_file() {
            return Err(CoreError::NotAFile(path.to_path_buf()).into());
        }

        let cached = self.cache_entry(path, max_size, &meta);
        if let Some(entry) = &cached {
            if let Ok(bytes) = fs::read(entry) {
                debug!(path = %path.display(), "thumbnail cache hit");
                return Ok(bytes);
            }
        }

        let img = match detect_kind(path)? {
            MediaKind::Image => {
                image::open(path).with_context(|| format!("decoding {}", path.display()))?
            }
            MediaKind::Video => self.first_frame(path)?,
        };
        let thumb = downsample(img, meta.len(), max_size);
        let bytes = encode_jpeg(&thumb)?;

        if let Some(entry) = cached {
            if let Some(parent) = entry.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %err, "thumbnail cache dir not created");
                }
            }
            if let Err(err) = fs::write(&entry, &bytes) {
                warn!(path = %entry.display(), error = %err, "thumbnail cache write failed");
            }
        }
        Ok(bytes)
    }

    pub fn thumbnail_data_url(&self, path: &Path, max_size: u32) -> anyhow::Result<String> {
        let bytes = self.thumbnail(path, max_size)?;
        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes)))
    }

    fn first_frame(&self, video: &Path) -> anyhow::Result<DynamicImage> {
        let scratch = tempfile::tempdir().context("creating frame directory")?;
        let frame = scratch.path().join("frame.jpg");
        self.ffmpeg.extract_frame(video, None, &frame)?;
        image::open(&frame).with_context(|| format!("decoding frame of {}", video.display()))
    }

    fn cache_entry(&self, path: &Path, max_size: u32, meta: &fs::Metadata) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&max_size.to_le_bytes());
        hasher.update(&meta.len().to_le_bytes());
        hasher.update(&mtime.to_le_bytes());
        Some(dir.join(format!("{}.jpg", hasher.finalize().to_hex())))
    }
}

/// Kind by extension, falling back to magic-number sniffing.
pub fn detect_kind(path: &Path) -> anyhow::Result<MediaKind> {
    if let Some(kind) = MediaKind::from_path(path) {
        return Ok(kind);
    }
    let sniffed = infer::get_from_path(path)
        .with_context(|| format!("reading {}", path.display()))?;
    match sniffed.map(|t| t.matcher_type()) {
        Some(infer::MatcherType::Image) => Ok(MediaKind::Image),
        Some(infer::MatcherType::Video) => Ok(MediaKind::Video),
        _ => Err(CoreError::UnsupportedMedia(path.to_path_buf()).into()),
    }
}

fn downsample(img: DynamicImage, file_len: u64, max_size: u32) -> DynamicImage {
    let big = max_size.saturating_mul(4);
    if file_len > LARGE_FILE_BYTES && (img.width() > big || img.height() > big) {
        let mid = max_size.saturating_mul(2);
        img.resize(mid, mid, FilterType::Triangle)
            .resize(max_size, max_size, FilterType::Lanczos3)
    } else {
        img.thumbnail(max_size, max_size)
    }
}

pub(crate) fn encode_jpeg(img: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("encoding JPEG")?;
    Ok(buf)
}

/// Thumbnails for `paths`, at most `concurrency` decoding at once. One outcome
/// per input in input order; failures are recorded, not raised.
pub async fn generate_thumbnails(
    thumbnailer: Arc<Thumbnailer>,
    paths: Vec<PathBuf>,
    max_size: u32,
    concurrency: usize,
) -> Vec<ThumbnailOutcome> {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();
    for (idx, path) in paths.iter().cloned().enumerate() {
        let sem = sem.clone();
        let thumbnailer = thumbnailer.clone();
        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            let job_path = path.clone();
            let result = tokio::task::spawn_blocking(move || {
                thumbnailer.thumbnail_data_url(&job_path, max_size)
            })
            .await;
            let outcome = match result {
                Ok(Ok(url)) => ThumbnailOutcome {
                    path,
                    data_url: Some(url),
                    error: None,
                },
                Ok(Err(err)) => ThumbnailOutcome {
                    path,
                    data_url: None,
                    error: Some(format!("{err:#}")),
                },
                Err(join) => ThumbnailOutcome {
                    path,
                    data_url: None,
                    error: Some(format!("thumbnail task failed: {join}")),
                },
            };
            (idx, outcome)
        });
    }

    let mut slots: Vec<Option<ThumbnailOutcome>> = vec![None; paths.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, outcome)) => {
                if let Some(err) = &outcome.error {
                    warn!(path = %outcome.path.display(), error = %err, "thumbnail failed");
                }
                slots[idx] = Some(outcome);
            }
            Err(err) => warn!(error = %err, "thumbnail task aborted"),
        }
    }
    slots
        .into_iter()
        .zip(paths)
        .map(|(slot, path)| {
            slot.unwrap_or_else(|| ThumbnailOutcome {
                path,
                data_url: None,
                error: Some("thumbnail task aborted".into()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn write_png(path: &Path, w: u32, h: u32) {
        RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, 128]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn thumbnail_fits_bounds_and_is_jpeg() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("wide.png");
        write_png(&path, 400, 100);

        let bytes = Thumbnailer::default().thumbnail(&path, 64).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), 64);
        assert_eq!(img.height(), 16);
    }

    #[test]
    fn sniffs_media_without_extension() {
        let temp = tempfile::tempdir().unwrap();
        let png = temp.path().join("pic.png");
        write_png(&png, 10, 10);
        let bare = temp.path().join("upload");
        fs::copy(&png, &bare).unwrap();
        assert_eq!(detect_kind(&bare).unwrap(), MediaKind::Image);

        let text = temp.path().join("notes");
        fs::write(&text, "plain words").unwrap();
        assert!(Thumbnailer::default().thumbnail(&text, 32).is_err());
    }

    #[test]
    fn cache_is_reused_until_file_changes() {
        let temp = tempfile::tempdir().unwrap();
        let cache = temp.path().join("cache");
        let path = temp.path().join("a.png");
        write_png(&path, 50, 50);

        let thumbs = Thumbnailer::default().with_cache(&cache);
        let first = thumbs.thumbnail(&path, 20).unwrap();
        assert_eq!(fs::read_dir(&cache).unwrap().count(), 1);
        assert_eq!(thumbs.thumbnail(&path, 20).unwrap(), first);

        thumbs.thumbnail(&path, 30).unwrap();
        assert_eq!(fs::read_dir(&cache).unwrap().count(), 2);
    }

    #[test]
    fn unwritable_cache_still_returns_thumbnail() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("cache");
        fs::write(&blocker, b"not a directory").unwrap();
        let path = temp.path().join("a.png");
        write_png(&path, 40, 40);

        let bytes = Thumbnailer::default()
            .with_cache(&blocker)
            .thumbnail(&path, 16)
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(blocker.is_file());
    }

    #[tokio::test]
    async fn batch_keeps_order_and_isolates_failures() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a.png");
        let b = temp.path().join("missing.png");
        let c = temp.path().join("c.gif");
        write_png(&a, 30, 30);
        image::RgbaImage::new(5, 5).save(&c).unwrap();

        let out = generate_thumbnails(
            Arc::new(Thumbnailer::default()),
            vec![a.clone(), b.clone(), c.clone()],
            16,
            2,
        )
        .await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].path, a);
        assert!(out[0].data_url.as_deref().unwrap().starts_with("data:image/jpeg;base64,"));
        assert_eq!(out[1].path, b);
        assert!(out[1].error.is_some());
        assert!(out[2].data_url.is_some());
    }
}
