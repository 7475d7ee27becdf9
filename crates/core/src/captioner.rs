//! Batch caption generation against a vision provider.

use crate::config::Settings;
use crate::error::CoreError;
use crate::ffmpeg::Ffmpeg;
use crate::models::{CaptionOutcome, MediaKind};
use crate::thumbnail::{detect_kind, encode_jpeg};
use anyhow::Context;
use image::DynamicImage;
use providers::{CaptionProvider, CaptionRequest, DetailLevel, InlineImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Longest edge of the image sent to the provider.
pub const MAX_UPLOAD_EDGE: u32 = 2048;

#[derive(Debug, Clone)]
pub struct CaptionJob {
    pub prompt: String,
    pub detail: Option<DetailLevel>,
}

impl CaptionJob {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            prompt: settings.prompt.clone(),
            detail: settings.detail(),
        }
    }
}

/// JPEG payload for `path`: the image itself, or a frame from the middle of a video.
pub fn encode_for_upload(path: &Path, ffmpeg: &Ffmpeg) -> anyhow::Result<InlineImage> {
    if !path.is_file() {
        return Err(CoreError::NotFound(path.to_path_buf()).into());
    }
    let img = match detect_kind(path)? {
        MediaKind::Image => {
            image::open(path).with_context(|| format!("decoding {}", path.display()))?
        }
        MediaKind::Video => video_frame(path, ffmpeg)?,
    };
    let img = cap_edge(img, MAX_UPLOAD_EDGE);
    Ok(InlineImage::from_bytes("image/jpeg", &encode_jpeg(&img)?))
}

fn video_frame(path: &Path, ffmpeg: &Ffmpeg) -> anyhow::Result<DynamicImage> {
    let at = match ffmpeg.probe_duration(path) {
        Ok(d) if d > 0.0 => Some(d / 2.0),
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "duration probe failed, using first frame");
            None
        }
    };
    let scratch = tempfile::tempdir().context("creating frame directory")?;
    let frame = scratch.path().join("frame.jpg");
    ffmpeg.extract_frame(path, at, &frame)?;
    image::open(&frame).with_context(|| format!("decoding frame of {}", path.display()))
}

fn cap_edge(img: DynamicImage, max_edge: u32) -> DynamicImage {
    if img.width().max(img.height()) > max_edge {
        img.resize(max_edge, max_edge, image::imageops::FilterType::Lanczos3)
    } else {
        img
    }
}

pub async fn generate_caption(
    provider: &dyn CaptionProvider,
    path: &Path,
    job: &CaptionJob,
    ffmpeg: &Ffmpeg,
) -> anyhow::Result<String> {
    let image = {
        let path = path.to_path_buf();
        let ffmpeg = ffmpeg.clone();
        tokio::task::spawn_blocking(move || encode_for_upload(&path, &ffmpeg)).await??
    };
    let request = CaptionRequest {
        prompt: job.prompt.clone(),
        image,
        detail: job.detail,
    };
    let caption = provider
        .caption(&request)
        .await
        .map_err(CoreError::Provider)?;
    debug!(path = %path.display(), chars = caption.len(), "caption generated");
    Ok(caption)
}

/// One request per file with at most `concurrency` in flight. Always returns
/// one outcome per path, in input order.
pub async fn generate_captions(
    provider: Arc<dyn CaptionProvider>,
    paths: Vec<PathBuf>,
    job: CaptionJob,
    ffmpeg: Ffmpeg,
    concurrency: usize,
) -> Vec<CaptionOutcome> {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let job = Arc::new(job);
    let mut set = JoinSet::new();
    for (idx, path) in paths.iter().cloned().enumerate() {
        let sem = sem.clone();
        let provider = provider.clone();
        let job = job.clone();
        let ffmpeg = ffmpeg.clone();
        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            let outcome = match generate_caption(provider.as_ref(), &path, &job, &ffmpeg).await {
                Ok(caption) => CaptionOutcome::ok(path, caption),
                Err(err) => CaptionOutcome::failed(path, format!("{err:#}")),
            };
            (idx, outcome)
        });
    }

    let mut slots: Vec<Option<CaptionOutcome>> = vec![None; paths.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, outcome)) => {
                if let Some(err) = &outcome.error {
                    warn!(path = %outcome.path.display(), error = %err, "caption failed");
                }
                slots[idx] = Some(outcome);
            }
            Err(err) => warn!(error = %err, "caption task aborted"),
        }
    }
    let outcomes: Vec<CaptionOutcome> = slots
        .into_iter()
        .zip(paths)
        .map(|(slot, path)| {
            slot.unwrap_or_else(|| CaptionOutcome::failed(path, "caption task aborted".into()))
        })
        .collect();
    let ok = outcomes.iter().filter(|o| o.is_ok()).count();
    info!(total = outcomes.len(), ok, failed = outcomes.len() - ok, "caption batch finished");
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use providers::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CaptionProvider for Echo {
        async fn caption(&self, request: &CaptionRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.image.mime_type != "image/jpeg" {
                return Err(ProviderError::EmptyCaption);
            }
            Ok(format!("{} ({:?})", request.prompt, request.detail))
        }
    }

    #[test]
    fn large_images_are_capped() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("big.png");
        image::RgbImage::new(3000, 1500).save(&path).unwrap();
        let inline = encode_for_upload(&path, &Ffmpeg::default()).unwrap();
        assert_eq!(inline.mime_type, "image/jpeg");
        let bytes = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            inline.data.as_bytes(),
        )
        .unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (2048, 1024));
    }

    #[tokio::test]
    async fn batch_returns_every_path_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let good = temp.path().join("a.png");
        image::RgbImage::new(8, 8).save(&good).unwrap();
        let missing = temp.path().join("b.png");

        let provider = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let job = CaptionJob {
            prompt: "describe".into(),
            detail: Some(DetailLevel::Low),
        };
        let out = generate_captions(
            provider.clone(),
            vec![good.clone(), missing.clone(), good.clone()],
            job,
            Ffmpeg::default(),
            2,
        )
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].caption.as_deref(), Some("describe (Some(Low))"));
        assert_eq!(out[1].path, missing);
        assert!(out[1].error.as_deref().unwrap().contains("does not exist"));
        assert!(out[2].is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
