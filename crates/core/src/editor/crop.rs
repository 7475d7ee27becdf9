use super::{commit_replacement, scratch_path};
use crate::error::CoreError;
use crate::ffmpeg::Ffmpeg;
use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Crop rectangle in the coordinates of the rotated and flipped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropParams {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub rotation: i32,
    #[serde(default)]
    pub flip_h: bool,
    #[serde(default)]
    pub flip_v: bool,
}

impl CropParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::InvalidInput(
                "crop width and height must be positive".into(),
            ));
        }
        if self.rotation % 90 != 0 {
            return Err(CoreError::InvalidInput(format!(
                "rotation must be a multiple of 90 degrees, got {}",
                self.rotation
            )));
        }
        Ok(())
    }

    /// Rotation folded into `0..360`.
    pub fn normalized_rotation(&self) -> i32 {
        self.rotation.rem_euclid(360)
    }

    /// ffmpeg `-vf` chain: rotate, flip, then crop. Width and height are
    /// rounded down to even values since most encoders reject odd sizes.
    pub fn video_filter_chain(&self) -> String {
        let mut filters: Vec<String> = Vec::new();
        match self.normalized_rotation() {
            90 => filters.push("transpose=1".into()),
            180 => {
                filters.push("transpose=1".into());
                filters.push("transpose=1".into());
            }
            270 => filters.push("transpose=2".into()),
            _ => {}
        }
        if self.flip_h {
            filters.push("hflip".into());
        }
        if self.flip_v {
            filters.push("vflip".into());
        }
        let w = (self.width & !1).max(2);
        let h = (self.height & !1).max(2);
        filters.push(format!("crop={}:{}:{}:{}", w, h, self.x, self.y));
        filters.join(",")
    }

    fn apply(&self, img: DynamicImage) -> Result<DynamicImage, CoreError> {
        let img = match self.normalized_rotation() {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            _ => img,
        };
        let img = if self.flip_h { img.fliph() } else { img };
        let img = if self.flip_v { img.flipv() } else { img };

        let (w, h) = (img.width(), img.height());
        if self.x >= w || self.y >= h {
            return Err(CoreError::InvalidInput(format!(
                "crop origin ({}, {}) lies outside the {}x{} image",
                self.x, self.y, w, h
            )));
        }
        let cw = self.width.min(w - self.x);
        let ch = self.height.min(h - self.y);
        Ok(img.crop_imm(self.x, self.y, cw, ch))
    }
}

/// Crops an image in memory and overwrites it in its original format.
/// Returns the resulting dimensions.
pub fn crop_image(path: &Path, params: &CropParams) -> anyhow::Result<(u32, u32)> {
    params.validate()?;
    if !path.is_file() {
        return Err(CoreError::NotFound(path.to_path_buf()).into());
    }
    let format = ImageFormat::from_path(path)
        .map_err(|_| CoreError::UnsupportedMedia(path.to_path_buf()))?;
    let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    let cropped = params.apply(img)?;
    let dims = (cropped.width(), cropped.height());

    let cropped = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(cropped.to_rgb8()),
        _ => cropped,
    };
    let scratch = scratch_path(path);
    if let Err(err) = cropped.save_with_format(&scratch, format) {
        let _ = fs::remove_file(&scratch);
        return Err(err).with_context(|| format!("encoding {}", scratch.display()));
    }
    commit_replacement(path, &scratch)?;
    info!(path = %path.display(), width = dims.0, height = dims.1, "image cropped");
    Ok(dims)
}

const WEBM_CODEC_ARGS: &[&str] = &[
    "-c:v", "libvpx-vp9", "-crf", "30", "-b:v", "0", "-c:a", "libopus",
];
const H264_CODEC_ARGS: &[&str] = &[
    "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a", "192k",
];

/// Output codec arguments for a re-encoded video, chosen by container.
pub(crate) fn codec_args_for(path: &Path) -> &'static [&'static str] {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if ext == "webm" {
        WEBM_CODEC_ARGS
    } else {
        H264_CODEC_ARGS
    }
}

pub async fn crop_video(ffmpeg: &Ffmpeg, path: &Path, params: &CropParams) -> anyhow::Result<()> {
    params.validate()?;
    if !path.is_file() {
        return Err(CoreError::NotFound(path.to_path_buf()).into());
    }
    ffmpeg.ensure_available()?;

    let scratch = scratch_path(path);
    let output = tokio::process::Command::new(ffmpeg.ffmpeg_path())
        .arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(path)
        .arg("-vf")
        .arg(params.video_filter_chain())
        .args(codec_args_for(path))
        .arg(&scratch)
        .output()
        .await
        .with_context(|| format!("starting {}", ffmpeg.ffmpeg_path().display()))?;

    if !output.status.success() || !scratch.exists() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(path = %path.display(), stderr = %stderr.trim(), "video crop failed");
        let _ = fs::remove_file(&scratch);
        return Err(CoreError::ToolFailed {
            tool: "ffmpeg".into(),
            message: last_line(&stderr).unwrap_or("crop produced no output").to_string(),
        }
        .into());
    }

    commit_replacement(path, &scratch)?;
    info!(path = %path.display(), "video cropped");
    Ok(())
}

/// Overwrites `path` with the image carried by a `data:image/...;base64,` URL.
pub fn save_image_data_url(path: &Path, data_url: &str) -> anyhow::Result<()> {
    let invalid = || CoreError::InvalidInput("invalid image data URL".into());
    let rest = data_url.strip_prefix("data:image/").ok_or_else(invalid)?;
    let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
    if !header.ends_with(";base64") {
        return Err(invalid().into());
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::InvalidInput(format!("invalid base64 payload: {e}")))?;
    image::guess_format(&bytes)
        .map_err(|_| CoreError::InvalidInput("data URL does not contain an image".into()))?;
    if !path.is_file() {
        return Err(CoreError::NotFound(path.to_path_buf()).into());
    }

    let scratch = scratch_path(path);
    fs::write(&scratch, &bytes).with_context(|| format!("writing {}", scratch.display()))?;
    commit_replacement(path, &scratch)?;
    info!(path = %path.display(), bytes = bytes.len(), "image saved from data URL");
    Ok(())
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}
