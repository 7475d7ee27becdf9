use super::progress::EditProgress;
use super::{commit_replacement, scratch_path};
use crate::error::CoreError;
use crate::ffmpeg::Ffmpeg;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl TrimRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(CoreError::InvalidInput("trim times must be finite".into()));
        }
        if self.start < 0.0 {
            return Err(CoreError::InvalidInput("trim start must not be negative".into()));
        }
        if self.start >= self.end {
            return Err(CoreError::InvalidInput(format!(
                "trim start ({}) must be before end ({})",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Video encoder picked to match the source codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderChoice {
    pub encoder: &'static str,
    pub crf: u8,
    pub preset: &'static str,
}

impl EncoderChoice {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.encoder.to_string(),
            "-crf".to_string(),
            self.crf.to_string(),
        ];
        if self.encoder == "libvpx-vp9" {
            // libvpx takes a deadline, and constant quality needs a zero bitrate
            args.extend(["-deadline", self.preset, "-b:v", "0"].map(String::from));
        } else {
            args.extend(["-preset", self.preset].map(String::from));
        }
        args
    }
}

pub fn encoder_for_codec(codec: Option<&str>) -> EncoderChoice {
    match codec.map(|c| c.to_lowercase()).as_deref() {
        Some("hevc") | Some("h265") | Some("hvc1") => EncoderChoice {
            encoder: "libx265",
            crf: 22,
            preset: "medium",
        },
        Some("vp9") => EncoderChoice {
            encoder: "libvpx-vp9",
            crf: 18,
            preset: "good",
        },
        Some("av1") => EncoderChoice {
            encoder: "libaom-av1",
            crf: 20,
            preset: "medium",
        },
        _ => EncoderChoice {
            encoder: "libx264",
            crf: 18,
            preset: "medium",
        },
    }
}

/// Percentage from an ffmpeg `-progress` file: the latest `out_time_ms`
/// (microseconds despite the name) over the expected duration, capped at 99.
pub fn parse_progress(content: &str, duration_secs: f64) -> Option<i32> {
    if duration_secs <= 0.0 {
        return None;
    }
    let micros = content
        .lines()
        .rev()
        .filter_map(|l| l.trim().strip_prefix("out_time_ms="))
        .find_map(|v| v.trim().parse::<f64>().ok())?;
    let pct = (micros / 1_000_000.0 / duration_secs * 100.0).clamp(0.0, 99.0);
    Some(pct as i32)
}

/// Short user-facing reason for an ffmpeg failure.
pub fn describe_failure(stderr: &str) -> &'static str {
    if stderr.contains("Invalid data found when processing input") {
        "the video file might be corrupted or in an unsupported format"
    } else if stderr.contains("No such file or directory") {
        "input file could not be accessed"
    } else if stderr.contains("Permission denied") {
        "permission denied when accessing files"
    } else if stderr.contains("error while decoding") {
        "the video decoder encountered an error, possibly corrupt frames"
    } else if stderr.contains("does not contain any stream") {
        "the file doesn't appear to contain valid video streams"
    } else {
        "ffmpeg exited with an error, run with RUST_LOG=debug for details"
    }
}

fn is_webm(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("webm"))
        .unwrap_or(false)
}

/// Re-encodes `[range.start, range.end)` of `path` and replaces the original.
/// `progress` is reset first, tracks the encode, and ends at 100 or -1.
pub async fn trim_video(
    ffmpeg: &Ffmpeg,
    path: &Path,
    range: TrimRange,
    progress: &EditProgress,
) -> anyhow::Result<()> {
    progress.reset();
    let result = run_trim(ffmpeg, path, range, progress).await;
    match &result {
        Ok(()) => {
            progress.complete();
            info!(path = %path.display(), start = range.start, end = range.end, "video trimmed");
        }
        Err(err) => {
            progress.fail();
            warn!(path = %path.display(), error = %err, "video trim failed");
        }
    }
    result
}

async fn run_trim(
    ffmpeg: &Ffmpeg,
    path: &Path,
    range: TrimRange,
    progress: &EditProgress,
) -> anyhow::Result<()> {
    range.validate()?;
    if !path.is_file() {
        return Err(CoreError::NotFound(path.to_path_buf()).into());
    }
    ffmpeg.ensure_available()?;

    let codec = {
        let ffmpeg = ffmpeg.clone();
        let source = path.to_path_buf();
        match tokio::task::spawn_blocking(move || ffmpeg.probe_video_codec(&source)).await? {
            Ok(codec) => codec,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "codec probe failed, using defaults");
                None
            }
        }
    };
    let encoder = encoder_for_codec(codec.as_deref());
    debug!(?codec, encoder = encoder.encoder, crf = encoder.crf, "encoder selected");

    let progress_dir = tempfile::tempdir().context("creating progress directory")?;
    let progress_file = progress_dir.path().join("progress.txt");
    let scratch = scratch_path(path);
    let duration = range.duration();

    let mut cmd = tokio::process::Command::new(ffmpeg.ffmpeg_path());
    cmd.arg("-hide_banner")
        .arg("-y")
        .arg("-ss")
        .arg(range.start.to_string())
        .arg("-i")
        .arg(path)
        .arg("-t")
        .arg(duration.to_string())
        .args(encoder.args());
    if is_webm(path) {
        cmd.args(["-c:a", "libopus", "-b:a", "192k", "-pix_fmt", "yuv420p"]);
    } else {
        cmd.args([
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ]);
    }
    cmd.arg("-progress")
        .arg(&progress_file)
        .arg(&scratch)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    debug!(?cmd, "starting trim");

    let mut child = cmd
        .spawn()
        .with_context(|| format!("starting {}", ffmpeg.ffmpeg_path().display()))?;

    // drain stderr concurrently so a chatty ffmpeg never blocks on a full pipe
    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        })
    });

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let status = loop {
        tokio::select! {
            status = child.wait() => break status.context("waiting for ffmpeg")?,
            _ = ticker.tick() => {
                if let Ok(content) = tokio::fs::read_to_string(&progress_file).await {
                    if let Some(pct) = parse_progress(&content, duration) {
                        if progress.advance(pct) {
                            debug!(pct, "trim progress");
                        }
                    }
                }
            }
        }
    };

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() || !scratch.exists() {
        debug!(code = ?status.code(), stderr = %stderr, "ffmpeg trim output");
        let _ = tokio::fs::remove_file(&scratch).await;
        return Err(CoreError::ToolFailed {
            tool: "ffmpeg".into(),
            message: format!("failed to trim video: {}", describe_failure(&stderr)),
        }
        .into());
    }

    commit_replacement(path, &scratch)
}
