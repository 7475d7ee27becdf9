//! Thin wrapper over the `ffmpeg`/`ffprobe` binaries.

use crate::config::Settings;
use crate::error::CoreError;
use anyhow::Context;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.ffmpeg_path, &settings.ffprobe_path)
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> &Path {
        &self.ffprobe
    }

    /// Fails with `ToolMissing` when either binary cannot be started.
    pub fn ensure_available(&self) -> anyhow::Result<()> {
        for tool in [&self.ffmpeg, &self.ffprobe] {
            let status = Command::new(tool)
                .arg("-version")
                .output()
                .map_err(|_| CoreError::ToolMissing(tool.display().to_string()))?;
            if !status.status.success() {
                return Err(CoreError::ToolMissing(tool.display().to_string()).into());
            }
        }
        Ok(())
    }

    /// Writes one frame of `video` at `at_secs` (or the first frame) to `output` as JPEG.
    pub fn extract_frame(&self, video: &Path, at_secs: Option<f64>, output: &Path) -> anyhow::Result<()> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        if let Some(t) = at_secs.filter(|t| *t > 0.0) {
            args.push("-ss".into());
            args.push(format!("{t:.3}"));
        }
        args.push("-i".into());
        args.push(video.to_string_lossy().to_string());
        args.extend(
            ["-vframes", "1", "-q:v", "2", "-y"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(output.to_string_lossy().to_string());

        run(&self.ffmpeg, &args)?;
        if !output.exists() {
            anyhow::bail!(CoreError::ToolFailed {
                tool: "ffmpeg".into(),
                message: format!("no frame written for {}", video.display()),
            });
        }
        Ok(())
    }

    /// Codec name of the first video stream, e.g. `h264`.
    pub fn probe_video_codec(&self, video: &Path) -> anyhow::Result<Option<String>> {
        let out = run(
            &self.ffprobe,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-select_streams"),
                OsStr::new("v:0"),
                OsStr::new("-show_entries"),
                OsStr::new("stream=codec_name"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                video.as_os_str(),
            ],
        )?;
        let codec = String::from_utf8_lossy(&out.stdout).trim().to_lowercase();
        Ok((!codec.is_empty()).then_some(codec))
    }

    /// Container duration in seconds.
    pub fn probe_duration(&self, video: &Path) -> anyhow::Result<f64> {
        let out = run(
            &self.ffprobe,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                video.as_os_str(),
            ],
        )?;
        let text = String::from_utf8_lossy(&out.stdout);
        text.trim()
            .parse::<f64>()
            .with_context(|| format!("unreadable duration {:?} for {}", text.trim(), video.display()))
    }
}

fn run<I, S>(program: &Path, args: I) -> anyhow::Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = tool_name(program);
    let mut cmd = Command::new(program);
    cmd.args(args);
    debug!(?cmd, "running");
    let output = cmd.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::Error::new(CoreError::ToolMissing(tool.clone()))
        } else {
            anyhow::Error::new(e).context(format!("starting {tool}"))
        }
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoreError::ToolFailed {
            tool,
            message: stderr.trim().to_string(),
        }
        .into());
    }
    Ok(output)
}

pub(crate) fn tool_name(program: &Path) -> String {
    program
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_reported_as_tool_missing() {
        let ff = Ffmpeg::new("/nonexistent/ffmpeg-xyz", "/nonexistent/ffprobe-xyz");
        let err = ff.ensure_available().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::ToolMissing(_))
        ));

        let err = ff.probe_duration(Path::new("clip.mp4")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::ToolMissing(name)) if name == "ffprobe-xyz"
        ));
    }

    #[test]
    fn settings_paths_are_used() {
        let mut settings = Settings::default();
        settings.ffmpeg_path = "/opt/ff/ffmpeg".into();
        let ff = Ffmpeg::from_settings(&settings);
        assert_eq!(ff.ffmpeg_path(), Path::new("/opt/ff/ffmpeg"));
        assert_eq!(ff.ffprobe_path(), Path::new("ffprobe"));
        assert_eq!(tool_name(ff.ffmpeg_path()), "ffmpeg");
    }
}
