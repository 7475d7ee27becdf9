//! Wires settings, providers and the batch runner together.

use crate::captioner::{generate_captions, CaptionJob};
use crate::config::Settings;
use crate::error::CoreError;
use crate::ffmpeg::Ffmpeg;
use crate::models::{CaptionOutcome, MediaKind};
use crate::scanner::{list_media, ScanOptions};
use crate::sidecar;
use providers::gemini::GeminiProvider;
use providers::openai::OpenAiProvider;
use providers::{CaptionProvider, ProviderKind, ProviderRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct CaptionSummary {
    pub outcomes: Vec<CaptionOutcome>,
    pub saved: usize,
    pub skipped: usize,
}

impl CaptionSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Both wire formats share the configured endpoint; the resolved kind is preferred.
pub fn build_registry(settings: &Settings) -> anyhow::Result<ProviderRegistry> {
    let endpoint = settings.endpoint();
    let reg = ProviderRegistry::new()
        .with_provider(
            ProviderKind::OpenAi.as_str(),
            Arc::new(OpenAiProvider::new(endpoint.clone())?),
        )
        .with_provider(
            ProviderKind::Gemini.as_str(),
            Arc::new(GeminiProvider::new(endpoint)?),
        );
    Ok(reg.set_preferred(settings.resolved_provider().as_str()))
}

/// The named provider, or the one the settings resolve to when `name` is `None`.
pub fn resolve_provider(
    settings: &Settings,
    name: Option<&str>,
) -> anyhow::Result<Arc<dyn CaptionProvider>> {
    if settings.api_key.trim().is_empty() {
        return Err(CoreError::InvalidInput(
            "no API key configured (set it with `captioner settings set api_key <key>`)".into(),
        )
        .into());
    }
    let registry = build_registry(settings)?;
    debug!(providers = ?registry.names(), preferred = ?registry.preferred, "provider registry");
    Ok(registry.provider(name)?)
}

/// Files stay as given; directories expand to their media per `opts`.
pub fn expand_media_paths(inputs: &[PathBuf], opts: &ScanOptions) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            out.extend(list_media(input, opts)?.into_iter().map(|m| m.path));
        } else if input.is_file() {
            if MediaKind::from_path(input).is_none() {
                return Err(CoreError::UnsupportedMedia(input.clone()).into());
            }
            out.push(input.clone());
        } else {
            return Err(CoreError::NotFound(input.clone()).into());
        }
    }
    Ok(out)
}

/// Captions `paths`, optionally only those without a sidecar, and optionally
/// writes the results next to the media.
pub async fn caption_paths(
    settings: &Settings,
    provider: Arc<dyn CaptionProvider>,
    paths: Vec<PathBuf>,
    only_missing: bool,
    save: bool,
) -> anyhow::Result<CaptionSummary> {
    if paths.is_empty() {
        return Err(CoreError::InvalidInput("no files selected".into()).into());
    }
    let total = paths.len();
    let todo: Vec<PathBuf> = if only_missing {
        paths
            .into_iter()
            .filter(|p| !sidecar::has_caption(p))
            .collect()
    } else {
        paths
    };
    let mut summary = CaptionSummary {
        skipped: total - todo.len(),
        ..Default::default()
    };
    if todo.is_empty() {
        info!(skipped = summary.skipped, "every file already has a caption");
        return Ok(summary);
    }

    info!(files = todo.len(), provider = %settings.resolved_provider(), "generating captions");
    summary.outcomes = generate_captions(
        provider,
        todo,
        CaptionJob::from_settings(settings),
        Ffmpeg::from_settings(settings),
        settings.batch_concurrency,
    )
    .await;
    if save {
        summary.saved = sidecar::save_outcomes(&summary.outcomes);
    }
    Ok(summary)
}
