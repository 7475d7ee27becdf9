use crate::error::CoreError;
use providers::{DetailLevel, EndpointConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "CAPTIONER";

pub const DEFAULT_PROMPT: &str = "Describe this image in one detailed paragraph suitable as a \
training caption. Mention the subject, setting, composition, lighting and style. Do not \
start with phrases like \"This image shows\".";

/// Flat settings record persisted as JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub image_detail: DetailLevel,
    pub use_detail_parameter: bool,
    pub provider: ProviderKind,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub batch_concurrency: usize,
    pub thumbnail_size: u32,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub recursive: bool,
    pub exclude: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            image_detail: DetailLevel::Auto,
            use_detail_parameter: true,
            provider: ProviderKind::Auto,
            max_tokens: 300,
            temperature: 0.7,
            request_timeout_secs: 30,
            batch_concurrency: 4,
            thumbnail_size: 256,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            recursive: true,
            exclude: crate::editor::SCRATCH_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Settings {
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    pub fn detail(&self) -> Option<DetailLevel> {
        self.use_detail_parameter.then_some(self.image_detail)
    }

    pub fn resolved_provider(&self) -> ProviderKind {
        self.provider.resolve(&self.api_url)
    }

    /// Sets one field from its textual form. JSON literals are accepted
    /// (`true`, `4`, `["a"]`); anything else is taken as a string.
    pub fn set_field(&mut self, key: &str, raw: &str) -> anyhow::Result<()> {
        let mut value = serde_json::to_value(&*self)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("settings did not serialize to an object"))?;
        if !obj.contains_key(key) {
            return Err(CoreError::InvalidInput(format!("unknown setting: {key}")).into());
        }
        let parsed = serde_json::from_str::<serde_json::Value>(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        let parsed = match (&obj[key], parsed) {
            (serde_json::Value::String(_), v) if !v.is_string() => {
                serde_json::Value::String(raw.to_string())
            }
            (_, v) => v,
        };
        obj.insert(key.to_string(), parsed);
        *self = serde_json::from_value(value)
            .map_err(|e| CoreError::InvalidInput(format!("invalid value for {key}: {e}")))?;
        Ok(())
    }

    /// Copy with the API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if !out.api_key.is_empty() {
            let tail: String = out
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            out.api_key = format!("****{tail}");
        }
        out
    }
}

/// Layers the JSON settings file (if any) under `CAPTIONER_*` environment overrides.
pub fn load(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut builder = config::Config::builder();
    if let Some(p) = path {
        builder = builder.add_source(
            config::File::from(p)
                .format(config::FileFormat::Json)
                .required(false),
        );
    }
    builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).ignore_empty(true));
    let cfg = builder.build()?;
    let settings: Settings = cfg.try_deserialize()?;
    debug!(provider = %settings.resolved_provider(), model = %settings.model, "settings loaded");
    Ok(settings)
}

pub fn save(path: &Path, settings: &Settings) -> anyhow::Result<()> {
    storage::write_json(path, settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let settings = load(Some(&temp.path().join("settings.json"))).unwrap();
        assert_eq!(settings.model, Settings::default().model);
        assert_eq!(settings.max_tokens, 300);
    }

    #[test]
    fn saved_settings_load_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.json");
        let mut settings = Settings::default();
        settings.model = "gemini-1.5-flash".into();
        settings.provider = ProviderKind::Gemini;
        settings.image_detail = DetailLevel::High;
        settings.batch_concurrency = 2;
        save(&path, &settings).unwrap();

        let loaded = load(Some(&path)).unwrap();
        assert_eq!(loaded.model, "gemini-1.5-flash");
        assert_eq!(loaded.provider, ProviderKind::Gemini);
        assert_eq!(loaded.image_detail, DetailLevel::High);
        assert_eq!(loaded.batch_concurrency, 2);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{ "model": "gpt-4o-mini" }"#).unwrap();
        let loaded = load(Some(&path)).unwrap();
        assert_eq!(loaded.model, "gpt-4o-mini");
        assert_eq!(loaded.thumbnail_size, 256);
    }

    #[test]
    fn set_field_parses_by_target_type() {
        let mut settings = Settings::default();
        settings.set_field("batch_concurrency", "8").unwrap();
        settings.set_field("use_detail_parameter", "false").unwrap();
        settings.set_field("model", "123").unwrap();
        settings.set_field("image_detail", "low").unwrap();
        settings.set_field("provider", "gemini").unwrap();
        assert_eq!(settings.batch_concurrency, 8);
        assert!(!settings.use_detail_parameter);
        assert_eq!(settings.model, "123");
        assert_eq!(settings.image_detail, DetailLevel::Low);
        assert_eq!(settings.provider, ProviderKind::Gemini);
        assert_eq!(settings.detail(), None);

        assert!(settings.set_field("nope", "1").is_err());
        assert!(settings.set_field("batch_concurrency", "many").is_err());
    }

    #[test]
    fn redaction_keeps_only_the_tail() {
        let mut settings = Settings::default();
        settings.api_key = "sk-abcdef123456".into();
        assert_eq!(settings.redacted().api_key, "****3456");
        assert_eq!(Settings::default().redacted().api_key, "");
    }
}
