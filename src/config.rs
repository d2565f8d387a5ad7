//! Configuration loading and defaults for assistant-stream.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pacer::{PacerConfig, PacerConfigUpdate};
use crate::reasoning::TagStyle;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-reasoner";

const ENV_CONFIG_PATH: &str = "ASSISTANT_STREAM_CONFIG_PATH";
const ENV_API_KEY: &str = "ASSISTANT_STREAM_API_KEY";
const ENV_BASE_URL: &str = "ASSISTANT_STREAM_BASE_URL";
const ENV_MODEL: &str = "ASSISTANT_STREAM_MODEL";
const ENV_TAGS: &str = "ASSISTANT_STREAM_TAGS";
const ENV_PACING: &str = "ASSISTANT_STREAM_PACING";

/// Resolved configuration, including defaults and environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub tags: Option<TagStyle>,
    /// Partial pacer settings applied over [`PacerConfig::default`].
    pub pacer: Option<PacerConfigUpdate>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(flatten)]
    base: Config,
    profiles: Option<HashMap<String, Config>>,
}

// === Config Loading ===

impl Config {
    /// Load configuration from disk and merge with environment overrides.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load(path: Option<PathBuf>, profile: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, profile, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) but reads environment values through `env`.
    pub fn load_with_env<F>(path: Option<PathBuf>, profile: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = resolve_config_path(path, &env);
        let mut config = match path.as_ref() {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let parsed: ConfigFile = toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                apply_profile(parsed, profile)?
            }
            _ => {
                if let Some(name) = profile {
                    anyhow::bail!("Profile '{name}' requested but no config file was found");
                }
                Config::default()
            }
        };

        apply_env_overrides(&mut config, &env)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that configured values are usable.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref key) = self.api_key
            && key.trim().is_empty()
        {
            anyhow::bail!("api_key cannot be empty string");
        }
        if let Some(ref url) = self.base_url {
            let trimmed = url.trim();
            if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                anyhow::bail!("base_url must start with http:// or https://, got '{url}'");
            }
        }
        if let Some(ref model) = self.model
            && model.trim().is_empty()
        {
            anyhow::bail!("model cannot be empty string");
        }
        self.pacer_config().context("Invalid [pacer] settings")?;
        Ok(())
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map_or(DEFAULT_BASE_URL, str::trim)
            .trim_end_matches('/')
            .to_string()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    #[must_use]
    pub fn tags(&self) -> TagStyle {
        self.tags.unwrap_or_default()
    }

    /// Pacer settings: defaults with the `[pacer]` table applied.
    pub fn pacer_config(&self) -> Result<PacerConfig> {
        let defaults = PacerConfig::default();
        match self.pacer.as_ref() {
            Some(update) => Ok(defaults.merged(update)?),
            None => Ok(defaults),
        }
    }

    /// Overlay a pacer update on top of the configured one.
    pub fn apply_pacer_update(&mut self, update: &PacerConfigUpdate) {
        let current = self.pacer.take().unwrap_or_default();
        self.pacer = Some(current.overlay(update));
    }
}

fn home_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".assistant-stream").join("config.toml"))
}

fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}

fn resolve_config_path<F>(path: Option<PathBuf>, env: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = path {
        return Some(match path.to_str() {
            Some(raw) => expand_path(raw),
            None => path,
        });
    }
    if let Some(raw) = env(ENV_CONFIG_PATH) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(expand_path(trimmed));
        }
    }
    home_config_path()
}

fn apply_profile(config: ConfigFile, profile: Option<&str>) -> Result<Config> {
    let Some(profile_name) = profile else {
        return Ok(config.base);
    };
    let profiles = config.profiles.as_ref();
    match profiles.and_then(|profiles| profiles.get(profile_name)) {
        Some(override_cfg) => Ok(merge_config(config.base, override_cfg.clone())),
        None => {
            let available = profiles
                .map(|profiles| {
                    let mut keys = profiles.keys().cloned().collect::<Vec<_>>();
                    keys.sort();
                    keys.join(", ")
                })
                .filter(|keys| !keys.is_empty())
                .unwrap_or_else(|| "none".to_string());
            anyhow::bail!("Profile '{profile_name}' not found. Available profiles: {available}")
        }
    }
}

fn merge_config(base: Config, override_cfg: Config) -> Config {
    let pacer = match (base.pacer, override_cfg.pacer) {
        (Some(base), Some(over)) => Some(base.overlay(&over)),
        (base, over) => over.or(base),
    };
    Config {
        api_key: override_cfg.api_key.or(base.api_key),
        base_url: override_cfg.base_url.or(base.base_url),
        model: override_cfg.model.or(base.model),
        tags: override_cfg.tags.or(base.tags),
        pacer,
    }
}

fn apply_env_overrides<F>(config: &mut Config, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(ENV_API_KEY) {
        config.api_key = Some(value);
    }
    if let Some(value) = env(ENV_BASE_URL) {
        config.base_url = Some(value);
    }
    if let Some(value) = env(ENV_MODEL) {
        config.model = Some(value);
    }
    if let Some(value) = env(ENV_TAGS) {
        let tags = value
            .parse::<TagStyle>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid {ENV_TAGS} value"))?;
        config.tags = Some(tags);
    }
    if let Some(value) = env(ENV_PACING) {
        let enabled = parse_bool(&value)
            .with_context(|| format!("Invalid {ENV_PACING} value '{value}'"))?;
        config.apply_pacer_update(&PacerConfigUpdate {
            enabled: Some(enabled),
            ..PacerConfigUpdate::default()
        });
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
