use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::advisor::OPENAI_BASE_URL;
use crate::error::EngineError;
use crate::normalize::NormalizationBounds;
use crate::predictor::{DEFAULT_MODEL_REPO, DEFAULT_MODEL_REVISION, HeuristicConfig};

/// Environment variable holding the OpenAI API key.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable holding the Gemini API key.
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
/// Environment variable naming the model weights file.
pub const ENV_MODEL_PATH: &str = "SHUTTER_SENSE_MODEL";

/// Top-level configuration for the shutter-sense engine.
///
/// Every section has defaults, so a config file only needs the keys it
/// changes.
///
/// # Loading
///
/// ```rust,no_run
/// use shutter_sense::config::Config;
///
/// // From a JSON file, then overlay credentials from the environment
/// let mut config = Config::load(Some("config.json".as_ref())).unwrap();
/// config.apply_env();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.advisor.backends.openai.api_key = "sk-...".into();
/// config.advisor.timeout_secs = 5;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Learned settings model artifact.
    pub model: ModelConfig,
    /// Bounds shared with the model's training pipeline.
    pub normalization: NormalizationBounds,
    /// Brightness tiers used when no model answer is available.
    pub heuristic: HeuristicConfig,
    /// LLM backends for the suggestion advisor.
    pub advisor: AdvisorConfig,
    /// Scenario rule table.
    pub rules: RulesConfig,
}

/// Where the settings model lives and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Weights file (`.safetensors`); its manifest sits next to it. `None`
    /// disables the learned path.
    pub path: Option<PathBuf>,
    /// Hugging Face repo used by `download-model`.
    pub repo: String,
    pub revision: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            repo: DEFAULT_MODEL_REPO.to_string(),
            revision: DEFAULT_MODEL_REVISION.to_string(),
        }
    }
}

/// LLM advisor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub backends: AdvisorBackends,
    /// Order in which backends are tried (failover chain).
    pub service_order: Vec<String>,
    /// Budget for the whole chain, in seconds.
    pub timeout_secs: u64,
}

/// Configuration for all available LLM backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorBackends {
    pub openai: OpenAiConfig,
    pub gemini: GeminiConfig,
    pub cloudflare: CloudflareConfig,
}

/// OpenAI (or OpenAI-compatible) chat completions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub enabled: bool,
}

/// Google Gemini configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub enabled: bool,
}

/// Cloudflare Workers AI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudflareConfig {
    pub account_id: String,
    pub api_token: String,
    pub model: String,
    pub enabled: bool,
}

/// Scenario rule table source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// JSON file replacing the built-in table.
    pub path: Option<PathBuf>,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            backends: AdvisorBackends::default(),
            service_order: vec![
                "openai".to_string(),
                "gemini".to_string(),
                "cloudflare".to_string(),
            ],
            timeout_secs: 10,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            enabled: true,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
            enabled: false,
        }
    }
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            api_token: String::new(),
            model: "@cf/meta/llama-3.1-8b-instruct".to_string(),
            enabled: false,
        }
    }
}

impl Config {
    /// Resolve the config file path: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Overlay credentials and the model path from the environment.
    /// Unset or empty variables leave the file values alone.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup(ENV_OPENAI_API_KEY) {
            log::debug!("Using OpenAI API key from {ENV_OPENAI_API_KEY}");
            self.advisor.backends.openai.api_key = key;
        }
        if let Some(key) = lookup(ENV_GEMINI_API_KEY) {
            log::debug!("Using Gemini API key from {ENV_GEMINI_API_KEY}");
            self.advisor.backends.gemini.api_key = key;
        }
        if let Some(path) = lookup(ENV_MODEL_PATH) {
            self.model.path = Some(PathBuf::from(path));
        }
    }

    /// Check bounds, heuristic tiers and advisor settings.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.normalization.validate()?;
        self.heuristic.validate()?;
        if self.advisor.timeout_secs == 0 {
            return Err(EngineError::config("advisor timeout_secs must be positive"));
        }
        for name in &self.advisor.service_order {
            if !matches!(name.as_str(), "openai" | "gemini" | "cloudflare") {
                return Err(EngineError::config(format!("unknown advisor backend '{name}'")));
            }
        }
        Ok(())
    }

    /// Get the ordered list of enabled LLM backends.
    pub fn enabled_backends(&self) -> Vec<String> {
        let backends = &self.advisor.backends;
        self.advisor
            .service_order
            .iter()
            .filter(|name| match name.as_str() {
                "openai" => backends.openai.enabled,
                "gemini" => backends.gemini.enabled,
                "cloudflare" => backends.cloudflare.enabled,
                _ => false,
            })
            .cloned()
            .collect()
    }
}
