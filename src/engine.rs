use std::sync::Arc;

use crate::advisor::{RuleTable, SuggestionAdvisor};
use crate::config::Config;
use crate::error::EngineError;
use crate::exif::{ImageMetadata, extract_metadata};
use crate::predictor::{ModelHandle, ModelStatus, SettingsModel, SettingsPredictor};
use crate::settings::{PredictionResult, SettingsRecord, SuggestRequest, SuggestionResult};

/// The three inference paths behind one value.
///
/// `SettingsEngine` is `Send + Sync`; share it behind an `Arc` and call it
/// from as many tasks as needed. Prediction is CPU-bound, so async callers
/// should run [`predict_settings`](Self::predict_settings) on a blocking
/// thread.
///
/// ```rust,no_run
/// use shutter_sense::config::Config;
/// use shutter_sense::engine::SettingsEngine;
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut config = Config::load(None)?;
/// config.apply_env();
/// let engine = SettingsEngine::from_config(&config)?;
///
/// let bytes = std::fs::read("photo.jpg")?;
/// println!("{:?}", engine.extract_metadata(&bytes)?.camera_settings);
/// println!("{:?}", engine.predict_settings(&bytes)?);
/// println!("{:?}", engine.suggest_settings("portrait at dusk", None).await?);
/// # Ok(())
/// # }
/// ```
pub struct SettingsEngine {
    predictor: SettingsPredictor,
    advisor: SuggestionAdvisor,
}

impl SettingsEngine {
    pub fn new(predictor: SettingsPredictor, advisor: SuggestionAdvisor) -> Self {
        Self { predictor, advisor }
    }

    /// Validate `config` and build every component from it.
    ///
    /// Fails on invalid configuration, an unreadable rule table, or a model
    /// artifact whose normalization bounds differ from the configured ones.
    /// A model that merely fails to load is reported through
    /// [`model_status`](Self::model_status) and prediction uses the heuristic.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        config.validate()?;

        let handle = match &config.model.path {
            Some(path) => ModelHandle::open(path, config.normalization.clone())?,
            None => {
                log::info!("No settings model configured; predictions use the heuristic");
                ModelHandle::unconfigured(config.normalization.clone())
            }
        };

        let rules = match &config.rules.path {
            Some(path) => RuleTable::load(path)?,
            None => RuleTable::builtin()?,
        };

        let predictor = SettingsPredictor::new(handle, config.heuristic.clone());
        let advisor = SuggestionAdvisor::from_config(&config.advisor, rules);
        if advisor.backend_names().is_empty() {
            log::info!("No LLM backend configured; suggestions use scenario rules");
        }

        Ok(Self::new(predictor, advisor))
    }

    pub fn extract_metadata(&self, bytes: &[u8]) -> Result<ImageMetadata, EngineError> {
        extract_metadata(bytes)
    }

    pub fn predict_settings(&self, bytes: &[u8]) -> Result<PredictionResult, EngineError> {
        self.predictor.predict(bytes)
    }

    pub async fn suggest_settings(
        &self,
        prompt: &str,
        current: Option<&SettingsRecord>,
    ) -> Result<SuggestionResult, EngineError> {
        self.advisor.suggest(prompt, current).await
    }

    /// [`suggest_settings`](Self::suggest_settings) for a deserialized request.
    pub async fn suggest(&self, request: &SuggestRequest) -> Result<SuggestionResult, EngineError> {
        self.suggest_settings(&request.prompt, request.current_settings.as_ref())
            .await
    }

    /// Re-read the model artifact from its configured path.
    pub fn reload_model(&self) -> Result<ModelStatus, EngineError> {
        self.predictor.reload_model()
    }

    /// Swap in an already-built model. Returns its generation.
    pub fn install_model(&self, model: Arc<dyn SettingsModel>) -> Result<u64, EngineError> {
        self.predictor.handle().install(model)
    }

    pub fn model_status(&self) -> ModelStatus {
        self.predictor.model_status()
    }

    pub fn predictor(&self) -> &SettingsPredictor {
        &self.predictor
    }

    pub fn advisor(&self) -> &SuggestionAdvisor {
        &self.advisor
    }
}
