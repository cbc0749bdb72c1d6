//! Image → settings prediction.
//!
//! The predictor answers from a learned model when one is loaded and falls
//! back to a brightness-tier heuristic otherwise. The fallback is taken per
//! call and never retries:
//!
//! - no artifact configured → heuristic
//! - artifact failed to load (cached in the [`ModelHandle`]) → heuristic
//! - inference returned an error → heuristic for that call only
//!
//! Every heuristic result carries a `note` saying which of these happened.

mod download;
mod heuristic;
mod model;

pub use download::{
    DEFAULT_MODEL_REPO, DEFAULT_MODEL_REVISION, DEFAULT_MODEL_STEM, default_model_dir,
    default_model_path, download_model,
};
pub use heuristic::{BrightnessTier, HeuristicConfig, mean_brightness};
pub use model::{
    ARCHITECTURE, CandleSettingsModel, MANIFEST_FORMAT_VERSION, ModelHandle, ModelManifest,
    ModelOutput, ModelSlot, ModelStatus, SettingsModel, decode_outputs, manifest_path,
};

use image::DynamicImage;

use crate::error::EngineError;
use crate::normalize::{NormalizationBounds, normalize_image};
use crate::settings::{PredictionResult, PredictionSource};

/// Recommends settings for an image.
pub struct SettingsPredictor {
    handle: ModelHandle,
    heuristic: HeuristicConfig,
}

impl SettingsPredictor {
    pub fn new(handle: ModelHandle, heuristic: HeuristicConfig) -> Self {
        Self { handle, heuristic }
    }

    /// A predictor that only ever uses the heuristic.
    pub fn heuristic_only(bounds: NormalizationBounds, heuristic: HeuristicConfig) -> Self {
        Self::new(ModelHandle::unconfigured(bounds), heuristic)
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Predict settings for encoded image bytes.
    ///
    /// Fails only with [`EngineError::UnreadableImage`].
    pub fn predict(&self, bytes: &[u8]) -> Result<PredictionResult, EngineError> {
        let image = image::load_from_memory(bytes).map_err(EngineError::unreadable)?;
        Ok(self.predict_image(&image))
    }

    /// Predict settings for an already decoded image.
    pub fn predict_image(&self, image: &DynamicImage) -> PredictionResult {
        let brightness = mean_brightness(image);

        let note = match self.handle.snapshot() {
            ModelSlot::Loaded { model, generation } => {
                let bounds = self.handle.bounds();
                let features = normalize_image(image, bounds.input_size);
                match model.infer(&features) {
                    Ok(output) => {
                        let settings = bounds.denormalize(output.settings);
                        log::debug!(
                            "Model '{}' (generation {generation}): ISO {}, {}, {}",
                            model.name(),
                            settings.iso,
                            settings.aperture,
                            settings.shutter_speed
                        );
                        return PredictionResult {
                            iso: Some(settings.iso),
                            aperture: Some(settings.aperture),
                            shutter_speed: Some(settings.shutter_speed),
                            avg_brightness: Some(brightness),
                            confidence: output.confidence,
                            source: PredictionSource::Model,
                            note: None,
                            model_version: Some(generation),
                        };
                    }
                    Err(e) => {
                        log::warn!("Model '{}' inference failed: {e:#}", model.name());
                        format!("Rule-based prediction (model inference failed: {e:#})")
                    }
                }
            }
            ModelSlot::Unconfigured => "Rule-based prediction (ML model not available)".to_string(),
            ModelSlot::Failed { reason } => {
                format!("Rule-based prediction (ML model failed to load: {reason})")
            }
        };

        let settings = self
            .heuristic
            .settings_for(brightness, self.handle.bounds());
        PredictionResult {
            iso: Some(settings.iso),
            aperture: Some(settings.aperture),
            shutter_speed: Some(settings.shutter_speed),
            avg_brightness: Some(brightness),
            confidence: self.heuristic.confidence,
            source: PredictionSource::Heuristic,
            note: Some(note),
            model_version: None,
        }
    }

    /// Load the model again from its configured path.
    pub fn reload_model(&self) -> Result<ModelStatus, EngineError> {
        self.handle.reload()
    }

    pub fn model_status(&self) -> ModelStatus {
        self.handle.status()
    }
}
