//! Settings records shared by all three inference paths.
//!
//! Every path (metadata extraction, image prediction, prompt suggestion)
//! returns the same `iso` / `aperture` / `shutter_speed` shape so callers can
//! consume them uniformly. Absent fields mean "unknown" and are omitted from
//! the serialized JSON; they are never encoded as zero.

pub mod units;

use serde::{Deserialize, Serialize};

/// Camera settings as read from EXIF or supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aperture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutter_speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<String>,
}

impl SettingsRecord {
    /// True when none of ISO, aperture or shutter speed is known.
    pub fn has_no_exposure(&self) -> bool {
        self.iso.is_none() && self.aperture.is_none() && self.shutter_speed.is_none()
    }

    /// Human-readable one-liner of the known fields, e.g.
    /// `ISO 400, f/2.8, 1/125s, 50.0mm`. Returns `None` if nothing is known.
    pub fn summary(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(iso) = self.iso {
            parts.push(format!("ISO {iso}"));
        }
        parts.extend(self.aperture.clone());
        parts.extend(self.shutter_speed.clone());
        parts.extend(self.focal_length.clone());
        if let Some(ref wb) = self.white_balance {
            parts.push(format!("{wb} white balance"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Which computation produced a [`PredictionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Model,
    Heuristic,
}

/// Settings recommended for an image by the predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aperture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutter_speed: Option<String>,
    /// Mean 8-bit luma of the input, in `[0, 255]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_brightness: Option<f32>,
    /// In `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub source: PredictionSource,
    /// Always set for heuristic results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Generation of the model handle that served a `model` result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<u64>,
}

/// Which path produced a [`SuggestionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionSource {
    Llm,
    RuleBased,
}

/// Settings suggested for a free-text shooting scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aperture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutter_speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub source: SuggestionSource,
    /// Scenario rule name for rule-based answers (`"default"` when none matched).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// LLM backend that answered, for `llm` answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

/// Request body of a suggestion call, in the client's wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_settings: Option<SettingsRecord>,
}
