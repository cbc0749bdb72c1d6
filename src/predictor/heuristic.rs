use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::normalize::{DenormalizedSettings, NormalizationBounds};
use crate::settings::units::{parse_aperture, parse_shutter};

/// One brightness band of the fallback table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrightnessTier {
    /// Upper (exclusive) mean-luma bound. `None` marks the catch-all tier,
    /// which must come last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<f32>,
    pub iso: u32,
    pub aperture: String,
    pub shutter_speed: String,
}

impl BrightnessTier {
    fn new(below: Option<f32>, iso: u32, aperture: &str, shutter_speed: &str) -> Self {
        Self {
            below,
            iso,
            aperture: aperture.to_string(),
            shutter_speed: shutter_speed.to_string(),
        }
    }
}

/// Brightness-tier fallback used whenever no model answer is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicConfig {
    /// Ordered, first match wins.
    pub tiers: Vec<BrightnessTier>,
    /// Reported as the result confidence. `None` omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                // Low light
                BrightnessTier::new(Some(85.0), 1600, "f/2.8", "1/60s"),
                // Medium light
                BrightnessTier::new(Some(170.0), 400, "f/5.6", "1/125s"),
                // Bright light
                BrightnessTier::new(None, 100, "f/8.0", "1/500s"),
            ],
            confidence: Some(0.5),
        }
    }
}

impl HeuristicConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let Some((last, rest)) = self.tiers.split_last() else {
            return Err(EngineError::config("heuristic needs at least one tier"));
        };
        if last.below.is_some() {
            return Err(EngineError::config(
                "the last heuristic tier must be the catch-all (no `below`)",
            ));
        }

        let mut previous = 0.0f32;
        for (i, tier) in rest.iter().enumerate() {
            let Some(below) = tier.below else {
                return Err(EngineError::config(format!(
                    "heuristic tier {i} has no `below` but is not last"
                )));
            };
            if !(below > previous && below <= 255.0) {
                return Err(EngineError::config(format!(
                    "heuristic tier {i}: `below` must ascend within (0, 255], got {below}"
                )));
            }
            previous = below;
        }

        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.iso == 0 {
                return Err(EngineError::config(format!("heuristic tier {i}: iso must be positive")));
            }
            if parse_aperture(&tier.aperture).is_none() {
                return Err(EngineError::config(format!(
                    "heuristic tier {i}: invalid aperture '{}'",
                    tier.aperture
                )));
            }
            if parse_shutter(&tier.shutter_speed).is_none() {
                return Err(EngineError::config(format!(
                    "heuristic tier {i}: invalid shutter speed '{}'",
                    tier.shutter_speed
                )));
            }
        }

        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(EngineError::config(format!(
                    "heuristic confidence must be in [0, 1], got {c}"
                )));
            }
        }
        Ok(())
    }

    /// Settings for an image of the given mean brightness, snapped and
    /// clamped through `bounds`.
    pub fn settings_for(&self, brightness: f32, bounds: &NormalizationBounds) -> DenormalizedSettings {
        let tier = self
            .tiers
            .iter()
            .find(|t| t.below.is_none_or(|below| brightness < below))
            .or(self.tiers.last());

        match tier {
            Some(tier) => bounds.settle(
                tier.iso as f64,
                parse_aperture(&tier.aperture).unwrap_or(bounds.aperture.min),
                parse_shutter(&tier.shutter_speed).unwrap_or(bounds.shutter_seconds.min),
            ),
            // Unreachable for a validated config; fall to the geometric middle.
            None => bounds.settle(
                bounds.iso.denormalize(0.5),
                bounds.aperture.denormalize(0.5),
                bounds.shutter_seconds.denormalize(0.5),
            ),
        }
    }
}

/// Mean of the 8-bit luma plane, in `[0, 255]`.
pub fn mean_brightness(image: &DynamicImage) -> f32 {
    let luma = image.to_luma8();
    let pixels = luma.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|p| *p as u64).sum();
    (sum as f64 / pixels.len() as f64) as f32
}
