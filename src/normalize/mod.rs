//! Mapping between photographic units and the `[0, 1]` range the settings
//! model was trained on.
//!
//! The bounds are configuration, not constants: they have to match whatever
//! the training pipeline used, and a mismatch produces plausible but wrong
//! numbers rather than an error. [`NormalizationBounds::ensure_matches`] is
//! therefore run against the model manifest every time a model is loaded.
//!
//! All three axes are log-scaled, since photographic stops are
//! multiplicative:
//!
//! ```text
//! value = exp(ln(min) + t · (ln(max) − ln(min)))      t ∈ [0, 1]
//! ```

mod pixels;

pub use pixels::{NormalizedFeatureVector, normalize_image};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::settings::units::{format_aperture, format_shutter};

/// Largest accepted model input edge, in pixels.
pub const MAX_INPUT_SIZE: u32 = 4096;

/// Relative tolerance used when comparing configured and declared bounds.
const BOUNDS_TOLERANCE: f64 = 1e-6;

/// Inclusive `[min, max]` range interpolated on a log scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogRange {
    pub min: f64,
    pub max: f64,
}

impl LogRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Map `t` (clamped to `[0, 1]`) into the range.
    pub fn denormalize(&self, t: f64) -> f64 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        (self.min.ln() + t * (self.max.ln() - self.min.ln())).exp()
    }

    /// Map a physical value (clamped to the range) to `[0, 1]`.
    pub fn normalize(&self, value: f64) -> f64 {
        let value = if value.is_nan() { self.min } else { value.clamp(self.min, self.max) };
        (value.ln() - self.min.ln()) / (self.max.ln() - self.min.ln())
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    fn validate(&self, axis: &str) -> Result<(), EngineError> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min <= 0.0 {
            return Err(EngineError::config(format!(
                "{axis} bounds must be positive and finite (got {}..{})",
                self.min, self.max
            )));
        }
        if self.max <= self.min {
            return Err(EngineError::config(format!(
                "{axis} max ({}) must exceed min ({})",
                self.max, self.min
            )));
        }
        Ok(())
    }

    fn approx_eq(&self, other: &LogRange) -> bool {
        approx_eq(self.min, other.min) && approx_eq(self.max, other.max)
    }
}

/// Versioned normalization parameters shared with the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationBounds {
    /// Identifier of the training-time scaling law, e.g. `"2024.1"`.
    pub version: String,
    /// Square input edge, in pixels, the model expects.
    pub input_size: u32,
    pub iso: LogRange,
    /// f-number range.
    pub aperture: LogRange,
    /// Exposure time range, in seconds.
    pub shutter_seconds: LogRange,
    /// Conventional ISO values that predictions are snapped to, ascending.
    pub iso_steps: Vec<u32>,
}

impl Default for NormalizationBounds {
    fn default() -> Self {
        Self {
            version: "2024.1".to_string(),
            input_size: 224,
            iso: LogRange::new(50.0, 12800.0),
            aperture: LogRange::new(1.4, 22.0),
            shutter_seconds: LogRange::new(1.0 / 8000.0, 30.0),
            iso_steps: vec![
                50, 64, 80, 100, 125, 160, 200, 250, 320, 400, 500, 640, 800, 1000, 1250, 1600,
                2000, 2500, 3200, 4000, 5000, 6400, 8000, 10000, 12800,
            ],
        }
    }
}

/// Model-side settings, one component per axis, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsVector(pub [f32; 3]);

impl SettingsVector {
    pub fn iso(&self) -> f32 {
        self.0[0]
    }

    pub fn aperture(&self) -> f32 {
        self.0[1]
    }

    pub fn shutter(&self) -> f32 {
        self.0[2]
    }
}

/// Human-unit settings produced by [`NormalizationBounds::denormalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenormalizedSettings {
    pub iso: u32,
    pub aperture: String,
    pub shutter_speed: String,
}

impl NormalizationBounds {
    /// Check internal consistency of the bounds.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.version.trim().is_empty() {
            return Err(EngineError::config("normalization version must not be empty"));
        }
        if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(EngineError::config(format!(
                "normalization input_size must be in 1..={MAX_INPUT_SIZE} (got {})",
                self.input_size
            )));
        }
        self.iso.validate("iso")?;
        self.aperture.validate("aperture")?;
        self.shutter_seconds.validate("shutter_seconds")?;

        if self.iso_steps.is_empty() {
            return Err(EngineError::config("iso_steps must not be empty"));
        }
        if self.iso_steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::config("iso_steps must be strictly ascending"));
        }
        let in_range = |s: &u32| (*s as f64) >= self.iso.min && (*s as f64) <= self.iso.max;
        if !self.iso_steps.iter().all(in_range) {
            return Err(EngineError::config(format!(
                "iso_steps must lie within {}..{}",
                self.iso.min, self.iso.max
            )));
        }
        Ok(())
    }

    /// Fail with [`EngineError::NormalizationMismatch`] unless `declared`
    /// (from a model manifest) describes the same scaling law.
    pub fn ensure_matches(&self, declared: Option<&NormalizationBounds>) -> Result<(), EngineError> {
        let Some(declared) = declared else {
            return Err(EngineError::NormalizationMismatch(
                "model artifact declares no normalization bounds".to_string(),
            ));
        };

        let mut diffs = Vec::new();
        if self.version != declared.version {
            diffs.push(format!("version {} != {}", self.version, declared.version));
        }
        if self.input_size != declared.input_size {
            diffs.push(format!(
                "input_size {} != {}",
                self.input_size, declared.input_size
            ));
        }
        if !self.iso.approx_eq(&declared.iso) {
            diffs.push(format!("iso {:?} != {:?}", self.iso, declared.iso));
        }
        if !self.aperture.approx_eq(&declared.aperture) {
            diffs.push(format!("aperture {:?} != {:?}", self.aperture, declared.aperture));
        }
        if !self.shutter_seconds.approx_eq(&declared.shutter_seconds) {
            diffs.push(format!(
                "shutter_seconds {:?} != {:?}",
                self.shutter_seconds, declared.shutter_seconds
            ));
        }
        if self.iso_steps != declared.iso_steps {
            diffs.push("iso_steps differ".to_string());
        }

        if diffs.is_empty() {
            Ok(())
        } else {
            Err(EngineError::NormalizationMismatch(diffs.join("; ")))
        }
    }

    /// Snap an ISO value to the nearest configured step, measured in stops.
    pub fn snap_iso(&self, iso: f64) -> u32 {
        let iso = self.iso.clamp(iso).ln();
        self.iso_steps
            .iter()
            .copied()
            .min_by(|a, b| {
                let da = ((*a as f64).ln() - iso).abs();
                let db = ((*b as f64).ln() - iso).abs();
                da.total_cmp(&db)
            })
            .unwrap_or(self.iso.min.round() as u32)
    }

    /// Convert a model output vector into human units.
    pub fn denormalize(&self, vector: SettingsVector) -> DenormalizedSettings {
        let iso = self.iso.denormalize(vector.iso() as f64);
        let f_number = self.aperture.denormalize(vector.aperture() as f64);
        let seconds = self.shutter_seconds.denormalize(vector.shutter() as f64);

        DenormalizedSettings {
            iso: self.snap_iso(iso),
            aperture: format_aperture(f_number),
            shutter_speed: shutter_text(&self.shutter_seconds, seconds),
        }
    }

    /// Inverse of [`denormalize`](Self::denormalize) for raw physical values.
    /// Values outside the bounds clamp to the nearest edge.
    pub fn normalize_settings(&self, iso: f64, f_number: f64, shutter_seconds: f64) -> SettingsVector {
        SettingsVector([
            self.iso.normalize(iso) as f32,
            self.aperture.normalize(f_number) as f32,
            self.shutter_seconds.normalize(shutter_seconds) as f32,
        ])
    }

    /// Clamp and format raw values through the same vocabulary the model
    /// path uses.
    pub fn settle(&self, iso: f64, f_number: f64, shutter_seconds: f64) -> DenormalizedSettings {
        DenormalizedSettings {
            iso: self.snap_iso(iso),
            aperture: format_aperture(self.aperture.clamp(f_number)),
            shutter_speed: shutter_text(&self.shutter_seconds, shutter_seconds),
        }
    }
}

/// Clamp into `range` and format. Only NaN or an unvalidated range reaches
/// the one-second fallback.
fn shutter_text(range: &LogRange, seconds: f64) -> String {
    format_shutter(range.clamp(seconds))
        .or_else(|| format_shutter(range.max))
        .unwrap_or_else(|| "1s".to_string())
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= BOUNDS_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}
