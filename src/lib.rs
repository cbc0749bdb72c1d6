//! # shutter-sense
//!
//! Camera exposure recommendations (ISO, aperture, shutter speed) from three
//! cooperating inference paths:
//!
//! 1. **Metadata**: the settings a camera already recorded in the image's EXIF block.
//! 2. **Prediction**: a learned image → settings model (ResNet-18 on candle), with a
//!    brightness-tier heuristic whenever no model answer is available.
//! 3. **Suggestion**: a free-text scenario sent through an LLM failover chain
//!    (OpenAI, Google Gemini, Cloudflare Workers AI), with a scenario rule table
//!    whenever no valid LLM answer arrives in time.
//!
//! All three return the same `iso` / `aperture` / `shutter_speed` record shape.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shutter_sense::config::Config;
//! use shutter_sense::engine::SettingsEngine;
//! use shutter_sense::settings::SettingsRecord;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load config from file, then pick up API keys from the environment
//!     let mut config = Config::load(Some("config.json".as_ref()))?;
//!     config.apply_env();
//!
//!     let engine = SettingsEngine::from_config(&config)?;
//!     let bytes = std::fs::read("photo.jpg")?;
//!
//!     // 1. What the camera used
//!     let meta = engine.extract_metadata(&bytes)?;
//!     println!("{} {}x{}: {:?}", meta.format, meta.size.width, meta.size.height,
//!         meta.camera_settings.summary());
//!
//!     // 2. What the model recommends
//!     let prediction = engine.predict_settings(&bytes)?;
//!     println!("{:?} via {:?}", prediction.iso, prediction.source);
//!
//!     // 3. What to use for a described scene
//!     let current = SettingsRecord { iso: Some(3200), ..Default::default() };
//!     let advice = engine
//!         .suggest_settings("portrait in a dim restaurant", Some(&current))
//!         .await?;
//!     println!("{:?}", advice.explanation);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Model artifacts
//!
//! A model is a `<name>.safetensors` weights file plus a `<name>.json`
//! manifest declaring its architecture, output count, input statistics and
//! the normalization bounds it was trained against. Loading refuses a model
//! whose bounds differ from the configured [`NormalizationBounds`](normalize::NormalizationBounds).
//!
//! ## Modules
//!
//! - [`engine`]: `SettingsEngine`, the facade over all three paths
//! - [`exif`]: Container detection and EXIF camera settings
//! - [`normalize`]: Pixel features and the `[0, 1]` ↔ photographic unit mapping
//! - [`predictor`]: Learned model, model handle and brightness heuristic
//! - [`advisor`]: LLM backends and scenario rules
//! - [`settings`]: Shared result records and unit grammar
//! - [`config`]: Configuration types and loading/saving
//! - [`error`]: Public error type

pub mod advisor;
pub mod config;
pub mod engine;
pub mod error;
pub mod exif;
pub mod normalize;
pub mod predictor;
pub mod settings;

pub use engine::SettingsEngine;
pub use error::EngineError;
