#[cfg(target_os = "macos")]
extern crate accelerate_src;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Func, Linear, Module, VarBuilder};
use candle_transformers::models::resnet::resnet18_no_final_layer;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::normalize::{NormalizationBounds, NormalizedFeatureVector, SettingsVector};

/// Manifest schema version understood by this build.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// The only architecture [`CandleSettingsModel`] knows how to build.
pub const ARCHITECTURE: &str = "resnet18-mlp";

/// ImageNet statistics, used by the training transforms.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Width of the ResNet-18 pooled feature vector.
const BACKBONE_FEATURES: usize = 512;

/// Sidecar description of a weights file (`<name>.json` next to
/// `<name>.safetensors`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub format_version: u32,
    pub architecture: String,
    /// 3 (iso, aperture, shutter) or 4 (plus confidence).
    pub outputs: usize,
    #[serde(default = "imagenet_mean")]
    pub channel_mean: [f32; 3],
    #[serde(default = "imagenet_std")]
    pub channel_std: [f32; 3],
    /// Bounds the model was trained against.
    #[serde(default)]
    pub normalization: Option<NormalizationBounds>,
}

fn imagenet_mean() -> [f32; 3] {
    IMAGENET_MEAN
}

fn imagenet_std() -> [f32; 3] {
    IMAGENET_STD
}

impl ModelManifest {
    pub fn new(bounds: NormalizationBounds, outputs: usize) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            architecture: ARCHITECTURE.to_string(),
            outputs,
            channel_mean: IMAGENET_MEAN,
            channel_std: IMAGENET_STD,
            normalization: Some(bounds),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model manifest: {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse model manifest: {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to write model manifest: {}", path.display()))
    }

    /// Structural checks that do not involve the normalization bounds.
    pub fn check_shape(&self) -> Result<()> {
        if self.format_version != MANIFEST_FORMAT_VERSION {
            anyhow::bail!(
                "unsupported manifest format_version {} (expected {MANIFEST_FORMAT_VERSION})",
                self.format_version
            );
        }
        if self.architecture != ARCHITECTURE {
            anyhow::bail!("unsupported architecture '{}'", self.architecture);
        }
        if !matches!(self.outputs, 3 | 4) {
            anyhow::bail!("model must emit 3 or 4 outputs, manifest says {}", self.outputs);
        }
        if self.channel_std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            anyhow::bail!("channel_std must be positive");
        }
        Ok(())
    }
}

/// Path of the manifest that belongs to a weights file.
pub fn manifest_path(weights: &Path) -> PathBuf {
    weights.with_extension("json")
}

/// Raw model answer before denormalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOutput {
    pub settings: SettingsVector,
    /// Present only when the model has a fourth output.
    pub confidence: Option<f32>,
}

/// Decode the sigmoid outputs of a model: three settings components,
/// optionally followed by a confidence.
pub fn decode_outputs(values: &[f32]) -> Result<ModelOutput> {
    if values.len() < 3 {
        anyhow::bail!("model returned {} outputs, need at least 3", values.len());
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        anyhow::bail!("model returned a non-finite output ({bad})");
    }
    Ok(ModelOutput {
        settings: SettingsVector([values[0], values[1], values[2]]),
        confidence: values.get(3).map(|c| c.clamp(0.0, 1.0)),
    })
}

/// A learned image → settings model.
pub trait SettingsModel: Send + Sync {
    /// Human-readable identifier for logs and status output.
    fn name(&self) -> &str;

    fn manifest(&self) -> &ModelManifest;

    fn infer(&self, features: &NormalizedFeatureVector) -> Result<ModelOutput>;
}

/// Select the best available device (Metal GPU on macOS, CPU elsewhere).
fn best_device() -> Result<Device> {
    #[cfg(target_os = "macos")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                log::info!("Using Metal GPU for inference");
                return Ok(device);
            }
            Err(e) => {
                log::warn!("Metal GPU not available ({e}), falling back to CPU");
            }
        }
    }
    log::debug!("Using CPU for inference");
    Ok(Device::Cpu)
}

/// ResNet-18 backbone with the three-layer regression head, run by candle.
///
/// Tensor names follow the training checkpoint: the backbone lives under
/// `backbone.*` and the head replaces its final layer as `backbone.fc.{0,3,6}`
/// (indices 1, 2, 4 and 5 are the parameterless ReLU/Dropout layers).
pub struct CandleSettingsModel {
    name: String,
    manifest: ModelManifest,
    backbone: Func<'static>,
    head: [Linear; 3],
    device: Device,
}

impl CandleSettingsModel {
    /// Load weights from a safetensors file.
    pub fn load(weights: &Path, manifest: ModelManifest) -> Result<Self> {
        manifest.check_shape()?;
        let device = best_device()?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)
                .with_context(|| format!("Failed to map weights: {}", weights.display()))?
        };
        let name = weights
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "settings-model".to_string());
        Self::from_var_builder(name, manifest, vb, device)
    }

    /// Build the network from any variable source.
    pub fn from_var_builder(
        name: impl Into<String>,
        manifest: ModelManifest,
        vb: VarBuilder<'static>,
        device: Device,
    ) -> Result<Self> {
        let backbone = resnet18_no_final_layer(vb.pp("backbone"))
            .context("Failed to build ResNet-18 backbone")?;
        let fc = vb.pp("backbone").pp("fc");
        let head = [
            candle_nn::linear(BACKBONE_FEATURES, 256, fc.pp("0"))?,
            candle_nn::linear(256, 128, fc.pp("3"))?,
            candle_nn::linear(128, manifest.outputs, fc.pp("6"))?,
        ];
        Ok(Self {
            name: name.into(),
            manifest,
            backbone,
            head,
            device,
        })
    }

    fn forward(&self, features: &NormalizedFeatureVector) -> Result<Vec<f32>> {
        let input = Tensor::from_slice(features.data(), features.shape(), &self.device)?;
        let mean = Tensor::new(&self.manifest.channel_mean, &self.device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&self.manifest.channel_std, &self.device)?.reshape((3, 1, 1))?;
        let input = input.broadcast_sub(&mean)?.broadcast_div(&std)?.unsqueeze(0)?;

        let [fc0, fc3, fc6] = &self.head;
        let hidden = input.apply(&self.backbone)?;
        let hidden = fc0.forward(&hidden)?.relu()?;
        let hidden = fc3.forward(&hidden)?.relu()?;
        let out = candle_nn::ops::sigmoid(&fc6.forward(&hidden)?)?;

        Ok(out.squeeze(0)?.to_device(&Device::Cpu)?.to_vec1::<f32>()?)
    }
}

impl SettingsModel for CandleSettingsModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    fn infer(&self, features: &NormalizedFeatureVector) -> Result<ModelOutput> {
        let values = self.forward(features).context("Model inference failed")?;
        decode_outputs(&values)
    }
}

// ── Model handle ─────────────────────────────────────────────────────

/// Contents of a [`ModelHandle`] at one instant.
#[derive(Clone)]
pub enum ModelSlot {
    Unconfigured,
    Loaded {
        model: Arc<dyn SettingsModel>,
        generation: u64,
    },
    Failed {
        reason: String,
    },
}

/// Serializable view of a [`ModelSlot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    Unconfigured,
    Loaded { name: String, generation: u64 },
    Failed { reason: String },
}

impl From<&ModelSlot> for ModelStatus {
    fn from(slot: &ModelSlot) -> Self {
        match slot {
            ModelSlot::Unconfigured => ModelStatus::Unconfigured,
            ModelSlot::Loaded { model, generation } => ModelStatus::Loaded {
                name: model.name().to_string(),
                generation: *generation,
            },
            ModelSlot::Failed { reason } => ModelStatus::Failed {
                reason: reason.clone(),
            },
        }
    }
}

enum LoadError {
    /// Fatal: the artifact was trained against different bounds.
    Mismatch(EngineError),
    /// Cached in the slot; prediction falls back to the heuristic.
    Failed(String),
}

/// Owned, versioned holder of the active settings model.
///
/// Readers take a cheap [`snapshot`](Self::snapshot) and run inference
/// without holding any lock. Loads are serialized and fully build the new
/// model before the slot is swapped, so a reader sees either the previous
/// complete model or the next one.
pub struct ModelHandle {
    path: Option<PathBuf>,
    bounds: NormalizationBounds,
    slot: RwLock<ModelSlot>,
    /// Serializes loads; holds the last generation handed out.
    loads: Mutex<u64>,
}

impl ModelHandle {
    /// A handle with no artifact; prediction always uses the heuristic.
    pub fn unconfigured(bounds: NormalizationBounds) -> Self {
        Self {
            path: None,
            bounds,
            slot: RwLock::new(ModelSlot::Unconfigured),
            loads: Mutex::new(0),
        }
    }

    /// Load the artifact at `path` eagerly.
    ///
    /// A normalization mismatch is returned as an error. Any other failure
    /// is cached as [`ModelSlot::Failed`] and the handle is still returned.
    pub fn open(path: impl Into<PathBuf>, bounds: NormalizationBounds) -> Result<Self, EngineError> {
        let handle = Self {
            path: Some(path.into()),
            ..Self::unconfigured(bounds)
        };
        handle.reload()?;
        Ok(handle)
    }

    /// A handle serving an already-built model.
    pub fn with_model(
        bounds: NormalizationBounds,
        model: Arc<dyn SettingsModel>,
    ) -> Result<Self, EngineError> {
        let handle = Self::unconfigured(bounds);
        handle.install(model)?;
        Ok(handle)
    }

    pub fn bounds(&self) -> &NormalizationBounds {
        &self.bounds
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> ModelSlot {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus::from(&*self.slot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Re-read the artifact from the configured path.
    ///
    /// On a normalization mismatch the current slot is left untouched and
    /// the error is returned. Other failures replace the slot with
    /// [`ModelSlot::Failed`]. Without a configured path this is a no-op.
    pub fn reload(&self) -> Result<ModelStatus, EngineError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.status());
        };

        let mut generation = self.lock_loads();
        match load_artifact(path, &self.bounds) {
            Ok(model) => {
                *generation += 1;
                log::info!(
                    "Loaded settings model '{}' (generation {})",
                    model.name(),
                    *generation
                );
                self.swap(ModelSlot::Loaded {
                    model,
                    generation: *generation,
                });
            }
            Err(LoadError::Mismatch(err)) => {
                log::error!("Refusing model {}: {err}", path.display());
                return Err(err);
            }
            Err(LoadError::Failed(reason)) => {
                log::warn!("Settings model unavailable: {reason}");
                self.swap(ModelSlot::Failed { reason });
            }
        }
        Ok(self.status())
    }

    /// Swap in an already-built model after checking its manifest.
    /// Returns the new generation.
    pub fn install(&self, model: Arc<dyn SettingsModel>) -> Result<u64, EngineError> {
        self.bounds
            .ensure_matches(model.manifest().normalization.as_ref())?;
        model
            .manifest()
            .check_shape()
            .map_err(|e| EngineError::config(format!("model '{}': {e}", model.name())))?;

        let mut generation = self.lock_loads();
        *generation += 1;
        self.swap(ModelSlot::Loaded {
            model,
            generation: *generation,
        });
        Ok(*generation)
    }

    fn lock_loads(&self) -> MutexGuard<'_, u64> {
        self.loads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn swap(&self, next: ModelSlot) {
        let old = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, next)
        };
        // Last reference to a replaced model drops outside the lock.
        drop(old);
    }
}

fn load_artifact(
    weights: &Path,
    bounds: &NormalizationBounds,
) -> Result<Arc<dyn SettingsModel>, LoadError> {
    if !weights.is_file() {
        return Err(LoadError::Failed(format!(
            "model weights not found: {}",
            weights.display()
        )));
    }

    let manifest_file = manifest_path(weights);
    let manifest = match ModelManifest::read(&manifest_file) {
        Ok(manifest) => manifest,
        Err(e) => {
            return Err(LoadError::Mismatch(EngineError::NormalizationMismatch(
                format!("model artifact declares no normalization bounds ({e:#})"),
            )));
        }
    };

    bounds
        .ensure_matches(manifest.normalization.as_ref())
        .map_err(LoadError::Mismatch)?;

    manifest
        .check_shape()
        .map_err(|e| LoadError::Failed(format!("{}: {e}", manifest_file.display())))?;

    let model = CandleSettingsModel::load(weights, manifest)
        .map_err(|e| LoadError::Failed(format!("{e:#}")))?;
    Ok(Arc::new(model))
}
