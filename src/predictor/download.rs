use anyhow::{Context, Result};

use std::path::{Path, PathBuf};

use super::model::manifest_path;

/// Default model directory name inside the user's cache.
const MODEL_DIR_NAME: &str = "shutter-sense";

/// Hugging Face repo holding the published settings model.
pub const DEFAULT_MODEL_REPO: &str = "shutter-sense/settings-resnet18";

/// Revision of [`DEFAULT_MODEL_REPO`] to fetch.
pub const DEFAULT_MODEL_REVISION: &str = "main";

/// Artifact stem; the repo carries `<stem>.safetensors` and `<stem>.json`.
pub const DEFAULT_MODEL_STEM: &str = "settings_model";

/// Default location of the weights file.
pub fn default_model_path() -> Result<PathBuf> {
    Ok(default_model_dir()?.join(format!("{DEFAULT_MODEL_STEM}.safetensors")))
}

/// Get the default model directory path.
pub fn default_model_dir() -> Result<PathBuf> {
    let cache_dir = dirs_cache_dir().context("Could not determine cache directory")?;
    Ok(cache_dir.join(MODEL_DIR_NAME))
}

/// Platform-specific cache directory.
fn dirs_cache_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join("Library/Caches"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA").map(PathBuf::from)
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache"))
    }
}

/// Download the weights and manifest of a settings model.
///
/// Files that already exist in `model_dir` are kept. Returns the path of
/// the weights file, ready for [`ModelHandle::open`](super::ModelHandle::open).
pub async fn download_model(
    repo_id: &str,
    revision: &str,
    model_dir: Option<&Path>,
) -> Result<PathBuf> {
    let dir = match model_dir {
        Some(d) => d.to_path_buf(),
        None => default_model_dir()?,
    };

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

    let weights_dest = dir.join(format!("{DEFAULT_MODEL_STEM}.safetensors"));
    let manifest_dest = manifest_path(&weights_dest);

    let api = hf_hub::api::tokio::Api::new()?;
    let repo = api.repo(hf_hub::Repo::with_revision(
        repo_id.to_string(),
        hf_hub::RepoType::Model,
        revision.to_string(),
    ));

    for dest in [&weights_dest, &manifest_dest] {
        let Some(file_name) = dest.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if dest.exists() {
            log::info!("Already present: {}", dest.display());
            continue;
        }
        log::info!("Downloading {file_name} from {repo_id} ({revision})...");
        let downloaded = repo
            .get(file_name)
            .await
            .with_context(|| format!("Failed to download {file_name}"))?;
        std::fs::copy(&downloaded, dest)
            .with_context(|| format!("Failed to copy {file_name} to destination"))?;
        log::info!("Saved to: {}", dest.display());
    }

    log::info!("Model ready at: {}", dir.display());
    Ok(weights_dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_ends_with_stem() {
        if let Ok(path) = default_model_path() {
            assert!(path.ends_with("shutter-sense/settings_model.safetensors"));
        }
    }
}
