use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use shutter_sense::config::Config;
use shutter_sense::engine::SettingsEngine;
use shutter_sense::predictor::{ModelStatus, download_model};
use shutter_sense::settings::{
    PredictionResult, PredictionSource, SettingsRecord, SuggestionResult, SuggestionSource,
};
use shutter_sense::settings::units::{format_aperture, format_shutter, parse_aperture, parse_shutter};

/// Extensions the extractor and predictor can decode.
const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "tif", "tiff"];

#[derive(Parser, Debug)]
#[command(
    name = "shutter-sense",
    version,
    about = "Camera exposure recommendations: EXIF settings, learned prediction and scenario advice"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the camera settings recorded in image files
    Metadata {
        /// Image files or directories
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },
    /// Recommend settings for image files
    Predict {
        /// Image files or directories
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },
    /// Suggest settings for a described shooting scenario
    Suggest {
        /// Scenario, e.g. "portrait in a dim restaurant"
        prompt: String,
        /// Current ISO
        #[arg(long)]
        iso: Option<u32>,
        /// Current aperture, e.g. f/2.8
        #[arg(long)]
        aperture: Option<String>,
        /// Current shutter speed, e.g. 1/125s
        #[arg(long = "shutter-speed")]
        shutter_speed: Option<String>,
    },
    /// Write a default config.json and exit
    Init,
    /// Download the settings model from Hugging Face
    DownloadModel {
        /// Repository id (default: from config)
        #[arg(long)]
        repo: Option<String>,
        /// Revision (default: from config)
        #[arg(long)]
        revision: Option<String>,
        /// Target directory (default: user cache)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Command::Init => {
            let config = Config::default();
            let path = cli.config.as_deref();
            config.save(path)?;
            let save_path = match path {
                Some(p) => p.to_path_buf(),
                None => Config::config_path()?,
            };
            println!("Default config written to {}", save_path.display());
            Ok(())
        }
        Command::DownloadModel { repo, revision, dir } => {
            let config = Config::load(cli.config.as_deref())?;
            let repo = repo.unwrap_or(config.model.repo);
            let revision = revision.unwrap_or(config.model.revision);
            println!("Downloading settings model from {repo} ({revision})...");
            let weights = download_model(&repo, &revision, dir.as_deref()).await?;
            println!("Model downloaded to: {}", weights.display());
            println!(
                "\nTo enable it, set \"model.path\" to this file in your config.json or export SHUTTER_SENSE_MODEL"
            );
            Ok(())
        }
        Command::Metadata { paths } => {
            let engine = load_engine(cli.config.as_deref())?;
            run_metadata(&engine, &paths, cli.json)
        }
        Command::Predict { paths } => {
            let engine = load_engine(cli.config.as_deref())?;
            run_predict(&engine, &paths, cli.json)
        }
        Command::Suggest {
            prompt,
            iso,
            aperture,
            shutter_speed,
        } => {
            let engine = load_engine(cli.config.as_deref())?;
            let current = current_settings(iso, aperture.as_deref(), shutter_speed.as_deref())?;
            let result = engine.suggest_settings(&prompt, current.as_ref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_suggestion(&prompt, &result);
            }
            Ok(())
        }
    }
}

fn load_engine(config_path: Option<&Path>) -> Result<SettingsEngine> {
    let mut config = Config::load(config_path)?;
    config.apply_env();
    let engine = SettingsEngine::from_config(&config)?;

    match engine.model_status() {
        ModelStatus::Loaded { name, generation } => {
            log::debug!("Settings model: {name} (generation {generation})")
        }
        ModelStatus::Failed { reason } => log::warn!("Settings model unavailable: {reason}"),
        ModelStatus::Unconfigured => {}
    }
    let backends = engine.advisor().backend_names();
    if !backends.is_empty() {
        log::debug!("LLM chain: {}", backends.join(" → "));
    }
    Ok(engine)
}

/// Build the `--iso/--aperture/--shutter-speed` record, canonicalizing units.
fn current_settings(
    iso: Option<u32>,
    aperture: Option<&str>,
    shutter_speed: Option<&str>,
) -> Result<Option<SettingsRecord>> {
    let aperture = aperture
        .map(|a| parse_aperture(a).map(format_aperture).context("Invalid --aperture (try f/2.8)"))
        .transpose()?;
    let shutter_speed = shutter_speed
        .map(|s| parse_shutter(s).and_then(format_shutter).context("Invalid --shutter-speed (try 1/125s)"))
        .transpose()?;
    if iso == Some(0) {
        anyhow::bail!("--iso must be positive");
    }

    let record = SettingsRecord {
        iso,
        aperture,
        shutter_speed,
        ..Default::default()
    };
    Ok(if record.has_no_exposure() { None } else { Some(record) })
}

fn run_metadata(engine: &SettingsEngine, paths: &[PathBuf], json: bool) -> Result<()> {
    let images = collect_images(paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }

    let mut json_results = Vec::new();
    for path in &images {
        let outcome = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .and_then(|bytes| Ok(engine.extract_metadata(&bytes)?));

        match outcome {
            Ok(meta) if json => json_results.push(serde_json::json!({
                "path": path.display().to_string(),
                "metadata": meta,
            })),
            Ok(meta) => {
                print_header(path);
                print_row("Format", &meta.format);
                print_row("Mode", &meta.mode);
                print_row("Size", &format!("{} x {}", meta.size.width, meta.size.height));
                print_record(&meta.camera_settings);
                if meta.camera_settings.has_no_exposure() {
                    println!("  {DIM}(no exposure settings recorded){RESET}");
                }
                if !meta.exif.is_empty() {
                    println!("  {DIM}{}{RESET}", "─".repeat(70));
                    for (tag, val) in &meta.exif {
                        print_row(tag, val);
                    }
                }
                println!();
            }
            Err(e) if json => json_results.push(serde_json::json!({
                "path": path.display().to_string(),
                "error": format!("{e:#}"),
            })),
            Err(e) => log::error!("{}: {e:#}", path.display()),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }
    Ok(())
}

fn run_predict(engine: &SettingsEngine, paths: &[PathBuf], json: bool) -> Result<()> {
    let images = collect_images(paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }

    log::info!("Found {} image(s) to process", images.len());

    let mut json_results = Vec::new();
    let mut failed = 0usize;
    let total = images.len();

    for (i, path) in images.iter().enumerate() {
        log::debug!("[{}/{}] Predicting: {}", i + 1, total, path.display());
        let outcome = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .and_then(|bytes| Ok(engine.predict_settings(&bytes)?));

        match outcome {
            Ok(result) if json => json_results.push(serde_json::json!({
                "path": path.display().to_string(),
                "prediction": result,
            })),
            Ok(result) => print_prediction(path, &result),
            Err(e) => {
                failed += 1;
                if json {
                    json_results.push(serde_json::json!({
                        "path": path.display().to_string(),
                        "error": format!("{e:#}"),
                    }));
                } else {
                    log::error!("{}: {e:#}", path.display());
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }
    log::info!("Done: {} succeeded, {failed} failed out of {total} images", total - failed);
    Ok(())
}

/// Collect supported image files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks).
fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path not found: {}", path.display());
        }
    }

    images.sort();
    images
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

fn print_header(path: &Path) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));
}

fn print_record(record: &SettingsRecord) {
    let fields: [(&str, Option<String>); 8] = [
        ("ISO", record.iso.map(|v| v.to_string())),
        ("Aperture", record.aperture.clone()),
        ("ShutterSpeed", record.shutter_speed.clone()),
        ("FocalLength", record.focal_length.clone()),
        ("Make", record.camera_make.clone()),
        ("Model", record.camera_model.clone()),
        ("LensModel", record.lens_model.clone()),
        ("WhiteBalance", record.white_balance.clone()),
    ];
    for (tag, val) in &fields {
        if let Some(v) = val {
            print_row(tag, v);
        }
    }
}

fn print_prediction(path: &Path, result: &PredictionResult) {
    print_header(path);
    let source = match result.source {
        PredictionSource::Model => format!("{GREEN}model{RESET}"),
        PredictionSource::Heuristic => format!("{YELLOW}heuristic{RESET}"),
    };
    print_row("Source", &source);
    print_record(&SettingsRecord {
        iso: result.iso,
        aperture: result.aperture.clone(),
        shutter_speed: result.shutter_speed.clone(),
        ..Default::default()
    });
    if let Some(b) = result.avg_brightness {
        print_row("Brightness", &format!("{b:.1} / 255"));
    }
    if let Some(c) = result.confidence {
        print_row("Confidence", &format!("{:.0}%", c * 100.0));
    }
    if let Some(v) = result.model_version {
        print_row("ModelVersion", &v.to_string());
    }
    if let Some(ref note) = result.note {
        println!("  {DIM}{note}{RESET}");
    }
    println!();
}

fn print_suggestion(prompt: &str, result: &SuggestionResult) {
    println!();
    println!("{BOLD}Scenario:{RESET} {prompt}");
    println!("{DIM}{}{RESET}", "═".repeat(72));
    let source = match result.source {
        SuggestionSource::Llm => format!(
            "{GREEN}llm{RESET} ({})",
            result.backend.as_deref().unwrap_or("unknown")
        ),
        SuggestionSource::RuleBased => format!(
            "{YELLOW}rule-based{RESET} ({})",
            result.matched_rule.as_deref().unwrap_or("default")
        ),
    };
    print_row("Source", &source);
    print_record(&SettingsRecord {
        iso: result.iso,
        aperture: result.aperture.clone(),
        shutter_speed: result.shutter_speed.clone(),
        ..Default::default()
    });
    if let Some(ref explanation) = result.explanation {
        print_row("Why", explanation);
    }
    println!();
}

/// Print a single row in the display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_text_breaks_on_words() {
        let lines = wrap_text("one two three four", 9);
        assert_eq!(lines, ["one two", "three", "four"]);
        assert_eq!(wrap_text("", 10), [""]);
    }

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported_image(Path::new("a/B.JPG")));
        assert!(is_supported_image(Path::new("x.tiff")));
        assert!(!is_supported_image(Path::new("x.heic")));
        assert!(!is_supported_image(Path::new("README")));
    }

    #[test]
    fn current_settings_are_canonicalized() {
        let record = current_settings(Some(400), Some("F2.8"), Some("1/60"))
            .unwrap()
            .unwrap();
        assert_eq!(record.aperture.as_deref(), Some("f/2.8"));
        assert_eq!(record.shutter_speed.as_deref(), Some("1/60s"));
        assert!(current_settings(None, None, None).unwrap().is_none());
        assert!(current_settings(None, Some("wide"), None).is_err());
    }

    #[test]
    fn collect_walks_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"").unwrap();
        std::fs::write(dir.path().join("sub/b.png"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let images = collect_images(&[dir.path().to_path_buf()]);
        assert_eq!(images.len(), 2);
    }
}
