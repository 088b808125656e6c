//! Utility functions for CLI commands.

use std::path::Path;

use anyhow::Context;
use rollcall_attendance::EngineConfig;
use rollcall_gallery::{Gallery, GallerySnapshot};

use crate::Cli;

/// Loads a document from a YAML or JSON file.
pub fn load_request<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("yaml");

    let result = match ext.to_lowercase().as_str() {
        "json" => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };

    Ok(result)
}

/// Resolves the engine configuration: the `--config` file if given,
/// otherwise defaults for a gallery of dimension `dim`.
pub fn engine_config(cli: &Cli, dim: usize) -> anyhow::Result<EngineConfig> {
    match cli.config.as_deref() {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::new(dim)),
    }
}

/// Loads a gallery snapshot together with the engine configuration that
/// applies to it.
pub fn load_gallery(cli: &Cli, path: &str) -> anyhow::Result<(Gallery, EngineConfig)> {
    let snap: GallerySnapshot = load_request(path)?;
    let cfg = engine_config(cli, snap.dim)?;
    let gallery = Gallery::from_snapshot(cfg.gallery.clone(), snap)
        .with_context(|| format!("invalid gallery snapshot {path}"))?;
    Ok((gallery, cfg))
}

/// Outputs result as JSON or YAML.
pub fn output_result<T: serde::Serialize>(
    result: &T,
    output_path: Option<&str>,
    as_json: bool,
) -> anyhow::Result<()> {
    let output = if as_json {
        serde_json::to_string_pretty(result)? + "\n"
    } else {
        serde_yaml::to_string(result)?
    };

    match output_path {
        Some(path) => std::fs::write(path, output)?,
        None => print!("{}", output),
    }

    Ok(())
}

/// Prints success message.
pub fn print_success(msg: &str) {
    eprintln!("\x1b[32m✓\x1b[0m {}", msg);
}

/// Prints warning message.
pub fn print_warning(msg: &str) {
    eprintln!("\x1b[33m⚠\x1b[0m {}", msg);
}
