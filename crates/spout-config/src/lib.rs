//! Window configuration for the embedding frontend.
//!
//! Loads a JSON file describing the window the frontend collaborator should
//! create (title, size, initial document). Entirely independent of the
//! process bridge; the bridge never reads configuration.

use serde::{Deserialize, Serialize};
use spout_common::ConfigError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Window parameters supplied to the embedding frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title.
    pub title: String,
    /// Window width in pixels.
    pub width: u32,
    /// Window height in pixels.
    pub height: u32,
    /// Path of the initial document to load.
    pub path: PathBuf,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Spout".to_string(),
            width: 800,
            height: 600,
            path: PathBuf::from("index.html"),
        }
    }
}

/// Load a window config from a JSON file.
///
/// The file must exist, parse, and validate; there is no fallback to
/// defaults because a missing initial document leaves the frontend with
/// nothing to show.
pub fn load_from_path(path: &Path) -> Result<WindowConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

    let config: WindowConfig = serde_json::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse JSON: {e}")))?;

    validate(&config)?;

    info!("loaded window config from {}", path.display());
    Ok(config)
}

fn validate(config: &WindowConfig) -> Result<(), ConfigError> {
    if config.title.trim().is_empty() {
        return Err(ConfigError::ValidationError("title must not be empty".into()));
    }
    if config.width == 0 || config.height == 0 {
        return Err(ConfigError::ValidationError(
            "width and height must be non-zero".into(),
        ));
    }
    if config.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError("path must not be empty".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
