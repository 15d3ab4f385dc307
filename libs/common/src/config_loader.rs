//! Configuration loading helpers
//!
//! Layers, lowest priority first: configuration file (format chosen by
//! extension), prefixed environment variables, then whatever the caller
//! merges on top (usually command-line overrides).

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{CommonError, Result};

/// First existing file among `candidates`
pub fn find_config_file<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.is_file())
        .map(Path::to_path_buf)
}

/// Figment for a single configuration file. The file must exist.
pub fn file_figment(path: &Path) -> Result<Figment> {
    if !path.is_file() {
        return Err(CommonError::config(format!(
            "Config file {} not found",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CommonError::config("Config file must have an extension"))?;

    let figment = match extension {
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        "json" => Figment::new().merge(Json::file(path)),
        _ => {
            return Err(CommonError::config(format!(
                "Unsupported config file format: {}",
                extension
            )))
        },
    };

    debug!("Config file {} ({})", path.display(), extension);
    Ok(figment)
}

/// Config file plus `<PREFIX>_*` environment variables, `__` separating
/// nested keys (`MBCOLLECT_SETTINGS__BAUD=9600`)
pub fn layered_figment(path: Option<&Path>, env_prefix: &str) -> Result<Figment> {
    let figment = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            file_figment(path)?
        },
        None => Figment::new(),
    };
    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Extract a typed configuration, mapping figment errors
pub fn extract<T: DeserializeOwned>(figment: &Figment) -> Result<T> {
    figment
        .extract()
        .map_err(|e| CommonError::config(format!("Failed to load configuration: {}", e)))
}
