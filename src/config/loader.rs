//! Single-file manifest loader used by the binary.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ServiceSpec, SupervisorConfig};
use crate::error::ConfigError;

/// Top-level manifest: runtime settings plus the service list.
///
/// ```toml
/// [supervisor]
/// grace = "20s"
///
/// [[services]]
/// name = "db"
/// executable = "/usr/bin/postgres"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    /// Runtime settings.
    pub supervisor: SupervisorConfig,
    /// Declared services.
    pub services: Vec<ServiceSpec>,
}

impl Manifest {
    /// Reads a `.toml` or `.json` manifest.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(text).map_err(|source| ConfigError::Toml {
                path: PathBuf::from(path),
                source,
            }),
            Some("json") => serde_json::from_str(text).map_err(|source| ConfigError::Json {
                path: PathBuf::from(path),
                source,
            }),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}
