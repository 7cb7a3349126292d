//! Environment construction for spawned instances.
//!
//! Layers, later wins:
//! 1. the supervisor's own environment when `inherit_env` is set;
//! 2. each `env_file`, in declaration order;
//! 3. the explicit `env` map, where `None` removes the key.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::ServiceSpec;
use crate::error::SpawnError;

/// Builds the full environment of one service.
pub fn build_environment(spec: &ServiceSpec) -> Result<BTreeMap<String, String>, SpawnError> {
    let mut env = BTreeMap::new();

    if spec.inherit_env {
        env.extend(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }));
    }

    for path in &spec.env_file {
        load_env_file(path, &mut env)?;
    }

    for (key, value) in &spec.env {
        match value {
            Some(value) => {
                env.insert(key.clone(), value.clone());
            }
            None => {
                env.remove(key);
            }
        }
    }
    Ok(env)
}

/// Reads a dotenv file into `env`.
///
/// Blank lines and `#` comments are skipped, one pair of matching surrounding
/// quotes is stripped, lines without `=` are logged and skipped.
pub fn load_env_file(path: &Path, env: &mut BTreeMap<String, String>) -> Result<(), SpawnError> {
    let text = std::fs::read_to_string(path).map_err(|source| SpawnError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(file = %path.display(), line = idx + 1, content = line, "invalid line in env file");
            continue;
        };
        env.insert(key.trim().to_owned(), unquote(value.trim()).to_owned());
    }

    debug!(file = %path.display(), "loaded env file");
    Ok(())
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
