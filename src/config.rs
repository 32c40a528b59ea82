/// View engine configuration
///
/// Loaded from JSON or from environment variables; every field has a default
/// so partial configs are accepted.

use crate::error::{GridError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Rows added on both sides of a requested range when the client sends no bufferSize
    pub default_buffer_size: usize,
    /// Pending batch count at which the update queue logs a warning
    pub queue_warn_threshold: usize,
    /// Separator between segments of a tree node path
    pub path_separator: char,
    /// First segment of every tree node path
    pub root_key: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            default_buffer_size: 0,
            queue_warn_threshold: 1000,
            path_separator: '|',
            root_key: "root".to_string(),
        }
    }
}

impl GridConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read `LIVEGRID_BUFFER_SIZE` and `LIVEGRID_QUEUE_WARN_THRESHOLD`.
    /// Absent variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let mut config = GridConfig::default();
        if let Some(n) = env_usize("LIVEGRID_BUFFER_SIZE")? {
            config.default_buffer_size = n;
        }
        if let Some(n) = env_usize("LIVEGRID_QUEUE_WARN_THRESHOLD")? {
            config.queue_warn_threshold = n;
        }
        Ok(config)
    }

    /// Path of the root node, e.g. `root`
    pub fn root_path(&self) -> String {
        self.root_key.clone()
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| GridError::InvalidArgument(format!("{} must be a number, got '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GridConfig::default();
        assert_eq!(config.default_buffer_size, 0);
        assert_eq!(config.queue_warn_threshold, 1000);
        assert_eq!(config.root_path(), "root");
        assert_eq!(config.path_separator, '|');
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = GridConfig::from_json(r#"{"default_buffer_size": 25, "path_separator": "/"}"#).unwrap();
        assert_eq!(config.default_buffer_size, 25);
        assert_eq!(config.queue_warn_threshold, 1000);
        assert_eq!(config.path_separator, '/');

        assert!(GridConfig::from_json("{\"default_buffer_size\": -1}").is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("LIVEGRID_QUEUE_WARN_THRESHOLD", "12");
        let config = GridConfig::from_env().unwrap();
        assert_eq!(config.queue_warn_threshold, 12);

        std::env::set_var("LIVEGRID_QUEUE_WARN_THRESHOLD", "lots");
        assert!(GridConfig::from_env().is_err());
        std::env::remove_var("LIVEGRID_QUEUE_WARN_THRESHOLD");
    }
}
