use std::path::Path;

use anyhow::{Context, Result, ensure};
use config_model::AlbumSettings;
use serde::Deserialize;

/// Top-level YAML document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    /// Album, rotation, cache and viewport settings shared with the helper task.
    #[serde(flatten)]
    pub album: AlbumSettings,
    /// Default log filter when `RUST_LOG` is unset, e.g. `debug` or `prism_frame=trace`.
    #[serde(default = "Configuration::default_log_level")]
    pub log_level: String,
}

impl Configuration {
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&s)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.log_level.trim().is_empty(),
            "log-level must not be empty"
        );
        self.album.validate()?;
        Ok(self)
    }
}
