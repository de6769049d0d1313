//! Browser configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::Result;

/// What happens to a tab's surface when another tab is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundPolicy {
    #[default]
    Deactivate,
    Suspend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file, or `:memory:`
    pub database_path: PathBuf,
    /// Capacity of the recently closed list
    pub max_recently_closed: usize,
    /// Zoom factor for new surfaces
    pub default_zoom: f64,
    /// Storage partition for new surfaces; empty uses the host default
    pub partition: String,
    pub background_policy: BackgroundPolicy,
    /// Fallback `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("tabshell.db"),
            max_recently_closed: 10,
            default_zoom: 1.0,
            partition: String::new(),
            background_policy: BackgroundPolicy::Deactivate,
            log_filter: "info".to_string(),
        }
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_recently_closed == 0 {
            return Err(CoreError::Config(
                "max_recently_closed must be at least 1".to_string(),
            ));
        }
        if !(self.default_zoom.is_finite() && self.default_zoom > 0.0) {
            return Err(CoreError::Config(format!(
                "default_zoom must be positive, got {}",
                self.default_zoom
            )));
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(":memory:")
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("tabshell"))
            .unwrap_or_else(|| PathBuf::from(".tabshell"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("tabshell-{}-{}.json", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::new(PathBuf::from("/data"));
        assert_eq!(config.database_path, PathBuf::from("/data/tabshell.db"));
        assert_eq!(config.max_recently_closed, 10);
        assert_eq!(config.background_policy, BackgroundPolicy::Deactivate);
        assert!(config.validate().is_ok());
        assert_eq!(
            Config::default().database_path.file_name(),
            Some(std::ffi::OsStr::new("tabshell.db"))
        );
    }

    #[test]
    fn test_load_partial_file() {
        let path = temp_file(
            "partial",
            r#"{"max_recently_closed": 3, "background_policy": "suspend", "database_path": ":memory:"}"#,
        );
        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.max_recently_closed, 3);
        assert_eq!(config.background_policy, BackgroundPolicy::Suspend);
        assert!(config.is_in_memory());
        assert_eq!(config.default_zoom, 1.0);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let path = temp_file("invalid", r#"{"default_zoom": 0}"#);
        let result = Config::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(CoreError::Config(_))));

        assert!(matches!(
            Config::load("/nonexistent/tabshell.json"),
            Err(CoreError::Config(_))
        ));
    }
}
