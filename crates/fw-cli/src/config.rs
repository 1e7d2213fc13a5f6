//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fw_core::ProteinParams;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Decimal places for points per day.
    pub decimal_places: u32,

    /// Monitored clients.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Project constants used for production estimates.
    #[serde(default)]
    pub proteins: Vec<ProteinConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("fw.db"),
            decimal_places: 1,
            clients: Vec::new(),
            proteins: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // FW_DATABASE_PATH, FW_DECIMAL_PLACES
        figment = figment.merge(Env::prefixed("FW_"));

        figment.extract()
    }

    pub fn client(&self, name: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.name == name)
    }

    /// Production constants for `project_id`, if configured.
    pub fn protein(&self, project_id: u32) -> Option<ProteinParams> {
        self.proteins
            .iter()
            .find(|p| p.project_id == project_id)
            .map(ProteinConfig::params)
    }
}

/// A monitored client's data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_queue_file")]
    pub queue_file: String,
    #[serde(default = "default_unit_info_file")]
    pub unit_info_file: String,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            log_file: default_log_file(),
            queue_file: default_queue_file(),
            unit_info_file: default_unit_info_file(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.path.join(&self.log_file)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.path.join(&self.queue_file)
    }

    pub fn unit_info_path(&self) -> PathBuf {
        self.path.join(&self.unit_info_file)
    }
}

fn default_log_file() -> String {
    "FAHlog.txt".to_string()
}

fn default_queue_file() -> String {
    "queue.dat".to_string()
}

fn default_unit_info_file() -> String {
    "unitinfo.txt".to_string()
}

/// Per-project production constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProteinConfig {
    pub project_id: u32,
    pub frames: u32,
    pub credit: f64,
    pub preferred_days: f64,
    pub maximum_days: f64,
    pub k_factor: f64,
}

impl ProteinConfig {
    pub const fn params(&self) -> ProteinParams {
        ProteinParams {
            frames: self.frames,
            credit: self.credit,
            preferred_days: self.preferred_days,
            maximum_days: self.maximum_days,
            k_factor: self.k_factor,
        }
    }
}

/// Returns the platform-specific config directory for fw.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fw"))
}

/// Returns the platform-specific data directory for fw.
///
/// On Linux: `~/.local/share/fw`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("fw"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_data_path_ends_with_fw() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "fw");
    }

    #[test]
    fn test_default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("fw.db"));
        assert_eq!(config.decimal_places, 1);
        assert!(config.clients.is_empty());
    }

    #[test]
    fn test_config_file_fills_client_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
decimal_places = 2

[[clients]]
name = "home"
path = "/var/lib/fah"

[[clients]]
name = "work"
path = "/srv/fah"
log_file = "FAHlog-Prev.txt"

[[proteins]]
project_id = 2677
frames = 100
credit = 3355.0
preferred_days = 3.0
maximum_days = 4.0
k_factor = 26.4
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.decimal_places, 2);
        assert_eq!(config.clients.len(), 2);

        let home = config.client("home").unwrap();
        assert_eq!(home.log_path(), PathBuf::from("/var/lib/fah/FAHlog.txt"));
        assert_eq!(home.queue_path(), PathBuf::from("/var/lib/fah/queue.dat"));
        assert_eq!(home.unit_info_path(), PathBuf::from("/var/lib/fah/unitinfo.txt"));
        assert_eq!(
            config.client("work").unwrap().log_path(),
            PathBuf::from("/srv/fah/FAHlog-Prev.txt")
        );

        let protein = config.protein(2677).unwrap();
        assert_eq!(protein.frames, 100);
        assert!(config.protein(1).is_none());
    }
}
