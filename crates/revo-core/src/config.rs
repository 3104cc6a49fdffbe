//! Configuration file support for revo
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/revo/config.toml`
//! - macOS: `~/Library/Application Support/revo/config.toml`
//! - Windows: `%APPDATA%\revo\config.toml`

use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Component lookup and file watching
    pub interpreter: InterpreterSettings,
    /// MIDI file output
    pub output: OutputSettings,
    /// External player started on each written file
    pub player: PlayerSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "revo") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG)?;
        Ok(path)
    }
}

const DEFAULT_CONFIG: &str = r#"# revo configuration file

[interpreter]
# Directory holding a "components" folder with compiled .revocomp plugins
# resource_directory = "/home/me/revo"

# How often the project document is checked for changes
poll_interval_ms = 100

[output]
# MIDI file written after every cycle, relative to the project directory
path = "output.mid"

# Resolution of the written file
ticks_per_quarter = 96

# Note-on velocity (1-127)
velocity = 64

[player]
# Program started on the written file after every cycle (optional)
# command = "timidity"
args = []
"#;

/// Interpreter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterSettings {
    /// Root searched for `components/**/*.revocomp`
    pub resource_directory: Option<PathBuf>,
    /// Watcher poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl InterpreterSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            resource_directory: None,
            poll_interval_ms: 100,
        }
    }
}

/// MIDI output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Output file, relative to the project directory unless absolute
    pub path: PathBuf,
    /// Ticks per quarter note
    pub ticks_per_quarter: u16,
    /// Note-on velocity
    pub velocity: u8,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("output.mid"),
            ticks_per_quarter: 96,
            velocity: 64,
        }
    }
}

/// Player settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Player executable; no player is started when unset
    pub command: Option<PathBuf>,
    /// Arguments placed before the file name
    pub args: Vec<String>,
}
