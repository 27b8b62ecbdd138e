//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::PathBuf;

const CONFIG_DIR_NAME: &str = ".warden";

/// Get the warden config directory (~/.warden)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.warden/config.toml)
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the default execution log database (~/.warden/warden.db)
pub fn default_db_path() -> PathBuf {
    config_dir().join("warden.db")
}
