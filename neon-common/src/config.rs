//! Data folder and configuration file resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Name of the per-user application directory
pub const APP_DIR_NAME: &str = "neon";

/// Default configuration file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Data folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `data_folder` key of the TOML config file (if one is found)
/// 4. OS-dependent default
pub fn resolve_data_folder(cli_arg: Option<&Path>, env_var_name: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(folder) = config.get("data_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(folder);
                }
            }
        }
    }

    default_data_folder()
}

/// Locate the user configuration file
///
/// Linux also checks `/etc/neon/config.toml` after the user config directory.
pub fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./neon_data"))
}
