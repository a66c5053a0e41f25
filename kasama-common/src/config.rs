//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config_file_key: Option<&str>,
) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Some(key) = config_file_key {
        if let Ok(config_path) = load_config_file() {
            if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
                if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                    if let Some(root_folder) = config.get(key).and_then(|v| v.as_str()) {
                        return Ok(PathBuf::from(root_folder));
                    }
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(get_default_root_folder())
}

/// Get default configuration file path for the platform
fn load_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/kasama/config.toml first, then /etc/kasama/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("kasama").join("config.toml"));
        let system_config = PathBuf::from("/etc/kasama/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("kasama").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/kasama (or /var/lib/kasama for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("kasama"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/kasama"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("kasama"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/kasama"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("kasama"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\kasama"))
    } else {
        PathBuf::from("./kasama_data")
    }
}

/// Root folder initializer: creates the service data directory and derives
/// well-known paths inside it.
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder directory if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            tracing::info!(path = %self.root_folder.display(), "Created root folder");
        }
        Ok(())
    }

    /// Path of the shared SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("kasama.db")
    }

    pub fn root_folder(&self) -> &PathBuf {
        &self.root_folder
    }
}

/// Read a boolean environment variable, with default
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Read a float environment variable, with default; malformed values are
/// logged and ignored
pub fn env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %v, "Ignoring malformed float env var");
            default
        }),
        Err(_) => default,
    }
}

/// Read an integer environment variable, with default; malformed values are
/// logged and ignored
pub fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %v, "Ignoring malformed integer env var");
            default
        }),
        Err(_) => default,
    }
}
