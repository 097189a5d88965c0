//! Platform-specific data directory paths.
//!
//! Used for the log file and, optionally, a locally cached persona file.
//! Respects `DATA_DIR` as an override before falling back to the
//! platform-appropriate application data directory:
//!   Windows: %APPDATA%/k9-agent-core/data
//!   macOS:   ~/Library/Application Support/k9-agent-core/data
//!   Linux:   $XDG_CONFIG_HOME/k9-agent-core/data (default ~/.config)

use std::path::PathBuf;

/// Get the agent's data directory (cross-platform).
pub fn get_data_dir() -> PathBuf {
    if let Some(over) = std::env::var_os("DATA_DIR") {
        return PathBuf::from(over);
    }
    get_config_base().join("k9-agent-core").join("data")
}

/// Get the platform-appropriate base config directory.
fn get_config_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% (typically C:\Users\<user>\AppData\Roaming)
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::config_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("AppData")
                .join("Roaming")
        })
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // Linux and other Unix: respect XDG_CONFIG_HOME, default ~/.config
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    }
}
