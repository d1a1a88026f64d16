//! Platform-specific data directory paths.
//!
//! The Electron settings UI resolves the same directory, so the layout is
//! fixed:
//!   Windows: %APPDATA%/keyswitch
//!   macOS:   ~/Library/Application Support/keyswitch
//!   Linux:   $XDG_CONFIG_HOME/keyswitch (default ~/.config/keyswitch)

use std::path::PathBuf;

/// Get the KeySwitch data directory (cross-platform).
pub fn data_dir() -> PathBuf {
    config_base().join("keyswitch")
}

/// Get the platform-appropriate base config directory.
fn config_base() -> PathBuf {
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
