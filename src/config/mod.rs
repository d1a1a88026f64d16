//! Durable keyboard preferences.
//!
//! The registry's durable state (device name -> preferred layout) lives in
//! `keyboards.json` in the data directory. Loading tolerates a missing or
//! corrupt file by starting empty and flagging a first run; saving is
//! write-through, invoked synchronously on every committed registry
//! mutation.

pub mod paths;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::data_dir;

/// On-disk snapshot of every keyboard the user has ever typed on. Durable
/// fields only: session device handles are reissued by the OS every boot
/// and must never be written through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedKeyboards {
    #[serde(default)]
    pub keyboards: Vec<SavedKeyboard>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedKeyboard {
    /// Stable OS-reported device name; the identity key.
    pub name: String,
    /// Display name of the preferred layout, or `None` to keep the
    /// current layout when this keyboard is used.
    #[serde(default)]
    pub preferred_layout: Option<String>,
}

/// Path to keyboards.json.
pub fn keyboards_file() -> PathBuf {
    data_dir().join("keyboards.json")
}

/// Load the saved snapshot. An absent, unreadable or unparsable file
/// yields an empty snapshot with the first-run flag set; having no prior
/// configuration is not an error.
pub fn load_keyboards() -> (SavedKeyboards, bool) {
    load_keyboards_from(&keyboards_file())
}

fn load_keyboards_from(path: &Path) -> (SavedKeyboards, bool) {
    match read_json_file::<SavedKeyboards>(path) {
        Some(saved) => (saved, false),
        None => (SavedKeyboards::default(), true),
    }
}

/// Write the snapshot, creating the data directory on first save.
pub fn save_keyboards(saved: &SavedKeyboards) -> anyhow::Result<()> {
    save_keyboards_to(saved, &keyboards_file())
}

fn save_keyboards_to(saved: &SavedKeyboards, path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(saved)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
