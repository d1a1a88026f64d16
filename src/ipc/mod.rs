//! IPC protocol types for communication with the settings UI.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> UI).
//! Commands use `{"command": "<name>", ...}` format (UI -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::keyboards::Keyboard;
use crate::layouts::Layout;

// ---------------------------------------------------------------------------
// Events: core -> UI (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the settings UI via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum CoreEvent {
    Starting {},
    Ready { first_run: bool },
    LayoutList { layouts: Vec<LayoutInfo> },
    KeyboardList { keyboards: Vec<KeyboardInfo> },
    /// A keyboard produced input; lets the UI highlight the live device.
    KeyboardActivated { name: String },
    LayoutSwitched { keyboard: String, layout: String },
    Error { message: String },
    Pong {},
    Stopping {},
}

/// UI-facing view of one selectable layout. The keep-current sentinel is
/// always the first entry of `layout_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub name: String,
    pub keep_current: bool,
}

impl From<&Layout> for LayoutInfo {
    fn from(layout: &Layout) -> Self {
        Self {
            name: layout.name.clone(),
            keep_current: layout.is_keep_current(),
        }
    }
}

/// UI-facing view of one keyboard, attached or remembered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyboardInfo {
    pub name: String,
    /// Preferred layout display name; `null` means keep current.
    pub preferred_layout: Option<String>,
    pub attached: bool,
    pub activated: bool,
}

impl From<&Keyboard> for KeyboardInfo {
    fn from(kb: &Keyboard) -> Self {
        Self {
            name: kb.name.clone(),
            preferred_layout: kb.preference.layout_name().map(str::to_string),
            attached: kb.handle.is_some(),
            activated: kb.activated,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands: UI -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the settings UI via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum CoreCommand {
    ListLayouts {},
    ListKeyboards {},
    SetPreferredLayout {
        keyboard: String,
        /// Display name of the layout, or `null` for keep-current.
        #[serde(default)]
        layout: Option<String>,
    },
    Ping {},
    Stop {},
}
