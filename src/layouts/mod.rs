//! Installed input layouts.
//!
//! Enumerated once at startup. The catalog always starts with the
//! synthetic "keep current layout" entry so the UI can offer opting a
//! keyboard out of auto-switching; the real layouts follow in OS order.

use tracing::warn;

use crate::platform::{KeyboardOs, LayoutHandle};

/// UI label of the keep-current sentinel.
pub const KEEP_CURRENT: &str = "Keep current layout";

/// One selectable input layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Session layout handle; `None` marks the keep-current sentinel.
    pub handle: Option<LayoutHandle>,
    /// Display name, e.g. "English (Australia)". Doubles as the durable
    /// key under which preferences are saved, since handles do not
    /// survive a reboot.
    pub name: String,
}

impl Layout {
    pub fn is_keep_current(&self) -> bool {
        self.handle.is_none()
    }
}

pub struct LayoutCatalog {
    layouts: Vec<Layout>,
}

impl LayoutCatalog {
    /// Enumerate installed layouts, sentinel first. A single layout
    /// failing its display-name lookup falls back to its hex identifier
    /// rather than blanking the list; the whole enumeration failing
    /// degrades to a sentinel-only catalog.
    pub fn load(os: &dyn KeyboardOs) -> Self {
        let mut layouts = vec![Layout {
            handle: None,
            name: KEEP_CURRENT.to_string(),
        }];
        match os.list_layouts() {
            Ok(handles) => {
                for handle in handles {
                    let name = os
                        .layout_display_name(handle)
                        .unwrap_or_else(|| format!("{:08x}", handle));
                    layouts.push(Layout {
                        handle: Some(handle),
                        name,
                    });
                }
            }
            Err(e) => warn!("Failed to enumerate keyboard layouts: {}", e),
        }
        Self { layouts }
    }

    /// All layouts in enumeration order, sentinel first.
    pub fn layouts(&self) -> &[Layout] {
        &self.layouts
    }

    /// Look up a real layout by display name (the persisted key). The
    /// sentinel is not addressable by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Layout> {
        self.layouts
            .iter()
            .find(|l| l.handle.is_some() && l.name == name)
    }
}
