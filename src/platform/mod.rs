//! OS keyboard capability layer.
//!
//! The core never talks to the OS directly: every device and layout query
//! or command goes through the `KeyboardOs` trait, so the registry,
//! resolver and switcher can run against a scripted fake in tests. The
//! real implementation lives in the per-OS submodules (Windows raw input
//! today; see `linux.rs` / `macos.rs` for the other backends).

pub mod linux;
pub mod macos;
#[cfg(target_os = "windows")]
pub mod windows;

use thiserror::Error;
use tokio::sync::mpsc;

/// Session-scoped raw input device handle. The OS reissues these on every
/// boot (and may reissue them after suspend/resume), so they are only
/// comparable within the current session and are never persisted.
pub type DeviceHandle = u64;

/// Session-scoped input layout handle (HKL on Windows). Same lifetime
/// rules as `DeviceHandle`: never persisted, never compared across runs.
pub type LayoutHandle = u64;

/// A keyboard-class device currently attached, as reported by the OS.
#[derive(Debug, Clone)]
pub struct AttachedKeyboard {
    pub handle: DeviceHandle,
    /// Stable device name string; survives reboots and replugs.
    pub name: String,
}

/// The OS could not resolve a device right now (e.g. it was unplugged
/// mid-event). Transient: the caller drops the current event and moves on.
#[derive(Debug, Error)]
#[error("device query failed: {0}")]
pub struct DeviceQueryError(pub String);

/// A layout query or switch command failed. Logged and never retried; a
/// missed switch is recoverable by switching manually.
#[derive(Debug, Error)]
#[error("layout operation failed: {0}")]
pub struct LayoutError(pub String);

/// Every OS query and command the core needs, behind one injectable seam.
pub trait KeyboardOs {
    /// List currently attached keyboard-class devices. Other input device
    /// classes are filtered out by the backend.
    fn list_keyboards(&self) -> Result<Vec<AttachedKeyboard>, DeviceQueryError>;

    /// Resolve the stable device name for a session handle.
    fn keyboard_name(&self, device: DeviceHandle) -> Result<String, DeviceQueryError>;

    /// List the input layouts installed on the system.
    fn list_layouts(&self) -> Result<Vec<LayoutHandle>, LayoutError>;

    /// Human-readable name for a layout, if the OS knows one.
    fn layout_display_name(&self, layout: LayoutHandle) -> Option<String>;

    /// The active layout of the foreground context.
    fn active_layout(&self) -> Result<LayoutHandle, LayoutError>;

    /// Ask the foreground application to switch to `layout` immediately.
    fn broadcast_layout(&self, layout: LayoutHandle) -> Result<(), LayoutError>;

    /// Make `layout` the session default so applications focused later
    /// pick it up too.
    fn set_default_layout(&self, layout: LayoutHandle) -> Result<(), LayoutError>;
}

/// Build the backend for the current OS and start its input listener.
///
/// Returns the capability handle plus the channel delivering the source
/// device handle of every keystroke. Listener registration failure is
/// fatal to startup: without it the core has no event source.
#[cfg(target_os = "windows")]
pub fn create() -> anyhow::Result<(windows::WindowsOs, mpsc::UnboundedReceiver<DeviceHandle>)> {
    let events = windows::spawn_input_listener()?;
    Ok((windows::WindowsOs, events))
}

/// Placeholder backend for platforms without an input listener yet.
/// Only ever named in signatures: `create` fails before constructing it.
#[cfg(not(target_os = "windows"))]
#[allow(dead_code)]
pub struct UnsupportedOs;

#[cfg(not(target_os = "windows"))]
impl KeyboardOs for UnsupportedOs {
    fn list_keyboards(&self) -> Result<Vec<AttachedKeyboard>, DeviceQueryError> {
        Err(DeviceQueryError("unsupported platform".into()))
    }

    fn keyboard_name(&self, _device: DeviceHandle) -> Result<String, DeviceQueryError> {
        Err(DeviceQueryError("unsupported platform".into()))
    }

    fn list_layouts(&self) -> Result<Vec<LayoutHandle>, LayoutError> {
        Err(LayoutError("unsupported platform".into()))
    }

    fn layout_display_name(&self, _layout: LayoutHandle) -> Option<String> {
        None
    }

    fn active_layout(&self) -> Result<LayoutHandle, LayoutError> {
        Err(LayoutError("unsupported platform".into()))
    }

    fn broadcast_layout(&self, _layout: LayoutHandle) -> Result<(), LayoutError> {
        Err(LayoutError("unsupported platform".into()))
    }

    fn set_default_layout(&self, _layout: LayoutHandle) -> Result<(), LayoutError> {
        Err(LayoutError("unsupported platform".into()))
    }
}

#[cfg(not(target_os = "windows"))]
pub fn create() -> anyhow::Result<(UnsupportedOs, mpsc::UnboundedReceiver<DeviceHandle>)> {
    // Per-device input attribution needs a platform backend; see the
    // notes in `linux.rs` / `macos.rs`.
    anyhow::bail!("no keyboard input backend for this platform yet")
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory `KeyboardOs` shared by the core tests.

    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    use super::{
        AttachedKeyboard, DeviceHandle, DeviceQueryError, KeyboardOs, LayoutError, LayoutHandle,
    };

    #[derive(Default)]
    pub struct FakeOs {
        pub attached: Vec<AttachedKeyboard>,
        /// Device handle -> name; a handle with no entry fails resolution.
        pub names: HashMap<DeviceHandle, String>,
        /// Installed layouts; `None` name simulates a display-name lookup
        /// failure for that layout.
        pub layouts: Vec<(LayoutHandle, Option<String>)>,
        pub layouts_fail: bool,
        /// Foreground layout; `None` makes `active_layout` fail.
        pub active: Cell<Option<LayoutHandle>>,
        pub broadcasts: RefCell<Vec<LayoutHandle>>,
        pub defaults: RefCell<Vec<LayoutHandle>>,
        pub name_queries: Cell<u32>,
    }

    impl FakeOs {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_name(mut self, handle: DeviceHandle, name: &str) -> Self {
            self.names.insert(handle, name.to_string());
            self
        }

        pub fn with_layout(mut self, handle: LayoutHandle, name: &str) -> Self {
            self.layouts.push((handle, Some(name.to_string())));
            self
        }

        pub fn switch_count(&self) -> usize {
            self.broadcasts.borrow().len()
        }
    }

    impl KeyboardOs for FakeOs {
        fn list_keyboards(&self) -> Result<Vec<AttachedKeyboard>, DeviceQueryError> {
            Ok(self.attached.clone())
        }

        fn keyboard_name(&self, device: DeviceHandle) -> Result<String, DeviceQueryError> {
            self.name_queries.set(self.name_queries.get() + 1);
            self.names
                .get(&device)
                .cloned()
                .ok_or_else(|| DeviceQueryError(format!("no device {:#x}", device)))
        }

        fn list_layouts(&self) -> Result<Vec<LayoutHandle>, LayoutError> {
            if self.layouts_fail {
                return Err(LayoutError("enumeration failed".into()));
            }
            Ok(self.layouts.iter().map(|(handle, _)| *handle).collect())
        }

        fn layout_display_name(&self, layout: LayoutHandle) -> Option<String> {
            self.layouts
                .iter()
                .find(|(handle, _)| *handle == layout)
                .and_then(|(_, name)| name.clone())
        }

        fn active_layout(&self) -> Result<LayoutHandle, LayoutError> {
            self.active
                .get()
                .ok_or_else(|| LayoutError("no foreground layout".into()))
        }

        fn broadcast_layout(&self, layout: LayoutHandle) -> Result<(), LayoutError> {
            self.broadcasts.borrow_mut().push(layout);
            // The OS honors the request: the foreground layout changes.
            self.active.set(Some(layout));
            Ok(())
        }

        fn set_default_layout(&self, layout: LayoutHandle) -> Result<(), LayoutError> {
            self.defaults.borrow_mut().push(layout);
            Ok(())
        }
    }
}
