//! Layout switching on keyboard activation.
//!
//! Stateless: each call compares the keyboard's preferred layout against
//! the OS's live active layout and issues at most one switch. A layout
//! that is already active is never re-sent (redundant switches cause
//! visible flicker and refocus side effects in some applications), and a
//! failed switch is logged but not retried: the user can always switch
//! manually.

use tracing::{debug, warn};

use crate::keyboards::{Keyboard, LayoutChoice};
use crate::layouts::LayoutCatalog;
use crate::platform::KeyboardOs;

/// React to `keyboard` having produced input. If it prefers a specific
/// layout and that layout is not already active, broadcast the change to
/// the foreground application and make it the session default. Returns
/// the display name of the layout switched to, if a switch was issued.
pub fn activate_for(
    keyboard: &Keyboard,
    catalog: &LayoutCatalog,
    os: &dyn KeyboardOs,
) -> Option<String> {
    let wanted = match &keyboard.preference {
        // The user opted this keyboard out of auto-switching.
        LayoutChoice::KeepCurrent => return None,
        LayoutChoice::Layout(name) => name,
    };

    let layout = match catalog.find_by_name(wanted) {
        Some(layout) => layout,
        None => {
            // The preference survives in the snapshot; it just cannot be
            // honored until the layout is installed again.
            warn!(keyboard = %keyboard.name, layout = %wanted, "Preferred layout is not installed");
            return None;
        }
    };
    // find_by_name only returns real catalog entries.
    let handle = layout.handle?;

    match os.active_layout() {
        Ok(active) if active == handle => {
            debug!(layout = %wanted, "Preferred layout already active");
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            // Cannot tell whether a switch is needed: skip rather than
            // risk a redundant one.
            warn!("Failed to query active layout: {}", e);
            return None;
        }
    }

    // Fire and forget: the broadcast covers the foreground application,
    // the session default covers windows focused later.
    if let Err(e) = os.broadcast_layout(handle) {
        warn!(layout = %wanted, "Failed to broadcast layout change: {}", e);
    }
    if let Err(e) = os.set_default_layout(handle) {
        warn!(layout = %wanted, "Failed to set default layout: {}", e);
    }
    Some(wanted.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeOs;

    fn keyboard(preference: LayoutChoice) -> Keyboard {
        Keyboard {
            name: "ACME-KB-01".into(),
            handle: Some(1),
            preference,
            activated: true,
        }
    }

    fn aus() -> LayoutChoice {
        LayoutChoice::Layout("English (Australia)".into())
    }

    #[test]
    fn test_keep_current_never_switches() {
        let os = FakeOs::new().with_layout(0x409, "English (United States)");
        os.active.set(Some(0x409));
        let catalog = LayoutCatalog::load(&os);

        for _ in 0..3 {
            assert!(activate_for(&keyboard(LayoutChoice::KeepCurrent), &catalog, &os).is_none());
        }
        assert_eq!(os.switch_count(), 0);
        assert!(os.defaults.borrow().is_empty());
    }

    #[test]
    fn test_switch_issues_broadcast_and_default_once() {
        let os = FakeOs::new()
            .with_layout(0x409, "English (United States)")
            .with_layout(0xc09, "English (Australia)");
        os.active.set(Some(0x409));
        let catalog = LayoutCatalog::load(&os);

        let switched = activate_for(&keyboard(aus()), &catalog, &os);
        assert_eq!(switched.as_deref(), Some("English (Australia)"));
        assert_eq!(*os.broadcasts.borrow(), vec![0xc09]);
        assert_eq!(*os.defaults.borrow(), vec![0xc09]);
    }

    #[test]
    fn test_already_active_layout_is_not_resent() {
        let os = FakeOs::new().with_layout(0xc09, "English (Australia)");
        os.active.set(Some(0xc09));
        let catalog = LayoutCatalog::load(&os);

        assert!(activate_for(&keyboard(aus()), &catalog, &os).is_none());
        assert_eq!(os.switch_count(), 0);
    }

    #[test]
    fn test_repeat_activation_switches_at_most_once() {
        let os = FakeOs::new()
            .with_layout(0x409, "English (United States)")
            .with_layout(0xc09, "English (Australia)");
        os.active.set(Some(0x409));
        let catalog = LayoutCatalog::load(&os);

        let kb = keyboard(aus());
        // First activation switches; the second sees the new active
        // layout and stays quiet.
        assert!(activate_for(&kb, &catalog, &os).is_some());
        assert!(activate_for(&kb, &catalog, &os).is_none());
        assert_eq!(os.switch_count(), 1);
    }

    #[test]
    fn test_uninstalled_preferred_layout_is_skipped() {
        let os = FakeOs::new().with_layout(0x409, "English (United States)");
        os.active.set(Some(0x409));
        let catalog = LayoutCatalog::load(&os);

        assert!(activate_for(&keyboard(aus()), &catalog, &os).is_none());
        assert_eq!(os.switch_count(), 0);
    }

    #[test]
    fn test_restart_scenario_switches_after_rebind() {
        use crate::config::{SavedKeyboard, SavedKeyboards};
        use crate::keyboards::KeyboardRegistry;

        // A previous session saved a preference for this keyboard. The
        // process restarts and the OS hands the device a brand-new
        // handle.
        let os = FakeOs::new()
            .with_name(0x2222, "ACME-KB-01")
            .with_layout(0x409, "English (United States)")
            .with_layout(0xc09, "English (Australia)");
        os.active.set(Some(0x409));
        let catalog = LayoutCatalog::load(&os);
        let saved = SavedKeyboards {
            keyboards: vec![SavedKeyboard {
                name: "ACME-KB-01".into(),
                preferred_layout: Some("English (Australia)".into()),
            }],
        };
        let mut registry = KeyboardRegistry::load(&saved, &[]);

        let kb = registry.resolve_event(0x2222, &os).unwrap().clone();
        let switched = activate_for(&kb, &catalog, &os);

        assert_eq!(switched.as_deref(), Some("English (Australia)"));
        assert_eq!(os.active.get(), Some(0xc09));
        assert_eq!(registry.keyboards().len(), 1);
    }

    #[test]
    fn test_active_layout_query_failure_skips_switch() {
        let os = FakeOs::new().with_layout(0xc09, "English (Australia)");
        // active stays None: the query fails.
        let catalog = LayoutCatalog::load(&os);

        assert!(activate_for(&keyboard(aus()), &catalog, &os).is_none());
        assert_eq!(os.switch_count(), 0);
    }
}
