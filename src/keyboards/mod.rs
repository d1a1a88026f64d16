//! Keyboard identity and preferences.
//!
//! The OS tags every keystroke with a session device handle, but handles
//! are reissued on every boot and after suspend/resume. Identity therefore
//! lives in the OS-reported device name, which is stable; the handle is
//! only a session binding that gets migrated whenever a known keyboard
//! reappears under a new one.

use tracing::{debug, info, warn};

use crate::config::{SavedKeyboard, SavedKeyboards};
use crate::platform::{AttachedKeyboard, DeviceHandle, KeyboardOs};

/// Per-keyboard layout preference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LayoutChoice {
    /// Leave the active layout alone when this keyboard is used.
    #[default]
    KeepCurrent,
    /// Switch to the layout with this display name.
    Layout(String),
}

impl LayoutChoice {
    /// Display name of the chosen layout, or `None` for keep-current.
    pub fn layout_name(&self) -> Option<&str> {
        match self {
            Self::Layout(name) => Some(name),
            Self::KeepCurrent => None,
        }
    }
}

impl From<Option<String>> for LayoutChoice {
    fn from(saved: Option<String>) -> Self {
        match saved {
            Some(name) => Self::Layout(name),
            None => Self::KeepCurrent,
        }
    }
}

/// One physical keyboard, attached or remembered.
#[derive(Debug, Clone)]
pub struct Keyboard {
    /// Stable OS device name; the identity key, unique in the registry.
    /// Two identical models that report the same string collapse into one
    /// entry (known limitation).
    pub name: String,
    /// Session device handle; `None` until the device is seen this
    /// session. Never persisted.
    pub handle: Option<DeviceHandle>,
    pub preference: LayoutChoice,
    /// Whether this keyboard has produced input this session. One-way:
    /// set on first event, never cleared.
    pub activated: bool,
}

type Observer = Box<dyn FnMut(&SavedKeyboards)>;

/// Authoritative set of known keyboards, merged at startup from the
/// attached-device list and the saved snapshot. Mutated only through the
/// resolver and `set_preferred_layout`; durable mutations notify the
/// registered observer (the persistence store) synchronously after they
/// are committed. Entries are never deleted automatically.
pub struct KeyboardRegistry {
    keyboards: Vec<Keyboard>,
    observer: Option<Observer>,
}

impl KeyboardRegistry {
    /// Merge saved keyboards with the currently attached devices. Saved
    /// entries keep their preference whether or not the device is
    /// attached right now (preferences survive a replug); attached
    /// devices unknown to the snapshot start with `KeepCurrent`.
    /// Duplicate attached names collapse to one entry, last-seen handle
    /// wins.
    pub fn load(saved: &SavedKeyboards, attached: &[AttachedKeyboard]) -> Self {
        let mut keyboards: Vec<Keyboard> = saved
            .keyboards
            .iter()
            .map(|s| Keyboard {
                name: s.name.clone(),
                handle: None,
                preference: LayoutChoice::from(s.preferred_layout.clone()),
                activated: false,
            })
            .collect();
        for device in attached {
            match keyboards.iter().position(|k| k.name == device.name) {
                Some(i) => keyboards[i].handle = Some(device.handle),
                None => keyboards.push(Keyboard {
                    name: device.name.clone(),
                    handle: Some(device.handle),
                    preference: LayoutChoice::KeepCurrent,
                    activated: false,
                }),
            }
        }
        Self {
            keyboards,
            observer: None,
        }
    }

    /// Register the change observer. Called with the post-commit snapshot
    /// on every durable mutation; at most one observer in practice (the
    /// persistence store).
    pub fn set_observer(&mut self, observer: impl FnMut(&SavedKeyboards) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn keyboards(&self) -> &[Keyboard] {
        &self.keyboards
    }

    pub fn find_by_handle(&self, handle: DeviceHandle) -> Option<&Keyboard> {
        self.keyboards.iter().find(|k| k.handle == Some(handle))
    }

    #[allow(dead_code)]
    pub fn find_by_name(&self, name: &str) -> Option<&Keyboard> {
        self.keyboards.iter().find(|k| k.name == name)
    }

    /// Append a first-seen keyboard with the default keep-current
    /// preference. Observable (and persisted) immediately.
    pub fn insert_new(&mut self, handle: DeviceHandle, name: &str) -> &Keyboard {
        self.keyboards.push(Keyboard {
            name: name.to_string(),
            handle: Some(handle),
            preference: LayoutChoice::KeepCurrent,
            activated: false,
        });
        self.notify();
        // Just pushed, so the registry cannot be empty.
        &self.keyboards[self.keyboards.len() - 1]
    }

    /// Set a keyboard's preferred layout. The observer is notified only
    /// after the mutation is committed. Returns `false` for an unknown
    /// keyboard name.
    pub fn set_preferred_layout(&mut self, name: &str, choice: LayoutChoice) -> bool {
        match self.keyboards.iter_mut().find(|k| k.name == name) {
            Some(kb) => kb.preference = choice,
            None => {
                warn!(keyboard = %name, "Preference change for unknown keyboard");
                return false;
            }
        }
        self.notify();
        true
    }

    /// Durable view of the registry: names and preferences only, no
    /// session handles.
    pub fn snapshot(&self) -> SavedKeyboards {
        SavedKeyboards {
            keyboards: self
                .keyboards
                .iter()
                .map(|k| SavedKeyboard {
                    name: k.name.clone(),
                    preferred_layout: k.preference.layout_name().map(str::to_string),
                })
                .collect(),
        }
    }

    fn notify(&mut self) {
        let snapshot = self.snapshot();
        if let Some(observer) = &mut self.observer {
            observer(&snapshot);
        }
    }

    /// Resolve a raw input event to the keyboard that produced it.
    ///
    /// Checked in order, short-circuiting on first match: current handle
    /// binding, then stable name (after a device-info query), then a
    /// fresh entry. Falling back to the name lookup before creating an
    /// entry is what keeps identity stable across handle churn; without
    /// it every known keyboard would be duplicated on every restart.
    ///
    /// Returns `None` when the OS cannot resolve the device right now
    /// (transient, e.g. mid-unplug); the event is dropped and the
    /// registry is left untouched.
    pub fn resolve_event(
        &mut self,
        handle: DeviceHandle,
        os: &dyn KeyboardOs,
    ) -> Option<&Keyboard> {
        // Hot path: same keyboard as last time, no device-info query.
        if self.find_by_handle(handle).is_none() {
            let name = match os.keyboard_name(handle) {
                Ok(name) => name,
                Err(e) => {
                    debug!("Dropping input event: {}", e);
                    return None;
                }
            };
            match self.keyboards.iter().position(|k| k.name == name) {
                Some(i) => {
                    // Known keyboard back under a fresh session handle
                    // (reboot, replug, suspend/resume): migrate the
                    // binding instead of duplicating the entry.
                    debug!(keyboard = %name, "Rebinding to new session handle");
                    self.keyboards[i].handle = Some(handle);
                }
                None => {
                    info!(keyboard = %name, "First sighting of keyboard");
                    self.insert_new(handle, &name);
                }
            }
        }

        let kb = self.keyboards.iter_mut().find(|k| k.handle == Some(handle))?;
        kb.activated = true;
        Some(kb)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::platform::fake::FakeOs;

    fn attached(handle: DeviceHandle, name: &str) -> AttachedKeyboard {
        AttachedKeyboard {
            handle,
            name: name.to_string(),
        }
    }

    fn saved(entries: &[(&str, Option<&str>)]) -> SavedKeyboards {
        SavedKeyboards {
            keyboards: entries
                .iter()
                .map(|(name, layout)| SavedKeyboard {
                    name: name.to_string(),
                    preferred_layout: layout.map(str::to_string),
                })
                .collect(),
        }
    }

    #[test]
    fn test_load_merges_saved_and_attached() {
        let saved = saved(&[
            ("ACME-KB-01", Some("English (Australia)")),
            ("Unplugged-KB", Some("German")),
        ]);
        let registry = KeyboardRegistry::load(
            &saved,
            &[attached(1, "ACME-KB-01"), attached(2, "Fresh-KB")],
        );

        let acme = registry.find_by_name("ACME-KB-01").unwrap();
        assert_eq!(acme.handle, Some(1));
        assert_eq!(
            acme.preference,
            LayoutChoice::Layout("English (Australia)".into())
        );
        assert!(!acme.activated);

        // Remembered but not attached: retained, unbound.
        let gone = registry.find_by_name("Unplugged-KB").unwrap();
        assert_eq!(gone.handle, None);
        assert_eq!(gone.preference, LayoutChoice::Layout("German".into()));

        // Attached but never seen before: default preference.
        let fresh = registry.find_by_name("Fresh-KB").unwrap();
        assert_eq!(fresh.handle, Some(2));
        assert_eq!(fresh.preference, LayoutChoice::KeepCurrent);

        assert_eq!(registry.keyboards().len(), 3);
    }

    #[test]
    fn test_load_collapses_duplicate_names() {
        let registry = KeyboardRegistry::load(
            &SavedKeyboards::default(),
            &[attached(1, "Twin-KB"), attached(2, "Twin-KB")],
        );

        // Identical name strings are indistinguishable: one entry,
        // last-seen handle wins.
        assert_eq!(registry.keyboards().len(), 1);
        assert_eq!(registry.find_by_name("Twin-KB").unwrap().handle, Some(2));
    }

    #[test]
    fn test_resolver_one_entry_per_name_across_handles() {
        let os = FakeOs::new()
            .with_name(1, "ACME-KB-01")
            .with_name(2, "ACME-KB-01")
            .with_name(3, "ACME-KB-01");
        let mut registry = KeyboardRegistry::load(&SavedKeyboards::default(), &[]);

        for handle in [1, 2, 3, 2] {
            assert!(registry.resolve_event(handle, &os).is_some());
        }

        // However many session handles the device appeared under, exactly
        // one entry exists.
        assert_eq!(registry.keyboards().len(), 1);
        let kb = registry.find_by_name("ACME-KB-01").unwrap();
        assert_eq!(kb.handle, Some(2));
        assert!(kb.activated);
    }

    #[test]
    fn test_resolver_hot_path_skips_device_query() {
        let os = FakeOs::new().with_name(7, "ACME-KB-01");
        let mut registry = KeyboardRegistry::load(&SavedKeyboards::default(), &[]);

        registry.resolve_event(7, &os);
        registry.resolve_event(7, &os);
        registry.resolve_event(7, &os);

        assert_eq!(os.name_queries.get(), 1);
    }

    #[test]
    fn test_resolver_drops_event_on_device_query_failure() {
        // Handle 9 has no name: the OS cannot resolve it right now.
        let os = FakeOs::new();
        let mut registry =
            KeyboardRegistry::load(&SavedKeyboards::default(), &[attached(1, "ACME-KB-01")]);

        assert!(registry.resolve_event(9, &os).is_none());

        // No partial mutation.
        assert_eq!(registry.keyboards().len(), 1);
        assert!(!registry.keyboards()[0].activated);
    }

    #[test]
    fn test_resolver_rebinds_saved_keyboard_and_keeps_preference() {
        // Restart scenario: the snapshot knows the keyboard, the OS hands
        // out a brand-new handle.
        let os = FakeOs::new().with_name(42, "ACME-KB-01");
        let saved = saved(&[("ACME-KB-01", Some("English (Australia)"))]);
        let mut registry = KeyboardRegistry::load(&saved, &[]);

        let kb = registry.resolve_event(42, &os).unwrap();
        assert_eq!(kb.handle, Some(42));
        assert_eq!(
            kb.preference,
            LayoutChoice::Layout("English (Australia)".into())
        );
        assert!(kb.activated);
        assert_eq!(registry.keyboards().len(), 1);
    }

    #[test]
    fn test_insert_and_preference_changes_notify_observer() {
        let os = FakeOs::new().with_name(5, "ACME-KB-01");
        let mut registry = KeyboardRegistry::load(&SavedKeyboards::default(), &[]);

        let seen: Rc<RefCell<Vec<SavedKeyboards>>> = Rc::default();
        let sink = seen.clone();
        registry.set_observer(move |snapshot| sink.borrow_mut().push(snapshot.clone()));

        registry.resolve_event(5, &os);
        registry.set_preferred_layout(
            "ACME-KB-01",
            LayoutChoice::Layout("English (Australia)".into()),
        );

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        // Each notification reflects the committed state at that point.
        assert_eq!(seen[0].keyboards[0].name, "ACME-KB-01");
        assert_eq!(seen[0].keyboards[0].preferred_layout, None);
        assert_eq!(
            seen[1].keyboards[0].preferred_layout,
            Some("English (Australia)".into())
        );
    }

    #[test]
    fn test_activation_does_not_notify_observer() {
        let os = FakeOs::new().with_name(5, "ACME-KB-01");
        let saved = saved(&[("ACME-KB-01", None)]);
        let mut registry = KeyboardRegistry::load(&saved, &[]);

        let notifications = Rc::new(RefCell::new(0u32));
        let sink = notifications.clone();
        registry.set_observer(move |_| *sink.borrow_mut() += 1);

        // Rebind + activation are session-only state: nothing durable
        // changed, so nothing is written through.
        registry.resolve_event(5, &os);
        assert_eq!(*notifications.borrow(), 0);
    }

    #[test]
    fn test_set_preferred_layout_unknown_keyboard() {
        let mut registry = KeyboardRegistry::load(&SavedKeyboards::default(), &[]);

        let notifications = Rc::new(RefCell::new(0u32));
        let sink = notifications.clone();
        registry.set_observer(move |_| *sink.borrow_mut() += 1);

        assert!(!registry.set_preferred_layout("Ghost-KB", LayoutChoice::KeepCurrent));
        assert_eq!(*notifications.borrow(), 0);
    }

    #[test]
    fn test_snapshot_round_trips_through_load() {
        let original = saved(&[
            ("ACME-KB-01", Some("English (Australia)")),
            ("Other-KB", None),
        ]);
        let registry = KeyboardRegistry::load(&original, &[]);
        assert_eq!(registry.snapshot(), original);
    }
}
