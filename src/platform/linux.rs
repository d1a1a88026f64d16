//! Linux backend notes.
//!
//! Per-device attribution is available from evdev: every keyboard is its
//! own /dev/input/event* node, and the device name string from
//! EVIOCGNAME is exactly the stable identity this program needs. What
//! keeps this backend gated is the switch side: there is no OS-wide
//! layout to set. X11 wants setxkbmap, and Wayland compositors each
//! expose their own IPC (swaymsg input, KDE virtual keyboard DBus).

// TODO: Implement the evdev listener half behind `KeyboardOs`.
// 1. Enumerate /dev/input devices via evdev::enumerate()
// 2. Filter to devices advertising EV_KEY with letter keycodes
// 3. Multiplex reads with epoll; the node that fired identifies the device
// 4. Requires the user to be in the `input` group
