//! macOS backend notes.
//!
//! IOKit's HID manager reports per-device keyboard events (IOHIDManager
//! with a keyboard usage page matching dictionary), and the Text Input
//! Sources API (TISSelectInputSource) switches layouts. Both need an
//! objc/core-foundation binding this crate does not carry yet.
