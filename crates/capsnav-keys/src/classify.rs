//! Keyboard detection

use std::collections::HashSet;

use evdev::{Device, EventType, Key};

/// The parts of a device's capability report the classifier looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Device reports the EV_KEY event category
    pub key_events: bool,
    /// Key and button codes the device can emit
    pub keys: HashSet<Key>,
}

impl Capabilities {
    pub fn new(key_events: bool, keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            key_events,
            keys: keys.into_iter().collect(),
        }
    }

    /// Read the capability report of an open device.
    pub fn of(device: &Device) -> Self {
        Self {
            key_events: device.supported_events().contains(EventType::KEY),
            keys: device
                .supported_keys()
                .map(|keys| keys.iter().collect())
                .unwrap_or_default(),
        }
    }
}

/// Guess whether a device is a keyboard.
///
/// A keyboard reports key events, has space, `A` and `Z`, and has no primary
/// mouse button. `BTN_LEFT` is the kernel's `BTN_MOUSE`; composite devices
/// that carry both a key block and mouse buttons are treated as pointers.
pub fn is_keyboard(caps: &Capabilities) -> bool {
    if !caps.key_events {
        return false;
    }

    let has_common_keys = [Key::KEY_SPACE, Key::KEY_A, Key::KEY_Z]
        .iter()
        .all(|key| caps.keys.contains(key));

    has_common_keys && !caps.keys.contains(&Key::BTN_LEFT)
}
