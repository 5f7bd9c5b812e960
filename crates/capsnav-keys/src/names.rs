//! Key name parsing and display

use std::str::FromStr;

use evdev::Key;

use crate::error::KeymapError;

/// Parse a human key name into an evdev [`Key`].
///
/// Accepts the kernel name with or without its `KEY_` prefix (`"E"`,
/// `"pageup"`, `"KEY_SEMICOLON"`) plus a handful of aliases and the
/// punctuation characters themselves (`";"`, `","`, `"."`).
pub fn parse_key(name: &str) -> Result<Key, KeymapError> {
    let trimmed = name.trim();
    let upper = trimmed.to_uppercase();

    let alias = match upper.as_str() {
        "CAPS" | "CAPS_LOCK" => Some(Key::KEY_CAPSLOCK),
        "ESCAPE" => Some(Key::KEY_ESC),
        "RETURN" => Some(Key::KEY_ENTER),
        "DEL" => Some(Key::KEY_DELETE),
        "PGUP" => Some(Key::KEY_PAGEUP),
        "PGDN" | "PGDOWN" => Some(Key::KEY_PAGEDOWN),
        "SHIFT" | "LSHIFT" => Some(Key::KEY_LEFTSHIFT),
        "RSHIFT" => Some(Key::KEY_RIGHTSHIFT),
        "PERIOD" | "." => Some(Key::KEY_DOT),
        "," => Some(Key::KEY_COMMA),
        ";" => Some(Key::KEY_SEMICOLON),
        "'" => Some(Key::KEY_APOSTROPHE),
        "/" => Some(Key::KEY_SLASH),
        "-" => Some(Key::KEY_MINUS),
        "=" => Some(Key::KEY_EQUAL),
        _ => None,
    };
    if let Some(key) = alias {
        return Ok(key);
    }

    let raw = if upper.starts_with("KEY_") {
        upper.clone()
    } else {
        format!("KEY_{upper}")
    };

    Key::from_str(&raw).map_err(|_| KeymapError::UnknownKey {
        key: trimmed.to_string(),
    })
}

/// Display name for a key: the kernel name without `KEY_`, in title case.
///
/// `KEY_PAGEDOWN` becomes `Pagedown`, `KEY_E` becomes `E`.
pub fn key_name(key: Key) -> String {
    let debug = format!("{:?}", key);
    let bare = debug.strip_prefix("KEY_").unwrap_or(&debug);

    let mut chars = bare.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
