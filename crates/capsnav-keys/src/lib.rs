//! Key vocabulary for capsnav
//!
//! This crate holds everything that is decided about keys before the daemon
//! ever opens a device: the CapsLock chord table, key name parsing, and the
//! heuristic that tells keyboards apart from other input devices.

mod chord;
mod classify;
mod error;
mod names;

pub use chord::{default_table, ChordBinding, ChordKey, ChordTable, ChordTableBuilder, LOCK_KEY};
pub use classify::{is_keyboard, Capabilities};
pub use error::KeymapError;
pub use names::{key_name, parse_key};
