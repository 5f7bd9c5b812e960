//! CapsLock chord table
//!
//! A chord is the lock key held together with exactly one ordinary key. The
//! table is keyed on the *ordered* pair of held keys as the device reports
//! them, ordinary key first and lock key second. It is not a set: a
//! [`ChordKey`] built in the other order will never match.
//!
//! ```text
//! held keys (ascending codes)     output sequence
//! [KEY_E, KEY_CAPSLOCK]       ->  [KEY_UP]
//! [KEY_I, KEY_CAPSLOCK]       ->  [KEY_LEFTSHIFT, KEY_UP]
//! ```
//!
//! Every ordinary key in the default table has a lower code than
//! `KEY_CAPSLOCK` (58), which is why the device's ascending key state lines
//! up with the declaration order.

use std::collections::HashMap;
use std::fmt;

use evdev::Key;

use crate::error::KeymapError;
use crate::names::key_name;

/// The key repurposed as the chord modifier.
pub const LOCK_KEY: Key = Key::KEY_CAPSLOCK;

/// Positional pair of held keys used as the table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChordKey([Key; 2]);

impl ChordKey {
    pub fn new(first: Key, second: Key) -> Self {
        Self([first, second])
    }

    /// Build a chord key from the currently held keys.
    ///
    /// Returns `None` unless exactly two keys are held. Order is preserved.
    pub fn from_active(active: &[Key]) -> Option<Self> {
        match active {
            [first, second] => Some(Self::new(*first, *second)),
            _ => None,
        }
    }

    pub fn keys(&self) -> [Key; 2] {
        self.0
    }
}

impl fmt::Display for ChordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lock key reads first for humans: "Capslock+E"
        let [first, second] = self.0;
        write!(f, "{}+{}", key_name(second), key_name(first))
    }
}

/// One table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordBinding {
    pub chord: ChordKey,
    pub output: Vec<Key>,
}

impl fmt::Display for ChordBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output: Vec<String> = self.output.iter().map(|k| key_name(*k)).collect();
        write!(f, "{} -> {}", self.chord, output.join(", "))
    }
}

/// Immutable lookup from held keys to the sequence to synthesize.
#[derive(Debug, Clone)]
pub struct ChordTable {
    lock: Key,
    bindings: Vec<ChordBinding>,
    index: HashMap<ChordKey, usize>,
}

impl ChordTable {
    pub fn builder(lock: Key) -> ChordTableBuilder {
        ChordTableBuilder {
            lock,
            bindings: Vec::new(),
        }
    }

    pub fn lock_key(&self) -> Key {
        self.lock
    }

    /// Look up the output for the keys currently held, in device order.
    pub fn lookup(&self, active: &[Key]) -> Option<&[Key]> {
        let chord = ChordKey::from_active(active)?;
        self.get(&chord)
    }

    pub fn get(&self, chord: &ChordKey) -> Option<&[Key]> {
        self.index
            .get(chord)
            .map(|&i| self.bindings[i].output.as_slice())
    }

    /// Output for `key` chorded with the lock key.
    pub fn for_key(&self, key: Key) -> Option<&[Key]> {
        self.get(&ChordKey::new(key, self.lock))
    }

    /// Bindings in declaration order.
    pub fn bindings(&self) -> &[ChordBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Collects bindings and validates them into a [`ChordTable`].
#[derive(Debug, Clone)]
pub struct ChordTableBuilder {
    lock: Key,
    bindings: Vec<ChordBinding>,
}

impl ChordTableBuilder {
    /// Bind `key` + lock key to `output`.
    pub fn bind(mut self, key: Key, output: &[Key]) -> Self {
        self.bindings.push(ChordBinding {
            chord: ChordKey::new(key, self.lock),
            output: output.to_vec(),
        });
        self
    }

    pub fn build(self) -> Result<ChordTable, KeymapError> {
        let mut index = HashMap::with_capacity(self.bindings.len());

        for (i, binding) in self.bindings.iter().enumerate() {
            if binding.output.is_empty() {
                return Err(KeymapError::EmptySequence {
                    chord: binding.chord.to_string(),
                });
            }
            if index.insert(binding.chord, i).is_some() {
                return Err(KeymapError::DuplicateChord {
                    chord: binding.chord.to_string(),
                });
            }
        }

        tracing::debug!("Built chord table with {} binding(s)", self.bindings.len());

        Ok(ChordTable {
            lock: self.lock,
            bindings: self.bindings,
            index,
        })
    }
}

/// The navigation and editing layer on CapsLock.
pub fn default_table() -> Result<ChordTable, KeymapError> {
    ChordTable::builder(LOCK_KEY)
        // Arrows
        .bind(Key::KEY_E, &[Key::KEY_UP])
        .bind(Key::KEY_D, &[Key::KEY_DOWN])
        .bind(Key::KEY_S, &[Key::KEY_LEFT])
        .bind(Key::KEY_F, &[Key::KEY_RIGHT])
        // Selection
        .bind(Key::KEY_I, &[Key::KEY_LEFTSHIFT, Key::KEY_UP])
        .bind(Key::KEY_K, &[Key::KEY_LEFTSHIFT, Key::KEY_DOWN])
        .bind(Key::KEY_J, &[Key::KEY_LEFTSHIFT, Key::KEY_LEFT])
        .bind(Key::KEY_L, &[Key::KEY_LEFTSHIFT, Key::KEY_RIGHT])
        // Line navigation
        .bind(Key::KEY_P, &[Key::KEY_HOME])
        .bind(Key::KEY_SEMICOLON, &[Key::KEY_END])
        .bind(Key::KEY_U, &[Key::KEY_LEFTSHIFT, Key::KEY_HOME])
        .bind(Key::KEY_O, &[Key::KEY_LEFTSHIFT, Key::KEY_END])
        .bind(Key::KEY_ENTER, &[Key::KEY_END, Key::KEY_ENTER])
        // Editing
        .bind(Key::KEY_W, &[Key::KEY_BACKSPACE])
        .bind(Key::KEY_R, &[Key::KEY_DELETE])
        // Paging
        .bind(Key::KEY_DOT, &[Key::KEY_PAGEDOWN])
        .bind(Key::KEY_COMMA, &[Key::KEY_PAGEUP])
        .bind(Key::KEY_H, &[Key::KEY_TAB])
        // Delete to start of line
        .bind(
            Key::KEY_BACKSPACE,
            &[
                Key::KEY_END,
                Key::KEY_LEFTSHIFT,
                Key::KEY_HOME,
                Key::KEY_BACKSPACE,
            ],
        )
        .build()
}
