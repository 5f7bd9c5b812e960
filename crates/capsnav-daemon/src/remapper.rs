//! CapsLock chord remapping
//!
//! # Lock Key State Machine
//!
//! The remapper keeps a single flag for the whole session: whether the lock
//! key is *armed*, meaning it was freshly pressed and nothing has yet turned
//! the press into a chord or a hold.
//!
//! ```text
//!                lock press (1)
//!   ┌──────────┐ ─────────────────► ┌─────────┐
//!   │ DISARMED │                    │  ARMED  │
//!   └──────────┘ ◄───────────────── └────┬────┘
//!        ▲        lock repeat (2)        │
//!        │        chord fired            │ lock release (0)
//!        │        unmapped chord         │ with nothing else held
//!        │                               ▼
//!        └──────────────────────  tap: emit CapsLock
//! ```
//!
//! ## Decision Rules
//!
//! Each key event is judged against the keys its device reports as held at
//! that instant. Rules are tried in order and the first hit decides:
//!
//! 1. Lock press arms, lock repeat disarms. Neither decides on its own.
//! 2. Held keys match a chord: disarm and emit the chord's output.
//! 3. Lock held with any other key (no chord): disarm and swallow.
//! 4. Lock released while armed: emit a CapsLock tap.
//! 5. Any other lock key edge: swallow.
//! 6. Everything else passes through.
//!
//! Non-key events (SYN, MSC, LED) always pass through.
//!
//! The delay before autorepeat starts is the kernel's; holding the lock key
//! past it turns a would-be tap into a hold that emits nothing on release.

use std::sync::Arc;

use capsnav_keys::ChordTable;
use evdev::{EventType, InputEvent, Key};

use crate::injector::event_value;

/// What to do with one incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Re-emit the event unchanged
    Forward,
    /// Drop the event
    Suppress,
    /// Drop the event and press-then-release these keys instead
    Emit(Vec<Key>),
}

/// Remapper handles translating input events according to the chord table
pub struct Remapper {
    table: Arc<ChordTable>,
    lock: Key,
    /// Lock key was pressed and has not yet been used or held
    armed: bool,
}

impl Remapper {
    pub fn new(table: Arc<ChordTable>) -> Self {
        let lock = table.lock_key();
        Self {
            table,
            lock,
            armed: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn lock_key(&self) -> Key {
        self.lock
    }

    /// Decide what to do with an event.
    ///
    /// `active` is the originating device's held keys read for this event, in
    /// the order the device reports them. It is ignored for non-key events.
    pub fn process(&mut self, event: &InputEvent, active: &[Key]) -> Action {
        if event.event_type() != EventType::KEY {
            return Action::Forward;
        }

        let key = Key::new(event.code());
        let value = event.value();
        let is_lock = key == self.lock;

        if is_lock && value == event_value::PRESS {
            self.armed = true;
        }
        if is_lock && value == event_value::REPEAT {
            self.armed = false;
        }

        if let Some(output) = self.table.lookup(active) {
            self.armed = false;
            return Action::Emit(output.to_vec());
        }

        let lock_held = active.contains(&self.lock);
        if lock_held && active.len() > 1 {
            self.armed = false;
            return Action::Suppress;
        }

        if is_lock && value == event_value::RELEASE && self.armed {
            self.armed = false;
            return Action::Emit(vec![self.lock]);
        }

        if is_lock {
            return Action::Suppress;
        }

        Action::Forward
    }
}
