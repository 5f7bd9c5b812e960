//! Virtual device injection via uinput
//!
//! Everything the daemon lets through, and everything it synthesizes, leaves
//! through a single virtual keyboard. [`KeySink`] is the seam: the event loop
//! only needs `emit`, and the press/release choreography is built on top of
//! it so that it is identical for the real device and for test sinks.

use anyhow::Result;
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, EventType, InputEvent, Key};

/// Highest key code registered on the virtual keyboard (`KEY_MAX`).
const KEY_CODE_LIMIT: u16 = 0x2ff;

/// Event values for EV_KEY.
pub mod event_value {
    pub const RELEASE: i32 = 0;
    pub const PRESS: i32 = 1;
    pub const REPEAT: i32 = 2;
}

fn syn_report() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

/// Destination for outgoing events.
pub trait KeySink {
    /// Write a batch of events to the output device.
    fn emit(&mut self, events: &[InputEvent]) -> Result<()>;

    /// Press every key in order, then release them in reverse order.
    ///
    /// Each edge is flushed with its own SYN_REPORT so consumers see the
    /// presses land before the releases.
    fn press_release(&mut self, keys: &[Key]) -> Result<()> {
        for key in keys {
            let press = InputEvent::new(EventType::KEY, key.code(), event_value::PRESS);
            self.emit(&[press, syn_report()])?;
        }
        for key in keys.iter().rev() {
            let release = InputEvent::new(EventType::KEY, key.code(), event_value::RELEASE);
            self.emit(&[release, syn_report()])?;
        }
        Ok(())
    }

    /// Re-emit an event with its type, code and value untouched.
    fn forward(&mut self, event: InputEvent) -> Result<()> {
        self.emit(&[event, syn_report()])
    }
}

/// A virtual input device for injecting events
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualDevice {
    /// Create a new virtual keyboard device that can emit every key code.
    pub fn new_keyboard(name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..=KEY_CODE_LIMIT {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .build()?;

        tracing::info!("Created virtual keyboard '{}'", name);

        Ok(Self { device })
    }
}

impl KeySink for VirtualDevice {
    fn emit(&mut self, events: &[InputEvent]) -> Result<()> {
        self.device.emit(events)?;
        Ok(())
    }
}
