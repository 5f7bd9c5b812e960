//! In-memory stand-ins for devices, the hot-plug watch and the output device.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Result};
use capsnav_keys::Capabilities;
use evdev::{EventType, InputEvent, Key};

use crate::device::{DeviceGone, DeviceInfo, DeviceOpener, InputDevice};
use crate::hotplug::HotplugSource;
use crate::injector::KeySink;

/// Shared log of operations performed on fake devices.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    fn record(&self, op: &str, path: &Path) {
        self.0.borrow_mut().push(format!("{} {}", op, path.display()));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Entries that mention `path`.
    pub fn entries_for(&self, path: &str) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|entry| entry.ends_with(path))
            .cloned()
            .collect()
    }
}

fn enodev() -> io::Error {
    io::Error::from_raw_os_error(nix::libc::ENODEV)
}

#[derive(Debug)]
enum Scripted {
    Events(Vec<InputEvent>),
    Gone,
}

/// A device whose reads, key state and grab outcome are scripted.
///
/// Reads that run past the script never complete.
#[derive(Debug)]
pub struct FakeDevice {
    info: DeviceInfo,
    caps: Capabilities,
    journal: Journal,
    grab_fails: bool,
    ungrab_fails: bool,
    reads: VecDeque<Scripted>,
    held: RefCell<VecDeque<Vec<Key>>>,
}

impl FakeDevice {
    pub fn keyboard(path: impl Into<PathBuf>, journal: &Journal) -> Self {
        Self::with_caps(
            path,
            journal,
            Capabilities::new(
                true,
                [Key::KEY_A, Key::KEY_Z, Key::KEY_SPACE, Key::KEY_CAPSLOCK],
            ),
        )
    }

    pub fn mouse(path: impl Into<PathBuf>, journal: &Journal) -> Self {
        Self::with_caps(
            path,
            journal,
            Capabilities::new(true, [Key::BTN_LEFT, Key::BTN_RIGHT]),
        )
    }

    fn with_caps(path: impl Into<PathBuf>, journal: &Journal, caps: Capabilities) -> Self {
        let path = path.into();
        Self {
            info: DeviceInfo {
                name: format!("Fake {}", path.display()),
                phys: "fake/input0".to_string(),
                path,
            },
            caps,
            journal: journal.clone(),
            grab_fails: false,
            ungrab_fails: false,
            reads: VecDeque::new(),
            held: RefCell::new(VecDeque::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.info.name = name.to_string();
        self
    }

    pub fn failing_grab(mut self) -> Self {
        self.grab_fails = true;
        self
    }

    pub fn failing_ungrab(mut self) -> Self {
        self.ungrab_fails = true;
        self
    }

    /// Queue a batch of key events. `held` is the key state reported for
    /// each event, in order.
    pub fn keys(mut self, events: &[(Key, i32)], held: &[&[Key]]) -> Self {
        let batch = events
            .iter()
            .map(|&(key, value)| InputEvent::new(EventType::KEY, key.code(), value))
            .collect();
        self.reads.push_back(Scripted::Events(batch));
        self.held
            .get_mut()
            .extend(held.iter().map(|keys| keys.to_vec()));
        self
    }

    /// Queue a read that fails because the node vanished.
    pub fn vanishing(mut self) -> Self {
        self.reads.push_back(Scripted::Gone);
        self
    }
}

impl InputDevice for FakeDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        self.caps.clone()
    }

    fn grab(&mut self) -> io::Result<()> {
        self.journal.record("grab", &self.info.path);
        if self.grab_fails {
            return Err(io::Error::from_raw_os_error(nix::libc::EBUSY));
        }
        Ok(())
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.journal.record("ungrab", &self.info.path);
        if self.ungrab_fails {
            return Err(enodev());
        }
        Ok(())
    }

    fn active_keys(&self) -> Result<Vec<Key>, DeviceGone> {
        self.journal.record("state", &self.info.path);
        self.held
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| DeviceGone::new(&self.info.path, enodev()))
    }

    async fn read_batch(&mut self) -> Result<Vec<InputEvent>, DeviceGone> {
        match self.reads.pop_front() {
            Some(Scripted::Events(events)) => {
                self.journal.record("read", &self.info.path);
                Ok(events)
            }
            Some(Scripted::Gone) => {
                self.journal.record("read", &self.info.path);
                Err(DeviceGone::new(&self.info.path, enodev()))
            }
            None => std::future::pending().await,
        }
    }
}

/// Hands out prepared fake devices by path, each at most once.
#[derive(Debug, Default)]
pub struct FakeOpener {
    devices: RefCell<HashMap<PathBuf, FakeDevice>>,
}

impl FakeOpener {
    pub fn with(self, device: FakeDevice) -> Self {
        self.devices
            .borrow_mut()
            .insert(device.info.path.clone(), device);
        self
    }
}

impl DeviceOpener for FakeOpener {
    type Device = FakeDevice;

    fn open(&self, path: &Path) -> io::Result<FakeDevice> {
        self.devices
            .borrow_mut()
            .remove(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

/// Scripted hot-plug notifications.
#[derive(Debug, Default)]
pub struct FakeNotifier {
    batches: VecDeque<io::Result<Vec<OsString>>>,
}

impl FakeNotifier {
    pub fn batch(mut self, names: &[&str]) -> Self {
        self.batches
            .push_back(Ok(names.iter().map(OsString::from).collect()));
        self
    }

    pub fn failure(mut self) -> Self {
        self.batches.push_back(Err(io::Error::other("inotify queue overflow")));
        self
    }
}

impl HotplugSource for FakeNotifier {
    async fn read_batch(&mut self) -> io::Result<Vec<OsString>> {
        match self.batches.pop_front() {
            Some(batch) => batch,
            None => std::future::pending().await,
        }
    }
}

/// Records everything written to the output device.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<InputEvent>>>,
    broken: bool,
}

impl RecordingSink {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    /// Emitted events without SYN_REPORTs, as (type, code, value).
    pub fn written(&self) -> Vec<(EventType, u16, i32)> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.event_type() != EventType::SYNCHRONIZATION)
            .map(|e| (e.event_type(), e.code(), e.value()))
            .collect()
    }

    /// Emitted key edges as (key, value).
    pub fn key_edges(&self) -> Vec<(Key, i32)> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.event_type() == EventType::KEY)
            .map(|e| (Key::new(e.code()), e.value()))
            .collect()
    }
}

impl KeySink for RecordingSink {
    fn emit(&mut self, events: &[InputEvent]) -> Result<()> {
        if self.broken {
            bail!("uinput write failed");
        }
        self.events.borrow_mut().extend_from_slice(events);
        Ok(())
    }
}
