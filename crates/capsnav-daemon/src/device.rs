//! Input device handles
//!
//! The event loop only talks to devices through [`InputDevice`], so the real
//! evdev handle ([`EvdevDevice`]) can be swapped for an in-memory fake in
//! tests. A device that disappears surfaces as [`DeviceGone`] from every
//! operation that touches the kernel.

use std::future::Future;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use capsnav_keys::Capabilities;
use evdev::{Device, InputEvent, Key};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use thiserror::Error;
use tokio::io::unix::AsyncFd;

/// Information about an input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    /// Physical location reported by the driver (e.g. `usb-0000:00:14.0-1/input0`)
    pub phys: String,
}

/// The device node went away or stopped answering.
#[derive(Debug, Error)]
#[error("device {} is unavailable: {source}", path.display())]
pub struct DeviceGone {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl DeviceGone {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// An open input device that can be grabbed and read.
pub trait InputDevice {
    fn info(&self) -> &DeviceInfo;

    fn capabilities(&self) -> Capabilities;

    /// Take exclusive access to the device's event stream.
    fn grab(&mut self) -> io::Result<()>;

    fn ungrab(&mut self) -> io::Result<()>;

    /// Keys currently held down, in ascending code order.
    fn active_keys(&self) -> Result<Vec<Key>, DeviceGone>;

    /// Wait until the device is readable, then return every pending event.
    ///
    /// Must be cancel safe: dropping the future before it completes loses no
    /// events.
    fn read_batch(&mut self) -> impl Future<Output = Result<Vec<InputEvent>, DeviceGone>> + '_;
}

/// Opens device nodes by path.
pub trait DeviceOpener {
    type Device: InputDevice;

    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}

/// List the `event*` nodes in a device directory, sorted by name.
pub fn list_event_nodes(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut nodes = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_event_node(&path) {
            nodes.push(path);
        }
    }

    nodes.sort();
    Ok(nodes)
}

/// Only `eventN` nodes speak the evdev protocol.
pub fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("event"))
        .unwrap_or(false)
}

/// An evdev device registered with the tokio reactor.
pub struct EvdevDevice {
    info: DeviceInfo,
    fd: AsyncFd<Device>,
}

impl EvdevDevice {
    /// Open a device node in non-blocking mode.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::open(path)?;

        let raw_fd = device.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(raw_fd, FcntlArg::F_GETFL)?);
        fcntl(raw_fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

        let info = DeviceInfo {
            path: path.to_path_buf(),
            name: device.name().unwrap_or("Unknown").to_string(),
            phys: device.physical_path().unwrap_or("").to_string(),
        };

        Ok(Self {
            info,
            fd: AsyncFd::new(device)?,
        })
    }
}

impl InputDevice for EvdevDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(self.fd.get_ref())
    }

    fn grab(&mut self) -> io::Result<()> {
        self.fd.get_mut().grab()
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.fd.get_mut().ungrab()
    }

    fn active_keys(&self) -> Result<Vec<Key>, DeviceGone> {
        self.fd
            .get_ref()
            .get_key_state()
            .map(|keys| keys.iter().collect())
            .map_err(|e| DeviceGone::new(&self.info.path, e))
    }

    async fn read_batch(&mut self) -> Result<Vec<InputEvent>, DeviceGone> {
        let path = self.info.path.clone();

        loop {
            let mut guard = self
                .fd
                .readable_mut()
                .await
                .map_err(|e| DeviceGone::new(&path, e))?;

            match guard.try_io(|inner| {
                inner
                    .get_mut()
                    .fetch_events()
                    .map(|events| events.collect::<Vec<_>>())
            }) {
                Ok(Ok(events)) => return Ok(events),
                Ok(Err(e)) => return Err(DeviceGone::new(&path, e)),
                // Spurious readiness; readiness was cleared, wait again
                Err(_would_block) => continue,
            }
        }
    }
}

/// Opens real evdev nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvdevOpener;

impl DeviceOpener for EvdevOpener {
    type Device = EvdevDevice;

    fn open(&self, path: &Path) -> io::Result<EvdevDevice> {
        EvdevDevice::open(path)
    }
}
