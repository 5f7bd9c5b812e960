//! Hot-plug monitoring
//!
//! New keyboards are noticed by watching the device directory with inotify
//! for created entries and attribute changes. Attribute changes matter
//! because udev usually fixes up a node's permissions only after creating it,
//! so the first open attempt can fail and the second succeed.
//!
//! [`Discovery`] decides what happens to a candidate path and is shared by
//! startup enumeration and hot-plug batches.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use capsnav_keys::is_keyboard;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use tokio::io::unix::AsyncFd;

use crate::device::{is_event_node, list_event_nodes, DeviceInfo, DeviceOpener, InputDevice};
use crate::registry::DeviceRegistry;

/// A source of device-directory change notifications.
pub trait HotplugSource {
    /// Wait for the next batch of changed entry names.
    ///
    /// Must be cancel safe.
    fn read_batch(&mut self) -> impl Future<Output = io::Result<Vec<OsString>>> + '_;
}

struct InotifyFd(Inotify);

impl AsRawFd for InotifyFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_fd().as_raw_fd()
    }
}

/// inotify watch on a device directory, registered with the tokio reactor.
pub struct InotifyWatch {
    fd: AsyncFd<InotifyFd>,
}

impl InotifyWatch {
    /// Watch `dir` for IN_CREATE and IN_ATTRIB.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(dir: &Path) -> io::Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)?;
        inotify.add_watch(dir, AddWatchFlags::IN_CREATE | AddWatchFlags::IN_ATTRIB)?;

        tracing::debug!("Watching {} for new devices", dir.display());

        Ok(Self {
            fd: AsyncFd::new(InotifyFd(inotify))?,
        })
    }
}

impl HotplugSource for InotifyWatch {
    async fn read_batch(&mut self) -> io::Result<Vec<OsString>> {
        loop {
            let mut guard = self.fd.readable().await?;

            match guard.try_io(|inner| inner.get_ref().0.read_events().map_err(io::Error::from)) {
                Ok(Ok(events)) => {
                    return Ok(events.into_iter().filter_map(|event| event.name).collect());
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Why a candidate did or did not end up in the registry.
#[derive(Debug)]
pub enum Admission {
    Added(DeviceInfo),
    NotEventNode,
    AlreadyTracked,
    /// The node is our own virtual output device
    OwnDevice,
    NotKeyboard,
    OpenFailed(io::Error),
    GrabFailed(io::Error),
}

/// Opens, classifies and grabs candidate device nodes.
pub struct Discovery<O> {
    opener: O,
    dir: PathBuf,
    own_name: String,
}

impl<O: DeviceOpener> Discovery<O> {
    /// `own_name` is the virtual output device's name; devices reporting it
    /// are never grabbed.
    pub fn new(opener: O, dir: impl Into<PathBuf>, own_name: impl Into<String>) -> Self {
        Self {
            opener,
            dir: dir.into(),
            own_name: own_name.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Grab every keyboard currently present in the device directory.
    pub fn scan(&self, registry: &mut DeviceRegistry<O::Device>) -> io::Result<Vec<DeviceInfo>> {
        let mut added = Vec::new();

        for path in list_event_nodes(&self.dir)? {
            if let Admission::Added(info) = self.admit_logged(&path, registry) {
                added.push(info);
            }
        }

        Ok(added)
    }

    /// Handle one batch of changed entry names.
    ///
    /// Every name is tried even if earlier ones fail. Returns the devices
    /// that were newly grabbed.
    pub fn admit_batch(
        &self,
        names: impl IntoIterator<Item = OsString>,
        registry: &mut DeviceRegistry<O::Device>,
    ) -> Vec<DeviceInfo> {
        names
            .into_iter()
            .filter_map(|name| match self.admit_logged(&self.dir.join(name), registry) {
                Admission::Added(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    fn admit_logged(&self, path: &Path, registry: &mut DeviceRegistry<O::Device>) -> Admission {
        let admission = self.admit(path, registry);

        match &admission {
            Admission::Added(info) => {
                tracing::info!("Grabbed keyboard '{}' at {}", info.name, path.display());
            }
            Admission::GrabFailed(e) => {
                tracing::warn!(
                    "Failed to grab {}: {}. Is another application holding it?",
                    path.display(),
                    e
                );
            }
            Admission::OpenFailed(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
            Admission::NotEventNode | Admission::AlreadyTracked => {}
            Admission::OwnDevice | Admission::NotKeyboard => {
                tracing::debug!("Skipping {}: {:?}", path.display(), admission);
            }
        }

        admission
    }

    /// Try to take one candidate path into the registry.
    pub fn admit(&self, path: &Path, registry: &mut DeviceRegistry<O::Device>) -> Admission {
        if !is_event_node(path) {
            return Admission::NotEventNode;
        }
        if registry.contains(path) {
            return Admission::AlreadyTracked;
        }

        let mut device = match self.opener.open(path) {
            Ok(device) => device,
            Err(e) => return Admission::OpenFailed(e),
        };

        if device.info().name == self.own_name {
            return Admission::OwnDevice;
        }
        if !is_keyboard(&device.capabilities()) {
            return Admission::NotKeyboard;
        }
        if let Err(e) = device.grab() {
            return Admission::GrabFailed(e);
        }

        let info = device.info().clone();
        match registry.add(device) {
            Ok(()) => Admission::Added(info),
            Err(_) => Admission::AlreadyTracked,
        }
    }
}
