//! Registry of grabbed keyboards
//!
//! The registry owns every device the daemon currently holds a grab on. It is
//! owned by the event loop and only touched from the loop's thread.
//!
//! Devices are kept in insertion order so that one multiplexing pass visits
//! them in the order they were discovered. Identity is the device path.

use std::path::Path;

use crate::device::{DeviceInfo, InputDevice};

/// Grabbed devices, keyed by path.
pub struct DeviceRegistry<D> {
    devices: Vec<D>,
}

impl<D: InputDevice> DeviceRegistry<D> {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Register a grabbed device.
    ///
    /// Hands the device back untouched if a device with the same path is
    /// already registered.
    pub fn add(&mut self, device: D) -> Result<(), D> {
        if self.contains(&device.info().path) {
            return Err(device);
        }

        tracing::debug!(
            "Registered device '{}' at {}",
            device.info().name,
            device.info().path.display()
        );
        self.devices.push(device);
        Ok(())
    }

    /// Deregister a device and release its grab.
    ///
    /// A failed ungrab is ignored: the node is usually already gone. The
    /// handle is closed before this returns.
    pub fn remove(&mut self, path: &Path) -> Option<DeviceInfo> {
        let index = self.devices.iter().position(|d| d.info().path == path)?;
        let mut device = self.devices.remove(index);

        if let Err(e) = device.ungrab() {
            tracing::trace!("Ignoring ungrab failure on {}: {}", path.display(), e);
        }

        Some(device.info().clone())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.devices.iter().any(|d| d.info().path == path)
    }

    pub fn get(&self, path: &Path) -> Option<&D> {
        self.devices.iter().find(|d| d.info().path == path)
    }

    /// Info for every registered device, in registration order.
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|d| d.info().clone()).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut D> {
        self.devices.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Ungrab and drop every device. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let count = self.devices.len();

        for mut device in self.devices.drain(..) {
            if let Err(e) = device.ungrab() {
                tracing::trace!(
                    "Ignoring ungrab failure on {}: {}",
                    device.info().path.display(),
                    e
                );
            }
            tracing::debug!("Released device '{}'", device.info().name);
        }

        count
    }
}

impl<D: InputDevice> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}
