//! The daemon's event loop
//!
//! # States
//!
//! ```text
//!  ┌─────────┐  interrupt / output failure  ┌──────────────┐  grabs released  ┌────────────┐
//!  │ RUNNING │ ───────────────────────────► │ SHUTTINGDOWN │ ───────────────► │ TERMINATED │
//!  └─────────┘                              └──────────────┘                  └────────────┘
//! ```
//!
//! While running, the loop waits on every registered device plus the hot-plug
//! watch at once, with no timeout. When it wakes it collects every source
//! that is ready at that moment and handles them one after another, in the
//! order they were found ready, draining each one completely before moving
//! on. Then it waits again with a fresh view of the registry, so devices
//! added or removed while handling are picked up immediately.
//!
//! Everything runs on one thread. The wait is the only suspension point, so
//! the registry and the remapper need no locking.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::{Context, Result};
use evdev::{EventType, InputEvent};
use futures::future::{select_all, FutureExt};

use crate::device::{DeviceGone, DeviceOpener, InputDevice};
use crate::hotplug::{Discovery, HotplugSource};
use crate::injector::KeySink;
use crate::registry::DeviceRegistry;
use crate::remapper::{Action, Remapper};
use crate::report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    ShuttingDown,
    Terminated,
}

/// A source that woke the loop, with what it produced.
enum Ready {
    Device {
        path: PathBuf,
        batch: Result<Vec<InputEvent>, DeviceGone>,
    },
    Hotplug(io::Result<Vec<OsString>>),
}

type Wait<'a> = Pin<Box<dyn Future<Output = Ready> + 'a>>;

/// Wait until at least one source is ready, then collect every source that
/// is ready at that moment, in registry order with the watch last.
async fn wait_ready<'a, D, N>(
    registry: &'a mut DeviceRegistry<D>,
    notifier: Option<&'a mut N>,
) -> Vec<Ready>
where
    D: InputDevice + 'a,
    N: HotplugSource + 'a,
{
    let mut waits: Vec<Wait<'a>> = Vec::with_capacity(registry.len() + 1);

    for device in registry.iter_mut() {
        let path = device.info().path.clone();
        waits.push(Box::pin(async move {
            Ready::Device {
                path,
                batch: device.read_batch().await,
            }
        }));
    }
    if let Some(notifier) = notifier {
        waits.push(Box::pin(async move {
            Ready::Hotplug(notifier.read_batch().await)
        }));
    }

    if waits.is_empty() {
        return std::future::pending().await;
    }

    let (first, index, rest) = select_all(waits).await;

    // `rest` keeps its original order minus the finished wait
    let mut ready = Vec::with_capacity(rest.len() + 1);
    let mut rest = rest.into_iter();
    ready.extend(rest.by_ref().take(index).filter_map(FutureExt::now_or_never));
    ready.push(first);
    ready.extend(rest.filter_map(FutureExt::now_or_never));
    ready
}

/// Owns every piece of session state and drives it until shutdown.
pub struct EventLoop<O: DeviceOpener, N, S> {
    discovery: Discovery<O>,
    registry: DeviceRegistry<O::Device>,
    notifier: Option<N>,
    remapper: Remapper,
    sink: S,
    state: LoopState,
}

impl<O, N, S> EventLoop<O, N, S>
where
    O: DeviceOpener,
    N: HotplugSource,
    S: KeySink,
{
    /// `registry` holds the devices grabbed at startup. Pass `None` as the
    /// notifier to run without hot-plug.
    pub fn new(
        discovery: Discovery<O>,
        registry: DeviceRegistry<O::Device>,
        notifier: Option<N>,
        remapper: Remapper,
        sink: S,
    ) -> Self {
        Self {
            discovery,
            registry,
            notifier,
            remapper,
            sink,
            state: LoopState::Running,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until `shutdown` completes, then release every device.
    ///
    /// `shutdown` is polled before any source on every wake-up, so an
    /// interrupt is never starved by a busy keyboard. Returns an error only
    /// if writing to the output device failed; devices are released first.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        if self.state == LoopState::Terminated {
            return Ok(());
        }

        tokio::pin!(shutdown);
        let mut outcome = Ok(());

        tracing::info!(
            "Remapping {} device(s), hot-plug {}",
            self.registry.len(),
            if self.notifier.is_some() { "enabled" } else { "disabled" }
        );
        for info in self.registry.snapshot() {
            tracing::debug!("Reading '{}' at {}", info.name, info.path.display());
        }

        while self.state == LoopState::Running {
            let woken = tokio::select! {
                biased;
                () = &mut shutdown => None,
                ready = wait_ready(&mut self.registry, self.notifier.as_mut()) => Some(ready),
            };

            let Some(ready) = woken else {
                tracing::info!("Received an interrupt, shutting down");
                self.state = LoopState::ShuttingDown;
                break;
            };

            for source in ready {
                if let Err(e) = self.dispatch(source) {
                    tracing::error!("{:#}", e);
                    outcome = Err(e);
                    self.state = LoopState::ShuttingDown;
                    break;
                }
            }
        }

        self.shut_down();
        outcome
    }

    fn dispatch(&mut self, source: Ready) -> Result<()> {
        match source {
            Ready::Device { path, batch } => match batch {
                Ok(events) => self.handle_events(&path, events),
                Err(gone) => {
                    self.deregister(gone);
                    Ok(())
                }
            },
            Ready::Hotplug(Ok(names)) => {
                let added = self.discovery.admit_batch(names, &mut self.registry);
                if !added.is_empty() {
                    report::announce_added(&added);
                }
                Ok(())
            }
            Ready::Hotplug(Err(e)) => {
                tracing::error!(
                    "Hot-plug watch on {} failed, new keyboards will not be grabbed: {}",
                    self.discovery.dir().display(),
                    e
                );
                self.notifier = None;
                Ok(())
            }
        }
    }

    /// Route one device's batch through the remapper, in order.
    ///
    /// Stops at the first sign the device is gone; the rest of the batch is
    /// dropped with it.
    fn handle_events(&mut self, path: &Path, events: Vec<InputEvent>) -> Result<()> {
        for event in events {
            let active = if event.event_type() == EventType::KEY {
                let Some(device) = self.registry.get(path) else {
                    return Ok(());
                };
                match device.active_keys() {
                    Ok(keys) => keys,
                    Err(gone) => {
                        self.deregister(gone);
                        return Ok(());
                    }
                }
            } else {
                Vec::new()
            };

            let action = self.remapper.process(&event, &active);
            tracing::trace!(
                "{:?} {} {} held={:?} -> {:?} (armed: {})",
                event.event_type(),
                event.code(),
                event.value(),
                active,
                action,
                self.remapper.is_armed()
            );

            match action {
                Action::Forward => self.sink.forward(event),
                Action::Suppress => Ok(()),
                Action::Emit(keys) => self.sink.press_release(&keys),
            }
            .context("Failed to write to the virtual keyboard")?;
        }
        Ok(())
    }

    fn deregister(&mut self, gone: DeviceGone) {
        if let Some(info) = self.registry.remove(&gone.path) {
            tracing::warn!("Removing '{}': {}", info.name, gone);
            report::announce_removed(&info);
        }
    }

    fn shut_down(&mut self) {
        self.state = LoopState::ShuttingDown;

        let released = self.registry.release_all();
        if self.notifier.take().is_some() {
            tracing::debug!("Closed hot-plug watch");
        }
        report::announce_shutdown(released);

        self.state = LoopState::Terminated;
        tracing::info!("Released {} device(s)", released);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::{FakeDevice, FakeNotifier, FakeOpener, Journal, RecordingSink};
    use capsnav_keys::default_table;
    use evdev::Key;

    const CAPS: Key = Key::KEY_CAPSLOCK;

    type TestLoop = EventLoop<FakeOpener, FakeNotifier, RecordingSink>;

    fn event_loop(
        opener: FakeOpener,
        devices: Vec<FakeDevice>,
        notifier: Option<FakeNotifier>,
        sink: RecordingSink,
    ) -> TestLoop {
        let mut registry = DeviceRegistry::new();
        for device in devices {
            registry.add(device).unwrap();
        }
        EventLoop::new(
            Discovery::new(opener, "/dev/input", "capsnav"),
            registry,
            notifier,
            Remapper::new(Arc::new(default_table().unwrap())),
            sink,
        )
    }

    /// Completes once every scripted source has run dry and time moves on.
    async fn idle() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_device_gone_deregisters_only_that_device() {
        let journal = Journal::default();
        let devices = vec![
            FakeDevice::keyboard("/dev/input/event1", &journal),
            FakeDevice::keyboard("/dev/input/event2", &journal),
            FakeDevice::keyboard("/dev/input/event3", &journal),
        ];
        let mut event_loop = event_loop(FakeOpener::default(), devices, None, RecordingSink::default());

        event_loop
            .dispatch(Ready::Device {
                path: PathBuf::from("/dev/input/event2"),
                batch: Err(DeviceGone::new(
                    "/dev/input/event2",
                    io::Error::from_raw_os_error(nix::libc::ENODEV),
                )),
            })
            .unwrap();

        assert_eq!(event_loop.registry.len(), 2);
        assert!(!event_loop.registry.contains(Path::new("/dev/input/event2")));
        assert_eq!(event_loop.state(), LoopState::Running);
    }

    #[test]
    fn test_key_state_failure_drops_rest_of_batch() {
        let journal = Journal::default();
        // No key state scripted, so the first lookup finds the device gone
        let device = FakeDevice::keyboard("/dev/input/event1", &journal);
        let sink = RecordingSink::default();
        let mut event_loop = event_loop(FakeOpener::default(), vec![device], None, sink.clone());

        let events = vec![
            InputEvent::new(EventType::KEY, Key::KEY_A.code(), 1),
            InputEvent::new(EventType::KEY, Key::KEY_A.code(), 0),
        ];
        event_loop
            .handle_events(Path::new("/dev/input/event1"), events)
            .unwrap();

        assert!(event_loop.registry.is_empty());
        assert!(sink.written().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chord_and_passthrough_end_to_end() {
        let journal = Journal::default();
        let keyboard = FakeDevice::keyboard("/dev/input/event1", &journal)
            .keys(
                &[(CAPS, 1), (Key::KEY_E, 1), (Key::KEY_E, 0), (CAPS, 0)],
                &[&[CAPS], &[Key::KEY_E, CAPS], &[CAPS], &[]],
            )
            .keys(&[(Key::KEY_X, 1), (Key::KEY_X, 0)], &[&[Key::KEY_X], &[]]);
        let sink = RecordingSink::default();
        let mut event_loop = event_loop(FakeOpener::default(), vec![keyboard], None, sink.clone());

        event_loop.run(idle()).await.unwrap();

        assert_eq!(
            sink.key_edges(),
            vec![
                (Key::KEY_UP, 1),
                (Key::KEY_UP, 0),
                (Key::KEY_E, 0),
                (Key::KEY_X, 1),
                (Key::KEY_X, 0),
            ]
        );
        assert_eq!(event_loop.state(), LoopState::Terminated);
        assert!(!event_loop.remapper.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_tap_toggles_lock() {
        let journal = Journal::default();
        let keyboard = FakeDevice::keyboard("/dev/input/event1", &journal)
            .keys(&[(CAPS, 1)], &[&[CAPS]])
            .keys(&[(CAPS, 0)], &[&[]]);
        let sink = RecordingSink::default();
        let mut event_loop = event_loop(FakeOpener::default(), vec![keyboard], None, sink.clone());

        event_loop.run(idle()).await.unwrap();

        assert_eq!(sink.key_edges(), vec![(CAPS, 1), (CAPS, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_device_is_never_touched_again() {
        let journal = Journal::default();
        let devices = vec![
            FakeDevice::keyboard("/dev/input/event1", &journal)
                .keys(&[(Key::KEY_A, 1)], &[&[Key::KEY_A]])
                .keys(&[(Key::KEY_A, 0)], &[&[]]),
            FakeDevice::keyboard("/dev/input/event2", &journal)
                .vanishing()
                .keys(&[(Key::KEY_B, 1)], &[&[Key::KEY_B]]),
            FakeDevice::keyboard("/dev/input/event3", &journal)
                .keys(&[(Key::KEY_C, 1)], &[&[Key::KEY_C]]),
        ];
        let sink = RecordingSink::default();
        let mut event_loop = event_loop(FakeOpener::default(), devices, None, sink.clone());

        event_loop.run(idle()).await.unwrap();

        // One read that failed, then only the removal's ungrab
        assert_eq!(
            journal.entries_for("/dev/input/event2"),
            vec!["read /dev/input/event2", "ungrab /dev/input/event2"]
        );
        assert_eq!(
            sink.key_edges(),
            vec![(Key::KEY_A, 1), (Key::KEY_C, 1), (Key::KEY_A, 0)]
        );
        assert!(event_loop.registry.is_empty(), "shutdown releases the rest");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotplug_batch_adds_keyboards_and_reads_them() {
        let journal = Journal::default();
        let opener = FakeOpener::default()
            .with(
                FakeDevice::keyboard("/dev/input/event4", &journal)
                    .keys(&[(Key::KEY_Q, 1)], &[&[Key::KEY_Q]]),
            )
            .with(FakeDevice::mouse("/dev/input/event5", &journal))
            .with(FakeDevice::keyboard("/dev/input/event6", &journal).failing_grab());
        let notifier = FakeNotifier::default().batch(&["event4", "event5", "event6"]);
        let sink = RecordingSink::default();
        let mut event_loop = event_loop(opener, vec![], Some(notifier), sink.clone());

        event_loop.run(idle()).await.unwrap();

        assert_eq!(sink.key_edges(), vec![(Key::KEY_Q, 1)]);
        assert_eq!(
            journal.entries_for("/dev/input/event4"),
            vec![
                "grab /dev/input/event4",
                "read /dev/input/event4",
                "state /dev/input/event4",
                "ungrab /dev/input/event4",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_failure_keeps_remapping() {
        let journal = Journal::default();
        let keyboard = FakeDevice::keyboard("/dev/input/event1", &journal)
            .keys(&[(Key::KEY_A, 1)], &[&[Key::KEY_A]]);
        let notifier = FakeNotifier::default().failure();
        let sink = RecordingSink::default();
        let mut event_loop = event_loop(
            FakeOpener::default(),
            vec![keyboard],
            Some(notifier),
            sink.clone(),
        );

        event_loop.run(idle()).await.unwrap();

        assert_eq!(sink.key_edges(), vec![(Key::KEY_A, 1)]);
        assert_eq!(event_loop.state(), LoopState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_failure_shuts_down_and_releases() {
        let journal = Journal::default();
        let devices = vec![
            FakeDevice::keyboard("/dev/input/event1", &journal)
                .keys(&[(Key::KEY_A, 1)], &[&[Key::KEY_A]]),
            FakeDevice::keyboard("/dev/input/event2", &journal),
        ];
        let mut event_loop = event_loop(FakeOpener::default(), devices, None, RecordingSink::broken());

        let result = event_loop.run(std::future::pending()).await;

        assert!(result.is_err());
        assert_eq!(event_loop.state(), LoopState::Terminated);
        assert!(event_loop.registry.is_empty());
        assert_eq!(journal.entries_for("/dev/input/event2"), vec!["ungrab /dev/input/event2"]);
    }

    #[tokio::test]
    async fn test_interrupt_wins_over_ready_devices() {
        let journal = Journal::default();
        let keyboard = FakeDevice::keyboard("/dev/input/event1", &journal)
            .keys(&[(Key::KEY_A, 1)], &[&[Key::KEY_A]]);
        let sink = RecordingSink::default();
        let mut event_loop = event_loop(FakeOpener::default(), vec![keyboard], None, sink.clone());

        event_loop.run(std::future::ready(())).await.unwrap();

        assert!(sink.written().is_empty());
        assert_eq!(journal.entries(), vec!["ungrab /dev/input/event1"]);

        // A second run after termination does nothing
        event_loop.run(std::future::ready(())).await.unwrap();
        assert_eq!(journal.entries().len(), 1);
    }
}
