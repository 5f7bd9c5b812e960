//! capsnav daemon
//!
//! Grabs every keyboard, turns CapsLock chords into navigation keys and
//! re-emits everything else through a virtual keyboard.

mod device;
mod event_loop;
mod hotplug;
mod injector;
mod registry;
mod remapper;
mod report;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use crate::device::EvdevOpener;
use crate::event_loop::EventLoop;
use crate::hotplug::{Discovery, InotifyWatch};
use crate::injector::VirtualDevice;
use crate::registry::DeviceRegistry;
use crate::remapper::Remapper;

#[derive(Parser, Debug)]
#[command(name = "capsnavd")]
#[command(about = "CapsLock navigation remapping daemon")]
struct Args {
    /// Directory holding the evdev device nodes
    #[arg(long, default_value = "/dev/input")]
    device_dir: PathBuf,

    /// Name of the virtual output keyboard
    #[arg(long, default_value = "capsnav")]
    name: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let table = Arc::new(capsnav_keys::default_table()?);
    let remapper = Remapper::new(table.clone());
    tracing::info!(
        "Loaded {} chord(s) on {}",
        table.len(),
        capsnav_keys::key_name(remapper.lock_key())
    );

    // Watch before scanning so a keyboard plugged in mid-scan is not missed
    let watch = match InotifyWatch::new(&args.device_dir) {
        Ok(watch) => Some(watch),
        Err(e) => {
            tracing::warn!(
                "Cannot watch {} ({}), hot-plugged keyboards will be ignored",
                args.device_dir.display(),
                e
            );
            None
        }
    };

    // Created before the scan; the scan skips it by name
    let sink = VirtualDevice::new_keyboard(&args.name)
        .context("Failed to create the virtual keyboard. Is /dev/uinput writable?")?;

    let discovery = Discovery::new(EvdevOpener, &args.device_dir, &args.name);
    let mut registry = DeviceRegistry::new();
    let grabbed = discovery
        .scan(&mut registry)
        .with_context(|| format!("Failed to list {}", args.device_dir.display()))?;

    if grabbed.is_empty() {
        tracing::warn!("No keyboards found, waiting for one to be plugged in");
    } else {
        report::announce_startup(&grabbed);
    }

    let mut event_loop = EventLoop::new(discovery, registry, watch, remapper, sink);
    let result = event_loop.run(shutdown_signal()).await;
    tracing::debug!("Event loop stopped in state {:?}", event_loop.state());
    result
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Cannot listen for SIGINT: {}", e);
                term.recv().await;
            }
        }
        _ = term.recv() => tracing::debug!("Received SIGTERM"),
    }
}
