//! capsnav CLI
//!
//! Inspection tool for capsnav: which devices the daemon would grab, and
//! what each chord produces.

use std::path::{Path, PathBuf};

use capsnav_keys::{default_table, is_keyboard, key_name, parse_key, Capabilities};
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "capsnav")]
#[command(about = "Inspect CapsLock navigation remapping")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List input devices and whether they would be grabbed
    Devices {
        /// Directory holding the evdev device nodes
        #[arg(long, default_value = "/dev/input")]
        device_dir: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the chord table
    Chords {
        /// Only show the chord for this key, e.g. "e" or "semicolon"
        key: Option<String>,
    },
}

/// One device as seen by the keyboard classifier.
#[derive(Debug, Serialize, PartialEq)]
struct DeviceReport {
    path: PathBuf,
    name: String,
    phys: String,
    keyboard: bool,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices { device_dir, json } => cmd_devices(&device_dir, json),
        Commands::Chords { key } => cmd_chords(key.as_deref()),
    }
}

fn event_nodes(dir: &Path) -> miette::Result<Vec<PathBuf>> {
    let mut nodes = Vec::new();

    for entry in std::fs::read_dir(dir).into_diagnostic()? {
        let path = entry.into_diagnostic()?.path();
        let is_event = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("event"));
        if is_event {
            nodes.push(path);
        }
    }

    nodes.sort();
    Ok(nodes)
}

fn cmd_devices(dir: &Path, json: bool) -> miette::Result<()> {
    let mut reports = Vec::new();

    for path in event_nodes(dir)? {
        match evdev::Device::open(&path) {
            Ok(device) => reports.push(DeviceReport {
                name: device.name().unwrap_or("Unknown").to_string(),
                phys: device.physical_path().unwrap_or("").to_string(),
                keyboard: is_keyboard(&Capabilities::of(&device)),
                path,
            }),
            Err(e) => tracing::debug!("Skipping {}: {}", path.display(), e),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports).into_diagnostic()?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No readable devices in {}. Try running as root.", dir.display());
        return Ok(());
    }

    println!("Input devices:\n");
    for report in &reports {
        println!("{}", render_device(report));
    }

    Ok(())
}

fn render_device(report: &DeviceReport) -> String {
    let kind = if report.keyboard { "keyboard" } else { "other" };
    let phys = if report.phys.is_empty() { "-" } else { report.phys.as_str() };
    format!(
        "  {} [{}]\n    Path: {}\n    Phys: {}\n",
        report.name,
        kind,
        report.path.display(),
        phys
    )
}

fn cmd_chords(key: Option<&str>) -> miette::Result<()> {
    let table = default_table()?;

    let Some(name) = key else {
        println!("Hold {} and press:\n", key_name(table.lock_key()));
        for binding in table.bindings() {
            println!("  {}", binding);
        }
        return Ok(());
    };

    let key = parse_key(name)?;
    let output = table.for_key(key).ok_or_else(|| {
        miette::miette!(
            help = "Run `capsnav chords` to see every chord",
            "{}+{} is not a chord",
            key_name(table.lock_key()),
            key_name(key)
        )
    })?;

    let names: Vec<String> = output.iter().map(|k| key_name(*k)).collect();
    println!("{}", names.join(", "));
    Ok(())
}
