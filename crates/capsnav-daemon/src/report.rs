//! Console status output
//!
//! These lines go to stdout for whoever started the daemon; structured logs
//! go through `tracing` to stderr.

use crate::device::DeviceInfo;

/// Render devices as a three-column table.
///
/// ```text
/// --------------------------------------------------------------------------------
/// Device               Name                                Phys
/// --------------------------------------------------------------------------------
/// /dev/input/event3    AT Translated Set 2 keyboard        isa0060/serio0/input0
/// ```
///
/// The rules are as wide as the widest device row. Returns an empty string
/// for an empty list.
pub fn format_device_table(devices: &[DeviceInfo]) -> String {
    let rows: Vec<String> = devices
        .iter()
        .map(|d| row(&d.path.display().to_string(), &d.name, &d.phys))
        .collect();

    let Some(width) = rows.iter().map(|r| r.chars().count()).max() else {
        return String::new();
    };
    let rule = "-".repeat(width);

    let mut out = String::new();
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&row("Device", "Name", "Phys"));
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');
    for r in &rows {
        out.push_str(r);
        out.push('\n');
    }
    out
}

fn row(path: &str, name: &str, phys: &str) -> String {
    format!("{:<20} {:<35} {}", path, name, phys)
}

pub fn announce_startup(devices: &[DeviceInfo]) {
    println!("Remapping enabled on {} device(s):\n", devices.len());
    println!("{}", format_device_table(devices));
}

pub fn announce_added(devices: &[DeviceInfo]) {
    println!("Remapping enabled on new device(s):\n");
    println!("{}", format_device_table(devices));
}

pub fn announce_removed(device: &DeviceInfo) {
    println!("Device removed: {} ({})", device.name, device.path.display());
}

pub fn announce_shutdown(released: usize) {
    println!("Shutting down, released {} device(s).", released);
}
