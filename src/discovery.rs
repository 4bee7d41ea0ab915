//! Locate the UPSPack's USB/TTL converter from the kernel log.

use crate::error::AppError;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Device paths named by `attached` lines for USB serial converters in `log`,
/// filtered through `exists`, de-duplicated and sorted.
pub fn candidate_devices<F>(log: &str, exists: F) -> Vec<String>
where
    F: Fn(&Path) -> bool,
{
    log.lines()
        .filter(|line| line.contains("usb") && line.contains("conv") && line.contains("attached"))
        .filter_map(|line| line.split_whitespace().last())
        .map(|name| format!("/dev/{name}"))
        .filter(|device| exists(Path::new(device)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Exactly one candidate is accepted.
pub fn select_device(candidates: Vec<String>) -> Result<String, AppError> {
    match candidates.len() {
        0 => Err(AppError::DeviceNotFound),
        1 => candidates.into_iter().next().ok_or(AppError::DeviceNotFound),
        count => Err(AppError::AmbiguousDevice(count)),
    }
}

/// Run `dmesg` and pick the single attached USB/TTL converter.
pub fn identify_serial_device() -> Result<String, AppError> {
    let output = Command::new("dmesg")
        .output()
        .map_err(|err| AppError::Initialization(format!("failed to run dmesg: {err}")))?;
    if !output.status.success() {
        return Err(AppError::Initialization(format!(
            "dmesg exited with {}",
            output.status
        )));
    }

    let log = String::from_utf8_lossy(&output.stdout);
    let candidates = candidate_devices(&log, Path::exists);
    debug!(candidates = ?candidates, "Serial device candidates");
    let device = select_device(candidates)?;
    info!(device = device.as_str(), "Discovered UPS serial device");
    Ok(device)
}
