//! Time-remaining estimation for the open charge episode.
//!
//! The rate model is linear: seconds elapsed since the episode opened divided by the
//! percentage points gained or lost. Each battery level keeps the first estimate
//! computed for it, so the readout only moves when the level does.

use crate::error::AppError;
use crate::state::ChargeState;
use crate::telemetry::TelemetryRecord;
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

pub mod humanize;

pub use humanize::describe_time_left;

/// Discharge estimates count down to this level rather than to empty.
pub const LOW_BATTERY_LEVEL: u8 = 20;
pub const FULL_BATTERY_LEVEL: u8 = 100;

pub const FULL_MESSAGE: &str = "Battery is full and trickle-charging.";
pub const RECALCULATING_MESSAGE: &str = "Recalculating...";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEstimate {
    /// Raw seconds until low battery (discharging) or full (charging).
    pub time_left_secs: Option<f64>,
    pub verbose: String,
}

/// Derive time-left and the verbose line for `record`.
pub fn derive(
    record: &TelemetryRecord,
    state: &mut ChargeState,
) -> Result<StatusEstimate, AppError> {
    derive_at(record, state, Instant::now())
}

pub fn derive_at(
    record: &TelemetryRecord,
    state: &mut ChargeState,
    now: Instant,
) -> Result<StatusEstimate, AppError> {
    let episode = *state.transitions.episode().ok_or_else(|| {
        AppError::Initialization("status derived before any charge episode opened".to_string())
    })?;
    let current_level = record.battery_level().ok_or_else(|| {
        AppError::MalformedFrame("battery level missing from cached frame".to_string())
    })?;
    let discharging = record.discharging().unwrap_or(false);
    let charging = record.charging().unwrap_or(false);

    if current_level == FULL_BATTERY_LEVEL && !discharging {
        return Ok(StatusEstimate {
            time_left_secs: Some(0.0),
            verbose: FULL_MESSAGE.to_string(),
        });
    }

    let elapsed = now.saturating_duration_since(episode.started()).as_secs() as f64;
    let baseline_level = episode.baseline_level();
    let level_delta = i32::from(baseline_level) - i32::from(current_level);
    let secs_per_point = if level_delta == 0 {
        0.0
    } else {
        elapsed / f64::from(level_delta)
    };

    if secs_per_point == 0.0 {
        let activity = if charging {
            "charging"
        } else if discharging {
            "discharging"
        } else {
            "trickling"
        };
        return Ok(StatusEstimate {
            time_left_secs: None,
            verbose: format!("Battery is {activity}; currently at {current_level}%."),
        });
    }

    if discharging {
        let points_to_low = f64::from(i32::from(baseline_level) - i32::from(LOW_BATTERY_LEVEL));
        let estimate = state
            .estimates
            .get_or_insert(current_level, secs_per_point * points_to_low);
        debug!(current_level, estimate, "Discharge estimate");
        if estimate < 0.0 {
            return Ok(StatusEstimate {
                time_left_secs: Some(0.0),
                verbose: format!(
                    "Discharging. Battery at {current_level}%. BATTERY IS CRITICALLY LOW."
                ),
            });
        }
        return Ok(StatusEstimate {
            time_left_secs: Some(estimate),
            verbose: format!(
                "Discharging. Battery at {current_level}%. Time until low battery: {}",
                describe_time_left(estimate as u64)
            ),
        });
    }

    if charging {
        let points_to_full = f64::from(FULL_BATTERY_LEVEL - current_level);
        let estimate = state
            .estimates
            .get_or_insert(current_level, -secs_per_point * points_to_full);
        debug!(current_level, estimate, "Charge estimate");
        // The level fell while on mains; the sensor is not making sense yet.
        if estimate < 0.0 {
            return Ok(StatusEstimate {
                time_left_secs: None,
                verbose: format!("Charging. Battery at {current_level}%. Time until full: unknown"),
            });
        }
        return Ok(StatusEstimate {
            time_left_secs: Some(estimate),
            verbose: format!(
                "Charging. Battery at {current_level}%. Time until full: {}",
                describe_time_left(estimate as u64)
            ),
        });
    }

    Ok(StatusEstimate {
        time_left_secs: None,
        verbose: RECALCULATING_MESSAGE.to_string(),
    })
}
