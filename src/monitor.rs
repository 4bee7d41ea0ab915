//! Periodic status logging, user warnings and low-battery shutdown.

use crate::error::AppError;
use crate::ups::{UpsController, UpsStatus};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const DEFAULT_CRITICAL_LEVEL: u8 = 10;
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const WAITING_MESSAGE: &str = "Waiting for UPS to connect";
pub const SHUTDOWN_MESSAGE: &str = "SHUTTING DOWN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    Broadcast(String),
    Shutdown,
}

pub fn status_line(status: &UpsStatus) -> String {
    let Some(vout) = status.vout else {
        return WAITING_MESSAGE.to_string();
    };
    let yes_no = |flag: Option<bool>| if flag == Some(true) { "Yes" } else { "No" };
    let level = status
        .battery_level
        .map(|level| format!("{level}%"))
        .unwrap_or_else(|| "?".to_string());
    let time_left = status
        .time_left_secs
        .map(|secs| format!("{}m", secs.div_euclid(60)))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "Vout={vout:.4}; charging?{}; discharging?{}; batterylevel={level}; timeleft={time_left}; verbose={}",
        yes_no(status.charging),
        yes_no(status.discharging),
        status.verbose.as_deref().unwrap_or("?"),
    )
}

/// Decides when to warn users and when to power the host down.
///
/// Back on mains, the status is broadcast once. On battery the first tick warns
/// straight away, then again whenever the tick counter passes the battery level,
/// so warnings speed up as the battery drains.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    critical_level: u8,
    ticks_since_warning: u32,
    shutdown_requested: bool,
}

impl AlertPolicy {
    pub fn new(critical_level: u8) -> Self {
        Self {
            critical_level,
            ticks_since_warning: u32::MAX,
            shutdown_requested: false,
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn evaluate(&mut self, status: &UpsStatus) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let verbose = status.verbose.clone().unwrap_or_default();

        if status.discharging == Some(false) && self.ticks_since_warning > 0 {
            self.ticks_since_warning = 0;
            alerts.push(Alert::Broadcast(verbose.clone()));
        }

        if status.discharging == Some(true) {
            match status.battery_level {
                Some(level) if level >= self.critical_level => {
                    self.ticks_since_warning = self.ticks_since_warning.saturating_add(1);
                    if self.ticks_since_warning == 1
                        || self.ticks_since_warning > u32::from(level)
                    {
                        self.ticks_since_warning = 1;
                        alerts.push(Alert::Broadcast(verbose));
                    }
                }
                Some(_) if !self.shutdown_requested => {
                    self.shutdown_requested = true;
                    alerts.push(Alert::Broadcast(SHUTDOWN_MESSAGE.to_string()));
                    alerts.push(Alert::Shutdown);
                }
                _ => {}
            }
        }

        alerts
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CRITICAL_LEVEL)
    }
}

pub trait Notifier: Send {
    fn broadcast(&mut self, message: &str) -> Result<(), AppError>;
    fn shutdown(&mut self) -> Result<(), AppError>;
}

/// `wall` for messages and `shutdown -h now` for power-off.
#[derive(Debug, Clone, Default)]
pub struct CommandNotifier {
    dry_run: bool,
}

impl CommandNotifier {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<(), AppError> {
        if self.dry_run {
            info!(program, args = ?args, "Dry run, command not executed");
            return Ok(());
        }
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|err| AppError::Notify(format!("failed to run {program}: {err}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::Notify(format!("{program} exited with {status}")))
        }
    }
}

impl Notifier for CommandNotifier {
    fn broadcast(&mut self, message: &str) -> Result<(), AppError> {
        self.run("wall", &[message])
    }

    fn shutdown(&mut self) -> Result<(), AppError> {
        self.run("shutdown", &["-h", "now"])
    }
}

pub struct Monitor<N> {
    controller: Arc<UpsController>,
    notifier: N,
    policy: AlertPolicy,
    log_path: Option<PathBuf>,
}

impl<N: Notifier> Monitor<N> {
    pub fn new(controller: Arc<UpsController>, notifier: N, policy: AlertPolicy) -> Self {
        Self {
            controller,
            notifier,
            policy,
            log_path: None,
        }
    }

    pub fn with_log_path(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = path;
        self
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Log one status line, then act on whatever the policy asks for.
    pub fn tick(&mut self) -> Vec<Alert> {
        let status = self.controller.status();
        let line = status_line(&status);
        info!(status = line.as_str(), "UPS status");
        self.append_log(&line);

        let alerts = self.policy.evaluate(&status);
        for alert in &alerts {
            let result = match alert {
                Alert::Broadcast(message) => self.notifier.broadcast(message),
                Alert::Shutdown => {
                    warn!(battery_level = ?status.battery_level, "Battery critical, shutting down");
                    self.notifier.shutdown()
                }
            };
            if let Err(err) = result {
                error!(error = %err, "Failed to deliver alert");
            }
        }
        alerts
    }

    fn append_log(&self, line: &str) {
        let Some(path) = &self.log_path else {
            return;
        };
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = written {
            warn!(path = %path.display(), error = %err, "Failed to append status log");
        }
    }
}

pub fn spawn_monitor_thread<N>(
    mut monitor: Monitor<N>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    N: Notifier + 'static,
{
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            monitor.tick();
            sleep_with_stop(interval, &stop, cycle_start);
        }
    })
}

fn sleep_with_stop(duration: Duration, stop: &AtomicBool, start: Instant) {
    let step = Duration::from_millis(100);
    while start.elapsed() < duration {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(step.min(duration.saturating_sub(start.elapsed())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChargeMode;
    use crate::ups::FeedState;

    fn status(discharging: bool, level: u8) -> UpsStatus {
        UpsStatus {
            vout: Some(5.0),
            battery_level: Some(level),
            charging: Some(!discharging && level < 100),
            discharging: Some(discharging),
            hardware_version: Some("V2.0".to_string()),
            verbose: Some(format!("at {level}%")),
            time_left_secs: Some(125),
            mode: if discharging {
                ChargeMode::Discharging
            } else {
                ChargeMode::Charging
            },
            feed: FeedState::Ready,
            refreshed_at: None,
        }
    }

    #[test]
    fn status_line_waits_without_voltage() {
        let mut waiting = status(false, 50);
        waiting.vout = None;

        assert_eq!(status_line(&waiting), WAITING_MESSAGE);
    }

    #[test]
    fn status_line_lists_fields() {
        assert_eq!(
            status_line(&status(true, 42)),
            "Vout=5.0000; charging?No; discharging?Yes; batterylevel=42%; timeleft=2m; verbose=at 42%"
        );
    }

    #[test]
    fn mains_status_is_broadcast_once() {
        let mut policy = AlertPolicy::default();

        assert_eq!(
            policy.evaluate(&status(false, 60)),
            vec![Alert::Broadcast("at 60%".to_string())]
        );
        assert!(policy.evaluate(&status(false, 61)).is_empty());
    }

    #[test]
    fn discharge_warnings_repeat_faster_as_battery_drains() {
        let mut policy = AlertPolicy::default();
        policy.evaluate(&status(false, 60));

        assert_eq!(policy.evaluate(&status(true, 12)).len(), 1);
        let quiet: usize = (0..11).map(|_| policy.evaluate(&status(true, 12)).len()).sum();
        assert_eq!(quiet, 0);
        assert_eq!(policy.evaluate(&status(true, 12)).len(), 1);
    }

    #[test]
    fn critical_level_on_battery_shuts_down_once() {
        let mut policy = AlertPolicy::default();

        let alerts = policy.evaluate(&status(true, 9));
        assert_eq!(
            alerts,
            vec![
                Alert::Broadcast(SHUTDOWN_MESSAGE.to_string()),
                Alert::Shutdown
            ]
        );
        assert!(policy.shutdown_requested());
        assert!(policy.evaluate(&status(true, 8)).is_empty());
    }

    #[test]
    fn critical_level_on_mains_does_not_shut_down() {
        let mut policy = AlertPolicy::default();

        let alerts = policy.evaluate(&status(false, 5));

        assert!(!alerts.contains(&Alert::Shutdown));
    }

    #[test]
    fn dry_run_notifier_skips_commands() -> Result<(), AppError> {
        let mut notifier = CommandNotifier::new(true);

        notifier.broadcast("test")?;
        notifier.shutdown()?;
        Ok(())
    }
}
