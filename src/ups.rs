use crate::cache::{Cached, CachedSource, PassthroughCall, SelfCachingCall};
use crate::error::AppError;
use crate::estimation::{self, StatusEstimate};
use crate::serial::port::SerialPortLink;
use crate::serial::{SerialLink, SerialSettings};
use crate::state::{ChargeMode, ChargeState};
use crate::sync::ReadWriteLock;
use crate::telemetry::reader::DEFAULT_MIN_READ_INTERVAL;
use crate::telemetry::{RetryPolicy, TelemetryReader, TelemetryRecord};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub use_caching: bool,
    pub refresh_interval: Duration,
    pub retry: RetryPolicy,
    pub min_read_interval: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            use_caching: true,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            retry: RetryPolicy::default(),
            min_read_interval: DEFAULT_MIN_READ_INTERVAL,
        }
    }
}

/// Whether the cache currently holds usable telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Pending,
    Ready,
    Failed,
}

/// Every accessor field, derived from one cached frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsStatus {
    pub vout: Option<f64>,
    pub battery_level: Option<u8>,
    pub charging: Option<bool>,
    pub discharging: Option<bool>,
    pub hardware_version: Option<String>,
    pub verbose: Option<String>,
    pub time_left_secs: Option<i64>,
    pub mode: ChargeMode,
    pub feed: FeedState,
    #[serde(skip)]
    pub refreshed_at: Option<SystemTime>,
}

/// Owns the telemetry cache and the charge episode state for one UPSPack.
///
/// Each accessor fetches its own copy of the cached frame, so two accessor calls can
/// straddle a refresh. Use [`UpsController::status`] when fields must agree.
pub struct UpsController {
    source: Box<dyn CachedSource<TelemetryRecord>>,
    state: Arc<ReadWriteLock<ChargeState>>,
}

impl UpsController {
    pub fn new(
        source: Box<dyn CachedSource<TelemetryRecord>>,
        state: Arc<ReadWriteLock<ChargeState>>,
    ) -> Self {
        Self { source, state }
    }

    /// Open the serial device and start polling it.
    pub fn open(settings: &SerialSettings, options: ControllerOptions) -> Result<Self, AppError> {
        let link = SerialPortLink::open(settings)?;
        Ok(Self::with_link(link, options))
    }

    /// Poll `link` through a [`TelemetryReader`]. One read is forced before returning.
    pub fn with_link<L>(link: L, options: ControllerOptions) -> Self
    where
        L: SerialLink + 'static,
    {
        let state = Arc::new(ReadWriteLock::new(ChargeState::new()));
        let mut reader = TelemetryReader::new(link, Arc::clone(&state))
            .with_retry(options.retry)
            .with_min_read_interval(options.min_read_interval);

        let read_fn = Box::new(move || reader.forgiving_read());
        let source: Box<dyn CachedSource<TelemetryRecord>> = if options.use_caching {
            Box::new(SelfCachingCall::spawn(options.refresh_interval, read_fn))
        } else {
            Box::new(PassthroughCall::new(read_fn))
        };
        source.force_refresh();
        info!(
            use_caching = options.use_caching,
            refresh_interval_ms = options.refresh_interval.as_millis(),
            "UPS controller ready"
        );

        Self::new(source, state)
    }

    pub fn record(&self) -> Result<TelemetryRecord, AppError> {
        self.source.result()
    }

    pub fn vout(&self) -> Option<f64> {
        self.record().ok()?.vout_volts()
    }

    pub fn battery_level(&self) -> Option<u8> {
        self.record().ok()?.battery_level()
    }

    pub fn charging(&self) -> Option<bool> {
        self.record().ok()?.charging()
    }

    pub fn discharging(&self) -> Option<bool> {
        self.record().ok()?.discharging()
    }

    pub fn hardware_version(&self) -> Option<String> {
        self.record().ok()?.hardware_version().map(str::to_string)
    }

    pub fn verbose(&self) -> Option<String> {
        let record = self.record().ok()?;
        self.estimate_for(&record, false)
            .map(|(estimate, _)| estimate.verbose)
            .ok()
    }

    /// Smoothed seconds until low battery or full. Each known value joins the window.
    pub fn time_left(&self) -> Option<i64> {
        let record = self.record().ok()?;
        self.estimate_for(&record, true).ok()?.1
    }

    pub fn mode(&self) -> ChargeMode {
        self.state
            .read()
            .map(|state| state.mode())
            .unwrap_or(ChargeMode::Unknown)
    }

    pub fn feed_state(&self) -> FeedState {
        match self.source.snapshot().outcome {
            Cached::Pending => FeedState::Pending,
            Cached::Ready(_) => FeedState::Ready,
            Cached::Failed(_) => FeedState::Failed,
        }
    }

    /// All accessor fields computed from a single cached frame.
    pub fn status(&self) -> UpsStatus {
        let snapshot = self.source.snapshot();
        let feed = match &snapshot.outcome {
            Cached::Pending => FeedState::Pending,
            Cached::Ready(_) => FeedState::Ready,
            Cached::Failed(_) => FeedState::Failed,
        };
        let record = match snapshot.outcome {
            Cached::Ready(record) => record,
            _ => {
                return UpsStatus {
                    vout: None,
                    battery_level: None,
                    charging: None,
                    discharging: None,
                    hardware_version: None,
                    verbose: None,
                    time_left_secs: None,
                    mode: self.mode(),
                    feed,
                    refreshed_at: snapshot.attempted_at,
                };
            }
        };

        let (verbose, time_left_secs) = match self.estimate_for(&record, true) {
            Ok((estimate, smoothed)) => (Some(estimate.verbose), smoothed),
            Err(err) => {
                warn!(error = %err, "Could not derive UPS status");
                (None, None)
            }
        };

        UpsStatus {
            vout: record.vout_volts(),
            battery_level: record.battery_level(),
            charging: record.charging(),
            discharging: record.discharging(),
            hardware_version: record.hardware_version().map(str::to_string),
            verbose,
            time_left_secs,
            mode: self.mode(),
            feed,
            refreshed_at: snapshot.attempted_at,
        }
    }

    pub fn stop(&self) {
        self.source.stop();
    }

    fn estimate_for(
        &self,
        record: &TelemetryRecord,
        smooth: bool,
    ) -> Result<(StatusEstimate, Option<i64>), AppError> {
        let mut state = self.state.write()?;
        let estimate = estimation::derive(record, &mut state)?;
        let smoothed = match estimate.time_left_secs {
            Some(seconds) if smooth => Some(state.time_left.push(seconds)),
            Some(_) => state.time_left.average(),
            None => None,
        };
        Ok((estimate, smoothed))
    }
}

impl Drop for UpsController {
    fn drop(&mut self) {
        self.source.stop();
    }
}
