use crate::error::AppError;
use crate::serial::SerialLink;
use crate::state::ChargeState;
use crate::sync::ReadWriteLock;
use crate::telemetry::frame::{KEY_BATCAP, TelemetryRecord, mains_flag, parse_frame};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_READ_ATTEMPTS: u32 = 10;
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);
/// Hardware reads closer together than this reuse the previous line.
pub const DEFAULT_MIN_READ_INTERVAL: Duration = Duration::from_secs(1);

const JITTER_STEP_MS: u64 = 10;
const CHUNK_SIZE: usize = 256;
/// Bytes kept while waiting for a line terminator.
pub const MAX_PENDING_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_READ_ATTEMPTS,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

/// Random back-off in 10ms steps, uniform over `[10ms, max - 10ms]`.
/// Falls back to a single step when `max` leaves no room for a range.
pub fn jitter_delay(max: Duration) -> Duration {
    let max_steps = (max.as_millis() as u64 / JITTER_STEP_MS).saturating_sub(1);
    if max_steps <= 1 {
        return Duration::from_millis(JITTER_STEP_MS);
    }
    let steps = rand::rng().random_range(1..=max_steps);
    Duration::from_millis(steps * JITTER_STEP_MS)
}

/// Drop bytes that can no longer belong to the last line once the buffer is full.
fn trim_pending(received: &mut Vec<u8>) {
    if received.len() <= MAX_PENDING_BYTES {
        return;
    }
    let body = &received[..received.len() - 1];
    let keep_from = match body.iter().rposition(|byte| *byte == b'\n') {
        Some(newline) => newline + 1,
        None => received.len() - MAX_PENDING_BYTES,
    };
    received.drain(..keep_from);
}

/// Reads frames from the UPS and keeps the charge episode in step with `Vin`.
pub struct TelemetryReader<L> {
    link: L,
    state: Arc<ReadWriteLock<ChargeState>>,
    retry: RetryPolicy,
    min_read_interval: Duration,
    last_line: Option<(Instant, String)>,
}

impl<L: SerialLink> TelemetryReader<L> {
    pub fn new(link: L, state: Arc<ReadWriteLock<ChargeState>>) -> Self {
        Self {
            link,
            state,
            retry: RetryPolicy::default(),
            min_read_interval: DEFAULT_MIN_READ_INTERVAL,
            last_line: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_min_read_interval(mut self, interval: Duration) -> Self {
        self.min_read_interval = interval;
        self
    }

    /// Block until a burst ends in a newline and return its last complete line.
    pub fn read_raw_line(&mut self) -> Result<String, AppError> {
        let mut received = Vec::new();
        let mut chunk = [0u8; CHUNK_SIZE];
        while received.last() != Some(&b'\n') {
            let count = self.link.read_chunk(&mut chunk)?;
            received.extend_from_slice(&chunk[..count]);
            trim_pending(&mut received);
        }

        let text = String::from_utf8_lossy(&received);
        let line = text
            .trim_end_matches(['\n', '\r'])
            .rsplit('\n')
            .next()
            .unwrap_or_default()
            .trim_end_matches('\r');
        Ok(line.to_string())
    }

    pub fn read_telemetry(&mut self) -> Result<TelemetryRecord, AppError> {
        self.read_telemetry_at(Instant::now())
    }

    fn read_telemetry_at(&mut self, now: Instant) -> Result<TelemetryRecord, AppError> {
        let fresh = match &self.last_line {
            Some((read_at, _)) => now.saturating_duration_since(*read_at) < self.min_read_interval,
            None => false,
        };
        if !fresh {
            let line = self.read_raw_line()?;
            self.last_line = Some((now, line));
        }

        let line = self
            .last_line
            .as_ref()
            .map(|(_, line)| line.as_str())
            .unwrap_or_default();
        let record = parse_frame(line);
        let on_mains = mains_flag(&record)?;

        let mut state = self.state.write()?;
        match record.battery_level() {
            Some(level) => {
                if state.observe(on_mains, level, now) {
                    info!(
                        mode = ?state.mode(),
                        battery_level = level,
                        "Charge episode started"
                    );
                }
            }
            // The episode opens on the next frame with a readable level.
            None if state.transitions.opens_episode(on_mains) => {
                debug!(
                    batcap = ?record.get(KEY_BATCAP),
                    "Unreadable battery level, episode start deferred"
                );
            }
            None => {}
        }
        Ok(record)
    }

    /// [`Self::read_telemetry`] with jittered retries.
    pub fn forgiving_read(&mut self) -> Result<TelemetryRecord, AppError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.read_telemetry() {
                Ok(record) => return Ok(record),
                Err(err) => {
                    debug!(attempt, error = %err, "UPS telemetry read failed");
                    last_error = Some(err);
                    if attempt < attempts {
                        std::thread::sleep(jitter_delay(self.retry.max_jitter));
                    }
                }
            }
        }

        let last = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        warn!(attempts, error = last.as_str(), "Giving up on UPS telemetry read");
        Err(AppError::ReadExhausted { attempts, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::{MockChunk, MockSerialLink};
    use crate::state::ChargeMode;

    const FAST_RETRY: RetryPolicy = RetryPolicy {
        attempts: 3,
        max_jitter: Duration::ZERO,
    };

    fn reader(
        link: MockSerialLink,
    ) -> (TelemetryReader<MockSerialLink>, Arc<ReadWriteLock<ChargeState>>) {
        let state = Arc::new(ReadWriteLock::new(ChargeState::new()));
        let reader = TelemetryReader::new(link, Arc::clone(&state))
            .with_retry(FAST_RETRY)
            .with_min_read_interval(Duration::ZERO);
        (reader, state)
    }

    #[test]
    fn raw_line_waits_for_terminator_and_keeps_last_line() -> Result<(), AppError> {
        let link = MockSerialLink::new(vec![
            MockChunk::text("BATCAP 10$\n$Vin GOOD,BA"),
            MockChunk::text("TCAP 50$\r\n"),
        ]);
        let (mut reader, _state) = reader(link);

        assert_eq!(reader.read_raw_line()?, "$Vin GOOD,BATCAP 50$");
        Ok(())
    }

    #[test]
    fn raw_line_surfaces_timeout() {
        let link = MockSerialLink::new(vec![MockChunk::text("$Vin GOOD"), MockChunk::Timeout]);
        let (mut reader, _state) = reader(link);

        assert_eq!(reader.read_raw_line(), Err(AppError::SerialTimeout));
    }

    #[test]
    fn reads_within_throttle_window_reuse_last_line() -> Result<(), AppError> {
        let link = MockSerialLink::with_lines(&["$Vin GOOD,BATCAP 50$", "$Vin GOOD,BATCAP 51$"]);
        let state = Arc::new(ReadWriteLock::new(ChargeState::new()));
        let mut reader = TelemetryReader::new(link.clone(), state);
        let now = Instant::now();

        let first = reader.read_telemetry_at(now)?;
        let second = reader.read_telemetry_at(now + Duration::from_millis(500))?;
        assert_eq!(first, second);
        assert_eq!(link.remaining(), 1);

        let third = reader.read_telemetry_at(now + Duration::from_secs(1))?;
        assert_eq!(third.battery_level(), Some(51));
        Ok(())
    }

    #[test]
    fn first_frame_opens_matching_episode() -> Result<(), AppError> {
        let link = MockSerialLink::with_lines(&["$Vin NG,BATCAP 77,Vout 4900$"]);
        let (mut reader, state) = reader(link);

        reader.read_telemetry()?;

        let guard = state.read()?;
        assert_eq!(guard.mode(), ChargeMode::Discharging);
        assert_eq!(
            guard.transitions.episode().map(|episode| episode.baseline_level()),
            Some(77)
        );
        Ok(())
    }

    #[test]
    fn unchanged_vin_keeps_episode_start() -> Result<(), AppError> {
        let link = MockSerialLink::with_lines(&["$Vin GOOD,BATCAP 60$", "$Vin GOOD,BATCAP 62$"]);
        let (mut reader, state) = reader(link);

        reader.read_telemetry()?;
        let started = state.read()?.transitions.charge_started();
        state.write()?.estimates.get_or_insert(61, 100.0);
        reader.read_telemetry()?;

        let guard = state.read()?;
        assert_eq!(guard.transitions.charge_started(), started);
        assert_eq!(guard.estimates.get(61), Some(100.0));
        Ok(())
    }

    #[test]
    fn vin_flip_resets_baseline_and_estimates() -> Result<(), AppError> {
        let link = MockSerialLink::with_lines(&["$Vin GOOD,BATCAP 90$", "$Vin NG,BATCAP 89$"]);
        let (mut reader, state) = reader(link);

        reader.read_telemetry()?;
        state.write()?.estimates.get_or_insert(90, 10.0);
        reader.read_telemetry()?;

        let guard = state.read()?;
        assert_eq!(guard.mode(), ChargeMode::Discharging);
        assert_eq!(guard.transitions.charge_started(), None);
        assert_eq!(
            guard.transitions.episode().map(|episode| episode.baseline_level()),
            Some(89)
        );
        assert!(guard.estimates.is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_level_keeps_frame_and_defers_episode() -> Result<(), AppError> {
        let link = MockSerialLink::with_lines(&[
            "$SmartUPS v1,Vin GOOD,BATCAP ?,Vout 5000$",
            "$SmartUPS v1,Vin GOOD,BATCAP 64,Vout 5000$",
        ]);
        let (mut reader, state) = reader(link);

        let record = reader.read_telemetry()?;
        assert_eq!(record.vout_volts(), Some(5.0));
        assert_eq!(record.hardware_version(), Some("v1"));
        assert_eq!(record.battery_level(), None);
        assert_eq!(state.read()?.mode(), ChargeMode::Unknown);

        reader.read_telemetry()?;
        let guard = state.read()?;
        assert_eq!(guard.mode(), ChargeMode::Charging);
        assert_eq!(
            guard.transitions.episode().map(|episode| episode.baseline_level()),
            Some(64)
        );
        Ok(())
    }

    #[test]
    fn unreadable_level_mid_episode_keeps_baseline() -> Result<(), AppError> {
        let link = MockSerialLink::with_lines(&["$Vin NG,BATCAP 70$", "$Vin NG,Vout 4900$"]);
        let (mut reader, state) = reader(link);

        reader.read_telemetry()?;
        let started = state.read()?.transitions.discharge_started();
        let record = reader.read_telemetry()?;

        assert_eq!(record.discharging(), Some(true));
        assert_eq!(state.read()?.transitions.discharge_started(), started);
        Ok(())
    }

    #[test]
    fn frame_without_vin_is_rejected() {
        let link = MockSerialLink::with_lines(&["$BATCAP 50,Vout 5000$"]);
        let (mut reader, _state) = reader(link);

        assert!(matches!(reader.read_telemetry(), Err(AppError::MalformedFrame(_))));
    }

    #[test]
    fn runaway_input_without_terminator_stays_bounded() -> Result<(), AppError> {
        let noise = "x".repeat(1000);
        let mut chunks: Vec<MockChunk> = (0..50).map(|_| MockChunk::text(&noise)).collect();
        chunks.push(MockChunk::text("\n$Vin GOOD,BATCAP 50$\n"));
        let (mut reader, _state) = reader(MockSerialLink::new(chunks));

        assert_eq!(reader.read_raw_line()?, "$Vin GOOD,BATCAP 50$");
        Ok(())
    }

    #[test]
    fn trimming_keeps_bytes_after_last_newline() {
        let mut pending = b"old line\n".to_vec();
        pending.extend(std::iter::repeat_n(b'y', MAX_PENDING_BYTES));

        trim_pending(&mut pending);

        assert_eq!(pending.len(), MAX_PENDING_BYTES);
        assert!(pending.iter().all(|byte| *byte == b'y'));

        let mut runaway = vec![b'z'; MAX_PENDING_BYTES * 2];
        trim_pending(&mut runaway);
        assert_eq!(runaway.len(), MAX_PENDING_BYTES);
    }

    #[test]
    fn forgiving_read_retries_transient_failures() -> Result<(), AppError> {
        let link = MockSerialLink::new(vec![
            MockChunk::Timeout,
            MockChunk::text("$BATCAP 40$\n"),
            MockChunk::text("$Vin GOOD,BATCAP 40$\n"),
        ]);
        let (mut reader, _state) = reader(link);

        let record = reader.forgiving_read()?;

        assert_eq!(record.battery_level(), Some(40));
        Ok(())
    }

    #[test]
    fn forgiving_read_gives_up_after_all_attempts() {
        let link = MockSerialLink::new(vec![MockChunk::Fail("unplugged".to_string())]);
        let (mut reader, _state) = reader(link);

        let err = reader.forgiving_read().unwrap_err();

        assert!(matches!(err, AppError::ReadExhausted { attempts: 3, .. }));
        assert_eq!(
            err.to_string(),
            "failed to read UPS telemetry after 3 attempts: serial read timed out"
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..200 {
            let delay = jitter_delay(Duration::from_millis(500));
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(490));
            assert_eq!(delay.as_millis() % 10, 0);
        }
        assert_eq!(jitter_delay(Duration::ZERO), Duration::from_millis(10));
    }
}
