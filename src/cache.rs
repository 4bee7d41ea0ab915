//! Background-refreshed memoization of a fallible read.
//!
//! [`SelfCachingCall`] keeps invoking its read function on a timer and stores the
//! outcome; readers get a copy of whatever the last cycle produced without waiting on
//! I/O. [`PassthroughCall`] has the same contract but reads synchronously.

use crate::error::AppError;
use crate::sync::ReadWriteLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Longest single sleep in the refresh loop, bounding stop and interval-change latency.
pub const MAX_SLEEP_STEP: Duration = Duration::from_secs(1);

pub type ReadFn<T> = Box<dyn FnMut() -> Result<T, AppError> + Send>;

/// Outcome of the most recent refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<T> {
    Pending,
    Ready(T),
    Failed(AppError),
}

impl<T> Cached<T> {
    pub fn into_result(self) -> Result<T, AppError> {
        match self {
            Cached::Pending => Err(AppError::PrematureRead),
            Cached::Ready(value) => Ok(value),
            Cached::Failed(err) => Err(err),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Cached::Ready(_))
    }
}

#[derive(Debug, Clone)]
pub struct CachedResult<T> {
    pub outcome: Cached<T>,
    pub attempted_at: Option<SystemTime>,
}

impl<T> Default for CachedResult<T> {
    fn default() -> Self {
        Self {
            outcome: Cached::Pending,
            attempted_at: None,
        }
    }
}

/// Common surface of the caching and non-caching variants.
pub trait CachedSource<T>: Send + Sync {
    /// A copy of the last good value, or the error the last cycle hit.
    fn result(&self) -> Result<T, AppError>;

    /// Status of the last cycle, without converting it into an error.
    fn snapshot(&self) -> CachedResult<T>;

    /// Run one read immediately, outside the timer cadence.
    fn force_refresh(&self);

    /// Stop background work. A no-op for sources without any.
    fn stop(&self) {}
}

struct Shared<T> {
    read_fn: Mutex<ReadFn<T>>,
    slot: ReadWriteLock<CachedResult<T>>,
    interval: ReadWriteLock<Duration>,
    stop: AtomicBool,
}

impl<T: Clone> Shared<T> {
    fn refresh(&self) {
        // Holding the read function until the slot is written keeps forced and timed
        // refreshes publishing in the order they read.
        let mut read_fn = match self.read_fn.lock() {
            Ok(read_fn) => read_fn,
            Err(_) => {
                self.publish(Cached::Failed(AppError::StateLock));
                return;
            }
        };
        let outcome = match read_fn() {
            Ok(value) => Cached::Ready(value),
            Err(err) => {
                warn!(error = %err, "Cached read failed");
                Cached::Failed(err)
            }
        };
        self.publish(outcome);
        drop(read_fn);
    }

    fn publish(&self, outcome: Cached<T>) {
        match self.slot.write() {
            Ok(mut slot) => {
                slot.outcome = outcome;
                slot.attempted_at = Some(SystemTime::now());
            }
            Err(err) => warn!(error = %err, "Failed to store cached result"),
        }
    }

    fn snapshot(&self) -> CachedResult<T> {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(err) => CachedResult {
                outcome: Cached::Failed(err),
                attempted_at: None,
            },
        }
    }

    fn interval(&self) -> Duration {
        self.interval
            .read()
            .map(|interval| *interval)
            .unwrap_or(MAX_SLEEP_STEP)
    }
}

pub struct SelfCachingCall<T> {
    shared: Arc<Shared<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T> SelfCachingCall<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn the refresh thread. Its first cycle runs immediately.
    pub fn spawn(interval: Duration, read_fn: ReadFn<T>) -> Self {
        let shared = Arc::new(Shared {
            read_fn: Mutex::new(read_fn),
            slot: ReadWriteLock::new(CachedResult::default()),
            interval: ReadWriteLock::new(interval),
            stop: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::spawn(move || keep_refreshing(&worker));
        info!(interval_ms = interval.as_millis(), "Started cache refresh thread");

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Takes effect within one sleep step of the running cycle.
    pub fn set_interval(&self, interval: Duration) -> Result<(), AppError> {
        *self.shared.interval.write()? = interval;
        Ok(())
    }
}

fn keep_refreshing<T: Clone>(shared: &Shared<T>) {
    let mut until_refresh = Duration::ZERO;
    while !shared.stop.load(Ordering::Relaxed) {
        if until_refresh.is_zero() {
            shared.refresh();
            until_refresh = shared.interval();
        } else {
            let step = until_refresh.min(MAX_SLEEP_STEP);
            std::thread::sleep(step);
            // Re-read the interval so shortening it is honoured mid-wait.
            until_refresh = (until_refresh - step).min(shared.interval());
        }
    }
    debug!("Cache refresh thread exiting");
}

impl<T> CachedSource<T> for SelfCachingCall<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn result(&self) -> Result<T, AppError> {
        self.shared.snapshot().outcome.into_result()
    }

    fn snapshot(&self) -> CachedResult<T> {
        self.shared.snapshot()
    }

    fn force_refresh(&self) {
        self.shared.refresh();
    }

    /// Signal the refresh thread and wait for it. An in-flight read finishes first.
    fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Cache refresh thread panicked");
            }
        }
    }
}

impl<T> Drop for SelfCachingCall<T> {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Calls the read function on every access.
pub struct PassthroughCall<T> {
    read_fn: Mutex<ReadFn<T>>,
    last_attempt: ReadWriteLock<Option<SystemTime>>,
}

impl<T> PassthroughCall<T> {
    pub fn new(read_fn: ReadFn<T>) -> Self {
        Self {
            read_fn: Mutex::new(read_fn),
            last_attempt: ReadWriteLock::new(None),
        }
    }

    fn call(&self) -> Result<T, AppError> {
        let result = {
            let mut read_fn = self.read_fn.lock().map_err(|_| AppError::StateLock)?;
            read_fn()
        };
        *self.last_attempt.write()? = Some(SystemTime::now());
        result
    }
}

impl<T> CachedSource<T> for PassthroughCall<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn result(&self) -> Result<T, AppError> {
        self.call()
    }

    fn snapshot(&self) -> CachedResult<T> {
        let outcome = match self.call() {
            Ok(value) => Cached::Ready(value),
            Err(err) => Cached::Failed(err),
        };
        let attempted_at = self.last_attempt.read().map(|at| *at).unwrap_or(None);
        CachedResult {
            outcome,
            attempted_at,
        }
    }

    fn force_refresh(&self) {}
}
