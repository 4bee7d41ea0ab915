use serde::Serialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Instant;

pub const TIME_LEFT_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeMode {
    Unknown,
    Charging,
    Discharging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Episode {
    Charging { started: Instant, baseline_level: u8 },
    Discharging { started: Instant, baseline_level: u8 },
}

impl Episode {
    pub fn started(&self) -> Instant {
        match self {
            Episode::Charging { started, .. } | Episode::Discharging { started, .. } => *started,
        }
    }

    pub fn baseline_level(&self) -> u8 {
        match self {
            Episode::Charging { baseline_level, .. }
            | Episode::Discharging { baseline_level, .. } => *baseline_level,
        }
    }

    pub fn is_discharging(&self) -> bool {
        matches!(self, Episode::Discharging { .. })
    }
}

/// The open charge or discharge episode. `None` only before the first good frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionState {
    episode: Option<Episode>,
}

impl TransitionState {
    pub fn episode(&self) -> Option<&Episode> {
        self.episode.as_ref()
    }

    pub fn mode(&self) -> ChargeMode {
        match self.episode {
            None => ChargeMode::Unknown,
            Some(Episode::Charging { .. }) => ChargeMode::Charging,
            Some(Episode::Discharging { .. }) => ChargeMode::Discharging,
        }
    }

    pub fn discharge_started(&self) -> Option<Instant> {
        match self.episode {
            Some(Episode::Discharging { started, .. }) => Some(started),
            _ => None,
        }
    }

    pub fn charge_started(&self) -> Option<Instant> {
        match self.episode {
            Some(Episode::Charging { started, .. }) => Some(started),
            _ => None,
        }
    }

    /// Whether a frame with this mains state would open a new episode.
    pub fn opens_episode(&self, on_mains: bool) -> bool {
        match self.episode {
            Some(Episode::Charging { .. }) => !on_mains,
            Some(Episode::Discharging { .. }) => on_mains,
            None => true,
        }
    }

    /// Opens a new episode if `on_mains` disagrees with the open one.
    /// Returns true when an episode was opened.
    pub fn observe(&mut self, on_mains: bool, level: u8, now: Instant) -> bool {
        if !self.opens_episode(on_mains) {
            return false;
        }

        self.episode = Some(if on_mains {
            Episode::Charging {
                started: now,
                baseline_level: level,
            }
        } else {
            Episode::Discharging {
                started: now,
                baseline_level: level,
            }
        });
        true
    }
}

/// Seconds-remaining estimates for the open episode, keyed by battery level.
/// The first estimate stored for a level is kept until the episode ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstimateCache {
    by_level: HashMap<u8, f64>,
}

impl EstimateCache {
    pub fn get_or_insert(&mut self, level: u8, estimate: f64) -> f64 {
        *self.by_level.entry(level).or_insert(estimate)
    }

    pub fn get(&self, level: u8) -> Option<f64> {
        self.by_level.get(&level).copied()
    }

    pub fn len(&self) -> usize {
        self.by_level.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_level.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_level.clear();
    }
}

/// Newest-first window of raw time-left samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingTimeLeftWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingTimeLeftWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    /// Record a sample and return the integer average of the window.
    pub fn push(&mut self, seconds: f64) -> i64 {
        self.samples.push_front(seconds);
        self.samples.truncate(self.capacity);
        self.average().unwrap_or(0)
    }

    pub fn average(&self) -> Option<i64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().sum();
        Some((sum / self.samples.len() as f64).floor() as i64)
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for RollingTimeLeftWindow {
    fn default() -> Self {
        Self::new(TIME_LEFT_WINDOW)
    }
}

/// Everything the controller derives across reads, guarded by one lock.
#[derive(Debug, Clone, Default)]
pub struct ChargeState {
    pub transitions: TransitionState,
    pub estimates: EstimateCache,
    pub time_left: RollingTimeLeftWindow,
}

impl ChargeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a frame's mains state. A new episode discards cached estimates.
    pub fn observe(&mut self, on_mains: bool, level: u8, now: Instant) -> bool {
        let opened = self.transitions.observe(on_mains, level, now);
        if opened {
            self.estimates.clear();
        }
        opened
    }

    pub fn mode(&self) -> ChargeMode {
        self.transitions.mode()
    }
}
