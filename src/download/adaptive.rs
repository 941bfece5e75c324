//! Adaptive concurrency/delay profiles
//!
//! Tracks failure timestamps in a sliding window and maps the smoothed failure
//! rate to one of five named profiles. Profiles only ever make the caller's
//! settings more conservative.

use super::queue::QueueConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Sliding window over which failures count
pub const FAILURE_WINDOW_SECS: i64 = 600;

/// Named bundle of concurrency/delay/throttle settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    pub name: &'static str,
    pub max_concurrent: usize,
    pub delay: Duration,
    pub per_minute_throttle: u32,
    /// Profile applies while the failure rate is strictly below this bound
    upper_rate: f64,
}

/// Most to least aggressive
pub const PROFILES: [Profile; 5] = [
    Profile {
        name: "excellent",
        max_concurrent: 5,
        delay: Duration::from_millis(500),
        per_minute_throttle: 60,
        upper_rate: 0.05,
    },
    Profile {
        name: "good",
        max_concurrent: 4,
        delay: Duration::from_millis(1000),
        per_minute_throttle: 40,
        upper_rate: 0.15,
    },
    Profile {
        name: "normal",
        max_concurrent: 3,
        delay: Duration::from_millis(1500),
        per_minute_throttle: 30,
        upper_rate: 0.30,
    },
    Profile {
        name: "poor",
        max_concurrent: 2,
        delay: Duration::from_millis(3000),
        per_minute_throttle: 15,
        upper_rate: 0.50,
    },
    Profile {
        name: "terrible",
        max_concurrent: 1,
        delay: Duration::from_millis(5000),
        per_minute_throttle: 8,
        upper_rate: f64::INFINITY,
    },
];

/// Settings returned to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveSettings {
    pub max_concurrent: usize,
    pub inter_item_delay: Duration,
    pub per_minute_throttle: u32,
    pub profile_name: &'static str,
}

impl AdaptiveSettings {
    /// Overlay onto a full queue config, keeping the retry settings
    pub fn apply_to(&self, base: &QueueConfig) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent,
            inter_item_delay: self.inter_item_delay,
            per_minute_throttle: self.per_minute_throttle,
            ..base.clone()
        }
    }
}

/// Serializable failure history, persisted between sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureSnapshot {
    pub failures: Vec<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Window {
    failures: VecDeque<DateTime<Utc>>,
    successes: u64,
}

impl Window {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(FAILURE_WINDOW_SECS);
        while self.failures.front().is_some_and(|t| *t < cutoff) {
            self.failures.pop_front();
        }
    }
}

/// Rate/concurrency profile controller
#[derive(Debug, Default)]
pub struct AdaptiveController {
    window: Mutex<Window>,
}

impl AdaptiveController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a previous session's failure history
    pub fn restore(snapshot: &FailureSnapshot) -> Self {
        let controller = Self::new();
        {
            let mut window = controller.lock();
            let mut failures = snapshot.failures.clone();
            failures.sort();
            window.failures = failures.into();
            window.prune(Utc::now());
        }
        controller
    }

    pub fn snapshot(&self) -> FailureSnapshot {
        let mut window = self.lock();
        window.prune(Utc::now());
        FailureSnapshot {
            failures: window.failures.iter().copied().collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Utc::now());
    }

    pub fn record_failure_at(&self, at: DateTime<Utc>) {
        let mut window = self.lock();
        // Keep the deque ordered even if timestamps arrive out of order
        let pos = window.failures.partition_point(|t| *t <= at);
        window.failures.insert(pos, at);
    }

    pub fn record_success(&self) {
        self.lock().successes += 1;
    }

    pub fn successes(&self) -> u64 {
        self.lock().successes
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate_at(Utc::now())
    }

    /// `failures / max(failures + 10, 20)` over the last ten minutes
    pub fn failure_rate_at(&self, now: DateTime<Utc>) -> f64 {
        let mut window = self.lock();
        window.prune(now);
        let failures = window.failures.len() as f64;
        failures / (failures + 10.0).max(20.0)
    }

    pub fn current_profile(&self) -> Profile {
        self.profile_at(Utc::now())
    }

    pub fn profile_at(&self, now: DateTime<Utc>) -> Profile {
        let rate = self.failure_rate_at(now);
        PROFILES
            .iter()
            .copied()
            .find(|p| rate < p.upper_rate)
            .unwrap_or(PROFILES[PROFILES.len() - 1])
    }

    pub fn get_adaptive_settings(&self, base: &QueueConfig) -> AdaptiveSettings {
        self.adaptive_settings_at(base, Utc::now())
    }

    /// Combine caller settings with the active profile
    ///
    /// Concurrency and throttle are capped at the profile; delay is raised to it.
    /// A caller throttle of 0 means "unthrottled" and takes the profile's value.
    pub fn adaptive_settings_at(&self, base: &QueueConfig, now: DateTime<Utc>) -> AdaptiveSettings {
        let profile = self.profile_at(now);
        let per_minute_throttle = if base.per_minute_throttle == 0 {
            profile.per_minute_throttle
        } else {
            base.per_minute_throttle.min(profile.per_minute_throttle)
        };
        let settings = AdaptiveSettings {
            max_concurrent: base.max_concurrent.min(profile.max_concurrent).max(1),
            inter_item_delay: base.inter_item_delay.max(profile.delay),
            per_minute_throttle,
            profile_name: profile.name,
        };
        tracing::debug!(
            profile = profile.name,
            max_concurrent = settings.max_concurrent,
            delay_ms = settings.inter_item_delay.as_millis() as u64,
            throttle = settings.per_minute_throttle,
            "Adaptive settings computed"
        );
        settings
    }

    pub fn reset(&self) {
        let mut window = self.lock();
        window.failures.clear();
        window.successes = 0;
        tracing::debug!("Adaptive failure history cleared");
    }
}
