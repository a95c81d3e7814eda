//! Adaptive recognition cadence
//!
//! Hysteretic multiplicative controller: when the trailing mean recognition
//! latency exceeds the target the dispatch interval grows by 1.2x; when it
//! falls below half the target the interval shrinks by 0.9x. The interval
//! always stays within `[floor, ceiling]`.

use std::collections::VecDeque;
use std::time::Duration;
use stinger_common::config::RuntimeSettings;

/// Number of latency samples in the trailing window
pub const LATENCY_WINDOW: usize = 10;

// Growth 1.2x and shrink 0.9x, as exact integer ratios
const GROWTH: (u32, u32) = (6, 5);
const SHRINK: (u32, u32) = (9, 10);

/// Controller bounds and mode, usually derived from [`RuntimeSettings`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadenceConfig {
    pub base: Duration,
    pub floor: Duration,
    pub ceiling: Duration,
    pub target_latency: Duration,
    pub adaptive: bool,
}

impl CadenceConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            base: settings.recognition_interval(),
            floor: settings.min_recognition_interval(),
            ceiling: settings.max_recognition_interval(),
            target_latency: settings.target_process_time(),
            adaptive: settings.low_power_mode,
        }
    }
}

/// Recognition dispatch interval controller
#[derive(Debug, Clone)]
pub struct CadenceController {
    interval: Duration,
    config: CadenceConfig,
    samples: VecDeque<Duration>,
}

impl CadenceController {
    pub fn new(config: CadenceConfig) -> Self {
        let config = normalized(config);
        Self {
            interval: clamp(config.base, &config),
            config,
            samples: VecDeque::with_capacity(LATENCY_WINDOW + 1),
        }
    }

    /// Current interval between recognition dispatches
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    pub fn is_adaptive(&self) -> bool {
        self.config.adaptive
    }

    /// Mean of the trailing latency window, if any samples were recorded
    pub fn mean_latency(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    /// Feed one completed recognition's processing time
    pub fn observe(&mut self, latency: Duration) -> Duration {
        self.samples.push_back(latency);
        while self.samples.len() > LATENCY_WINDOW {
            self.samples.pop_front();
        }

        if !self.config.adaptive {
            self.interval = clamp(self.config.base, &self.config);
            return self.interval;
        }

        let Some(mean) = self.mean_latency() else {
            return self.interval;
        };
        let target = self.config.target_latency;

        if mean > target {
            self.interval = (self.interval * GROWTH.0 / GROWTH.1).min(self.config.ceiling);
        } else if mean * 2 < target {
            self.interval = (self.interval * SHRINK.0 / SHRINK.1).max(self.config.floor);
        }

        self.interval
    }

    /// Install refreshed settings
    ///
    /// Bounds, target and mode always update. The accumulated interval is
    /// reset to the base only when adaptive mode is off; in adaptive mode it
    /// is kept (clamped to the new bounds) even if the base changed.
    pub fn apply_config(&mut self, config: CadenceConfig) {
        self.config = normalized(config);
        self.interval = if self.config.adaptive {
            clamp(self.interval, &self.config)
        } else {
            clamp(self.config.base, &self.config)
        };
    }
}

fn normalized(mut config: CadenceConfig) -> CadenceConfig {
    if config.floor > config.ceiling {
        std::mem::swap(&mut config.floor, &mut config.ceiling);
    }
    config
}

fn clamp(interval: Duration, config: &CadenceConfig) -> Duration {
    interval.clamp(config.floor, config.ceiling)
}
