//! Wall-clock driven animation progress.
//!
//! Progress is elapsed wall time over the declared duration, shaped by an
//! easing curve. It never depends on how often a display paints, so a 165 Hz
//! display and a 60 Hz display started at the same instant agree on progress
//! at every instant they both observe.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    #[default]
    Linear,
    InQuad,
    OutQuad,
    InOutQuad,
    InCubic,
    OutCubic,
    InOutCubic,
    InOutSine,
}

impl Easing {
    pub const ALL: &'static [Self] = &[
        Self::Linear,
        Self::InQuad,
        Self::OutQuad,
        Self::InOutQuad,
        Self::InCubic,
        Self::OutCubic,
        Self::InOutCubic,
        Self::InOutSine,
    ];

    /// Maps linear time in `[0, 1]` to eased progress in `[0, 1]`.
    ///
    /// Every curve is monotone and hits both endpoints exactly.
    pub fn apply(self, t: f32) -> f32 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        if t >= 1.0 {
            return 1.0;
        }
        let eased = match self {
            Self::Linear => t,
            Self::InQuad => t * t,
            Self::OutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Self::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Self::InCubic => t * t * t,
            Self::OutCubic => 1.0 - (1.0 - t).powi(3),
            Self::InOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Self::InOutSine => -((std::f32::consts::PI * t).cos() - 1.0) / 2.0,
        };
        eased.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockState {
    Running,
    Paused,
    Cancelled,
}

/// Progress source for one transition run.
#[derive(Debug, Clone)]
pub struct AnimationClock {
    duration: Duration,
    easing: Easing,
    state: ClockState,
    started_at: Instant,
    segment_start: Instant,
    banked: Duration,
    rate: f32,
}

impl AnimationClock {
    pub fn start(duration: Duration, easing: Easing, now: Instant) -> Self {
        Self {
            duration,
            easing,
            state: ClockState::Running,
            started_at: now,
            segment_start: now,
            banked: Duration::ZERO,
            rate: 1.0,
        }
    }

    /// Eased progress at `now`, clamped to `[0, 1]`.
    ///
    /// Pure in `now`: repeated calls for the same instant agree, and a
    /// cancelled clock always reports `1.0`.
    pub fn tick(&self, now: Instant) -> f32 {
        if self.state == ClockState::Cancelled {
            return 1.0;
        }
        if self.duration.is_zero() {
            return 1.0;
        }
        let linear = self.elapsed(now).as_secs_f64() / self.duration.as_secs_f64();
        if linear >= 1.0 {
            return 1.0;
        }
        self.easing.apply(linear as f32)
    }

    /// Animation time consumed so far, scaled by the playback rate.
    ///
    /// Saturates at `Duration::MAX` for extreme rates.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.state {
            ClockState::Running => {
                let live = now.saturating_duration_since(self.segment_start);
                let scaled = Duration::try_from_secs_f64(live.as_secs_f64() * f64::from(self.rate))
                    .unwrap_or(Duration::MAX);
                self.banked.saturating_add(scaled)
            }
            ClockState::Paused | ClockState::Cancelled => self.banked,
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.state != ClockState::Running {
            return;
        }
        self.banked = self.elapsed(now);
        self.state = ClockState::Paused;
    }

    pub fn resume(&mut self, now: Instant) {
        if self.state != ClockState::Paused {
            return;
        }
        self.segment_start = now;
        self.state = ClockState::Running;
    }

    pub fn cancel(&mut self) {
        self.state = ClockState::Cancelled;
    }

    /// Changes playback speed from `now` on. Time already elapsed is kept.
    pub fn set_rate(&mut self, rate: f32, now: Instant) {
        if !rate.is_finite() || rate <= 0.0 {
            debug!(rate, "clock_rate_rejected");
            return;
        }
        if self.state == ClockState::Running {
            self.banked = self.elapsed(now);
            self.segment_start = now;
        }
        self.rate = rate;
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn easing(&self) -> Easing {
        self.easing
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn is_paused(&self) -> bool {
        self.state == ClockState::Paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == ClockState::Cancelled
    }
}
