use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use rand::Rng;
use serde::Deserialize;

use crate::clock::Easing;
use crate::effects::{EffectDescriptor, EffectParams};
use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CompositorConfig {
    /// Output surface pool sizing.
    pub pool: PoolConfig,
    /// Stall detection for running transitions.
    pub watchdog: WatchdogConfig,
    /// GPU context probing.
    pub gpu: GpuConfig,
    /// Diagnostics retention.
    pub telemetry: TelemetryConfig,
    /// Transition presets a host may draw descriptors from.
    pub transition: TransitionConfig,
}

impl CompositorConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_yaml::from_str(&s).with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.watchdog.factor.is_finite() && self.watchdog.factor >= 1.0,
            "watchdog.factor must be a finite number >= 1.0"
        );
        ensure!(
            (1..=3).contains(&self.gpu.swap_buffers),
            "gpu.swap-buffers must be between 1 and 3"
        );
        self.transition
            .validate()
            .context("invalid transition configuration")?;
        Ok(self)
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            watchdog: WatchdogConfig::default(),
            gpu: GpuConfig::default(),
            telemetry: TelemetryConfig::default(),
            transition: TransitionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PoolConfig {
    /// Idle bytes kept before the least-recently-released surface is evicted.
    pub byte_budget: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            byte_budget: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WatchdogConfig {
    /// Deadline as a multiple of the declared duration.
    pub factor: f32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { factor: 2.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

impl PowerPreference {
    pub fn to_wgpu(self) -> wgpu::PowerPreference {
        match self {
            Self::LowPower => wgpu::PowerPreference::LowPower,
            Self::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GpuConfig {
    /// When false every display stays on the software tier.
    pub enabled: bool,
    /// Requested swap chain depth.
    pub swap_buffers: u8,
    pub power_preference: PowerPreference,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            swap_buffers: 3,
            power_preference: PowerPreference::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TelemetryConfig {
    /// Completed transitions kept for inspection.
    pub history: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { history: 64 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionSelection {
    /// Always the first preset.
    Fixed,
    #[default]
    Random,
    /// Cycle through presets in declaration order.
    Sequential,
}

/// One configured transition: effect parameters plus timing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransitionPreset {
    #[serde(flatten)]
    pub params: EffectParams,
    #[serde(with = "humantime_serde", default = "TransitionPreset::default_duration")]
    pub duration: Duration,
    #[serde(default)]
    pub easing: Easing,
}

impl TransitionPreset {
    const fn default_duration() -> Duration {
        Duration::from_millis(750)
    }

    pub fn descriptor(&self) -> Result<EffectDescriptor, Error> {
        EffectDescriptor::new(self.params.clone(), self.duration, self.easing)
    }
}

#[derive(Debug, Clone)]
struct SequentialState {
    next_index: Arc<AtomicUsize>,
}

impl Default for SequentialState {
    fn default() -> Self {
        Self {
            next_index: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SequentialState {
    fn next(&self, len: usize) -> usize {
        self.next_index.fetch_add(1, Ordering::Relaxed) % len
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TransitionConfig {
    pub selection: TransitionSelection,
    pub active: Vec<TransitionPreset>,
    #[serde(skip)]
    sequence: SequentialState,
}

impl TransitionConfig {
    pub fn new(selection: TransitionSelection, active: Vec<TransitionPreset>) -> Self {
        Self {
            selection,
            active,
            sequence: SequentialState::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.active.is_empty(),
            "transition configuration must include at least one preset"
        );
        for (index, preset) in self.active.iter().enumerate() {
            preset
                .descriptor()
                .with_context(|| format!("transition preset {index} is invalid"))?;
        }
        Ok(())
    }

    /// Builds the descriptor for the next transition.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEffect`] when there are no presets or the chosen
    /// preset does not describe a valid effect.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<EffectDescriptor, Error> {
        let len = self.active.len();
        if len == 0 {
            return Err(Error::InvalidEffect("no transition presets configured".into()));
        }
        let index = match self.selection {
            TransitionSelection::Fixed => 0,
            TransitionSelection::Random => rng.random_range(0..len),
            TransitionSelection::Sequential => self.sequence.next(len),
        };
        self.active[index].descriptor()
    }
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self::new(
            TransitionSelection::Fixed,
            vec![TransitionPreset {
                params: EffectParams::Crossfade,
                duration: TransitionPreset::default_duration(),
                easing: Easing::InOutQuad,
            }],
        )
    }
}
