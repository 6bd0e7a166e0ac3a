//! Effect descriptors and the per-effect capability table.
//!
//! Effect kinds form a closed set. Each kind declares which rendering tiers it
//! can serve; the executor resolves the tier once per render from this table
//! instead of dispatching through trait objects on the per-frame path.

pub mod cpu;
pub mod shaders;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::clock::Easing;
use crate::error::Error;
use crate::gpu::CapabilityTier;

/// Direction the incoming content (or the reveal edge) travels across the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    #[default]
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }

    /// Unit vector in image space (y grows downwards).
    pub const fn vector(self) -> [f32; 2] {
        match self {
            Self::Left => [-1.0, 0.0],
            Self::Right => [1.0, 0.0],
            Self::Up => [0.0, -1.0],
            Self::Down => [0.0, 1.0],
        }
    }

    /// Position of normalized point `(u, v)` along the travel path, in `[0, 1]`.
    ///
    /// The leading edge starts at `0.0`.
    pub fn order_along(self, u: f32, v: f32) -> f32 {
        let raw = match self {
            Self::Right => u,
            Self::Left => 1.0 - u,
            Self::Down => v,
            Self::Up => 1.0 - v,
        };
        raw.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticleMode {
    /// Cells break away in a random order.
    #[default]
    Dissolve,
    /// Cells break away in a wave travelling along the effect direction.
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectKind {
    Crossfade,
    Wipe,
    Slide,
    Diffuse,
    BlockFlip,
    Blinds,
    Particle,
    CardFlip,
}

/// Tiers an effect can be rendered with, beyond the universal instant cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectCapabilities {
    pub shader_gpu: bool,
    /// `false` means the software tier degrades straight to an instant cut.
    pub software_composite: bool,
}

impl EffectKind {
    pub const ALL: &'static [Self] = &[
        Self::Crossfade,
        Self::Wipe,
        Self::Slide,
        Self::Diffuse,
        Self::BlockFlip,
        Self::Blinds,
        Self::Particle,
        Self::CardFlip,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Crossfade => "crossfade",
            Self::Wipe => "wipe",
            Self::Slide => "slide",
            Self::Diffuse => "diffuse",
            Self::BlockFlip => "block-flip",
            Self::Blinds => "blinds",
            Self::Particle => "particle",
            Self::CardFlip => "card-flip",
        }
    }

    pub const fn capabilities(&self) -> EffectCapabilities {
        match self {
            Self::Crossfade
            | Self::Wipe
            | Self::Slide
            | Self::Diffuse
            | Self::BlockFlip
            | Self::Blinds => EffectCapabilities {
                shader_gpu: true,
                software_composite: true,
            },
            Self::Particle => EffectCapabilities {
                shader_gpu: false,
                software_composite: true,
            },
            // A perspective card flip has no sane CPU rendition.
            Self::CardFlip => EffectCapabilities {
                shader_gpu: true,
                software_composite: false,
            },
        }
    }

    pub const fn supports(&self, tier: CapabilityTier) -> bool {
        let caps = self.capabilities();
        match tier {
            CapabilityTier::ShaderGPU => caps.shader_gpu,
            CapabilityTier::SoftwareComposite => caps.software_composite,
            CapabilityTier::InstantCut => true,
        }
    }

    /// Best tier at or below `ceiling` that this effect supports.
    pub const fn resolve_tier(&self, ceiling: CapabilityTier) -> CapabilityTier {
        let caps = self.capabilities();
        match ceiling {
            CapabilityTier::ShaderGPU if caps.shader_gpu => CapabilityTier::ShaderGPU,
            CapabilityTier::ShaderGPU | CapabilityTier::SoftwareComposite
                if caps.software_composite =>
            {
                CapabilityTier::SoftwareComposite
            }
            _ => CapabilityTier::InstantCut,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effect kind plus its effect-specific parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum EffectParams {
    Crossfade,
    Wipe {
        #[serde(default)]
        direction: Direction,
        /// Width of the blended edge as a fraction of the travel axis.
        #[serde(default = "EffectParams::default_softness")]
        softness: f32,
    },
    Slide {
        #[serde(default)]
        direction: Direction,
    },
    Diffuse {
        #[serde(default = "EffectParams::default_block_px")]
        block_px: u32,
        #[serde(default)]
        seed: u32,
    },
    BlockFlip {
        #[serde(default = "EffectParams::default_columns")]
        columns: u32,
        #[serde(default = "EffectParams::default_rows")]
        rows: u32,
        #[serde(default)]
        direction: Direction,
    },
    Blinds {
        #[serde(default = "EffectParams::default_slats")]
        slats: u32,
        #[serde(default)]
        direction: Direction,
    },
    Particle {
        #[serde(default = "EffectParams::default_cell_px")]
        cell_px: u32,
        #[serde(default)]
        mode: ParticleMode,
        #[serde(default)]
        seed: u32,
        #[serde(default)]
        direction: Direction,
    },
    CardFlip {
        #[serde(default)]
        direction: Direction,
    },
}

impl EffectParams {
    const MAX_GRID: u32 = 256;

    const fn default_softness() -> f32 {
        0.05
    }

    const fn default_block_px() -> u32 {
        16
    }

    const fn default_columns() -> u32 {
        8
    }

    const fn default_rows() -> u32 {
        6
    }

    const fn default_slats() -> u32 {
        12
    }

    const fn default_cell_px() -> u32 {
        24
    }

    pub const fn kind(&self) -> EffectKind {
        match self {
            Self::Crossfade => EffectKind::Crossfade,
            Self::Wipe { .. } => EffectKind::Wipe,
            Self::Slide { .. } => EffectKind::Slide,
            Self::Diffuse { .. } => EffectKind::Diffuse,
            Self::BlockFlip { .. } => EffectKind::BlockFlip,
            Self::Blinds { .. } => EffectKind::Blinds,
            Self::Particle { .. } => EffectKind::Particle,
            Self::CardFlip { .. } => EffectKind::CardFlip,
        }
    }

    pub const fn direction(&self) -> Option<Direction> {
        match self {
            Self::Crossfade | Self::Diffuse { .. } => None,
            Self::Wipe { direction, .. }
            | Self::Slide { direction }
            | Self::BlockFlip { direction, .. }
            | Self::Blinds { direction, .. }
            | Self::Particle { direction, .. }
            | Self::CardFlip { direction } => Some(*direction),
        }
    }

    fn normalized(mut self) -> Result<Self, Error> {
        let kind = self.kind();
        let grid = |value: &mut u32, name: &str| -> Result<(), Error> {
            if *value == 0 {
                return Err(Error::InvalidEffect(format!("{kind} requires {name} > 0")));
            }
            *value = (*value).min(Self::MAX_GRID);
            Ok(())
        };
        match &mut self {
            Self::Crossfade | Self::Slide { .. } | Self::CardFlip { .. } => {}
            Self::Wipe { softness, .. } => {
                if !softness.is_finite() {
                    return Err(Error::InvalidEffect(format!(
                        "{kind} has non-finite softness"
                    )));
                }
                *softness = softness.clamp(0.0, 0.5);
            }
            Self::Diffuse { block_px, .. } => {
                if *block_px == 0 {
                    return Err(Error::InvalidEffect(format!("{kind} requires block-px > 0")));
                }
            }
            Self::BlockFlip { columns, rows, .. } => {
                grid(columns, "columns")?;
                grid(rows, "rows")?;
            }
            Self::Blinds { slats, .. } => grid(slats, "slats")?,
            Self::Particle { cell_px, .. } => {
                if *cell_px == 0 {
                    return Err(Error::InvalidEffect(format!("{kind} requires cell-px > 0")));
                }
            }
        }
        Ok(self)
    }
}

/// Immutable description of one transition, built once per request.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectDescriptor {
    params: EffectParams,
    duration: Duration,
    easing: Easing,
}

impl EffectDescriptor {
    /// Validates and clamps `params` into a descriptor.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEffect`] for a zero duration, a zero grid or
    /// block size, or non-finite parameters.
    pub fn new(params: EffectParams, duration: Duration, easing: Easing) -> Result<Self, Error> {
        if duration.is_zero() {
            return Err(Error::InvalidEffect(format!(
                "{} requires a non-zero duration",
                params.kind()
            )));
        }
        Ok(Self {
            params: params.normalized()?,
            duration,
            easing,
        })
    }

    /// Linear crossfade, the effect every tier can render.
    pub fn crossfade(duration: Duration) -> Self {
        Self {
            params: EffectParams::Crossfade,
            duration: duration.max(Duration::from_millis(1)),
            easing: Easing::Linear,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.params.kind()
    }

    pub fn params(&self) -> &EffectParams {
        &self.params
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn easing(&self) -> Easing {
        self.easing
    }
}
