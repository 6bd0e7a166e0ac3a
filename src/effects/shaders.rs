//! WGSL programs for the `ShaderGPU` tier.

use bytemuck::{Pod, Zeroable};

use crate::frame::FrameSize;

use super::{EffectKind, EffectParams};

/// All effect programs share one module and one vertex stage.
pub const TRANSITIONS_WGSL: &str = include_str!("transitions.wgsl");
pub const VERTEX_ENTRY: &str = "vs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderProgram {
    pub name: &'static str,
    pub fragment_entry: &'static str,
}

impl ShaderProgram {
    /// Compiled during capability probing. Other programs compile on first use.
    pub const BASELINE: Self = Self {
        name: "crossfade",
        fragment_entry: "fs_crossfade",
    };

    /// Program rendering `kind`, or `None` when the effect has no shader path.
    pub const fn for_effect(kind: EffectKind) -> Option<Self> {
        let (name, fragment_entry) = match kind {
            EffectKind::Crossfade => return Some(Self::BASELINE),
            EffectKind::Wipe => ("wipe", "fs_wipe"),
            EffectKind::Slide => ("slide", "fs_slide"),
            EffectKind::Diffuse => ("diffuse", "fs_diffuse"),
            EffectKind::BlockFlip => ("block-flip", "fs_block_flip"),
            EffectKind::Blinds => ("blinds", "fs_blinds"),
            EffectKind::CardFlip => ("card-flip", "fs_card_flip"),
            EffectKind::Particle => return None,
        };
        Some(Self {
            name,
            fragment_entry,
        })
    }

    pub const fn source(&self) -> &'static str {
        TRANSITIONS_WGSL
    }
}

/// Uniform block matching `Params` in `transitions.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EffectUniforms {
    pub size: [f32; 2],
    pub progress: f32,
    pub softness: f32,
    pub direction: [f32; 2],
    /// Grid cells for block effects, or the block size in pixels for diffuse.
    pub grid: [f32; 2],
    pub seed: u32,
    _pad: [u32; 3],
}

impl EffectUniforms {
    pub fn new(params: &EffectParams, size: FrameSize, progress: f32) -> Self {
        let mut uniforms = Self {
            size: [size.width as f32, size.height as f32],
            progress: progress.clamp(0.0, 1.0),
            softness: 0.0,
            direction: params.direction().unwrap_or_default().vector(),
            grid: [1.0, 1.0],
            seed: 0,
            _pad: [0; 3],
        };
        match *params {
            EffectParams::Wipe { softness, .. } => uniforms.softness = softness,
            EffectParams::Diffuse { block_px, seed } => {
                uniforms.grid = [block_px as f32, block_px as f32];
                uniforms.seed = seed;
            }
            EffectParams::BlockFlip { columns, rows, .. } => {
                uniforms.grid = [columns as f32, rows as f32];
            }
            EffectParams::Blinds { slats, .. } => uniforms.grid = [slats as f32, 1.0],
            EffectParams::Crossfade
            | EffectParams::Slide { .. }
            | EffectParams::Particle { .. }
            | EffectParams::CardFlip { .. } => {}
        }
        uniforms
    }
}
