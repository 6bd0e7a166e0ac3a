//! GPU capability management.
//!
//! [`GpuDevice`] is the seam between the compositor and a concrete graphics
//! backend. [`GpuContextManager`] owns one device per display and turns every
//! backend failure into a [`CapabilityTier`] downgrade; nothing outside this
//! module ever sees a [`GpuError`].

pub mod context;
pub mod wgpu_device;

use std::fmt;

use thiserror::Error;

use crate::effects::EffectParams;
use crate::effects::shaders::{EffectUniforms, ShaderProgram};
use crate::frame::{DisplayId, Frame};
use crate::pool::{DeviceTag, PooledSurface};

pub use context::{ContextState, GpuContextManager, GpuDrawOutcome};
pub use wgpu_device::WgpuDevice;

/// Rendering strategy for an effect on a display, ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityTier {
    InstantCut,
    SoftwareComposite,
    ShaderGPU,
}

impl CapabilityTier {
    pub const ALL: [Self; 3] = [Self::ShaderGPU, Self::SoftwareComposite, Self::InstantCut];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ShaderGPU => "shader-gpu",
            Self::SoftwareComposite => "software-composite",
            Self::InstantCut => "instant-cut",
        }
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Swap chain depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SwapMode {
    Single,
    Double,
    Triple,
}

impl SwapMode {
    pub const fn from_buffers(buffers: u8) -> Self {
        match buffers {
            0 | 1 => Self::Single,
            2 => Self::Double,
            _ => Self::Triple,
        }
    }

    pub const fn buffers(&self) -> u8 {
        match self {
            Self::Single => 1,
            Self::Double => 2,
            Self::Triple => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub display: DisplayId,
    pub requested_swap: SwapMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Human readable adapter name, for logs.
    pub adapter: String,
    pub granted_swap: SwapMode,
}

/// One offscreen shader draw.
#[derive(Debug, Clone, Copy)]
pub struct ShaderPass<'a> {
    pub program: ShaderProgram,
    pub params: &'a EffectParams,
    pub old: &'a Frame,
    pub new: &'a Frame,
    pub progress: f32,
}

impl ShaderPass<'_> {
    pub fn uniforms(&self) -> EffectUniforms {
        EffectUniforms::new(self.params, self.new.size(), self.progress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    #[error("failed to create gpu context: {0}")]
    ContextCreation(String),
    #[error("shader program {program} failed to compile: {message}")]
    ShaderCompile {
        program: &'static str,
        message: String,
    },
    #[error("gpu context lost")]
    ContextLost,
    #[error("draw failed: {0}")]
    Draw(String),
}

/// A graphics backend bound to one display.
///
/// Implementations are used only from the rendering thread.
pub trait GpuDevice {
    /// Identity stamped on every surface this device draws into.
    fn tag(&self) -> DeviceTag;

    /// Creates the context and reports the swap depth the driver actually granted.
    fn probe(&mut self, request: &ProbeRequest) -> Result<ProbeReport, GpuError>;

    /// Compiles and link-checks `program`. Called once per program per context.
    fn compile(&mut self, program: &ShaderProgram) -> Result<(), GpuError>;

    /// Renders `pass` into `target`, overwriting every texel of its frame.
    fn draw(&mut self, pass: &ShaderPass<'_>, target: &mut PooledSurface) -> Result<(), GpuError>;

    /// Whether the context was lost since the last call.
    fn context_lost(&mut self) -> bool;

    /// Releases every backend resource. The device is not used afterwards.
    fn destroy(&mut self);
}

/// Builds the device for a display on first use.
pub type DeviceFactory = Box<dyn FnMut(DisplayId) -> Box<dyn GpuDevice>>;
