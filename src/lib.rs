pub mod clock;
pub mod config;
pub mod effects;
pub mod error;
pub mod executor;
pub mod frame;
pub mod gpu;
pub mod handoff;
pub mod pool;
pub mod telemetry;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod transition;

pub use clock::{AnimationClock, Easing};
pub use config::CompositorConfig;
pub use effects::{Direction, EffectDescriptor, EffectKind, EffectParams, ParticleMode};
pub use error::Error;
pub use frame::{DisplayId, Frame, FrameSize, PixelFormat};
pub use gpu::{CapabilityTier, ContextState, GpuContextManager};
pub use pool::{FramePool, PooledSurface, SurfaceKey};
pub use telemetry::{Telemetry, TelemetrySummary};
pub use transition::{
    CompletionReport, TickReport, TransitionManager, TransitionOutcome, TransitionState,
};
