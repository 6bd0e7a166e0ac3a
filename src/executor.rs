//! Effect Executor: renders one composited frame per paint tick.
//!
//! The tier actually used is the best one at or below the display's ceiling
//! that the effect supports. A gpu failure during the draw lowers the ceiling
//! and the frame is rendered again with the next tier within the same call, so
//! a caller always receives a fully written frame.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::effects::cpu::{self, Inputs};
use crate::effects::shaders::ShaderProgram;
use crate::effects::EffectKind;
use crate::frame::{DisplayId, Frame};
use crate::gpu::{CapabilityTier, GpuContextManager, GpuDrawOutcome, ShaderPass};
use crate::transition::TransitionRun;

/// Output of one render call. Borrows the run's output surface.
#[derive(Debug, Clone, Copy)]
pub struct RenderedFrame<'a> {
    pub frame: &'a Frame,
    pub tier: CapabilityTier,
}

#[derive(Debug, Default)]
pub struct EffectExecutor {
    fallback_logged: HashSet<(DisplayId, EffectKind)>,
}

impl EffectExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders `run` at `progress` into its output surface.
    ///
    /// Progress is clamped to `[0, 1]`. At `0` the output is a copy of the old
    /// frame, at `1` a copy of the new one, whatever the tier.
    pub fn render<'r>(
        &mut self,
        run: &'r mut TransitionRun,
        progress: f32,
        ceiling: CapabilityTier,
        gpu: &mut GpuContextManager,
    ) -> RenderedFrame<'r> {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        let display_id = run.display;
        let kind = run.descriptor.kind();
        let mut tier = if run.forced_cut {
            CapabilityTier::InstantCut
        } else {
            self.resolve(display_id, kind, ceiling)
        };

        if tier == CapabilityTier::ShaderGPU && progress > 0.0 && progress < 1.0 {
            match ShaderProgram::for_effect(kind) {
                Some(program) => {
                    let pass = ShaderPass {
                        program,
                        params: run.descriptor.params(),
                        old: &run.old,
                        new: &run.new,
                        progress,
                    };
                    match gpu.draw(display_id, &pass, &mut run.output) {
                        GpuDrawOutcome::Drawn => {}
                        GpuDrawOutcome::Downgraded(lowered) => {
                            tier = self.resolve(display_id, kind, lowered);
                        }
                    }
                }
                None => tier = self.resolve(display_id, kind, CapabilityTier::SoftwareComposite),
            }
        }

        if tier == CapabilityTier::SoftwareComposite && progress > 0.0 && progress < 1.0 {
            let inputs = Inputs {
                size: run.new.size(),
                old: run.old.pixels(),
                new: run.new.pixels(),
            };
            let out = run.output.frame_mut().pixels_mut();
            if !cpu::composite(run.descriptor.params(), inputs, progress, out) {
                tier = self.resolve(display_id, kind, CapabilityTier::InstantCut);
            }
        }

        let drawn = match tier {
            CapabilityTier::ShaderGPU | CapabilityTier::SoftwareComposite => {
                progress > 0.0 && progress < 1.0
            }
            CapabilityTier::InstantCut => false,
        };
        if !drawn {
            let source = if progress <= 0.0 && run.old.is_compatible_with(&run.new) {
                &run.old
            } else {
                &run.new
            };
            copy_into(source, run.output.frame_mut());
        }
        run.output
            .frame_mut()
            .set_device_pixel_ratio(run.new.device_pixel_ratio());

        RenderedFrame {
            frame: run.output.frame(),
            tier,
        }
    }

    fn resolve(
        &mut self,
        display_id: DisplayId,
        kind: EffectKind,
        ceiling: CapabilityTier,
    ) -> CapabilityTier {
        let tier = kind.resolve_tier(ceiling);
        if tier < ceiling && self.fallback_logged.insert((display_id, kind)) {
            info!(display = %display_id, effect = %kind, %ceiling, %tier, "effect_tier_fallback");
        }
        tier
    }

    /// Forgets log-once state for a display that went away.
    pub fn forget_display(&mut self, display_id: DisplayId) {
        self.fallback_logged.retain(|(d, _)| *d != display_id);
        debug!(display = %display_id, "executor_display_forgotten");
    }
}

fn copy_into(source: &Frame, target: &mut Frame) {
    let out = target.pixels_mut();
    if out.len() == source.byte_len() {
        out.copy_from_slice(source.pixels());
    } else {
        // Only reachable for a surface keyed on another frame; never leave stale texels.
        out.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::clock::Easing;
    use crate::effects::{Direction, EffectDescriptor, EffectParams};
    use crate::frame::{FrameSize, PixelFormat};
    use crate::pool::{FramePool, SurfaceKey};
    use crate::testkit::{self, DeviceScript, ScriptedDevice};

    const D: DisplayId = DisplayId(3);

    fn run_for(params: EffectParams, pool: &mut FramePool) -> TransitionRun {
        let size = FrameSize::new(16, 9);
        let old = testkit::gradient_frame(size, 1);
        let new = testkit::gradient_frame(size, 2);
        let descriptor =
            EffectDescriptor::new(params, Duration::from_millis(500), Easing::Linear).unwrap();
        let surface = pool.acquire(SurfaceKey::new(size, PixelFormat::Rgba8));
        TransitionRun::new(D, old, new, descriptor, surface, Instant::now(), 2.0)
    }

    fn scripted_gpu(script: &DeviceScript) -> GpuContextManager {
        GpuContextManager::new(&Default::default(), ScriptedDevice::factory(script))
    }

    #[test]
    fn ceiling_is_not_a_mandate() {
        let script = DeviceScript::default();
        let mut gpu = scripted_gpu(&script);
        let mut pool = FramePool::new(1 << 20);
        let mut exec = EffectExecutor::new();
        let mut run = run_for(
            EffectParams::Particle {
                cell_px: 4,
                mode: Default::default(),
                seed: 1,
                direction: Direction::Left,
            },
            &mut pool,
        );
        let ceiling = gpu.current_tier(D);
        assert_eq!(ceiling, CapabilityTier::ShaderGPU);
        let out = exec.render(&mut run, 0.5, ceiling, &mut gpu);
        assert_eq!(out.tier, CapabilityTier::SoftwareComposite);
        assert_eq!(script.draws(), 0);
    }

    #[test]
    fn gpu_draw_is_used_when_supported() {
        let script = DeviceScript::default();
        let mut gpu = scripted_gpu(&script);
        let mut pool = FramePool::new(1 << 20);
        let mut exec = EffectExecutor::new();
        let mut run = run_for(EffectParams::Crossfade, &mut pool);
        let ceiling = gpu.current_tier(D);
        let out = exec.render(&mut run, 0.25, ceiling, &mut gpu);
        assert_eq!(out.tier, CapabilityTier::ShaderGPU);
        assert_eq!(script.draws(), 1);
    }

    #[test]
    fn draw_failure_renders_software_in_same_call() {
        let script = DeviceScript::default();
        let mut gpu = scripted_gpu(&script);
        let mut pool = FramePool::new(1 << 20);
        let mut exec = EffectExecutor::new();
        let mut run = run_for(
            EffectParams::Wipe {
                direction: Direction::Right,
                softness: 0.0,
            },
            &mut pool,
        );
        let ceiling = gpu.current_tier(D);
        script.fail_draws();
        let out = exec.render(&mut run, 0.5, ceiling, &mut gpu);
        assert_eq!(out.tier, CapabilityTier::SoftwareComposite);

        let mut expected = vec![0; out.frame.byte_len()];
        let inputs = Inputs {
            size: run.new.size(),
            old: run.old.pixels(),
            new: run.new.pixels(),
        };
        assert!(cpu::composite(run.descriptor.params(), inputs, 0.5, &mut expected));
        assert_eq!(run.output.frame().pixels(), expected.as_slice());
    }

    #[test]
    fn forced_cut_shows_new_frame_mid_run() {
        let mut gpu = GpuContextManager::software_only();
        let mut pool = FramePool::new(1 << 20);
        let mut exec = EffectExecutor::new();
        let mut run = run_for(EffectParams::Crossfade, &mut pool);
        run.forced_cut = true;
        let expected = run.new.pixels().to_vec();
        let out = exec.render(&mut run, 0.4, CapabilityTier::SoftwareComposite, &mut gpu);
        assert_eq!(out.tier, CapabilityTier::InstantCut);
        assert_eq!(out.frame.pixels(), expected.as_slice());
    }

    #[test]
    fn nan_progress_is_treated_as_start() {
        let mut gpu = GpuContextManager::software_only();
        let mut pool = FramePool::new(1 << 20);
        let mut exec = EffectExecutor::new();
        let mut run = run_for(EffectParams::Crossfade, &mut pool);
        let expected = run.old.pixels().to_vec();
        let out = exec.render(&mut run, f32::NAN, CapabilityTier::SoftwareComposite, &mut gpu);
        assert_eq!(out.frame.pixels(), expected.as_slice());
    }
}
