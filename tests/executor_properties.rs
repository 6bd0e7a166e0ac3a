use std::time::{Duration, Instant};

use photo_frame_compositor::effects::cpu::{self, Inputs};
use photo_frame_compositor::executor::EffectExecutor;
use photo_frame_compositor::testkit::{self, DeviceScript, ScriptedDevice};
use photo_frame_compositor::transition::TransitionRun;
use photo_frame_compositor::{
    CapabilityTier, Direction, DisplayId, Easing, EffectDescriptor, EffectKind, EffectParams,
    FramePool, FrameSize, GpuContextManager, ParticleMode, PixelFormat, SurfaceKey,
};

const D: DisplayId = DisplayId(1);

fn catalogue() -> Vec<EffectParams> {
    let mut all = vec![
        EffectParams::Crossfade,
        EffectParams::Diffuse {
            block_px: 3,
            seed: 11,
        },
    ];
    for direction in [Direction::Left, Direction::Right, Direction::Up, Direction::Down] {
        all.extend([
            EffectParams::Wipe {
                direction,
                softness: 0.1,
            },
            EffectParams::Slide { direction },
            EffectParams::BlockFlip {
                columns: 5,
                rows: 3,
                direction,
            },
            EffectParams::Blinds {
                slats: 4,
                direction,
            },
            EffectParams::Particle {
                cell_px: 4,
                mode: ParticleMode::Sweep,
                seed: 5,
                direction,
            },
            EffectParams::CardFlip { direction },
        ]);
    }
    all.push(EffectParams::Particle {
        cell_px: 2,
        mode: ParticleMode::Dissolve,
        seed: 9,
        direction: Direction::Left,
    });
    all
}

fn run_for(params: EffectParams, pool: &mut FramePool) -> TransitionRun {
    let size = FrameSize::new(21, 13);
    let descriptor = EffectDescriptor::new(params, Duration::from_millis(400), Easing::Linear)
        .unwrap();
    TransitionRun::new(
        D,
        testkit::gradient_frame(size, 5),
        testkit::gradient_frame(size, 6),
        descriptor,
        pool.acquire(SurfaceKey::new(size, PixelFormat::Rgba8)),
        Instant::now(),
        2.0,
    )
}

#[test]
fn endpoints_match_the_source_frames_on_every_tier() {
    let script = DeviceScript::default();
    let mut gpu = GpuContextManager::new(&Default::default(), ScriptedDevice::factory(&script));
    let mut pool = FramePool::new(1 << 20);
    let mut exec = EffectExecutor::new();

    for params in catalogue() {
        for ceiling in CapabilityTier::ALL {
            // The run leases a surface holding stale content.
            run_stale(&mut pool);
            let mut run = run_for(params.clone(), &mut pool);
            let old = run.old().pixels().to_vec();
            let new = run.new_frame().pixels().to_vec();

            let start = exec.render(&mut run, 0.0, ceiling, &mut gpu);
            assert_eq!(start.frame.pixels(), old.as_slice(), "{params:?} {ceiling}");
            let end = exec.render(&mut run, 1.0, ceiling, &mut gpu);
            assert_eq!(end.frame.pixels(), new.as_slice(), "{params:?} {ceiling}");
        }
    }
    assert_eq!(script.draws(), 0);
}

fn run_stale(pool: &mut FramePool) {
    let mut surface = pool.acquire(SurfaceKey::new(FrameSize::new(21, 13), PixelFormat::Rgba8));
    surface.frame_mut().pixels_mut().fill(0xAB);
    pool.release(surface);
}

/// Pixels of `frame` differing from `reference` by more than a rounding step.
fn distant_pixels(frame: &[u8], reference: &[u8]) -> usize {
    frame
        .chunks_exact(4)
        .zip(reference.chunks_exact(4))
        .filter(|(a, b)| a.iter().zip(b.iter()).any(|(x, y)| x.abs_diff(*y) > 8))
        .count()
}

#[test]
fn frames_next_to_the_endpoints_stay_close_to_the_sources() {
    let mut gpu = GpuContextManager::software_only();
    let mut pool = FramePool::new(1 << 20);
    let mut exec = EffectExecutor::new();

    for params in catalogue() {
        let mut run = run_for(params.clone(), &mut pool);
        let old = run.old().pixels().to_vec();
        let new = run.new_frame().pixels().to_vec();
        let budget = old.len() / 4 / 20;

        let start = exec.render(&mut run, 0.001, CapabilityTier::SoftwareComposite, &mut gpu);
        if start.tier == CapabilityTier::InstantCut {
            continue;
        }
        let jump = distant_pixels(start.frame.pixels(), &old);
        assert!(jump <= budget, "{params:?} moved {jump} pixels at 0.001");

        let end = exec.render(&mut run, 0.999, CapabilityTier::SoftwareComposite, &mut gpu);
        let pop = distant_pixels(end.frame.pixels(), &new);
        assert!(pop <= budget, "{params:?} left {pop} pixels at 0.999");
    }
}

#[test]
fn rendering_is_deterministic() {
    let mut gpu = GpuContextManager::software_only();
    let mut pool = FramePool::new(1 << 20);
    let mut exec = EffectExecutor::new();

    for params in catalogue() {
        let mut first = run_for(params.clone(), &mut pool);
        let mut second = run_for(params.clone(), &mut pool);
        for progress in [0.13, 0.5, 0.87] {
            let a = exec
                .render(&mut first, progress, CapabilityTier::SoftwareComposite, &mut gpu)
                .frame
                .pixels()
                .to_vec();
            let b = exec
                .render(&mut second, progress, CapabilityTier::SoftwareComposite, &mut gpu)
                .frame
                .pixels()
                .to_vec();
            assert_eq!(a, b, "{params:?} at {progress}");
        }
    }
}

#[test]
fn ceiling_limits_tier_and_effects_without_shaders_use_software() {
    let script = DeviceScript::default();
    let mut gpu = GpuContextManager::new(&Default::default(), ScriptedDevice::factory(&script));
    let mut pool = FramePool::new(1 << 20);
    let mut exec = EffectExecutor::new();
    assert_eq!(gpu.current_tier(D), CapabilityTier::ShaderGPU);

    for params in catalogue() {
        let kind = params.kind();
        let mut run = run_for(params, &mut pool);
        let tier = exec.render(&mut run, 0.5, CapabilityTier::ShaderGPU, &mut gpu).tier;
        let expected = match kind {
            EffectKind::Particle => CapabilityTier::SoftwareComposite,
            _ => CapabilityTier::ShaderGPU,
        };
        assert_eq!(tier, expected, "{kind}");

        let capped = exec
            .render(&mut run, 0.5, CapabilityTier::SoftwareComposite, &mut gpu)
            .tier;
        let expected = match kind {
            EffectKind::CardFlip => CapabilityTier::InstantCut,
            _ => CapabilityTier::SoftwareComposite,
        };
        assert_eq!(capped, expected, "{kind}");
    }
}

#[test]
fn software_tier_matches_cpu_compositor() {
    let mut gpu = GpuContextManager::software_only();
    let mut pool = FramePool::new(1 << 20);
    let mut exec = EffectExecutor::new();
    let params = EffectParams::BlockFlip {
        columns: 4,
        rows: 2,
        direction: Direction::Down,
    };
    let mut run = run_for(params.clone(), &mut pool);
    let size = run.new_frame().size();
    let mut expected = vec![0; run.new_frame().byte_len()];
    let inputs = Inputs {
        size,
        old: run.old().pixels(),
        new: run.new_frame().pixels(),
    };
    assert!(cpu::composite(&params, inputs, 0.42, &mut expected));

    let out = exec.render(&mut run, 0.42, CapabilityTier::SoftwareComposite, &mut gpu);
    assert_eq!(out.frame.pixels(), expected.as_slice());
}

#[test]
fn output_inherits_the_new_frame_pixel_ratio() {
    let mut gpu = GpuContextManager::software_only();
    let mut pool = FramePool::new(1 << 20);
    let mut exec = EffectExecutor::new();
    let size = FrameSize::new(2, 2);
    let old = testkit::grey_frame(size, 10);
    let new = photo_frame_compositor::Frame::new(
        size,
        2.0,
        PixelFormat::Rgba8,
        vec![200; size.pixel_count() * 4],
    )
    .unwrap();
    let mut run = TransitionRun::new(
        D,
        old,
        new,
        EffectDescriptor::crossfade(Duration::from_millis(100)),
        pool.acquire(SurfaceKey::new(size, PixelFormat::Rgba8)),
        Instant::now(),
        2.0,
    );
    let out = exec.render(&mut run, 0.5, CapabilityTier::SoftwareComposite, &mut gpu);
    assert_eq!(out.frame.device_pixel_ratio(), 2.0);
}
