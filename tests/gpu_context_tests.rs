use std::time::{Duration, Instant};

use photo_frame_compositor::config::{CompositorConfig, GpuConfig};
use photo_frame_compositor::effects::shaders::ShaderProgram;
use photo_frame_compositor::gpu::SwapMode;
use photo_frame_compositor::handoff::frame_channel;
use photo_frame_compositor::testkit::{self, DeviceScript, ScriptedDevice};
use photo_frame_compositor::{
    CapabilityTier, ContextState, Direction, DisplayId, Easing, EffectDescriptor, EffectKind,
    EffectParams, FrameSize, GpuContextManager, TickReport, TransitionManager,
};

const D: DisplayId = DisplayId(2);

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn scripted(script: &DeviceScript, config: &CompositorConfig) -> TransitionManager {
    let gpu = GpuContextManager::new(&config.gpu, ScriptedDevice::factory(script));
    TransitionManager::new(config, gpu)
}

fn wipe() -> EffectDescriptor {
    EffectDescriptor::new(
        EffectParams::Wipe {
            direction: Direction::Right,
            softness: 0.0,
        },
        ms(400),
        Easing::Linear,
    )
    .unwrap()
}

#[test]
fn swap_downgrade_is_recorded_once_per_display() {
    let script = DeviceScript::default().granting(SwapMode::Double);
    let mut manager = scripted(&script, &CompositorConfig::default());

    assert_eq!(manager.current_tier(D), CapabilityTier::ShaderGPU);
    assert_eq!(manager.current_tier(D), CapabilityTier::ShaderGPU);
    assert_eq!(manager.gpu().state(D), ContextState::Degraded);
    assert_eq!(manager.gpu().granted_swap(D), Some(SwapMode::Double));
    assert_eq!(manager.current_tier(DisplayId(7)), CapabilityTier::ShaderGPU);

    let downgrades = manager.telemetry().swap_downgrades();
    assert_eq!(downgrades.len(), 2);
    assert_eq!(downgrades[0].requested, SwapMode::Triple);
    assert_eq!(downgrades[0].granted, SwapMode::Double);
    assert_eq!(manager.telemetry().gpu_failures(), 0);
}

#[test]
fn double_buffering_requested_and_granted_is_ready() {
    let script = DeviceScript::default();
    let config = CompositorConfig {
        gpu: GpuConfig {
            swap_buffers: 2,
            ..GpuConfig::default()
        },
        ..CompositorConfig::default()
    };
    let mut manager = scripted(&script, &config);
    manager.current_tier(D);
    assert_eq!(manager.gpu().state(D), ContextState::Ready);
    assert!(manager.telemetry().swap_downgrades().is_empty());
}

#[test]
fn effect_link_failure_moves_display_to_software_for_good() {
    let script = DeviceScript::default().failing_program("wipe");
    let mut manager = scripted(&script, &CompositorConfig::default());
    let size = FrameSize::new(16, 8);
    let t0 = Instant::now();
    assert!(manager.request_transition(
        D,
        testkit::gradient_frame(size, 1),
        testkit::gradient_frame(size, 2),
        wipe(),
        t0,
    ));

    assert!(matches!(
        manager.paint_tick(D, t0 + ms(100)),
        TickReport::Rendered {
            tier: CapabilityTier::SoftwareComposite,
            ..
        }
    ));
    assert_eq!(manager.gpu().state(D), ContextState::SoftwareFallback);
    assert_eq!(manager.telemetry().gpu_failures(), 1);
    assert_eq!(script.draws(), 0);

    // The baseline program still compiles, but the display never goes back.
    for step in 2..=4 {
        manager.paint_tick(D, t0 + ms(step * 100));
    }
    assert_eq!(manager.current_tier(D), CapabilityTier::SoftwareComposite);
    assert_eq!(script.probes(), 1);
}

#[test]
fn host_reported_context_loss_falls_back() {
    let script = DeviceScript::default();
    let mut manager = scripted(&script, &CompositorConfig::default());
    assert_eq!(manager.current_tier(D), CapabilityTier::ShaderGPU);
    manager.notify_context_lost(D);
    assert_eq!(manager.current_tier(D), CapabilityTier::SoftwareComposite);
    assert_eq!(manager.telemetry().gpu_failures(), 1);
    assert_eq!(script.destroyed(), 1);
}

#[test]
fn failed_probe_still_renders_in_software() {
    let script = DeviceScript::default().failing_probe();
    let mut manager = scripted(&script, &CompositorConfig::default());
    let size = FrameSize::new(8, 8);
    let t0 = Instant::now();
    assert!(manager.request_transition(
        D,
        testkit::grey_frame(size, 0),
        testkit::grey_frame(size, 200),
        EffectDescriptor::crossfade(ms(100)),
        t0,
    ));
    assert_eq!(
        manager.paint_tick(D, t0 + ms(50)),
        TickReport::Rendered {
            progress: 0.5,
            tier: CapabilityTier::SoftwareComposite,
        }
    );
    let out = manager.current_output_surface(D).unwrap();
    assert_eq!(&out.pixels()[..4], &[100, 100, 100, 255]);
}

fn crossfade_on(manager: &mut TransitionManager, display: DisplayId, t0: Instant) {
    let size = FrameSize::new(16, 8);
    assert!(manager.request_transition(
        display,
        testkit::gradient_frame(size, 1),
        testkit::gradient_frame(size, 2),
        EffectDescriptor::crossfade(ms(100)),
        t0,
    ));
}

#[test]
fn surface_reused_by_another_display_stays_on_the_gpu() {
    let script = DeviceScript::default();
    let mut manager = scripted(&script, &CompositorConfig::default());
    let first = DisplayId(10);
    let second = DisplayId(11);
    let t0 = Instant::now();

    crossfade_on(&mut manager, first, t0);
    assert_eq!(
        manager.paint_tick(first, t0 + ms(50)),
        TickReport::Rendered {
            progress: 0.5,
            tier: CapabilityTier::ShaderGPU,
        }
    );
    assert!(matches!(
        manager.paint_tick(first, t0 + ms(100)),
        TickReport::Finished { .. }
    ));
    let first_device = manager.gpu().device_tag(first).unwrap();
    assert_eq!(manager.pool().idle_bound_to(first_device), 1);

    // The second display leases the surface the first one drew into.
    crossfade_on(&mut manager, second, t0 + ms(200));
    assert_eq!(manager.pool().stats().hits, 1);
    assert_eq!(
        manager.paint_tick(second, t0 + ms(250)),
        TickReport::Rendered {
            progress: 0.5,
            tier: CapabilityTier::ShaderGPU,
        }
    );
    let second_device = manager.gpu().device_tag(second).unwrap();
    assert_ne!(first_device, second_device);
    assert_eq!(
        manager.run(second).unwrap().output().gpu_owner(),
        Some(second_device)
    );

    for display in [first, second] {
        assert_eq!(manager.gpu().state(display), ContextState::Ready);
    }
    assert_eq!(manager.telemetry().gpu_failures(), 0);
    assert_eq!(script.draws(), 2);
}

#[test]
fn torn_down_device_leaves_no_bound_surfaces() {
    let script = DeviceScript::default();
    let mut manager = scripted(&script, &CompositorConfig::default());
    let t0 = Instant::now();
    crossfade_on(&mut manager, D, t0);
    manager.paint_tick(D, t0 + ms(50));
    let device = manager.gpu().device_tag(D).unwrap();

    // Removal retires the run, releasing its surface, then destroys the device.
    assert!(manager.remove_display(D, t0 + ms(60)));
    assert_eq!(manager.pool().idle_count(), 1);
    assert_eq!(manager.pool().idle_bound_to(device), 0);

    // Context loss behaves the same for surfaces already back in the pool.
    let other = DisplayId(3);
    crossfade_on(&mut manager, other, t0 + ms(100));
    manager.paint_tick(other, t0 + ms(150));
    manager.paint_tick(other, t0 + ms(200));
    let lost = manager.gpu().device_tag(other).unwrap();
    assert_eq!(manager.pool().idle_bound_to(lost), 1);
    manager.notify_context_lost(other);
    assert_eq!(manager.pool().idle_bound_to(lost), 0);
}

#[test]
fn baseline_program_is_the_crossfade() {
    assert_eq!(
        ShaderProgram::for_effect(EffectKind::Crossfade),
        Some(ShaderProgram::BASELINE)
    );
    assert!(ShaderProgram::for_effect(EffectKind::Particle).is_none());
}

#[test]
fn frames_decoded_on_workers_feed_the_render_thread() {
    let (sender, inbox) = frame_channel(4);
    let size = FrameSize::new(12, 12);
    let workers: Vec<_> = (0..2u32)
        .map(|seed| {
            let sender = sender.clone();
            std::thread::spawn(move || {
                sender
                    .send(DisplayId(seed), testkit::gradient_frame(size, seed))
                    .unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut manager = TransitionManager::new(
        &CompositorConfig::default(),
        GpuContextManager::software_only(),
    );
    let t0 = Instant::now();
    for delivery in inbox.drain() {
        let old = testkit::grey_frame(size, 0);
        assert!(manager.request_transition(
            delivery.display,
            old,
            delivery.frame,
            EffectDescriptor::crossfade(ms(100)),
            t0,
        ));
    }
    for display in [DisplayId(0), DisplayId(1)] {
        assert!(matches!(
            manager.paint_tick(display, t0 + ms(100)),
            TickReport::Finished { .. }
        ));
    }
    assert_eq!(manager.telemetry().summary().completed, 2);
}
