//! Transition State Manager.
//!
//! Each display owns at most one [`TransitionRun`]. The manager drives the
//! run's clock, invokes the executor once per paint tick, and retires the run
//! when it completes, stalls, or is cancelled:
//!
//! ```text
//! Idle -> Running -> Finishing -> Idle
//!         Running -> Cancelled -> Idle
//! ```
//!
//! Everything here runs on the rendering thread; the manager is `!Send`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::clock::AnimationClock;
use crate::config::CompositorConfig;
use crate::effects::{EffectDescriptor, EffectKind};
use crate::executor::EffectExecutor;
use crate::frame::{DisplayId, Frame};
use crate::gpu::{CapabilityTier, GpuContextManager};
use crate::pool::{FramePool, PooledSurface, SurfaceKey};
use crate::telemetry::{Telemetry, TierCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionState {
    Idle,
    Running,
    /// Progress reached 1.0 (or the watchdog fired); one final pass is pending.
    Finishing,
    /// Stopped by the host; the next paint shows the new frame and retires.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionOutcome {
    Completed,
    /// Force-finished by the watchdog.
    Stalled,
    Cancelled,
}

/// Summary handed to the completion callback and kept by telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub display: DisplayId,
    pub effect: EffectKind,
    pub outcome: TransitionOutcome,
    pub declared: Duration,
    pub elapsed: Duration,
    pub frames_rendered: u32,
    pub tiers: TierCounts,
    pub final_tier: CapabilityTier,
}

pub type CompletionCallback = Box<dyn FnOnce(&CompletionReport)>;

/// What a paint tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickReport {
    UnknownDisplay,
    Idle,
    Rendered {
        progress: f32,
        tier: CapabilityTier,
    },
    /// The final pass ran and the run was retired.
    Finished {
        outcome: TransitionOutcome,
        tier: CapabilityTier,
    },
}

/// Mutable state of one display's active transition.
pub struct TransitionRun {
    pub(crate) display: DisplayId,
    pub(crate) old: Frame,
    pub(crate) new: Frame,
    pub(crate) descriptor: EffectDescriptor,
    pub(crate) output: PooledSurface,
    /// Inputs cannot be blended; every render is an instant cut.
    pub(crate) forced_cut: bool,
    clock: AnimationClock,
    state: TransitionState,
    progress: f32,
    deadline: Instant,
    stalled: bool,
    frames_rendered: u32,
    tiers: TierCounts,
    last_tier: Option<CapabilityTier>,
    on_complete: Option<CompletionCallback>,
}

impl TransitionRun {
    /// Starts a run at `now` with its watchdog armed at
    /// `now + watchdog_factor * duration`.
    pub fn new(
        display: DisplayId,
        old: Frame,
        new: Frame,
        descriptor: EffectDescriptor,
        output: PooledSurface,
        now: Instant,
        watchdog_factor: f32,
    ) -> Self {
        let duration = descriptor.duration();
        let clock = AnimationClock::start(duration, descriptor.easing(), now);
        let forced_cut = !old.is_compatible_with(&new);
        Self {
            display,
            old,
            new,
            deadline: watchdog_deadline(now, duration, watchdog_factor),
            descriptor,
            output,
            forced_cut,
            clock,
            state: TransitionState::Running,
            progress: 0.0,
            stalled: false,
            frames_rendered: 0,
            tiers: TierCounts::default(),
            last_tier: None,
            on_complete: None,
        }
    }

    pub fn display(&self) -> DisplayId {
        self.display
    }

    pub fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn started_at(&self) -> Instant {
        self.clock.started_at()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn frames_rendered(&self) -> u32 {
        self.frames_rendered
    }

    pub fn is_forced_cut(&self) -> bool {
        self.forced_cut
    }

    pub fn old(&self) -> &Frame {
        &self.old
    }

    pub fn new_frame(&self) -> &Frame {
        &self.new
    }

    pub fn output(&self) -> &PooledSurface {
        &self.output
    }

    fn record_frame(&mut self, tier: CapabilityTier) {
        self.frames_rendered += 1;
        self.tiers.record(tier);
        self.last_tier = Some(tier);
    }

    fn watchdog_expired(&self, now: Instant) -> bool {
        self.state == TransitionState::Running && now >= self.deadline
    }
}

fn watchdog_deadline(now: Instant, duration: Duration, factor: f32) -> Instant {
    let factor = if factor.is_finite() && factor >= 1.0 {
        f64::from(factor)
    } else {
        2.0
    };
    let window =
        Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX);
    now.checked_add(window)
        .or_else(|| now.checked_add(duration))
        .unwrap_or(now)
}

#[derive(Default)]
struct DisplaySlot {
    run: Option<TransitionRun>,
    /// Frame the display shows when no transition is running.
    shown: Option<Frame>,
}

pub struct TransitionManager {
    watchdog_factor: f32,
    pool: FramePool,
    gpu: GpuContextManager,
    executor: EffectExecutor,
    telemetry: Telemetry,
    displays: HashMap<DisplayId, DisplaySlot>,
}

impl TransitionManager {
    pub fn new(config: &CompositorConfig, gpu: GpuContextManager) -> Self {
        Self {
            watchdog_factor: config.watchdog.factor,
            pool: FramePool::new(config.pool.byte_budget),
            gpu,
            executor: EffectExecutor::new(),
            telemetry: Telemetry::new(config.telemetry.history),
            displays: HashMap::new(),
        }
    }

    /// Registers a display. Returns `false` if it was already known.
    pub fn add_display(&mut self, display_id: DisplayId) -> bool {
        if self.displays.contains_key(&display_id) {
            return false;
        }
        self.displays.insert(display_id, DisplaySlot::default());
        self.gpu.attach(display_id);
        debug!(display = %display_id, "display_added");
        true
    }

    /// Tears a display down: any run is cancelled and retired without a final
    /// paint, and the display's gpu context is destroyed.
    pub fn remove_display(&mut self, display_id: DisplayId, now: Instant) -> bool {
        let Some(mut slot) = self.displays.remove(&display_id) else {
            return false;
        };
        if let Some(mut run) = slot.run.take() {
            run.clock.cancel();
            run.state = TransitionState::Cancelled;
            self.retire(run, TransitionOutcome::Cancelled, now);
        }
        self.gpu.destroy(display_id);
        self.executor.forget_display(display_id);
        self.absorb_gpu_events();
        debug!(display = %display_id, "display_removed");
        true
    }

    /// Sets what an idle display shows, without a transition.
    ///
    /// Returns `false` while a run is active.
    pub fn present(&mut self, display: DisplayId, frame: Frame) -> bool {
        self.add_display(display);
        let Some(slot) = self.displays.get_mut(&display) else {
            return false;
        };
        if slot.run.is_some() {
            return false;
        }
        slot.shown = Some(frame);
        true
    }

    /// Starts a transition from `old` to `new` on `display`.
    ///
    /// Returns `false` ("busy") when a run is already active on the display;
    /// the active run is left untouched. Unknown displays are registered.
    pub fn request_transition(
        &mut self,
        display: DisplayId,
        old: Frame,
        new: Frame,
        descriptor: EffectDescriptor,
        now: Instant,
    ) -> bool {
        self.start(display, old, new, descriptor, now, None)
    }

    /// Like [`TransitionManager::request_transition`], invoking `on_complete`
    /// once when the run retires. The callback is dropped unused when busy.
    pub fn request_transition_with_callback(
        &mut self,
        display: DisplayId,
        old: Frame,
        new: Frame,
        descriptor: EffectDescriptor,
        now: Instant,
        on_complete: impl FnOnce(&CompletionReport) + 'static,
    ) -> bool {
        self.start(display, old, new, descriptor, now, Some(Box::new(on_complete)))
    }

    fn start(
        &mut self,
        display_id: DisplayId,
        old: Frame,
        new: Frame,
        descriptor: EffectDescriptor,
        now: Instant,
        on_complete: Option<CompletionCallback>,
    ) -> bool {
        self.add_display(display_id);
        let busy = self
            .displays
            .get(&display_id)
            .and_then(|slot| slot.run.as_ref())
            .map(|run| run.state);
        if let Some(state) = busy {
            debug!(display = %display_id, ?state, "transition_busy");
            return false;
        }

        let ceiling = self.gpu.current_tier(display_id);
        self.absorb_gpu_events();

        let key = SurfaceKey::new(new.size(), new.format());
        let surface = self.pool.acquire(key);
        let mut run = TransitionRun::new(
            display_id,
            old,
            new,
            descriptor,
            surface,
            now,
            self.watchdog_factor,
        );
        run.on_complete = on_complete;
        if run.forced_cut {
            warn!(
                display = %display_id,
                old_width = run.old.width(),
                old_height = run.old.height(),
                old_format = %run.old.format(),
                new_width = run.new.width(),
                new_height = run.new.height(),
                new_format = %run.new.format(),
                "transition_inputs_mismatched"
            );
        }
        info!(
            display = %display_id,
            effect = %run.descriptor.kind(),
            duration_ms = run.descriptor.duration().as_millis() as u64,
            %ceiling,
            "transition_start"
        );
        if let Some(slot) = self.displays.get_mut(&display_id) {
            slot.run = Some(run);
        }
        true
    }

    /// Advances `display` to `now`: renders one frame, or the final pass and
    /// retirement once the run has finished, stalled, or been cancelled.
    pub fn paint_tick(&mut self, display_id: DisplayId, now: Instant) -> TickReport {
        let Some(slot) = self.displays.get_mut(&display_id) else {
            trace!(display = %display_id, "paint_tick_unknown_display");
            return TickReport::UnknownDisplay;
        };
        let Some(mut run) = slot.run.take() else {
            return TickReport::Idle;
        };

        if run.watchdog_expired(now) {
            self.mark_stalled(&mut run, now);
        }

        if run.state == TransitionState::Running {
            let progress = run.clock.tick(now).max(run.progress);
            run.progress = progress;
            if progress < 1.0 {
                let tier = self.render(&mut run, progress);
                trace!(display = %display_id, progress, %tier, "transition_frame");
                self.put_back(run);
                return TickReport::Rendered { progress, tier };
            }
            run.state = TransitionState::Finishing;
        }

        // Finishing or Cancelled: one pass at 1.0, then retire.
        let outcome = match run.state {
            TransitionState::Cancelled => TransitionOutcome::Cancelled,
            _ if run.stalled => TransitionOutcome::Stalled,
            _ => TransitionOutcome::Completed,
        };
        run.progress = 1.0;
        let tier = self.render(&mut run, 1.0);
        if run.state == TransitionState::Finishing {
            self.telemetry.record_finishing_pass(display_id);
        }
        self.retire(run, outcome, now);
        TickReport::Finished { outcome, tier }
    }

    fn render(&mut self, run: &mut TransitionRun, progress: f32) -> CapabilityTier {
        let ceiling = self.gpu.current_tier(run.display);
        let tier = self
            .executor
            .render(run, progress, ceiling, &mut self.gpu)
            .tier;
        self.absorb_gpu_events();
        run.record_frame(tier);
        self.telemetry.record_frame(tier);
        tier
    }

    /// Moves gpu diagnostics into telemetry and unbinds idle surfaces from
    /// devices that were torn down.
    fn absorb_gpu_events(&mut self) {
        self.telemetry.absorb(self.gpu.drain_events());
        for tag in self.gpu.drain_retired_devices() {
            self.pool.forget_device(tag);
        }
    }

    fn mark_stalled(&mut self, run: &mut TransitionRun, now: Instant) {
        run.state = TransitionState::Finishing;
        run.stalled = true;
        warn!(
            display = %run.display,
            effect = %run.descriptor.kind(),
            declared_ms = run.descriptor.duration().as_millis() as u64,
            elapsed_ms = now.saturating_duration_since(run.started_at()).as_millis() as u64,
            progress = run.progress,
            "transition_stall"
        );
    }

    fn put_back(&mut self, run: TransitionRun) {
        if let Some(slot) = self.displays.get_mut(&run.display) {
            slot.run = Some(run);
        } else {
            self.pool.release(run.output);
        }
    }

    fn retire(&mut self, run: TransitionRun, outcome: TransitionOutcome, now: Instant) {
        let report = CompletionReport {
            display: run.display,
            effect: run.descriptor.kind(),
            outcome,
            declared: run.descriptor.duration(),
            elapsed: now.saturating_duration_since(run.started_at()),
            frames_rendered: run.frames_rendered,
            tiers: run.tiers,
            final_tier: run.last_tier.unwrap_or(CapabilityTier::InstantCut),
        };
        let TransitionRun {
            display: display_id,
            new,
            output,
            on_complete,
            ..
        } = run;
        self.pool.release(output);
        if let Some(slot) = self.displays.get_mut(&display_id) {
            slot.shown = Some(new);
        }
        info!(
            display = %display_id,
            effect = %report.effect,
            outcome = ?report.outcome,
            elapsed_ms = report.elapsed.as_millis() as u64,
            frames = report.frames_rendered,
            tier = %report.final_tier,
            "transition_end"
        );
        self.telemetry.record_transition(&report);
        if let Some(callback) = on_complete {
            callback(&report);
        }
    }

    /// Forces every run past its deadline into `Finishing`. The final pass
    /// happens on the display's next paint tick. Returns the stalled displays.
    pub fn poll_watchdogs(&mut self, now: Instant) -> Vec<DisplayId> {
        let expired: Vec<DisplayId> = self
            .displays
            .iter()
            .filter(|(_, slot)| slot.run.as_ref().is_some_and(|run| run.watchdog_expired(now)))
            .map(|(display, _)| *display)
            .collect();
        for display in &expired {
            let run = self
                .displays
                .get_mut(display)
                .and_then(|slot| slot.run.take());
            if let Some(mut run) = run {
                self.mark_stalled(&mut run, now);
                self.put_back(run);
            }
        }
        expired
    }

    /// Stops the running transition on `display`. Takes effect on the next paint tick.
    pub fn cancel(&mut self, display_id: DisplayId) -> bool {
        let Some(run) = self.running_mut(display_id) else {
            return false;
        };
        run.clock.cancel();
        run.state = TransitionState::Cancelled;
        debug!(display = %display_id, "transition_cancel");
        true
    }

    pub fn pause(&mut self, display: DisplayId, now: Instant) -> bool {
        self.running_mut(display)
            .map(|run| run.clock.pause(now))
            .is_some()
    }

    pub fn resume(&mut self, display: DisplayId, now: Instant) -> bool {
        self.running_mut(display)
            .map(|run| run.clock.resume(now))
            .is_some()
    }

    /// Changes playback speed of the running transition. The watchdog deadline is unchanged.
    pub fn set_rate(&mut self, display: DisplayId, rate: f32, now: Instant) -> bool {
        self.running_mut(display)
            .map(|run| run.clock.set_rate(rate, now))
            .is_some()
    }

    fn running_mut(&mut self, display: DisplayId) -> Option<&mut TransitionRun> {
        self.displays
            .get_mut(&display)
            .and_then(|slot| slot.run.as_mut())
            .filter(|run| run.state == TransitionState::Running)
    }

    pub fn current_state(&self, display: DisplayId) -> TransitionState {
        self.run(display)
            .map_or(TransitionState::Idle, TransitionRun::state)
    }

    pub fn progress(&self, display: DisplayId) -> Option<f32> {
        self.run(display).map(TransitionRun::progress)
    }

    pub fn run(&self, display: DisplayId) -> Option<&TransitionRun> {
        self.displays
            .get(&display)
            .and_then(|slot| slot.run.as_ref())
    }

    /// Capability tier of `display`, for hosts that gray out gpu-only effects.
    pub fn current_tier(&mut self, display: DisplayId) -> CapabilityTier {
        let tier = self.gpu.current_tier(display);
        self.absorb_gpu_events();
        tier
    }

    /// What the display shows right now, for stacking overlays above it.
    ///
    /// The run's output once it has rendered, otherwise the presented frame.
    pub fn current_output_surface(&self, display: DisplayId) -> Option<&Frame> {
        let slot = self.displays.get(&display)?;
        match &slot.run {
            Some(run) if run.frames_rendered > 0 => Some(run.output.frame()),
            _ => slot.shown.as_ref(),
        }
    }

    pub fn notify_context_lost(&mut self, display: DisplayId) {
        self.gpu.notify_context_lost(display);
        self.absorb_gpu_events();
    }

    pub fn displays(&self) -> impl Iterator<Item = DisplayId> + '_ {
        self.displays.keys().copied()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn gpu(&self) -> &GpuContextManager {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut GpuContextManager {
        &mut self.gpu
    }
}
