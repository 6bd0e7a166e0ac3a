//! Diagnostics sink: per-transition records, tier usage and gpu incidents.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use tracing::trace;

use crate::frame::DisplayId;
use crate::gpu::context::GpuEvent;
use crate::gpu::{CapabilityTier, SwapMode};
use crate::transition::{CompletionReport, TransitionOutcome};

/// Histogram of rendered frames per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub shader_gpu: u64,
    pub software_composite: u64,
    pub instant_cut: u64,
}

impl TierCounts {
    pub fn record(&mut self, tier: CapabilityTier) {
        *self.slot(tier) += 1;
    }

    pub fn get(&self, tier: CapabilityTier) -> u64 {
        match tier {
            CapabilityTier::ShaderGPU => self.shader_gpu,
            CapabilityTier::SoftwareComposite => self.software_composite,
            CapabilityTier::InstantCut => self.instant_cut,
        }
    }

    pub fn total(&self) -> u64 {
        self.shader_gpu + self.software_composite + self.instant_cut
    }

    fn slot(&mut self, tier: CapabilityTier) -> &mut u64 {
        match tier {
            CapabilityTier::ShaderGPU => &mut self.shader_gpu,
            CapabilityTier::SoftwareComposite => &mut self.software_composite,
            CapabilityTier::InstantCut => &mut self.instant_cut,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapDowngrade {
    pub display: DisplayId,
    pub requested: SwapMode,
    pub granted: SwapMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySummary {
    pub transitions: u64,
    pub completed: u64,
    pub stalled: u64,
    pub cancelled: u64,
    pub gpu_failures: u64,
    pub swap_downgrades: usize,
    pub tier_usage: TierCounts,
    pub mean_frames_per_transition: f64,
}

impl fmt::Display for TelemetrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} transitions ({} completed, {} stalled, {} cancelled), {:.1} frames each; \
             tiers gpu={} software={} cut={}; gpu failures={} swap downgrades={}",
            self.transitions,
            self.completed,
            self.stalled,
            self.cancelled,
            self.mean_frames_per_transition,
            self.tier_usage.shader_gpu,
            self.tier_usage.software_composite,
            self.tier_usage.instant_cut,
            self.gpu_failures,
            self.swap_downgrades,
        )
    }
}

#[derive(Debug)]
pub struct Telemetry {
    capacity: usize,
    history: VecDeque<CompletionReport>,
    tier_usage: TierCounts,
    transitions: u64,
    completed: u64,
    stalled: u64,
    cancelled: u64,
    frames: u64,
    gpu_failures: u64,
    swap_downgrades: Vec<SwapDowngrade>,
    finishing_passes: HashMap<DisplayId, u64>,
}

impl Telemetry {
    pub fn new(history: usize) -> Self {
        Self {
            capacity: history,
            history: VecDeque::with_capacity(history.min(1024)),
            tier_usage: TierCounts::default(),
            transitions: 0,
            completed: 0,
            stalled: 0,
            cancelled: 0,
            frames: 0,
            gpu_failures: 0,
            swap_downgrades: Vec::new(),
            finishing_passes: HashMap::new(),
        }
    }

    pub(crate) fn record_frame(&mut self, tier: CapabilityTier) {
        self.tier_usage.record(tier);
        self.frames += 1;
    }

    pub(crate) fn record_finishing_pass(&mut self, display: DisplayId) {
        *self.finishing_passes.entry(display).or_default() += 1;
    }

    pub(crate) fn record_transition(&mut self, report: &CompletionReport) {
        self.transitions += 1;
        match report.outcome {
            TransitionOutcome::Completed => self.completed += 1,
            TransitionOutcome::Stalled => self.stalled += 1,
            TransitionOutcome::Cancelled => self.cancelled += 1,
        }
        if self.capacity == 0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(report.clone());
        trace!(display = %report.display, outcome = ?report.outcome, "telemetry_record");
    }

    pub(crate) fn absorb(&mut self, events: Vec<GpuEvent>) {
        for event in events {
            match event {
                GpuEvent::SwapDowngrade {
                    display,
                    requested,
                    granted,
                } => self.swap_downgrades.push(SwapDowngrade {
                    display,
                    requested,
                    granted,
                }),
                GpuEvent::Fallback { .. } => self.gpu_failures += 1,
            }
        }
    }

    /// Most recent transitions, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &CompletionReport> {
        self.history.iter()
    }

    pub fn tier_usage(&self) -> TierCounts {
        self.tier_usage
    }

    pub fn stalls(&self) -> u64 {
        self.stalled
    }

    pub fn gpu_failures(&self) -> u64 {
        self.gpu_failures
    }

    pub fn swap_downgrades(&self) -> &[SwapDowngrade] {
        &self.swap_downgrades
    }

    pub fn finishing_passes(&self, display: DisplayId) -> u64 {
        self.finishing_passes.get(&display).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> TelemetrySummary {
        let mean = if self.transitions == 0 {
            0.0
        } else {
            self.frames as f64 / self.transitions as f64
        };
        TelemetrySummary {
            transitions: self.transitions,
            completed: self.completed,
            stalled: self.stalled,
            cancelled: self.cancelled,
            gpu_failures: self.gpu_failures,
            swap_downgrades: self.swap_downgrades.len(),
            tier_usage: self.tier_usage,
            mean_frames_per_transition: mean,
        }
    }
}
