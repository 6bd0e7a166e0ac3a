//! Per-display GPU context lifecycle.
//!
//! ```text
//! Uninitialized -> Probing -> { Ready | Degraded | SoftwareFallback } -> Destroyed
//! Ready | Degraded -> SoftwareFallback   (one way, on any runtime gpu error)
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::GpuConfig;
use crate::effects::shaders::ShaderProgram;
use crate::frame::DisplayId;
use crate::pool::{DeviceTag, PooledSurface};

use super::{
    CapabilityTier, DeviceFactory, GpuDevice, GpuError, ProbeRequest, ShaderPass, SwapMode,
    WgpuDevice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Uninitialized,
    Probing,
    Ready,
    /// Gpu rendering works but the driver granted a shallower swap chain than requested.
    Degraded,
    SoftwareFallback,
    Destroyed,
}

impl ContextState {
    /// Highest tier a display in this state may render with.
    pub const fn ceiling(&self) -> CapabilityTier {
        match self {
            Self::Ready | Self::Degraded => CapabilityTier::ShaderGPU,
            Self::Uninitialized | Self::Probing | Self::SoftwareFallback => {
                CapabilityTier::SoftwareComposite
            }
            Self::Destroyed => CapabilityTier::InstantCut,
        }
    }

    pub const fn is_gpu(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

/// Result of a shader draw request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuDrawOutcome {
    Drawn,
    /// The draw did not happen; render again at or below this tier.
    Downgraded(CapabilityTier),
}

/// Diagnostics emitted by state changes, drained by the telemetry sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuEvent {
    SwapDowngrade {
        display: DisplayId,
        requested: SwapMode,
        granted: SwapMode,
    },
    Fallback {
        display: DisplayId,
        reason: String,
    },
}

struct DisplayContext {
    state: ContextState,
    device: Option<Box<dyn GpuDevice>>,
    compiled: HashSet<&'static str>,
    adapter: Option<String>,
    granted_swap: Option<SwapMode>,
}

impl DisplayContext {
    fn new() -> Self {
        Self {
            state: ContextState::Uninitialized,
            device: None,
            compiled: HashSet::new(),
            adapter: None,
            granted_swap: None,
        }
    }

    /// Destroys the device, returning its tag so surfaces bound to it can be unbound.
    fn release_device(&mut self) -> Option<DeviceTag> {
        self.compiled.clear();
        let mut device = self.device.take()?;
        let tag = device.tag();
        device.destroy();
        Some(tag)
    }
}

/// Owns every display's gpu context. Lives on the rendering thread.
pub struct GpuContextManager {
    enabled: bool,
    requested_swap: SwapMode,
    factory: DeviceFactory,
    displays: HashMap<DisplayId, DisplayContext>,
    downgrade_logged: HashSet<DisplayId>,
    events: Vec<GpuEvent>,
    retired: Vec<DeviceTag>,
}

impl GpuContextManager {
    pub fn new(config: &GpuConfig, factory: DeviceFactory) -> Self {
        Self {
            enabled: config.enabled,
            requested_swap: SwapMode::from_buffers(config.swap_buffers),
            factory,
            displays: HashMap::new(),
            downgrade_logged: HashSet::new(),
            events: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Manager backed by a headless `wgpu` device per display.
    pub fn with_wgpu(config: &GpuConfig) -> Self {
        let power = config.power_preference.to_wgpu();
        Self::new(
            config,
            Box::new(move |_: DisplayId| -> Box<dyn GpuDevice> {
                Box::new(WgpuDevice::new(power))
            }),
        )
    }

    /// Manager that never touches a gpu; every display renders in software.
    pub fn software_only() -> Self {
        let config = GpuConfig {
            enabled: false,
            ..GpuConfig::default()
        };
        Self::new(
            &config,
            Box::new(|_: DisplayId| -> Box<dyn GpuDevice> {
                Box::new(DisabledDevice(DeviceTag::next()))
            }),
        )
    }

    /// Current capability ceiling for `display`, probing on first use.
    ///
    /// A context-loss reported by the device since the last query moves the
    /// display to `SoftwareFallback` before answering.
    pub fn current_tier(&mut self, display: DisplayId) -> CapabilityTier {
        let state = self.state(display);
        if state == ContextState::Uninitialized {
            self.probe(display);
        } else if state.is_gpu() && self.device_reports_loss(display) {
            self.fall_back(display, &GpuError::ContextLost);
        }
        self.state(display).ceiling()
    }

    pub fn state(&self, display: DisplayId) -> ContextState {
        self.displays
            .get(&display)
            .map_or(ContextState::Uninitialized, |ctx| ctx.state)
    }

    pub fn granted_swap(&self, display: DisplayId) -> Option<SwapMode> {
        self.displays.get(&display).and_then(|ctx| ctx.granted_swap)
    }

    /// Tag of the live device serving `display`.
    pub fn device_tag(&self, display: DisplayId) -> Option<DeviceTag> {
        self.displays
            .get(&display)
            .and_then(|ctx| ctx.device.as_ref())
            .map(|device| device.tag())
    }

    pub fn adapter_name(&self, display: DisplayId) -> Option<&str> {
        self.displays
            .get(&display)
            .and_then(|ctx| ctx.adapter.as_deref())
    }

    fn probe(&mut self, display_id: DisplayId) {
        let requested = self.requested_swap;
        let enabled = self.enabled;
        let ctx = self
            .displays
            .entry(display_id)
            .or_insert_with(DisplayContext::new);
        ctx.state = ContextState::Probing;
        debug!(display = %display_id, requested_swap = ?requested, "gpu_probe_start");

        if !enabled {
            ctx.state = ContextState::SoftwareFallback;
            info!(display = %display_id, "gpu_disabled");
            return;
        }

        let mut device = (self.factory)(display_id);
        let request = ProbeRequest {
            display: display_id,
            requested_swap: requested,
        };
        let report = device
            .probe(&request)
            .and_then(|report| device.compile(&ShaderProgram::BASELINE).map(|()| report));
        let report = match report {
            Ok(report) => report,
            Err(err) => {
                device.destroy();
                self.fall_back(display_id, &err);
                return;
            }
        };

        let Some(ctx) = self.displays.get_mut(&display_id) else {
            return;
        };
        ctx.compiled.insert(ShaderProgram::BASELINE.name);
        ctx.device = Some(device);
        ctx.adapter = Some(report.adapter.clone());
        ctx.granted_swap = Some(report.granted_swap);

        let granted = report.granted_swap;
        if granted < requested || granted == SwapMode::Single {
            ctx.state = ContextState::Degraded;
            if self.downgrade_logged.insert(display_id) {
                info!(
                    display = %display_id,
                    requested = requested.buffers(),
                    granted = granted.buffers(),
                    "gpu_swap_downgrade"
                );
                self.events.push(GpuEvent::SwapDowngrade {
                    display: display_id,
                    requested,
                    granted,
                });
            }
        } else {
            ctx.state = ContextState::Ready;
            info!(
                display = %display_id,
                adapter = %report.adapter,
                swap = granted.buffers(),
                "gpu_ready"
            );
        }
    }

    fn device_reports_loss(&mut self, display: DisplayId) -> bool {
        self.displays
            .get_mut(&display)
            .and_then(|ctx| ctx.device.as_mut())
            .is_some_and(|device| device.context_lost())
    }

    /// One-way move to `SoftwareFallback`. Destroyed displays stay destroyed.
    fn fall_back(&mut self, display_id: DisplayId, reason: &GpuError) {
        let ctx = self
            .displays
            .entry(display_id)
            .or_insert_with(DisplayContext::new);
        if matches!(
            ctx.state,
            ContextState::SoftwareFallback | ContextState::Destroyed
        ) {
            return;
        }
        if let Some(tag) = ctx.release_device() {
            self.retired.push(tag);
        }
        ctx.state = ContextState::SoftwareFallback;
        warn!(display = %display_id, error = %reason, "gpu_fallback");
        self.events.push(GpuEvent::Fallback {
            display: display_id,
            reason: reason.to_string(),
        });
    }

    /// Renders a shader pass for `display` into `target`.
    ///
    /// Any backend failure is absorbed here: the display falls back to
    /// software and the caller is told which tier to retry with.
    pub fn draw(
        &mut self,
        display: DisplayId,
        pass: &ShaderPass<'_>,
        target: &mut PooledSurface,
    ) -> GpuDrawOutcome {
        let tier = self.current_tier(display);
        if tier != CapabilityTier::ShaderGPU {
            return GpuDrawOutcome::Downgraded(tier);
        }
        if let Err(err) = self.ensure_compiled(display, &pass.program) {
            self.fall_back(display, &err);
            return GpuDrawOutcome::Downgraded(self.state(display).ceiling());
        }
        let result = match self
            .displays
            .get_mut(&display)
            .and_then(|ctx| ctx.device.as_mut())
        {
            Some(device) => {
                target.claim(device.tag());
                device.draw(pass, target)
            }
            None => Err(GpuError::ContextLost),
        };
        match result {
            Ok(()) => GpuDrawOutcome::Drawn,
            Err(err) => {
                self.fall_back(display, &err);
                GpuDrawOutcome::Downgraded(self.state(display).ceiling())
            }
        }
    }

    fn ensure_compiled(
        &mut self,
        display_id: DisplayId,
        program: &ShaderProgram,
    ) -> Result<(), GpuError> {
        let ctx = self
            .displays
            .get_mut(&display_id)
            .ok_or(GpuError::ContextLost)?;
        if ctx.compiled.contains(program.name) {
            return Ok(());
        }
        let device = ctx.device.as_mut().ok_or(GpuError::ContextLost)?;
        device.compile(program)?;
        debug!(display = %display_id, program = program.name, "gpu_program_compiled");
        ctx.compiled.insert(program.name);
        Ok(())
    }

    /// Host-reported context loss (e.g. from the windowing system).
    pub fn notify_context_lost(&mut self, display: DisplayId) {
        if self.state(display).is_gpu() {
            self.fall_back(display, &GpuError::ContextLost);
        }
    }

    /// Display teardown. Later queries for `display` report `InstantCut` until
    /// [`GpuContextManager::attach`] resets it.
    pub fn destroy(&mut self, display_id: DisplayId) {
        let ctx = self
            .displays
            .entry(display_id)
            .or_insert_with(DisplayContext::new);
        if let Some(tag) = ctx.release_device() {
            self.retired.push(tag);
        }
        ctx.state = ContextState::Destroyed;
        debug!(display = %display_id, "gpu_context_destroyed");
    }

    /// Prepares `display` for use. A destroyed context starts over from
    /// `Uninitialized`; any other state is kept.
    pub fn attach(&mut self, display: DisplayId) {
        let ctx = self
            .displays
            .entry(display)
            .or_insert_with(DisplayContext::new);
        if ctx.state == ContextState::Destroyed {
            *ctx = DisplayContext::new();
        }
    }

    pub fn drain_events(&mut self) -> Vec<GpuEvent> {
        std::mem::take(&mut self.events)
    }

    /// Devices destroyed since the last call.
    pub fn drain_retired_devices(&mut self) -> Vec<DeviceTag> {
        std::mem::take(&mut self.retired)
    }
}

impl Drop for GpuContextManager {
    fn drop(&mut self) {
        for ctx in self.displays.values_mut() {
            ctx.release_device();
        }
    }
}

/// Device handed out when the gpu is disabled; never probed successfully.
struct DisabledDevice(DeviceTag);

impl GpuDevice for DisabledDevice {
    fn tag(&self) -> DeviceTag {
        self.0
    }

    fn probe(&mut self, _request: &ProbeRequest) -> Result<super::ProbeReport, GpuError> {
        Err(GpuError::ContextCreation("gpu disabled".into()))
    }

    fn compile(&mut self, _program: &ShaderProgram) -> Result<(), GpuError> {
        Err(GpuError::ContextLost)
    }

    fn draw(&mut self, _pass: &ShaderPass<'_>, _target: &mut PooledSurface) -> Result<(), GpuError> {
        Err(GpuError::ContextLost)
    }

    fn context_lost(&mut self) -> bool {
        false
    }

    fn destroy(&mut self) {}
}
