//! Helpers for exercising the compositor without a physical gpu.
//!
//! [`ScriptedDevice`] stands in for a real backend: it composites on the CPU
//! and can be told to fail a probe, grant a shallower swap chain, reject a
//! named shader program, fail draws, or lose its context mid-run. Every device
//! built from one [`DeviceScript`] shares its switches and counters.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::effects::cpu::{self, Inputs};
use crate::effects::shaders::ShaderProgram;
use crate::effects::EffectParams;
use crate::frame::{DisplayId, Frame, FrameSize, PixelFormat};
use crate::gpu::{
    DeviceFactory, GpuDevice, GpuError, ProbeReport, ProbeRequest, ShaderPass, SwapMode,
};
use crate::pool::{DeviceTag, PooledSurface};

#[derive(Debug, Default)]
struct ScriptState {
    granted: Option<SwapMode>,
    fail_probe: bool,
    failing_programs: HashSet<String>,
    lost: bool,
    fail_draws: bool,
    probes: u32,
    compiles: u32,
    draws: u32,
    destroyed: u32,
}

/// Shared switches and counters for scripted devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceScript {
    state: Rc<RefCell<ScriptState>>,
}

impl DeviceScript {
    /// Grant `mode` regardless of what was requested.
    pub fn granting(self, mode: SwapMode) -> Self {
        self.state.borrow_mut().granted = Some(mode);
        self
    }

    pub fn failing_probe(self) -> Self {
        self.state.borrow_mut().fail_probe = true;
        self
    }

    pub fn failing_program(self, name: &str) -> Self {
        self.fail_program(name);
        self
    }

    /// Makes later compiles of `name` fail, as a link error would.
    pub fn fail_program(&self, name: &str) {
        self.state
            .borrow_mut()
            .failing_programs
            .insert(name.to_owned());
    }

    pub fn lose_context(&self) {
        self.state.borrow_mut().lost = true;
    }

    pub fn restore_context(&self) {
        self.state.borrow_mut().lost = false;
    }

    pub fn fail_draws(&self) {
        self.state.borrow_mut().fail_draws = true;
    }

    pub fn probes(&self) -> u32 {
        self.state.borrow().probes
    }

    pub fn compiles(&self) -> u32 {
        self.state.borrow().compiles
    }

    pub fn draws(&self) -> u32 {
        self.state.borrow().draws
    }

    pub fn destroyed(&self) -> u32 {
        self.state.borrow().destroyed
    }
}

/// Rejects surfaces bound to another device, as a real backend rejects foreign textures.
pub struct ScriptedDevice {
    script: DeviceScript,
    display: DisplayId,
    tag: DeviceTag,
}

impl ScriptedDevice {
    pub fn new(script: &DeviceScript, display: DisplayId) -> Self {
        Self {
            script: script.clone(),
            display,
            tag: DeviceTag::next(),
        }
    }

    /// Factory handing every display its own device driven by `script`.
    pub fn factory(script: &DeviceScript) -> DeviceFactory {
        let script = script.clone();
        Box::new(move |display: DisplayId| -> Box<dyn GpuDevice> {
            Box::new(ScriptedDevice::new(&script, display))
        })
    }
}

impl GpuDevice for ScriptedDevice {
    fn tag(&self) -> DeviceTag {
        self.tag
    }

    fn probe(&mut self, request: &ProbeRequest) -> Result<ProbeReport, GpuError> {
        let mut state = self.script.state.borrow_mut();
        state.probes += 1;
        if state.fail_probe {
            return Err(GpuError::ContextCreation(format!(
                "scripted probe failure on {}",
                self.display
            )));
        }
        Ok(ProbeReport {
            adapter: "scripted".into(),
            granted_swap: state.granted.unwrap_or(request.requested_swap),
        })
    }

    fn compile(&mut self, program: &ShaderProgram) -> Result<(), GpuError> {
        let mut state = self.script.state.borrow_mut();
        state.compiles += 1;
        if state.lost {
            return Err(GpuError::ContextLost);
        }
        if state.failing_programs.contains(program.name) {
            return Err(GpuError::ShaderCompile {
                program: program.name,
                message: "scripted link failure".into(),
            });
        }
        Ok(())
    }

    fn draw(&mut self, pass: &ShaderPass<'_>, target: &mut PooledSurface) -> Result<(), GpuError> {
        {
            let state = self.script.state.borrow();
            if state.lost {
                return Err(GpuError::ContextLost);
            }
            if state.fail_draws {
                return Err(GpuError::Draw("scripted draw failure".into()));
            }
        }
        if target.gpu_owner() != Some(self.tag) {
            return Err(GpuError::Draw(format!(
                "surface {:?} is bound to another device",
                target.id()
            )));
        }
        if !pass.old.is_compatible_with(pass.new) || target.key().size != pass.new.size() {
            return Err(GpuError::Draw("source and target sizes differ".into()));
        }
        let inputs = Inputs {
            size: pass.new.size(),
            old: pass.old.pixels(),
            new: pass.new.pixels(),
        };
        let out = target.frame_mut().pixels_mut();
        if !cpu::composite(pass.params, inputs, pass.progress, out) {
            // Card flip has no CPU form; a blend keeps the output deterministic.
            cpu::composite(&EffectParams::Crossfade, inputs, pass.progress, out);
        }
        self.script.state.borrow_mut().draws += 1;
        Ok(())
    }

    fn context_lost(&mut self) -> bool {
        self.script.state.borrow().lost
    }

    fn destroy(&mut self) {
        self.script.state.borrow_mut().destroyed += 1;
    }
}

/// Deterministic RGBA test pattern; different seeds give different images.
pub fn gradient_frame(size: FrameSize, seed: u32) -> Frame {
    let mut frame = Frame::zeroed(size, PixelFormat::Rgba8);
    let width = size.width.max(1) as usize;
    for (index, px) in frame.pixels_mut().chunks_exact_mut(4).enumerate() {
        let x = (index % width) as u32;
        let y = (index / width) as u32;
        let salt = seed.wrapping_mul(97);
        px[0] = (x.wrapping_mul(13).wrapping_add(salt) & 0xff) as u8;
        px[1] = (y.wrapping_mul(29).wrapping_add(salt >> 1) & 0xff) as u8;
        px[2] = ((x ^ y).wrapping_mul(7).wrapping_add(seed) & 0xff) as u8;
        px[3] = 255;
    }
    frame
}

/// Solid opaque frame of a single grey level.
pub fn grey_frame(size: FrameSize, level: u8) -> Frame {
    Frame::solid(size, PixelFormat::Rgba8, [level, level, level, 255])
}
