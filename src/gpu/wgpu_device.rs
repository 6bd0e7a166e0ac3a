use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use crate::effects::shaders::{ShaderProgram, VERTEX_ENTRY};
use crate::frame::{Frame, FrameId, FrameSize, PixelFormat};
use crate::pool::{DeviceTag, PooledSurface};

use super::{GpuDevice, GpuError, ProbeReport, ProbeRequest, ShaderPass, SwapMode};

/// Source textures kept alive between paint ticks: the old and the new frame.
const SOURCE_CACHE: usize = 2;

/// Headless `wgpu` backend. Renders offscreen and reads the result back into
/// the pooled surface's CPU buffer.
pub struct WgpuDevice {
    tag: DeviceTag,
    power_preference: wgpu::PowerPreference,
    present_modes: Option<Vec<wgpu::PresentMode>>,
    lost: Arc<AtomicBool>,
    gpu: Option<Gpu>,
}

struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    module: wgpu::ShaderModule,
    bind_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<(&'static str, wgpu::TextureFormat), wgpu::RenderPipeline>,
    sources: Vec<SourceTexture>,
}

struct SourceTexture {
    frame: FrameId,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl WgpuDevice {
    pub fn new(power_preference: wgpu::PowerPreference) -> Self {
        Self {
            tag: DeviceTag::next(),
            power_preference,
            present_modes: None,
            lost: Arc::new(AtomicBool::new(false)),
            gpu: None,
        }
    }

    /// Present modes the display's surface supports, as reported by the windowing host.
    ///
    /// Without them the probe assumes a standard double-buffered FIFO chain.
    pub fn with_present_modes(mut self, modes: Vec<wgpu::PresentMode>) -> Self {
        self.present_modes = Some(modes);
        self
    }

    fn gpu(&mut self) -> Result<&mut Gpu, GpuError> {
        self.gpu.as_mut().ok_or(GpuError::ContextLost)
    }
}

/// Deepest swap chain the listed present modes allow.
pub(crate) fn swap_mode_for(modes: Option<&[wgpu::PresentMode]>) -> SwapMode {
    let Some(modes) = modes else {
        return SwapMode::Double;
    };
    if modes.contains(&wgpu::PresentMode::Mailbox) {
        SwapMode::Triple
    } else if modes.iter().any(|mode| {
        matches!(
            mode,
            wgpu::PresentMode::Fifo | wgpu::PresentMode::FifoRelaxed | wgpu::PresentMode::AutoVsync
        )
    }) {
        SwapMode::Double
    } else if modes.is_empty() {
        SwapMode::Double
    } else {
        SwapMode::Single
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
    }
}

fn extent(size: FrameSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl GpuDevice for WgpuDevice {
    fn tag(&self) -> DeviceTag {
        self.tag
    }

    fn probe(&mut self, request: &ProbeRequest) -> Result<ProbeReport, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: self.power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| GpuError::ContextCreation(format!("request wgpu adapter: {err}")))?;
        let info = adapter.get_info();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("compositor-device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| GpuError::ContextCreation(format!("request wgpu device: {err}")))?;

        let lost = Arc::clone(&self.lost);
        let display_id = request.display;
        device.set_device_lost_callback(move |reason, message| {
            warn!(display = %display_id, ?reason, %message, "wgpu_device_lost");
            lost.store(true, Ordering::Release);
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("transitions"),
            source: wgpu::ShaderSource::Wgsl(ShaderProgram::BASELINE.source().into()),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::ShaderCompile {
                program: ShaderProgram::BASELINE.name,
                message: err.to_string(),
            });
        }

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("transition-layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("transition-pipeline-layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let granted_swap = swap_mode_for(self.present_modes.as_deref());
        debug!(
            display = %request.display,
            adapter = %info.name,
            backend = ?info.backend,
            granted_swap = granted_swap.buffers(),
            "wgpu_probe"
        );
        self.lost.store(false, Ordering::Release);
        // A fresh device: textures from any earlier one must not be reused.
        self.tag = DeviceTag::next();
        self.gpu = Some(Gpu {
            device,
            queue,
            module,
            bind_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            sources: Vec::with_capacity(SOURCE_CACHE),
        });
        Ok(ProbeReport {
            adapter: info.name,
            granted_swap,
        })
    }

    fn compile(&mut self, program: &ShaderProgram) -> Result<(), GpuError> {
        let gpu = self.gpu()?;
        gpu.pipeline(program, wgpu::TextureFormat::Rgba8Unorm)
            .map(|_| ())
            .map_err(|message| GpuError::ShaderCompile {
                program: program.name,
                message,
            })
    }

    fn draw(&mut self, pass: &ShaderPass<'_>, target: &mut PooledSurface) -> Result<(), GpuError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(GpuError::ContextLost);
        }
        let tag = self.tag;
        let gpu = self.gpu()?;
        let key = target.key();
        let format = texture_format(key.format);
        if pass.old.size() != key.size || pass.new.size() != key.size {
            return Err(GpuError::Draw("source and target sizes differ".into()));
        }
        gpu.pipeline(&pass.program, format)
            .map_err(|message| GpuError::ShaderCompile {
                program: pass.program.name,
                message,
            })?;

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let old_view = gpu.source_view(pass.old);
        let new_view = gpu.source_view(pass.new);
        if target.texture_for(tag).is_none() {
            let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("transition-target"),
                size: extent(key.size),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            target.attach_texture(tag, texture);
        }
        let Some(target_texture) = target.texture_for(tag) else {
            return Err(GpuError::Draw("target texture missing".into()));
        };
        let target_view = target_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let uniforms = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("transition-uniforms"),
                contents: bytemuck::bytes_of(&pass.uniforms()),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transition-bind"),
            layout: &gpu.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&old_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&new_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniforms.as_entire_binding(),
                },
            ],
        });

        let bytes_per_row = align_to(key.size.width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("transition-readback"),
            size: u64::from(bytes_per_row) * u64::from(key.size.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("transition-encoder"),
            });
        {
            let Some(pipeline) = gpu.pipelines.get(&(pass.program.name, format)) else {
                return Err(GpuError::Draw("pipeline missing".into()));
            };
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("transition-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &bind, &[]);
            rpass.draw(0..3, 0..1);
        }
        encoder.copy_texture_to_buffer(
            target_texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(key.size.height),
                },
            },
            extent(key.size),
        );
        gpu.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(GpuError::Draw(err.to_string()));
        }

        let slice = readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        gpu.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| GpuError::Draw(format!("poll: {err}")))?;
        rx.recv()
            .map_err(|_| GpuError::Draw("readback channel closed".into()))?
            .map_err(|err| GpuError::Draw(format!("map readback: {err}")))?;

        let row_bytes = key.size.width as usize * 4;
        let padded = bytes_per_row as usize;
        {
            let mapped = slice.get_mapped_range();
            let out = target.frame_mut().pixels_mut();
            for (dst, src) in out.chunks_exact_mut(row_bytes).zip(mapped.chunks(padded)) {
                dst.copy_from_slice(&src[..row_bytes]);
            }
        }
        readback.unmap();

        if self.lost.load(Ordering::Acquire) {
            return Err(GpuError::ContextLost);
        }
        Ok(())
    }

    fn context_lost(&mut self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn destroy(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            for source in &gpu.sources {
                source.texture.destroy();
            }
            gpu.device.destroy();
        }
    }
}

impl Gpu {
    /// Builds (or reuses) the pipeline for `program` rendering into `format`.
    ///
    /// Validation errors are captured in an error scope and returned as text.
    fn pipeline(
        &mut self,
        program: &ShaderProgram,
        format: wgpu::TextureFormat,
    ) -> Result<&wgpu::RenderPipeline, String> {
        let key = (program.name, format);
        if !self.pipelines.contains_key(&key) {
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let pipeline = self
                .device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(program.name),
                    layout: Some(&self.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &self.module,
                        entry_point: Some(VERTEX_ENTRY),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &self.module,
                        entry_point: Some(program.fragment_entry),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });
            if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
                return Err(err.to_string());
            }
            self.pipelines.insert(key, pipeline);
        }
        self.pipelines
            .get(&key)
            .ok_or_else(|| format!("pipeline {} not cached", program.name))
    }

    /// Texture view for `frame`, uploading it unless it is already resident.
    fn source_view(&mut self, frame: &Frame) -> wgpu::TextureView {
        if let Some(cached) = self.sources.iter().find(|s| s.frame == frame.id()) {
            return cached.view.clone();
        }
        let texture = self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some("transition-source"),
                size: extent(frame.size()),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(frame.format()),
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            frame.pixels(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        if self.sources.len() >= SOURCE_CACHE {
            let evicted = self.sources.remove(0);
            evicted.texture.destroy();
        }
        self.sources.push(SourceTexture {
            frame: frame.id(),
            texture,
            view: view.clone(),
        });
        view
    }
}
