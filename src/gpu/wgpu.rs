// SPDX-License-Identifier: GPL-3.0-or-later

//! wgpu renderer applying a [`DistortionMesh`] to source frames.
//!
//! Input frames are tightly packed RGBA8, `viewport_side` x `viewport_side`,
//! bottom row first (the order a GL framebuffer readback produces). Output is
//! the warped RGBA8 screen image, top row first. The mesh is uploaded once at
//! construction; per frame only the source texture changes, the geometry is
//! static.

use bytemuck::{ Pod, Zeroable };
use parking_lot::RwLock;
use wgpu::util::DeviceExt;

use crate::mesh::{ DistortionMesh, CELL_SIZE_PX };
use crate::{ DistorterError, Result };

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct WarpVertex {
    position: [f32; 2],
    tex_coord: [f32; 2],
    brightness: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Globals {
    screen_size: [f32; 2],
    _pad: [f32; 2],
}

const RESTART_INDEX: u32 = 0xFFFF_FFFF;

lazy_static::lazy_static! {
    static ref ADAPTER: RwLock<Option<wgpu::Adapter>> = RwLock::new(None);
}

/// Picks a GPU adapter once per process and returns its name.
pub fn initialize_context() -> Option<String> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
    let info = adapter.get_info();
    log::debug!("wgpu adapter: {:?}", &info);
    let name = info.name.clone();
    *ADAPTER.write() = Some(adapter);
    Some(name)
}

pub struct WarpRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    frame_texture: wgpu::Texture,
    target: wgpu::Texture,
    staging_buffer: wgpu::Buffer,

    screen: (u32, u32),
    viewport_side: u32,
    in_size: usize,
    out_size: usize,
    out_stride: u32,
    padded_out_stride: u32,
}

impl WarpRenderer {
    pub fn new(mesh: &DistortionMesh) -> Result<Self> {
        if ADAPTER.read().is_none() && initialize_context().is_none() {
            return Err(DistorterError::NoGpuAdapter);
        }
        let adapter_lock = ADAPTER.read();
        let adapter = adapter_lock.as_ref().ok_or(DistorterError::NoGpuAdapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("domewarp device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
            },
            None,
        ))
        .map_err(|e| DistorterError::GpuInit(e.to_string()))?;

        let (screen_w, screen_h) = mesh.screen();
        let viewport_side = mesh.viewport_side();
        let texture_side = mesh.texture_side();

        let (vertices, indices) = Self::tessellate(mesh);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("warp mesh vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("warp mesh indices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let globals = Globals {
            screen_size: [screen_w as f32, screen_h as f32],
            _pad: [0.0; 2],
        };
        let globals_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("warp globals"),
            contents: bytemuck::bytes_of(&globals),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let frame_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("source frame"),
            size: wgpu::Extent3d { width: texture_side, height: texture_side, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("warped frame"),
            size: wgpu::Extent3d { width: screen_w, height: screen_h, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("warp bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("warp bind group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: globals_buffer.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        &frame_texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    ),
                },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&sampler) },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("warp shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("warp.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("warp pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("warp pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<WarpVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: Some(wgpu::IndexFormat::Uint32),
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let out_stride = screen_w * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_out_stride = (out_stride + align - 1) / align * align;
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("warp readback"),
            size: padded_out_stride as u64 * screen_h as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            frame_texture,
            target,
            staging_buffer,
            screen: (screen_w, screen_h),
            viewport_side,
            in_size: (viewport_side * viewport_side * 4) as usize,
            out_size: (screen_w * screen_h * 4) as usize,
            out_stride,
            padded_out_stride,
        })
    }

    /// Flattens the mesh into one vertex per grid point and one triangle
    /// strip per row pair, joined with the primitive restart index.
    fn tessellate(mesh: &DistortionMesh) -> (Vec<WarpVertex>, Vec<u32>) {
        let cols = mesh.cols();
        let rows = mesh.rows();
        let cell = CELL_SIZE_PX as f32;

        let mut vertices = Vec::with_capacity(cols * rows);
        for j in 0..rows {
            for i in 0..cols {
                let v = mesh.vertex(i, j);
                vertices.push(WarpVertex {
                    position: [i as f32 * cell, j as f32 * cell],
                    tex_coord: [v.u, v.v],
                    brightness: v.brightness,
                });
            }
        }

        let mut indices = Vec::with_capacity((rows - 1) * (2 * cols + 1));
        for j in 0..rows - 1 {
            for i in 0..cols {
                indices.push(((j + 1) * cols + i) as u32);
                indices.push((j * cols + i) as u32);
            }
            indices.push(RESTART_INDEX);
        }
        (vertices, indices)
    }

    /// Warps one source frame into `output`.
    ///
    /// `frame` must be `viewport_side² * 4` bytes, `output` must hold the
    /// full screen image.
    pub fn warp_frame(&self, frame: &[u8], output: &mut [u8]) -> Result<()> {
        if frame.len() != self.in_size {
            log::error!("bad frame buffer: {} bytes, expected {}", frame.len(), self.in_size);
            return Err(DistorterError::BufferSizeMismatch { expected: self.in_size, got: frame.len() });
        }
        if output.len() != self.out_size {
            log::error!("bad output buffer: {} bytes, expected {}", output.len(), self.out_size);
            return Err(DistorterError::BufferSizeMismatch { expected: self.out_size, got: output.len() });
        }

        self.queue.write_texture(
            self.frame_texture.as_image_copy(),
            frame,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.viewport_side * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d { width: self.viewport_side, height: self.viewport_side, depth_or_array_layers: 1 },
        );

        let view = self.target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("warp encoder") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("warp pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
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
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..self.index_count, 0, 0..1);
        }
        encoder.copy_texture_to_buffer(
            self.target.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &self.staging_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_out_stride),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d { width: self.screen.0, height: self.screen.1, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = self.staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| DistorterError::GpuReadback(e.to_string()))?
            .map_err(|e| DistorterError::GpuReadback(e.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            let stride = self.out_stride as usize;
            let padded = self.padded_out_stride as usize;
            for (row_out, row_in) in output.chunks_exact_mut(stride).zip(mapped.chunks_exact(padded)) {
                row_out.copy_from_slice(&row_in[..stride]);
            }
        }
        self.staging_buffer.unmap();
        Ok(())
    }

    pub fn screen(&self) -> (u32, u32) {
        self.screen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::DistortionMesh;
    use crate::optics::MirrorOptics;
    use crate::MirrorConfig;

    fn mesh() -> DistortionMesh {
        let config = MirrorConfig::default();
        let optics = MirrorOptics::new(&config).unwrap();
        DistortionMesh::build(&optics, config.gamma_clamped(), 320, 240)
    }

    #[test]
    fn tessellation_covers_the_grid() {
        let mesh = mesh();
        let (vertices, indices) = WarpRenderer::tessellate(&mesh);
        assert_eq!(vertices.len(), 21 * 16);
        // 15 strips of 2 * 21 indices plus one restart each.
        assert_eq!(indices.len(), 15 * (2 * 21 + 1));
        for &i in &indices {
            assert!(i == RESTART_INDEX || (i as usize) < vertices.len());
        }
        // Last strip ends on a restart right after the top-left vertex pair.
        assert_eq!(indices[indices.len() - 1], RESTART_INDEX);
    }

    #[test]
    fn vertex_positions_span_the_screen() {
        let mesh = mesh();
        let (vertices, _) = WarpRenderer::tessellate(&mesh);
        assert_eq!(vertices[0].position, [0.0, 0.0]);
        assert_eq!(vertices[vertices.len() - 1].position, [320.0, 240.0]);
    }
}
