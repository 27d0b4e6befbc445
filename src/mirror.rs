//! Desktop mirror of the two eye images.

use crate::compositor::PresentationWindow;
use crate::device::{Attachment, ClearColor, PassTarget, RenderDevice, TextureHandle};
use crate::gpu::{GpuContext, GpuFrame, GpuWindowImage};
use crate::texture::{DEPTH_FORMAT, GpuTexture};

/// Draws the left eye into the left half of the window and the right eye into
/// the right half.
pub struct MirrorWindow {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    bind_groups: Option<([TextureHandle; 2], [wgpu::BindGroup; 2])>,
}

impl MirrorWindow {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mirror Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mirror Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mirror Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        // The window pass carries a depth attachment; the blit ignores it.
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mirror Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            pipeline,
            bind_group_layout,
            sampler,
            bind_groups: None,
        }
    }

    fn bind_group(&self, gpu: &GpuContext, texture: &GpuTexture) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Mirror Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(
                        texture.sampler().unwrap_or(&self.sampler),
                    ),
                },
            ],
        })
    }
}

impl PresentationWindow<GpuContext> for MirrorWindow {
    fn present(
        &mut self,
        gpu: &GpuContext,
        frame: &mut GpuFrame,
        window: &GpuWindowImage,
        left: &GpuTexture,
        right: &GpuTexture,
        clear: ClearColor,
    ) {
        let handles = [left.handle(), right.handle()];
        // Eye buffers are recreated with new handles, so a handle match means
        // the cached bind groups still point at live textures.
        let stale = self
            .bind_groups
            .as_ref()
            .is_none_or(|(cached, _)| *cached != handles);
        if stale {
            let groups = [self.bind_group(gpu, left), self.bind_group(gpu, right)];
            self.bind_groups = Some((handles, groups));
        }
        let Some((_, groups)) = &self.bind_groups else {
            return;
        };

        let half_width = gpu.width() as f32 / 2.0;
        let height = gpu.height() as f32;

        let mut pass = gpu.begin_pass(frame, PassTarget::Window(window), clear);
        pass.set_pipeline(&self.pipeline);
        for (i, group) in groups.iter().enumerate() {
            pass.set_viewport(i as f32 * half_width, 0.0, half_width, height, 0.0, 1.0);
            pass.set_bind_group(0, group, &[]);
            pass.draw(0..3, 0..1);
        }
    }
}
