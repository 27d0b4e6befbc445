//! Point and line rendering with depth testing.
//!
//! [`ScenePass`] owns the pipelines, uniform buffers and bind groups used to
//! draw [`PointVertex`] geometry. It uses two bind groups:
//! - **Group 0**: Camera uniforms (view/projection matrices, camera position, time)
//! - **Group 1**: Model uniforms (model matrix, color tint)
//!
//! Pipelines exist twice: once for the multisampled eye targets and once for
//! the window. Camera uniforms exist once per [`ViewSlot`]; every slot is
//! written at most once per frame, so both eyes can be recorded into the same
//! submission without overwriting each other.

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::compositor::{ViewContext, ViewSlot};
use crate::gpu::GpuContext;
use crate::point_cloud::PointVertex;
use crate::texture::{COLOR_FORMAT, DEPTH_FORMAT};

/// Camera uniforms for one view.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    /// Combined view-projection matrix for transforming world positions to clip space.
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    /// Camera position in world space.
    pub camera_pos: [f32; 3],
    /// Elapsed time in seconds.
    pub time: f32,
}

impl CameraUniforms {
    pub fn new(view: &ViewContext, time: f32) -> Self {
        Self {
            view_proj: view.view_projection().to_cols_array_2d(),
            view: view.view.to_cols_array_2d(),
            proj: view.projection.to_cols_array_2d(),
            camera_pos: view.eye_position.to_array(),
            time,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniforms {
    pub model: [[f32; 4]; 4],
    /// RGBA multiplier applied to vertex colors.
    pub tint: [f32; 4],
}

/// Model uniform slots. Each is written once per frame in `prepare`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModelSlot {
    /// The point cloud and its bounding box.
    Cloud,
    /// Geometry already in world space: floor grid, axes, controller markers.
    World,
}

impl ModelSlot {
    const COUNT: usize = 2;

    fn index(self) -> usize {
        match self {
            ModelSlot::Cloud => 0,
            ModelSlot::World => 1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Primitive {
    Points,
    Lines,
}

/// A vertex buffer and how many vertices in it are valid.
pub struct GeometryBuffer {
    buffer: wgpu::Buffer,
    count: u32,
    capacity: u32,
}

impl GeometryBuffer {
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Replaces the contents of a dynamic buffer; extra vertices are dropped.
    pub fn write(&mut self, gpu: &GpuContext, vertices: &[PointVertex]) {
        let count = vertices.len().min(self.capacity as usize);
        if count > 0 {
            gpu.queue
                .write_buffer(&self.buffer, 0, bytemuck::cast_slice(&vertices[..count]));
        }
        self.count = count as u32;
    }
}

struct PipelineSet {
    points: wgpu::RenderPipeline,
    lines: wgpu::RenderPipeline,
}

struct UniformSlot {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

pub struct ScenePass {
    eye_pipelines: PipelineSet,
    window_pipelines: PipelineSet,
    cameras: Vec<UniformSlot>,
    models: Vec<UniformSlot>,
}

impl ScenePass {
    /// Builds pipelines for eye targets with `eye_samples` samples and for the
    /// window surface.
    pub fn new(gpu: &GpuContext, eye_samples: u32) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Points Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/points.wgsl").into()),
        });

        let camera_layout = Self::uniform_layout(device, "Camera Bind Group Layout");
        let model_layout = Self::uniform_layout(device, "Model Bind Group Layout");

        let cameras = ViewSlot::ALL
            .iter()
            .map(|slot| {
                Self::uniform_slot::<CameraUniforms>(
                    device,
                    &camera_layout,
                    &format!("Camera Uniforms ({slot:?})"),
                )
            })
            .collect();
        let models = (0..ModelSlot::COUNT)
            .map(|i| {
                Self::uniform_slot::<ModelUniforms>(
                    device,
                    &model_layout,
                    &format!("Model Uniforms {i}"),
                )
            })
            .collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &[&camera_layout, &model_layout],
            push_constant_ranges: &[],
        });

        let build = |format, samples| PipelineSet {
            points: Self::create_pipeline(
                device,
                &pipeline_layout,
                &shader,
                format,
                samples,
                wgpu::PrimitiveTopology::PointList,
            ),
            lines: Self::create_pipeline(
                device,
                &pipeline_layout,
                &shader,
                format,
                samples,
                wgpu::PrimitiveTopology::LineList,
            ),
        };

        Self {
            eye_pipelines: build(COLOR_FORMAT, eye_samples),
            window_pipelines: build(gpu.config.format, 1),
            cameras,
            models,
        }
    }

    fn uniform_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        })
    }

    fn uniform_slot<T>(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        label: &str,
    ) -> UniformSlot {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<T>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        UniformSlot { buffer, bind_group }
    }

    fn create_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        shader: &wgpu::ShaderModule,
        format: wgpu::TextureFormat,
        samples: u32,
        topology: wgpu::PrimitiveTopology,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("Scene {topology:?} Pipeline ({samples}x)")),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs"),
                buffers: &[PointVertex::desc()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: samples,
                ..Default::default()
            },
            multiview: None,
            cache: None,
        })
    }

    /// Uploads static geometry.
    pub fn create_geometry(
        &self,
        gpu: &GpuContext,
        label: &str,
        vertices: &[PointVertex],
    ) -> GeometryBuffer {
        let buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        GeometryBuffer {
            buffer,
            count: vertices.len() as u32,
            capacity: vertices.len() as u32,
        }
    }

    /// Allocates an empty buffer for geometry rewritten every frame.
    pub fn create_dynamic_geometry(
        &self,
        gpu: &GpuContext,
        label: &str,
        capacity: u32,
    ) -> GeometryBuffer {
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (capacity as usize * std::mem::size_of::<PointVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        GeometryBuffer {
            buffer,
            count: 0,
            capacity,
        }
    }

    pub fn write_model(&self, gpu: &GpuContext, slot: ModelSlot, model: Mat4, tint: [f32; 4]) {
        let uniforms = ModelUniforms {
            model: model.to_cols_array_2d(),
            tint,
        };
        gpu.queue.write_buffer(
            &self.models[slot.index()].buffer,
            0,
            bytemuck::cast_slice(&[uniforms]),
        );
    }

    /// Writes the view's camera slot and binds it.
    pub fn begin_view(
        &self,
        gpu: &GpuContext,
        render_pass: &mut wgpu::RenderPass,
        view: &ViewContext,
        time: f32,
    ) {
        let camera = &self.cameras[view.slot.index()];
        gpu.queue.write_buffer(
            &camera.buffer,
            0,
            bytemuck::cast_slice(&[CameraUniforms::new(view, time)]),
        );
        render_pass.set_bind_group(0, &camera.bind_group, &[]);
    }

    pub fn draw(
        &self,
        render_pass: &mut wgpu::RenderPass,
        slot: ViewSlot,
        primitive: Primitive,
        model: ModelSlot,
        geometry: &GeometryBuffer,
    ) {
        if geometry.count == 0 {
            return;
        }
        let pipelines = match slot {
            ViewSlot::Eye(_) => &self.eye_pipelines,
            ViewSlot::Desktop => &self.window_pipelines,
        };
        render_pass.set_pipeline(match primitive {
            Primitive::Points => &pipelines.points,
            Primitive::Lines => &pipelines.lines,
        });
        render_pass.set_bind_group(1, &self.models[model.index()].bind_group, &[]);
        render_pass.set_vertex_buffer(0, geometry.buffer.slice(..));
        render_pass.draw(0..geometry.count, 0..1);
    }
}
