//! Core GPU context and device management.
//!
//! This module provides [`GpuContext`], the struct that holds all wgpu resources
//! needed for rendering: instance-derived adapter, device, queue, the window
//! surface and its depth buffer. It implements [`RenderDevice`], so the eye
//! buffers and the frame compositor drive wgpu through it.
//!
//! # Frames
//!
//! A [`GpuFrame`] owns a command encoder and nothing else, so eye work never
//! waits on the window. [`RenderDevice::flush`] submits everything recorded so
//! far and starts a fresh encoder; this is how eye textures reach the GPU
//! before they are handed to the compositor. The surface image is a separate
//! [`GpuWindowImage`]; [`RenderDevice::end_frame`] submits the rest and
//! presents it when one was acquired.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use winit::window::Window;

use crate::device::{
    Attachment, AttachmentDesc, AttachmentKind, ClearColor, Extent, FramebufferStatus, PassTarget, RenderDevice,
    TextureHandle, check_attachments,
};
use crate::error::DeviceError;
use crate::texture::GpuTexture;

/// Core GPU context holding wgpu resources.
///
/// All wgpu fields are public to allow direct access when building pipelines.
/// The context is created once at startup and passed by reference to every
/// pass.
pub struct GpuContext {
    /// The surface for presenting rendered frames to the window.
    pub surface: wgpu::Surface<'static>,
    /// The adapter the device was created from; queried for format support.
    pub adapter: wgpu::Adapter,
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Current surface configuration (format, size, present mode).
    pub config: wgpu::SurfaceConfiguration,
    window_depth: GpuTexture,
    next_handle: AtomicU32,
}

impl GpuContext {
    /// Create a new GPU context from a winit window.
    ///
    /// Creates a wgpu instance with the primary backends, a surface for the
    /// window, an adapter compatible with it, and the device and queue. The
    /// surface is configured with an sRGB format and Fifo present mode.
    pub fn new(window: Arc<Window>) -> Result<Self, DeviceError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| DeviceError::Init(e.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| DeviceError::Init(format!("no suitable GPU adapter: {e}")))?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("PointVR Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| DeviceError::Init(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| DeviceError::Init("surface reports no formats".to_string()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        // Minimized windows report 0x0; keep the surface valid.
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let next_handle = AtomicU32::new(1);
        let window_depth = Self::create_window_depth(&device, &next_handle, &config);

        Ok(Self {
            surface,
            adapter,
            device,
            queue,
            config,
            window_depth,
            next_handle,
        })
    }

    fn allocate_handle(counter: &AtomicU32) -> TextureHandle {
        loop {
            // Zero is skipped on wrap-around.
            if let Some(handle) = TextureHandle::new(counter.fetch_add(1, Ordering::Relaxed)) {
                return handle;
            }
        }
    }

    fn create_window_depth(
        device: &wgpu::Device,
        counter: &AtomicU32,
        config: &wgpu::SurfaceConfiguration,
    ) -> GpuTexture {
        let desc = AttachmentDesc::depth(
            "Window Depth",
            Extent::new(config.width, config.height),
            1,
        );
        GpuTexture::new(device, &desc, Self::allocate_handle(counter))
    }

    /// Resize the surface to new dimensions.
    ///
    /// Call this when the window is resized. Ignores zero-sized dimensions
    /// (which occur while the window is minimized).
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
            self.window_depth =
                Self::create_window_depth(&self.device, &self.next_handle, &self.config);
        }
    }

    /// Returns the current surface width in pixels.
    pub fn width(&self) -> u32 {
        self.config.width
    }

    /// Returns the current surface height in pixels.
    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns the current aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }

    fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

/// One frame in flight on a [`GpuContext`].
pub struct GpuFrame {
    encoder: wgpu::CommandEncoder,
}

/// The acquired surface image for one frame.
pub struct GpuWindowImage {
    surface: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

impl RenderDevice for GpuContext {
    type Texture = GpuTexture;
    type Frame = GpuFrame;
    type WindowImage = GpuWindowImage;
    type Pass<'f> = wgpu::RenderPass<'f>;

    fn create_attachment(&self, desc: &AttachmentDesc) -> Result<GpuTexture, DeviceError> {
        if desc.extent.is_empty() {
            return Err(DeviceError::Unsupported(format!(
                "'{}' has an empty size {}",
                desc.label, desc.extent
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = GpuTexture::new(
            &self.device,
            desc,
            Self::allocate_handle(&self.next_handle),
        );
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(texture),
            Some(err) => Err(DeviceError::Unsupported(format!("'{}': {err}", desc.label))),
        }
    }

    fn framebuffer_status(
        &self,
        color: &GpuTexture,
        depth: Option<&GpuTexture>,
    ) -> FramebufferStatus {
        let status = check_attachments(color, depth);
        if !status.is_complete() {
            return status;
        }

        let max = self.device.limits().max_texture_dimension_2d;
        let extent = color.extent();
        if extent.width > max || extent.height > max {
            return FramebufferStatus::ExceedsLimits { extent, max };
        }

        for attachment in std::iter::once(color).chain(depth) {
            let features = self.adapter.get_texture_format_features(attachment.format());
            if !features.flags.sample_count_supported(attachment.samples()) {
                return FramebufferStatus::UnsupportedSampleCount(attachment.samples());
            }
        }
        FramebufferStatus::Complete
    }

    fn begin_frame(&self) -> GpuFrame {
        GpuFrame {
            encoder: self.create_encoder("Frame Encoder"),
        }
    }

    fn acquire_window(&self) -> Result<GpuWindowImage, DeviceError> {
        let surface = match self.surface.get_current_texture() {
            Ok(surface) => surface,
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.surface.configure(&self.device, &self.config);
                return Err(DeviceError::Surface(err.to_string()));
            }
            Err(err) => return Err(DeviceError::Surface(err.to_string())),
        };
        let view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuWindowImage { surface, view })
    }

    fn begin_pass<'f>(
        &'f self,
        frame: &'f mut GpuFrame,
        target: PassTarget<'f, GpuTexture, GpuWindowImage>,
        clear: ClearColor,
    ) -> wgpu::RenderPass<'f> {
        let (color_view, depth_view, extent, label) = match target {
            PassTarget::Framebuffer { color, depth } => {
                (&color.view, &depth.view, color.extent(), "Eye Render Pass")
            }
            PassTarget::Window(image) => (
                &image.view,
                &self.window_depth.view,
                self.window_extent(),
                "Window Render Pass",
            ),
        };

        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: clear.r,
                        g: clear.g,
                        b: clear.b,
                        a: clear.a,
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_viewport(
            0.0,
            0.0,
            extent.width as f32,
            extent.height as f32,
            0.0,
            1.0,
        );
        pass
    }

    fn resolve(&self, frame: &mut GpuFrame, src: &GpuTexture, dst: &GpuTexture) {
        if src.samples() > 1 {
            // An empty pass whose only effect is the MSAA resolve.
            let _pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Eye Resolve Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &src.view,
                    resolve_target: Some(&dst.view),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        } else {
            let extent = src.extent();
            frame.encoder.copy_texture_to_texture(
                src.texture.as_image_copy(),
                dst.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: extent.width,
                    height: extent.height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn flush(&self, frame: &mut GpuFrame) {
        let encoder = std::mem::replace(&mut frame.encoder, self.create_encoder("Frame Encoder"));
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn read_pixels(&self, texture: &GpuTexture) -> Result<Vec<u8>, DeviceError> {
        if texture.samples() != 1 || texture.kind() != AttachmentKind::Color {
            return Err(DeviceError::Readback(format!(
                "{} is not a single-sample color attachment",
                texture.handle()
            )));
        }

        let Extent { width, height } = texture.extent();
        let row_bytes = width * 4;
        let padded_row_bytes = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Eye Readback Buffer"),
            size: padded_row_bytes as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.create_encoder("Readback Encoder");
        encoder.copy_texture_to_buffer(
            texture.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| DeviceError::Readback(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| DeviceError::Readback(e.to_string()))?
            .map_err(|e| DeviceError::Readback(e.to_string()))?;

        let mut pixels = Vec::with_capacity((row_bytes * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_row_bytes as usize) {
                pixels.extend_from_slice(&row[..row_bytes as usize]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }

    fn end_frame(&self, frame: GpuFrame, window: Option<GpuWindowImage>) {
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        if let Some(image) = window {
            image.surface.present();
        }
    }

    fn window_extent(&self) -> Extent {
        Extent::new(self.config.width, self.config.height)
    }
}
