use crate::device::{Attachment, AttachmentDesc, AttachmentKind, Extent, Filter, TextureHandle};

/// Format of eye render targets. Gamma-encoded, as submitted to the compositor.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A GPU texture used as a framebuffer attachment.
///
/// Single-sample color textures can also be sampled and copied, so they work
/// as resolve targets and as mirror-window sources. Dropping the value
/// releases the GPU allocation.
#[derive(Debug)]
pub struct GpuTexture {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: Option<wgpu::Sampler>,
    handle: TextureHandle,
    extent: Extent,
    samples: u32,
    kind: AttachmentKind,
}

impl GpuTexture {
    pub(crate) fn new(device: &wgpu::Device, desc: &AttachmentDesc, handle: TextureHandle) -> Self {
        let format = match desc.kind {
            AttachmentKind::Color => COLOR_FORMAT,
            AttachmentKind::Depth => DEPTH_FORMAT,
        };
        let sampleable = desc.kind == AttachmentKind::Color && desc.samples == 1;
        let usage = if sampleable {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.extent.width,
                height: desc.extent.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: desc.samples,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = sampleable.then(|| {
            let filter = match desc.filter {
                Filter::Nearest => wgpu::FilterMode::Nearest,
                Filter::Linear => wgpu::FilterMode::Linear,
            };
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(&format!("{} Sampler", desc.label)),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        });

        log::trace!(
            "allocated {:?} attachment {handle} '{}' ({}, {}x)",
            desc.kind,
            desc.label,
            desc.extent,
            desc.samples
        );

        Self {
            texture,
            view,
            sampler,
            handle,
            extent: desc.extent,
            samples: desc.samples,
            kind: desc.kind,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Present only on single-sample color textures.
    pub fn sampler(&self) -> Option<&wgpu::Sampler> {
        self.sampler.as_ref()
    }
}

impl Attachment for GpuTexture {
    fn handle(&self) -> TextureHandle {
        self.handle
    }

    fn extent(&self) -> Extent {
        self.extent
    }

    fn samples(&self) -> u32 {
        self.samples
    }

    fn kind(&self) -> AttachmentKind {
        self.kind
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        log::trace!("released attachment {}", self.handle);
        self.texture.destroy();
    }
}
