//! The graphics-device seam used by the stereo pipeline.
//!
//! [`RenderDevice`] captures exactly the operations the eye buffers and the
//! frame compositor need: allocate attachments, check that a framebuffer is
//! complete, record passes into a frame, resolve, flush, read back and
//! present. A frame never owns the window image: eye work records into a bare
//! frame, and the window image is acquired separately only when something is
//! drawn to the desktop, so a lost surface cannot cost a headset frame. The wgpu
//! implementation lives on [`GpuContext`](crate::GpuContext); tests use a
//! recording implementation.
//!
//! Attachments are RAII values. Dropping one releases its GPU memory and
//! retires its [`TextureHandle`].

use std::fmt;
use std::num::NonZeroU32;

use crate::error::DeviceError;

/// GL-style name for an attachment.
///
/// Handles are never zero; "no handle" is expressed as `Option<TextureHandle>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(NonZeroU32);

impl TextureHandle {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pixel dimensions of a render target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Color,
    Depth,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Description of one framebuffer attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentDesc {
    pub label: String,
    pub kind: AttachmentKind,
    pub extent: Extent,
    pub samples: u32,
    /// Sampling filter when the attachment is read as a texture.
    pub filter: Filter,
}

impl AttachmentDesc {
    pub fn color(label: impl Into<String>, extent: Extent, samples: u32) -> Self {
        Self {
            label: label.into(),
            kind: AttachmentKind::Color,
            extent,
            samples,
            filter: Filter::Nearest,
        }
    }

    pub fn depth(label: impl Into<String>, extent: Extent, samples: u32) -> Self {
        Self {
            label: label.into(),
            kind: AttachmentKind::Depth,
            extent,
            samples,
            filter: Filter::Nearest,
        }
    }

    pub fn linear(mut self) -> Self {
        self.filter = Filter::Linear;
        self
    }
}

/// An allocated attachment.
pub trait Attachment {
    fn handle(&self) -> TextureHandle;
    fn extent(&self) -> Extent;
    fn samples(&self) -> u32;
    fn kind(&self) -> AttachmentKind;
}

/// Result of a framebuffer completeness check.
#[derive(Clone, Debug, PartialEq)]
pub enum FramebufferStatus {
    Complete,
    MissingAttachment,
    WrongAttachmentKind,
    DimensionMismatch { color: Extent, depth: Extent },
    SampleCountMismatch { color: u32, depth: u32 },
    UnsupportedSampleCount(u32),
    ExceedsLimits { extent: Extent, max: u32 },
    Unsupported(String),
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramebufferStatus::Complete => f.write_str("complete"),
            FramebufferStatus::MissingAttachment => f.write_str("missing or empty attachment"),
            FramebufferStatus::WrongAttachmentKind => {
                f.write_str("attachment bound to the wrong slot")
            }
            FramebufferStatus::DimensionMismatch { color, depth } => {
                write!(f, "color is {color} but depth is {depth}")
            }
            FramebufferStatus::SampleCountMismatch { color, depth } => {
                write!(f, "color has {color} samples but depth has {depth}")
            }
            FramebufferStatus::UnsupportedSampleCount(n) => {
                write!(f, "{n}x multisampling is not supported for this format")
            }
            FramebufferStatus::ExceedsLimits { extent, max } => {
                write!(f, "{extent} exceeds the device limit of {max}")
            }
            FramebufferStatus::Unsupported(msg) => f.write_str(msg),
        }
    }
}

/// Device-independent part of the completeness check: attachment slots,
/// non-empty sizes, and matching sizes and sample counts.
pub fn check_attachments<T: Attachment>(color: &T, depth: Option<&T>) -> FramebufferStatus {
    if color.kind() != AttachmentKind::Color {
        return FramebufferStatus::WrongAttachmentKind;
    }
    if color.extent().is_empty() {
        return FramebufferStatus::MissingAttachment;
    }
    let Some(depth) = depth else {
        return FramebufferStatus::Complete;
    };
    if depth.kind() != AttachmentKind::Depth {
        return FramebufferStatus::WrongAttachmentKind;
    }
    if depth.extent() != color.extent() {
        return FramebufferStatus::DimensionMismatch {
            color: color.extent(),
            depth: depth.extent(),
        };
    }
    if depth.samples() != color.samples() {
        return FramebufferStatus::SampleCountMismatch {
            color: color.samples(),
            depth: depth.samples(),
        };
    }
    FramebufferStatus::Complete
}

/// Clear color applied when a target is bound. Depth is always cleared to 1.0.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::rgb(0.01, 0.01, 0.01)
    }
}

/// What a pass draws into.
pub enum PassTarget<'a, T, W> {
    /// An off-screen framebuffer (an eye's render target).
    Framebuffer { color: &'a T, depth: &'a T },
    /// An acquired desktop window image.
    Window(&'a W),
}

/// Graphics operations needed by the stereo pipeline.
///
/// A frame is opened with [`begin_frame`](Self::begin_frame), receives any
/// number of passes, resolves and flushes, and is closed with
/// [`end_frame`](Self::end_frame). Window passes need an image from
/// [`acquire_window`](Self::acquire_window); handing it to `end_frame`
/// presents it.
pub trait RenderDevice {
    type Texture: Attachment;
    type Frame;
    /// The desktop window's current image.
    type WindowImage;
    /// An open pass. Draw calls issued through it land in the pass target
    /// until it is dropped.
    type Pass<'f>
    where
        Self: 'f;

    fn create_attachment(&self, desc: &AttachmentDesc) -> Result<Self::Texture, DeviceError>;

    fn framebuffer_status(
        &self,
        color: &Self::Texture,
        depth: Option<&Self::Texture>,
    ) -> FramebufferStatus;

    fn begin_frame(&self) -> Self::Frame;

    /// Fails when the window surface is lost or outdated; the device recovers
    /// for a later call.
    fn acquire_window(&self) -> Result<Self::WindowImage, DeviceError>;

    /// Binds `target`, sets the viewport to its full size, enables depth
    /// testing and clears color and depth.
    fn begin_pass<'f>(
        &'f self,
        frame: &'f mut Self::Frame,
        target: PassTarget<'f, Self::Texture, Self::WindowImage>,
        clear: ClearColor,
    ) -> Self::Pass<'f>;

    /// Copies `src` into the single-sample `dst`, resolving samples if needed.
    fn resolve(&self, frame: &mut Self::Frame, src: &Self::Texture, dst: &Self::Texture);

    /// Hands recorded work to the GPU so external consumers see finished
    /// textures.
    fn flush(&self, frame: &mut Self::Frame);

    /// Tightly packed RGBA8 rows of a single-sample color attachment, top row
    /// first. Only work already flushed is visible.
    fn read_pixels(&self, texture: &Self::Texture) -> Result<Vec<u8>, DeviceError>;

    /// Submits the rest of the frame and presents `window` if one was
    /// acquired.
    fn end_frame(&self, frame: Self::Frame, window: Option<Self::WindowImage>);

    fn window_extent(&self) -> Extent;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain {
        kind: AttachmentKind,
        extent: Extent,
        samples: u32,
    }

    impl Attachment for Plain {
        fn handle(&self) -> TextureHandle {
            TextureHandle::new(1).unwrap()
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

    fn color(w: u32, h: u32, samples: u32) -> Plain {
        Plain {
            kind: AttachmentKind::Color,
            extent: Extent::new(w, h),
            samples,
        }
    }

    fn depth(w: u32, h: u32, samples: u32) -> Plain {
        Plain {
            kind: AttachmentKind::Depth,
            extent: Extent::new(w, h),
            samples,
        }
    }

    #[test]
    fn zero_handle_is_not_a_handle() {
        assert!(TextureHandle::new(0).is_none());
        assert_eq!(TextureHandle::new(7).unwrap().get(), 7);
    }

    #[test]
    fn matching_attachments_are_complete() {
        let status = check_attachments(&color(1512, 1680, 4), Some(&depth(1512, 1680, 4)));
        assert!(status.is_complete());
    }

    #[test]
    fn mismatched_size_is_incomplete() {
        let status = check_attachments(&color(1512, 1680, 4), Some(&depth(100, 100, 4)));
        assert!(matches!(status, FramebufferStatus::DimensionMismatch { .. }));
    }

    #[test]
    fn mismatched_samples_is_incomplete() {
        let status = check_attachments(&color(64, 64, 4), Some(&depth(64, 64, 1)));
        assert_eq!(
            status,
            FramebufferStatus::SampleCountMismatch { color: 4, depth: 1 }
        );
    }

    #[test]
    fn empty_or_swapped_attachments_are_incomplete() {
        assert_eq!(
            check_attachments(&color(0, 64, 1), None),
            FramebufferStatus::MissingAttachment
        );
        assert_eq!(
            check_attachments(&depth(64, 64, 1), None),
            FramebufferStatus::WrongAttachmentKind
        );
    }
}
