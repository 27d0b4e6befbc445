//! Error types for the VR pipeline, eye buffers, and supporting loaders.
//!
//! A [`VrInitError`] stops startup unless desktop fallback was asked for; eye
//! buffer errors disable the VR path but never the process; per-frame errors
//! ([`CompositorError`], [`DeviceError::Surface`]) are logged and the next
//! frame retries.

use std::path::PathBuf;

use crate::device::FramebufferStatus;
use crate::eye::Eye;

/// Startup failure of the VR runtime. Checked once; never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VrInitError {
    #[error("no head-mounted display was found")]
    HmdNotPresent,
    #[error("no VR runtime is installed")]
    RuntimeNotInstalled,
    #[error("unable to init VR runtime: {0}")]
    Init(String),
}

/// Which of the two per-eye framebuffers a check refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferKind {
    Render,
    Resolve,
}

impl std::fmt::Display for FramebufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramebufferKind::Render => f.write_str("render"),
            FramebufferKind::Resolve => f.write_str("resolve"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FramebufferError {
    #[error("incomplete {kind} framebuffer for {eye} eye: {status}")]
    Incomplete {
        eye: Eye,
        kind: FramebufferKind,
        status: FramebufferStatus,
    },
    #[error("failed to allocate {eye} eye attachment: {message}")]
    Allocation { eye: Eye, message: String },
    #[error("eye buffers have not been initialized")]
    NotInitialized,
}

/// Compositor rejection of a submitted eye texture.
///
/// Discriminants match the runtime's numeric error codes so they can be
/// logged as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CompositorError {
    #[error("request failed (code 1)")]
    RequestFailed = 1,
    #[error("incompatible runtime version (code 100)")]
    IncompatibleVersion = 100,
    #[error("application does not have focus (code 101)")]
    DoNotHaveFocus = 101,
    #[error("invalid texture (code 102)")]
    InvalidTexture = 102,
    #[error("not a scene application (code 103)")]
    IsNotSceneApplication = 103,
    #[error("texture is on the wrong device (code 104)")]
    TextureIsOnWrongDevice = 104,
    #[error("texture uses an unsupported format (code 105)")]
    TextureUsesUnsupportedFormat = 105,
    #[error("shared textures are not supported (code 106)")]
    SharedTexturesNotSupported = 106,
    #[error("index out of range (code 107)")]
    IndexOutOfRange = 107,
    #[error("texture was already submitted this frame (code 108)")]
    AlreadySubmitted = 108,
}

impl CompositorError {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to initialize graphics device: {0}")]
    Init(String),
    #[error("failed to acquire surface texture: {0}")]
    Surface(String),
    #[error("unsupported attachment: {0}")]
    Unsupported(String),
    #[error("failed to read back texture: {0}")]
    Readback(String),
}

/// Failure while producing one frame. The loop logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Framebuffer(#[from] FramebufferError),
}

#[derive(Debug, thiserror::Error)]
pub enum PointCloudError {
    #[error("failed to read point cloud {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("point cloud buffer of {0} bytes is not a whole number of XYZRGB vertices")]
    MalformedLength(usize),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("clip planes must satisfy 0 < near < far (near = {near}, far = {far})")]
    ClipPlanes { near: f32, far: f32 },
    #[error("unsupported MSAA sample count {0}; expected 1, 2, 4 or 8")]
    SampleCount(u32),
    #[error("size must be non-zero, got {width}x{height}")]
    ZeroSize { width: u32, height: u32 },
    #[error("invalid size '{0}', expected WIDTHxHEIGHT")]
    SizeSyntax(String),
    #[error("field of view must be between 0 and 180 degrees, got {0}")]
    FieldOfView(f32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compositor_codes_match_runtime_values() {
        assert_eq!(CompositorError::RequestFailed.code(), 1);
        assert_eq!(CompositorError::DoNotHaveFocus.code(), 101);
        assert_eq!(CompositorError::AlreadySubmitted.code(), 108);
    }

    #[test]
    fn framebuffer_error_names_eye_and_kind() {
        let err = FramebufferError::Incomplete {
            eye: Eye::Right,
            kind: FramebufferKind::Resolve,
            status: FramebufferStatus::MissingAttachment,
        };
        let msg = err.to_string();
        assert!(msg.contains("resolve"));
        assert!(msg.contains("right"));
    }
}
