//! # pointvr
//!
//! **A stereo point-cloud viewer for head-mounted displays.**
//!
//! Each frame blocks on the headset's pose source, renders both eyes into
//! multisampled off-screen targets, resolves them and hands the results to
//! the compositor. The same scene can be rendered straight into the desktop
//! window instead, and the user switches between the two at any frame
//! boundary.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pointvr::{AppConfig, RenderMode};
//!
//! fn main() -> anyhow::Result<()> {
//!     pointvr::run(
//!         AppConfig::new()
//!             .cloud("scan.bin")
//!             .samples(4)
//!             .start_mode(RenderMode::Vr),
//!     )
//! }
//! ```
//!
//! ## Layout
//!
//! - [`EyeBufferManager`] owns the per-eye render and resolve framebuffers.
//! - [`VrSystem`] wraps a [`VrRuntime`] and keeps the latest pose table. The
//!   runtime is the system's OpenXR runtime, or a software headset picked
//!   with [`RuntimeKind::Simulated`].
//! - [`FrameCompositor`] drives one frame in either [`RenderMode`].
//! - [`RenderDevice`] is the graphics seam; [`GpuContext`] implements it with
//!   wgpu.

mod app;
mod camera;
pub mod cli;
mod cloud_scene;
mod compositor;
mod controller;
mod device;
mod error;
mod eye;
mod eye_buffers;
mod freelook_camera;
mod gpu;
mod input;
mod logging;
pub mod math;
mod mirror;
mod point_cloud;
mod pose;
pub mod runtime;
mod scene_pass;
mod texture;
mod vr_system;

#[cfg(test)]
mod testing;

pub use app::{AppConfig, init_vr, load_cloud, run};
pub use camera::Camera;
pub use cloud_scene::{MoveTool, PointCloudScene};
pub use compositor::{
    FrameCompositor, FrameReport, PresentationWindow, RenderMode, SceneRenderer, ViewContext,
    ViewSlot, VrStage,
};
pub use controller::{Button, Controller, ControllerState};
pub use device::{
    Attachment, AttachmentDesc, AttachmentKind, ClearColor, Extent, FramebufferStatus,
    PassTarget, RenderDevice, TextureHandle,
};
pub use error::{
    CompositorError, ConfigError, DeviceError, FrameError, FramebufferError, FramebufferKind,
    PointCloudError, VrInitError,
};
pub use eye::Eye;
pub use eye_buffers::{DEFAULT_SAMPLE_COUNT, EyeBufferManager, EyeBufferSet};
pub use freelook_camera::FreelookCamera;
pub use gpu::{GpuContext, GpuFrame, GpuWindowImage};
pub use input::Input;
pub use logging::{LoggingConfig, init_logging};
pub use mirror::MirrorWindow;
pub use point_cloud::{Aabb, PointCloud, PointVertex};
pub use pose::PoseTable;
pub use runtime::{RuntimeKind, RuntimeProvider, VrRuntime};
pub use texture::GpuTexture;
pub use vr_system::{ClipPlanes, EventSummary, SubmitOutcome, VrSystem};

// Re-export glam math types for convenience
pub use glam::{Mat4, Vec2, Vec3};
