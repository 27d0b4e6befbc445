//! The VR runtime seam.
//!
//! [`VrRuntime`] is everything the pipeline asks of the headset runtime:
//! tracking, per-eye intrinsics, input focus, frame submission and events.
//! [`RuntimeProvider`] performs the one-time startup checks and opens a
//! session.
//!
//! [`xr`] drives a real headset through the system's OpenXR runtime.
//! [`simulated`] provides a software headset so the full stereo path can run
//! (and be tested) without hardware. [`select`] picks one at startup.

mod pixels;
pub mod select;
pub mod simulated;
mod vulkan;
pub mod xr;

use glam::Vec3;

use crate::controller::ControllerState;
use crate::device::{Extent, TextureHandle};
use crate::error::{CompositorError, VrInitError};
use crate::eye::Eye;
use crate::math::{HmdMatrix34, HmdMatrix44};

pub use select::{HeadsetProvider, HeadsetRuntime, RuntimeKind};
pub use simulated::{SimulatedConfig, SimulatedProvider, SimulatedRuntime};
pub use xr::{OpenXrProvider, OpenXrRuntime};

/// Number of tracked device slots the runtime reports each frame.
pub const MAX_TRACKED_DEVICES: usize = 64;

/// Slot of the headset itself.
pub const HMD_DEVICE_INDEX: usize = 0;

/// One device's pose as reported by the runtime.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TrackedDevicePose {
    /// Where the device is in tracking space.
    pub device_to_absolute_tracking: HmdMatrix34,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub pose_is_valid: bool,
    pub device_is_connected: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Invalid,
    Hmd,
    Controller,
    TrackingReference,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceProperty {
    TrackingSystemName,
    SerialNumber,
    ModelNumber,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VrEvent {
    DeviceActivated(usize),
    DeviceDeactivated(usize),
    InputFocusCaptured,
    InputFocusReleased,
    Quit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    Gamma,
    Linear,
}

/// How a runtime takes eye textures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureTransfer {
    /// The runtime shares the renderer's device; the handle is enough.
    Handle,
    /// The runtime owns its own swapchains and needs the pixels.
    Pixels,
}

/// A resolved eye texture handed to the compositor.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SubmitTexture<'a> {
    pub handle: TextureHandle,
    pub extent: Extent,
    pub color_space: ColorSpace,
    /// Tightly packed RGBA8 rows, top row first. Present only when the
    /// runtime asked for [`TextureTransfer::Pixels`].
    pub pixels: Option<&'a [u8]>,
}

/// An open session with a VR runtime.
///
/// Dropping the runtime ends the session.
pub trait VrRuntime {
    /// Per-eye render-target size the runtime wants. Queried once at startup.
    fn recommended_render_target_size(&self) -> Extent;

    /// Blocks until the compositor is ready for the next frame, then fills
    /// `poses`. Paces the render loop to the display refresh.
    fn wait_get_poses(&mut self, poses: &mut [TrackedDevicePose; MAX_TRACKED_DEVICES]);

    fn projection_matrix(&self, eye: Eye, near: f32, far: f32) -> HmdMatrix44;

    /// Offset of `eye` relative to the head pose.
    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34;

    fn has_input_focus(&self) -> bool;

    fn texture_transfer(&self) -> TextureTransfer {
        TextureTransfer::Handle
    }

    fn submit(&mut self, eye: Eye, texture: &SubmitTexture<'_>) -> Result<(), CompositorError>;

    fn poll_event(&mut self) -> Option<VrEvent>;

    fn device_class(&self, index: usize) -> DeviceClass;

    fn controller_state(&self, index: usize) -> Option<ControllerState>;

    fn device_string(&self, index: usize, property: DeviceProperty) -> Option<String>;
}

/// Startup checks and session creation for a runtime.
pub trait RuntimeProvider {
    type Runtime: VrRuntime;

    fn is_hmd_present(&self) -> bool;

    fn is_runtime_installed(&self) -> bool;

    fn init(self) -> Result<Self::Runtime, VrInitError>;
}
