//! Picks the headset backend at startup.

use super::simulated::{SimulatedConfig, SimulatedProvider, SimulatedRuntime};
use super::xr::{OpenXrProvider, OpenXrRuntime};
use super::{
    DeviceClass, DeviceProperty, MAX_TRACKED_DEVICES, RuntimeProvider, SubmitTexture,
    TextureTransfer, TrackedDevicePose, VrEvent, VrRuntime,
};
use crate::controller::ControllerState;
use crate::device::Extent;
use crate::error::{CompositorError, VrInitError};
use crate::eye::Eye;
use crate::math::{HmdMatrix34, HmdMatrix44};

/// Which headset backend to open.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RuntimeKind {
    /// The system's OpenXR runtime.
    #[default]
    OpenXr,
    /// The software headset.
    Simulated,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::OpenXr => f.write_str("OpenXR"),
            RuntimeKind::Simulated => f.write_str("simulated"),
        }
    }
}

pub enum HeadsetProvider {
    OpenXr(OpenXrProvider),
    Simulated(SimulatedProvider),
}

impl HeadsetProvider {
    /// Builds the provider for `kind`. `simulated` only configures the
    /// software headset.
    pub fn new(kind: RuntimeKind, simulated: SimulatedConfig) -> Self {
        match kind {
            RuntimeKind::OpenXr => HeadsetProvider::OpenXr(OpenXrProvider::new()),
            RuntimeKind::Simulated => HeadsetProvider::Simulated(SimulatedProvider::new(simulated)),
        }
    }

    pub fn kind(&self) -> RuntimeKind {
        match self {
            HeadsetProvider::OpenXr(_) => RuntimeKind::OpenXr,
            HeadsetProvider::Simulated(_) => RuntimeKind::Simulated,
        }
    }
}

impl RuntimeProvider for HeadsetProvider {
    type Runtime = HeadsetRuntime;

    fn is_hmd_present(&self) -> bool {
        match self {
            HeadsetProvider::OpenXr(p) => p.is_hmd_present(),
            HeadsetProvider::Simulated(p) => p.is_hmd_present(),
        }
    }

    fn is_runtime_installed(&self) -> bool {
        match self {
            HeadsetProvider::OpenXr(p) => p.is_runtime_installed(),
            HeadsetProvider::Simulated(p) => p.is_runtime_installed(),
        }
    }

    fn init(self) -> Result<HeadsetRuntime, VrInitError> {
        match self {
            HeadsetProvider::OpenXr(p) => p.init().map(HeadsetRuntime::OpenXr),
            HeadsetProvider::Simulated(p) => p.init().map(HeadsetRuntime::Simulated),
        }
    }
}

/// An open session on whichever backend was picked.
pub enum HeadsetRuntime {
    OpenXr(OpenXrRuntime),
    Simulated(SimulatedRuntime),
}

macro_rules! delegate {
    ($self:expr, $rt:ident => $call:expr) => {
        match $self {
            HeadsetRuntime::OpenXr($rt) => $call,
            HeadsetRuntime::Simulated($rt) => $call,
        }
    };
}

impl VrRuntime for HeadsetRuntime {
    fn recommended_render_target_size(&self) -> Extent {
        delegate!(self, rt => rt.recommended_render_target_size())
    }

    fn wait_get_poses(&mut self, poses: &mut [TrackedDevicePose; MAX_TRACKED_DEVICES]) {
        delegate!(self, rt => rt.wait_get_poses(poses))
    }

    fn projection_matrix(&self, eye: Eye, near: f32, far: f32) -> HmdMatrix44 {
        delegate!(self, rt => rt.projection_matrix(eye, near, far))
    }

    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34 {
        delegate!(self, rt => rt.eye_to_head_transform(eye))
    }

    fn has_input_focus(&self) -> bool {
        delegate!(self, rt => rt.has_input_focus())
    }

    fn texture_transfer(&self) -> TextureTransfer {
        delegate!(self, rt => rt.texture_transfer())
    }

    fn submit(&mut self, eye: Eye, texture: &SubmitTexture<'_>) -> Result<(), CompositorError> {
        delegate!(self, rt => rt.submit(eye, texture))
    }

    fn poll_event(&mut self) -> Option<VrEvent> {
        delegate!(self, rt => rt.poll_event())
    }

    fn device_class(&self, index: usize) -> DeviceClass {
        delegate!(self, rt => rt.device_class(index))
    }

    fn controller_state(&self, index: usize) -> Option<ControllerState> {
        delegate!(self, rt => rt.controller_state(index))
    }

    fn device_string(&self, index: usize, property: DeviceProperty) -> Option<String> {
        delegate!(self, rt => rt.device_string(index, property))
    }
}
