//! A software headset.
//!
//! `SimulatedRuntime` behaves like a seated HMD session: it paces
//! `wait_get_poses` to the configured refresh rate, sways the head a little,
//! holds two controllers in front of the user, and validates submitted eye
//! textures the way a compositor would. Motion is driven by the frame counter,
//! not the wall clock, so poses are reproducible.
//!
//! Controller buttons, axes and hand offsets are set from outside with
//! [`SimulatedRuntime::set_controller_state`] and
//! [`SimulatedRuntime::move_controller`]; the viewer maps keys onto them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use glam::{Mat4, Quat, Vec3};

use super::{
    DeviceClass, DeviceProperty, HMD_DEVICE_INDEX, MAX_TRACKED_DEVICES, RuntimeProvider,
    SubmitTexture, TrackedDevicePose, VrEvent, VrRuntime,
};
use crate::controller::ControllerState;
use crate::device::Extent;
use crate::error::{CompositorError, VrInitError};
use crate::eye::Eye;
use crate::math::{HmdMatrix34, HmdMatrix44, frustum_from_tangents};

/// Settings for the simulated headset.
#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    pub hmd_present: bool,
    pub runtime_installed: bool,
    /// Recommended per-eye render-target size.
    pub render_target_size: Extent,
    /// Display refresh in Hz; `wait_get_poses` blocks to this cadence.
    pub refresh_rate: f32,
    /// Sleep in `wait_get_poses`. Disabled in tests.
    pub pace_frames: bool,
    /// Inter-pupillary distance in meters.
    pub ipd: f32,
    /// Horizontal field of view per eye, in degrees.
    pub fov_degrees: f32,
    pub head_height: f32,
    /// Number of tracked controllers, at most two.
    pub controllers: usize,
    pub input_focus: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            hmd_present: true,
            runtime_installed: true,
            render_target_size: Extent::new(1512, 1680),
            refresh_rate: 90.0,
            pace_frames: true,
            ipd: 0.064,
            fov_degrees: 110.0,
            head_height: 1.7,
            controllers: 2,
            input_focus: true,
        }
    }
}

impl SimulatedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_target_size(mut self, width: u32, height: u32) -> Self {
        self.render_target_size = Extent::new(width, height);
        self
    }

    pub fn refresh_rate(mut self, hz: f32) -> Self {
        self.refresh_rate = hz;
        self
    }

    pub fn unpaced(mut self) -> Self {
        self.pace_frames = false;
        self
    }

    pub fn without_hmd(mut self) -> Self {
        self.hmd_present = false;
        self
    }

    pub fn without_runtime(mut self) -> Self {
        self.runtime_installed = false;
        self
    }

    pub fn input_focus(mut self, focus: bool) -> Self {
        self.input_focus = focus;
        self
    }

    pub fn controllers(mut self, count: usize) -> Self {
        self.controllers = count.min(2);
        self
    }
}

/// Opens [`SimulatedRuntime`] sessions.
#[derive(Clone, Debug, Default)]
pub struct SimulatedProvider {
    config: SimulatedConfig,
}

impl SimulatedProvider {
    pub fn new(config: SimulatedConfig) -> Self {
        Self { config }
    }
}

impl RuntimeProvider for SimulatedProvider {
    type Runtime = SimulatedRuntime;

    fn is_hmd_present(&self) -> bool {
        self.config.hmd_present
    }

    fn is_runtime_installed(&self) -> bool {
        self.config.runtime_installed
    }

    fn init(self) -> Result<SimulatedRuntime, VrInitError> {
        let size = self.config.render_target_size;
        if size.is_empty() {
            return Err(VrInitError::Init(format!(
                "invalid render target size {size}"
            )));
        }
        if !(self.config.refresh_rate > 0.0) {
            return Err(VrInitError::Init(format!(
                "invalid refresh rate {}",
                self.config.refresh_rate
            )));
        }
        Ok(SimulatedRuntime::new(self.config))
    }
}

pub struct SimulatedRuntime {
    config: SimulatedConfig,
    frame: u64,
    next_vsync: Option<Instant>,
    has_focus: bool,
    events: VecDeque<VrEvent>,
    submitted_this_frame: [bool; 2],
    submissions: [u64; 2],
    controller_states: [ControllerState; 2],
    controller_offsets: [Vec3; 2],
}

impl SimulatedRuntime {
    fn new(config: SimulatedConfig) -> Self {
        let mut events = VecDeque::new();
        events.push_back(VrEvent::DeviceActivated(HMD_DEVICE_INDEX));
        for slot in 0..config.controllers.min(2) {
            events.push_back(VrEvent::DeviceActivated(1 + slot));
        }
        if config.input_focus {
            events.push_back(VrEvent::InputFocusCaptured);
        }

        log::debug!(
            "simulated HMD: {} per eye at {} Hz",
            config.render_target_size,
            config.refresh_rate
        );

        Self {
            has_focus: config.input_focus,
            config,
            frame: 0,
            next_vsync: None,
            events,
            submitted_this_frame: [false; 2],
            submissions: [0; 2],
            controller_states: [ControllerState::default(); 2],
            controller_offsets: [Vec3::ZERO; 2],
        }
    }

    /// Gives or takes input focus, queueing the matching event.
    pub fn set_input_focus(&mut self, focus: bool) {
        if focus != self.has_focus {
            self.has_focus = focus;
            self.events.push_back(if focus {
                VrEvent::InputFocusCaptured
            } else {
                VrEvent::InputFocusReleased
            });
        }
    }

    /// Queues a quit request, as a dashboard "exit" would.
    pub fn request_quit(&mut self) {
        self.events.push_back(VrEvent::Quit);
    }

    /// Buttons and axes reported for controller `slot` (0 = left, 1 = right)
    /// from the next pose fetch on. Slots without a controller are ignored.
    pub fn set_controller_state(&mut self, slot: usize, state: ControllerState) {
        if let Some(current) = self.controller_states.get_mut(slot) {
            *current = state;
        }
    }

    /// Shifts controller `slot` by `delta` meters in tracking space.
    pub fn move_controller(&mut self, slot: usize, delta: Vec3) {
        if let Some(offset) = self.controller_offsets.get_mut(slot) {
            *offset += delta;
        }
    }

    /// Frames handed out by `wait_get_poses` so far.
    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Successful submissions for `eye` so far.
    pub fn submissions(&self, eye: Eye) -> u64 {
        self.submissions[eye.index()]
    }

    fn wait_for_vsync(&mut self) {
        let interval = Duration::from_secs_f32(1.0 / self.config.refresh_rate);
        let now = Instant::now();
        let deadline = match self.next_vsync {
            Some(deadline) if deadline > now => {
                std::thread::sleep(deadline - now);
                deadline
            }
            // missed the slot, or first frame: start from now
            _ => now,
        };
        self.next_vsync = Some(deadline + interval);
    }

    fn seconds(&self) -> f32 {
        self.frame as f32 / self.config.refresh_rate
    }

    fn head_pose(&self) -> Mat4 {
        let t = self.seconds();
        let position = Vec3::new(
            0.05 * (0.5 * t).sin(),
            self.config.head_height + 0.02 * t.sin(),
            0.0,
        );
        let rotation = Quat::from_rotation_y(0.15 * (0.3 * t).sin());
        Mat4::from_rotation_translation(rotation, position)
    }

    fn controller_pose(&self, slot: usize) -> Mat4 {
        let t = self.seconds();
        let side = if slot == 0 { -1.0 } else { 1.0 };
        let position = Vec3::new(
            side * 0.2,
            self.config.head_height - 0.5 + 0.03 * (t + slot as f32).sin(),
            -0.35,
        ) + self.controller_offsets[slot];
        let rotation = Quat::from_rotation_x(-0.6) * Quat::from_rotation_z(side * 0.1);
        Mat4::from_rotation_translation(rotation, position)
    }

    fn controller_slot(&self, index: usize) -> Option<usize> {
        (1..=self.config.controllers.min(2))
            .contains(&index)
            .then(|| index - 1)
    }

    /// Outer, inner and vertical half-angle tangents for one eye.
    fn tangents(&self) -> (f32, f32, f32) {
        let outer = (self.config.fov_degrees.to_radians() / 2.0).tan();
        let inner = outer * 0.85;
        let size = self.config.render_target_size;
        let vertical = (outer + inner) / 2.0 * size.height as f32 / size.width as f32;
        (outer, inner, vertical)
    }
}

impl VrRuntime for SimulatedRuntime {
    fn recommended_render_target_size(&self) -> Extent {
        self.config.render_target_size
    }

    fn wait_get_poses(&mut self, poses: &mut [TrackedDevicePose; MAX_TRACKED_DEVICES]) {
        if self.config.pace_frames {
            self.wait_for_vsync();
        }
        self.frame += 1;
        self.submitted_this_frame = [false; 2];

        for (index, pose) in poses.iter_mut().enumerate() {
            let matrix = if index == HMD_DEVICE_INDEX {
                Some(self.head_pose())
            } else {
                self.controller_slot(index)
                    .map(|slot| self.controller_pose(slot))
            };
            *pose = match matrix {
                Some(matrix) => TrackedDevicePose {
                    device_to_absolute_tracking: HmdMatrix34::from_mat4(matrix),
                    pose_is_valid: true,
                    device_is_connected: true,
                    ..Default::default()
                },
                None => TrackedDevicePose::default(),
            };
        }
    }

    fn projection_matrix(&self, eye: Eye, near: f32, far: f32) -> HmdMatrix44 {
        let (outer, inner, vertical) = self.tangents();
        let (left, right) = match eye {
            Eye::Left => (-outer, inner),
            Eye::Right => (-inner, outer),
        };
        HmdMatrix44::from_mat4(frustum_from_tangents(
            left, right, -vertical, vertical, near, far,
        ))
    }

    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34 {
        let half = self.config.ipd / 2.0;
        let x = match eye {
            Eye::Left => -half,
            Eye::Right => half,
        };
        HmdMatrix34::from_mat4(Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
    }

    fn has_input_focus(&self) -> bool {
        self.has_focus
    }

    fn submit(&mut self, eye: Eye, texture: &SubmitTexture<'_>) -> Result<(), CompositorError> {
        if !self.has_focus {
            return Err(CompositorError::DoNotHaveFocus);
        }
        if texture.extent.is_empty() {
            return Err(CompositorError::InvalidTexture);
        }
        if self.submitted_this_frame[eye.index()] {
            return Err(CompositorError::AlreadySubmitted);
        }
        self.submitted_this_frame[eye.index()] = true;
        self.submissions[eye.index()] += 1;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<VrEvent> {
        self.events.pop_front()
    }

    fn device_class(&self, index: usize) -> DeviceClass {
        if index == HMD_DEVICE_INDEX {
            DeviceClass::Hmd
        } else if self.controller_slot(index).is_some() {
            DeviceClass::Controller
        } else {
            DeviceClass::Invalid
        }
    }

    fn controller_state(&self, index: usize) -> Option<ControllerState> {
        self.controller_slot(index)
            .map(|slot| self.controller_states[slot])
    }

    fn device_string(&self, index: usize, property: DeviceProperty) -> Option<String> {
        match self.device_class(index) {
            DeviceClass::Invalid => None,
            _ => Some(match property {
                DeviceProperty::TrackingSystemName => "simulated".to_string(),
                DeviceProperty::SerialNumber => format!("SIM-{index:04}"),
                DeviceProperty::ModelNumber => match self.device_class(index) {
                    DeviceClass::Hmd => "Simulated HMD".to_string(),
                    _ => "Simulated Controller".to_string(),
                },
            }),
        }
    }
}

impl Drop for SimulatedRuntime {
    fn drop(&mut self) {
        log::debug!(
            "simulated HMD shut down after {} frames ({} left / {} right submissions)",
            self.frame,
            self.submissions[0],
            self.submissions[1]
        );
    }
}
