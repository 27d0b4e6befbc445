//! The VR session context: runtime, pose table and per-eye matrices.
//!
//! [`VrSystem`] is created once at startup through a [`RuntimeProvider`] and
//! passed by reference to whatever needs device transforms. Dropping it ends
//! the runtime session.

use glam::{Mat4, Vec3};

use crate::controller::Controller;
use crate::device::Extent;
use crate::error::{CompositorError, ConfigError, VrInitError};
use crate::eye::Eye;
use crate::math::{mat34_to_mat4, mat44_to_mat4};
use crate::pose::PoseTable;
use crate::runtime::{
    DeviceClass, DeviceProperty, HMD_DEVICE_INDEX, MAX_TRACKED_DEVICES, RuntimeProvider,
    SubmitTexture, TrackedDevicePose, VrEvent, VrRuntime,
};

/// Near and far clip distances, shared by both eyes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClipPlanes {
    pub near: f32,
    pub far: f32,
}

impl Default for ClipPlanes {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 100.0,
        }
    }
}

impl ClipPlanes {
    pub fn new(near: f32, far: f32) -> Result<Self, ConfigError> {
        if near > 0.0 && far > near && far.is_finite() {
            Ok(Self { near, far })
        } else {
            Err(ConfigError::ClipPlanes { near, far })
        }
    }
}

/// What happened to this frame's compositor submission.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// No call was made because the application lacks input focus.
    SkippedNoFocus,
    /// Both eyes were submitted; `rejected` lists compositor errors.
    Submitted { rejected: Vec<(Eye, CompositorError)> },
}

/// Outcome of draining runtime events.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub handled: usize,
    pub quit_requested: bool,
}

pub struct VrSystem<R: VrRuntime> {
    runtime: R,
    raw_poses: [TrackedDevicePose; MAX_TRACKED_DEVICES],
    poses: PoseTable,
    clip: ClipPlanes,
    render_target_size: Extent,
    controllers: Vec<Controller>,
}

impl<R: VrRuntime> VrSystem<R> {
    /// Runs the startup checks and opens a session.
    ///
    /// HMD presence and runtime installation are both logged before either
    /// failure is reported.
    pub fn init<P>(provider: P, clip: ClipPlanes) -> Result<Self, VrInitError>
    where
        P: RuntimeProvider<Runtime = R>,
    {
        let hmd_present = provider.is_hmd_present();
        log::info!("Found HMD: {}", if hmd_present { "yes" } else { "no" });
        let runtime_installed = provider.is_runtime_installed();
        log::info!(
            "Found VR runtime: {}",
            if runtime_installed { "yes" } else { "no" }
        );

        if !hmd_present {
            return Err(VrInitError::HmdNotPresent);
        }
        if !runtime_installed {
            return Err(VrInitError::RuntimeNotInstalled);
        }

        let runtime = provider.init()?;
        Ok(Self::from_runtime(runtime, clip))
    }

    /// Wraps an already-open session.
    pub fn from_runtime(runtime: R, clip: ClipPlanes) -> Self {
        let system_name = runtime
            .device_string(HMD_DEVICE_INDEX, DeviceProperty::TrackingSystemName)
            .unwrap_or_default();
        let serial = runtime
            .device_string(HMD_DEVICE_INDEX, DeviceProperty::SerialNumber)
            .unwrap_or_default();
        let render_target_size = runtime.recommended_render_target_size();
        log::info!("Tracking system: {system_name}");
        log::info!("Serial number: {serial}");
        log::info!("Recommended render target: {render_target_size} per eye");

        Self {
            runtime,
            raw_poses: [TrackedDevicePose::default(); MAX_TRACKED_DEVICES],
            poses: PoseTable::new(),
            clip,
            render_target_size,
            controllers: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn clip_planes(&self) -> ClipPlanes {
        self.clip
    }

    /// Per-eye render-target size, fixed for the session.
    pub fn render_target_size(&self) -> Extent {
        self.render_target_size
    }

    /// Drains pending runtime events.
    pub fn process_events(&mut self) -> EventSummary {
        let mut summary = EventSummary::default();
        while let Some(event) = self.runtime.poll_event() {
            summary.handled += 1;
            match event {
                VrEvent::DeviceActivated(index) => {
                    log::info!(
                        "device {index} attached ({:?})",
                        self.runtime.device_class(index)
                    );
                }
                VrEvent::DeviceDeactivated(index) => {
                    log::info!("device {index} detached");
                    self.controllers.retain(|c| c.device_index() != index);
                }
                VrEvent::InputFocusCaptured => log::debug!("input focus captured"),
                VrEvent::InputFocusReleased => log::debug!("input focus released"),
                VrEvent::Quit => {
                    log::info!("runtime requested quit");
                    summary.quit_requested = true;
                }
            }
        }
        summary
    }

    /// Blocks until the compositor hands out the next pose set, then
    /// refreshes the pose table and controllers.
    pub fn wait_and_fetch_poses(&mut self) {
        self.runtime.wait_get_poses(&mut self.raw_poses);
        self.poses.update(&self.raw_poses);
        self.update_controllers();
    }

    fn update_controllers(&mut self) {
        let indices: Vec<usize> = self
            .poses
            .valid_indices()
            .filter(|&index| self.runtime.device_class(index) == DeviceClass::Controller)
            .collect();

        for index in indices {
            let Some(pose) = self.poses.device_to_absolute(index) else {
                continue;
            };
            let state = self.runtime.controller_state(index).unwrap_or_default();
            match self
                .controllers
                .iter_mut()
                .find(|c| c.device_index() == index)
            {
                Some(controller) => controller.update(state, pose),
                None => {
                    let mut controller = Controller::new(index);
                    controller.update(state, pose);
                    self.controllers.push(controller);
                }
            }
        }
    }

    pub fn poses(&self) -> &PoseTable {
        &self.poses
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// World-to-device transform for a slot; `None` if it never tracked.
    pub fn device_transform(&self, index: usize) -> Option<Mat4> {
        self.poses.device_transform(index)
    }

    pub fn hmd_transform(&self) -> Option<Mat4> {
        self.device_transform(HMD_DEVICE_INDEX)
    }

    pub fn eye_projection(&self, eye: Eye, near: f32, far: f32) -> Mat4 {
        mat44_to_mat4(&self.runtime.projection_matrix(eye, near, far))
    }

    /// Projection using the session's clip planes.
    pub fn projection_matrix(&self, eye: Eye) -> Mat4 {
        self.eye_projection(eye, self.clip.near, self.clip.far)
    }

    /// Head-to-eye transform.
    pub fn eye_pose_matrix(&self, eye: Eye) -> Mat4 {
        mat34_to_mat4(&self.runtime.eye_to_head_transform(eye)).inverse()
    }

    /// World-to-eye view matrix. Uses the identity head pose until the HMD
    /// has tracked once.
    pub fn eye_view(&self, eye: Eye) -> Mat4 {
        self.eye_pose_matrix(eye) * self.hmd_transform().unwrap_or(Mat4::IDENTITY)
    }

    pub fn eye_position(&self, eye: Eye) -> Vec3 {
        self.eye_view(eye).inverse().w_axis.truncate()
    }

    pub fn has_input_focus(&self) -> bool {
        self.runtime.has_input_focus()
    }

    /// Submits both eyes. Nothing is sent without input focus; rejected eyes
    /// are logged with their error code and retried on the next frame.
    pub fn submit_eye_textures(
        &mut self,
        left: &SubmitTexture<'_>,
        right: &SubmitTexture<'_>,
    ) -> SubmitOutcome {
        if !self.runtime.has_input_focus() {
            return SubmitOutcome::SkippedNoFocus;
        }

        let mut rejected = Vec::new();
        for (eye, texture) in [(Eye::Left, left), (Eye::Right, right)] {
            if let Err(err) = self.runtime.submit(eye, texture) {
                log::error!(
                    "compositor rejected {eye} eye texture {}: {err} (code {})",
                    texture.handle,
                    err.code()
                );
                rejected.push((eye, err));
            }
        }
        SubmitOutcome::Submitted { rejected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{SimulatedConfig, SimulatedProvider, SimulatedRuntime};
    use crate::testing::{ScriptedProvider, ScriptedRuntime};

    fn simulated(config: SimulatedConfig) -> Result<VrSystem<SimulatedRuntime>, VrInitError> {
        VrSystem::init(SimulatedProvider::new(config.unpaced()), ClipPlanes::default())
    }

    #[test]
    fn clip_planes_are_validated() {
        assert!(ClipPlanes::new(0.1, 100.0).is_ok());
        assert!(ClipPlanes::new(0.0, 100.0).is_err());
        assert!(ClipPlanes::new(5.0, 1.0).is_err());
        assert_eq!(ClipPlanes::default(), ClipPlanes { near: 0.1, far: 100.0 });
    }

    #[test]
    fn missing_hmd_fails_init() {
        let err = simulated(SimulatedConfig::new().without_hmd()).err();
        assert_eq!(err, Some(VrInitError::HmdNotPresent));
    }

    #[test]
    fn missing_runtime_fails_init() {
        let err = simulated(SimulatedConfig::new().without_runtime()).err();
        assert_eq!(err, Some(VrInitError::RuntimeNotInstalled));
    }

    #[test]
    fn eye_views_differ_by_ipd() {
        let mut system = simulated(SimulatedConfig::new()).unwrap();
        system.wait_and_fetch_poses();

        let left = system.eye_position(Eye::Left);
        let right = system.eye_position(Eye::Right);
        assert!(((right - left).length() - 0.064).abs() < 1e-4);
    }

    #[test]
    fn controllers_are_discovered_from_poses() {
        let mut system = simulated(SimulatedConfig::new().controllers(2)).unwrap();
        assert!(system.controllers().is_empty());
        system.wait_and_fetch_poses();
        let indices: Vec<usize> = system.controllers().iter().map(|c| c.device_index()).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn quit_event_is_reported() {
        let mut system = simulated(SimulatedConfig::new()).unwrap();
        system.runtime_mut().request_quit();
        let summary = system.process_events();
        assert!(summary.quit_requested);
        assert!(summary.handled >= 1);
    }

    #[test]
    fn unfocused_submit_makes_no_runtime_call() {
        let runtime = ScriptedRuntime::new().focused(false);
        let log = runtime.log();
        let mut system = VrSystem::from_runtime(runtime, ClipPlanes::default());

        let tex = crate::testing::submit_texture(1);
        assert_eq!(
            system.submit_eye_textures(&tex, &tex),
            SubmitOutcome::SkippedNoFocus
        );
        assert_eq!(log.borrow().submits.len(), 0);
    }

    #[test]
    fn rejected_eye_is_reported_and_other_eye_still_submitted() {
        let runtime = ScriptedRuntime::new().reject(Eye::Left, CompositorError::InvalidTexture);
        let log = runtime.log();
        let mut system = VrSystem::from_runtime(runtime, ClipPlanes::default());

        let tex = crate::testing::submit_texture(1);
        let outcome = system.submit_eye_textures(&tex, &tex);
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                rejected: vec![(Eye::Left, CompositorError::InvalidTexture)]
            }
        );
        assert_eq!(log.borrow().submits, vec![Eye::Left, Eye::Right]);
    }

    #[test]
    fn stale_device_transform_is_last_valid_inverse() {
        let runtime = ScriptedRuntime::new();
        let script = runtime.log();
        let mut system = VrSystem::from_runtime(runtime, ClipPlanes::default());

        let pose = Mat4::from_translation(Vec3::new(0.5, 1.0, -2.0));
        script.borrow_mut().next_poses.push_back(vec![(3, Some(pose))]);
        system.wait_and_fetch_poses();
        script.borrow_mut().next_poses.push_back(vec![(3, None)]);
        system.wait_and_fetch_poses();

        assert!(!system.poses().is_valid(3));
        assert!(system.device_transform(3).unwrap().abs_diff_eq(pose.inverse(), 1e-6));
        assert_eq!(system.device_transform(4), None);
    }

    #[test]
    fn hmd_is_checked_before_runtime() {
        let provider = ScriptedProvider {
            hmd_present: false,
            runtime_installed: false,
            runtime: ScriptedRuntime::new(),
        };
        let err = VrSystem::init(provider, ClipPlanes::default()).err();
        assert_eq!(err, Some(VrInitError::HmdNotPresent));
    }

    #[test]
    fn scripted_session_reports_its_size() {
        let provider = ScriptedProvider {
            hmd_present: true,
            runtime_installed: true,
            runtime: ScriptedRuntime::new().render_target_size(800, 900),
        };
        let system = VrSystem::init(provider, ClipPlanes::default()).unwrap();
        assert_eq!(system.render_target_size(), Extent::new(800, 900));
    }
}
