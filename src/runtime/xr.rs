//! A headset driven through the system's OpenXR runtime.
//!
//! [`OpenXrProvider`] loads the OpenXR loader and looks for a head-mounted
//! system when it is built, so the startup checks are cheap queries. `init`
//! opens a Vulkan-backed session with one swapchain per eye.
//!
//! Frame pacing maps onto the session's frame loop: `wait_get_poses` ends the
//! previous frame if it is still open, then waits for and begins the next one
//! and locates the views. The second successful `submit` ends the frame with a
//! projection layer; a frame with missing eyes is ended with no layers.

use std::collections::VecDeque;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use glam::{Mat4, Quat, Vec2, Vec3};
use openxr as xr;

use super::pixels::{SwapchainFormat, choose_swapchain_format, convert_pixels};
use super::vulkan::{BackendError, VulkanUploader, WithContext};
use super::{
    ColorSpace, DeviceClass, DeviceProperty, HMD_DEVICE_INDEX, MAX_TRACKED_DEVICES,
    RuntimeProvider, SubmitTexture, TextureTransfer, TrackedDevicePose, VrEvent, VrRuntime,
};
use crate::controller::{Button, ControllerState};
use crate::device::Extent;
use crate::error::{CompositorError, VrInitError};
use crate::eye::Eye;
use crate::math::{HmdMatrix34, HmdMatrix44, frustum_from_tangents};

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;
const IDLE_SLEEP: Duration = Duration::from_millis(5);
const IMAGE_WAIT_TIMEOUT_NS: i64 = 100_000_000;
const PRESS_THRESHOLD: f32 = 0.5;
const DEFAULT_IPD: f32 = 0.064;

struct Connection {
    instance: xr::Instance,
    runtime_name: String,
    system: Option<xr::SystemId>,
}

/// Opens [`OpenXrRuntime`] sessions.
pub struct OpenXrProvider {
    connection: Result<Connection, String>,
}

impl OpenXrProvider {
    /// Loads the OpenXR loader and queries for a head-mounted system.
    /// Failures are kept and surface through the startup checks.
    pub fn new() -> Self {
        let connection = connect();
        if let Err(reason) = &connection {
            log::info!("OpenXR unavailable: {reason}");
        }
        Self { connection }
    }
}

impl Default for OpenXrProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn connect() -> Result<Connection, String> {
    let entry =
        unsafe { xr::Entry::load() }.map_err(|e| format!("cannot load the OpenXR loader: {e}"))?;
    let available = entry
        .enumerate_extensions()
        .map_err(|e| format!("cannot enumerate OpenXR extensions: {e}"))?;
    if !available.khr_vulkan_enable {
        return Err("the OpenXR runtime does not support XR_KHR_vulkan_enable".to_string());
    }
    let mut extensions = xr::ExtensionSet::default();
    extensions.khr_vulkan_enable = true;

    let app_info = xr::ApplicationInfo {
        application_name: "pointvr",
        application_version: 1,
        engine_name: "pointvr",
        engine_version: 1,
        api_version: xr::Version::new(1, 0, 0),
    };
    let instance = entry
        .create_instance(&app_info, &extensions, &[])
        .map_err(|e| format!("cannot create OpenXR instance: {e}"))?;
    let runtime_name = instance
        .properties()
        .map(|p| format!("{} {}", p.runtime_name, p.runtime_version))
        .unwrap_or_else(|_| "OpenXR".to_string());

    let system = match instance.system(xr::FormFactor::HEAD_MOUNTED_DISPLAY) {
        Ok(system) => Some(system),
        Err(xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE) => None,
        Err(e) => return Err(format!("cannot query the OpenXR system: {e}")),
    };
    log::info!("OpenXR runtime: {runtime_name}");
    Ok(Connection {
        instance,
        runtime_name,
        system,
    })
}

impl RuntimeProvider for OpenXrProvider {
    type Runtime = OpenXrRuntime;

    fn is_hmd_present(&self) -> bool {
        matches!(&self.connection, Ok(c) if c.system.is_some())
    }

    fn is_runtime_installed(&self) -> bool {
        self.connection.is_ok()
    }

    fn init(self) -> Result<OpenXrRuntime, VrInitError> {
        let connection = self.connection.map_err(|_| VrInitError::RuntimeNotInstalled)?;
        let system = connection.system.ok_or(VrInitError::HmdNotPresent)?;
        OpenXrRuntime::open(connection, system).map_err(|e| VrInitError::Init(e.to_string()))
    }
}

struct EyeSwapchain {
    swapchain: xr::Swapchain<xr::Vulkan>,
    images: Vec<vk::Image>,
    layouts: Vec<vk::ImageLayout>,
}

struct OpenFrame {
    display_time: xr::Time,
    should_render: bool,
    views: Vec<xr::View>,
    submitted: [bool; 2],
}

/// An open OpenXR session.
///
/// Field order is drop order: swapchains, spaces and actions go before the
/// session, the session before the Vulkan device it renders with.
pub struct OpenXrRuntime {
    eyes: [EyeSwapchain; 2],
    controls: Option<Controls>,
    view_space: xr::Space,
    stage_space: xr::Space,
    frame_stream: xr::FrameStream<xr::Vulkan>,
    frame_waiter: xr::FrameWaiter,
    session: xr::Session<xr::Vulkan>,
    uploader: VulkanUploader,
    instance: xr::Instance,

    runtime_name: String,
    system_name: String,
    serial: String,
    render_target_size: Extent,
    format: SwapchainFormat,
    event_buffer: xr::EventDataBuffer,
    state: xr::SessionState,
    running: bool,
    frame: Option<OpenFrame>,
    eye_fov: [xr::Fovf; 2],
    eye_to_head: [Mat4; 2],
    controller_states: [ControllerState; 2],
    controller_connected: [bool; 2],
    events: VecDeque<VrEvent>,
}

impl OpenXrRuntime {
    fn open(connection: Connection, system: xr::SystemId) -> Result<Self, BackendError> {
        let Connection {
            instance,
            runtime_name,
            ..
        } = connection;

        let properties = instance
            .system_properties(system)
            .context("OpenXR system properties")?;
        let views = instance
            .enumerate_view_configuration_views(system, VIEW_TYPE)
            .context("OpenXR view configuration")?;
        let render_target_size = recommended_size(&views)
            .ok_or(BackendError::Unsupported("the runtime reports no stereo views"))?;

        let uploader = VulkanUploader::new(&instance, system)?;
        let (session, frame_waiter, frame_stream) = unsafe {
            instance.create_session::<xr::Vulkan>(system, &uploader.session_create_info())
        }
        .context("OpenXR create_session")?;

        let space_types = session
            .enumerate_reference_spaces()
            .context("OpenXR reference spaces")?;
        let stage_type = if space_types.contains(&xr::ReferenceSpaceType::STAGE) {
            xr::ReferenceSpaceType::STAGE
        } else {
            xr::ReferenceSpaceType::LOCAL
        };
        let stage_space = session
            .create_reference_space(stage_type, xr::Posef::IDENTITY)
            .context("OpenXR tracking space")?;
        let view_space = session
            .create_reference_space(xr::ReferenceSpaceType::VIEW, xr::Posef::IDENTITY)
            .context("OpenXR view space")?;

        let formats = session
            .enumerate_swapchain_formats()
            .context("OpenXR swapchain formats")?;
        let format = choose_swapchain_format(&formats)
            .ok_or(BackendError::Unsupported("no 8-bit RGBA swapchain format"))?;
        log::info!(
            "OpenXR swapchain format {} (0x{:X}), {} per eye",
            format.name,
            format.raw,
            render_target_size
        );

        let eyes = [
            create_eye_swapchain(&session, format, render_target_size)?,
            create_eye_swapchain(&session, format, render_target_size)?,
        ];

        let controls = match Controls::new(&instance, &session) {
            Ok(controls) => Some(controls),
            Err(err) => {
                log::warn!("controller input unavailable: {err}");
                None
            }
        };

        let mut events = VecDeque::new();
        events.push_back(VrEvent::DeviceActivated(HMD_DEVICE_INDEX));

        Ok(Self {
            eyes,
            controls,
            view_space,
            stage_space,
            frame_stream,
            frame_waiter,
            session,
            uploader,
            instance,
            runtime_name,
            system_name: properties.system_name,
            serial: format!("{:04x}:{:x}", properties.vendor_id, system.into_raw()),
            render_target_size,
            format,
            event_buffer: xr::EventDataBuffer::new(),
            state: xr::SessionState::IDLE,
            running: false,
            frame: None,
            eye_fov: [default_fov(); 2],
            eye_to_head: [
                Mat4::from_translation(Vec3::new(-DEFAULT_IPD / 2.0, 0.0, 0.0)),
                Mat4::from_translation(Vec3::new(DEFAULT_IPD / 2.0, 0.0, 0.0)),
            ],
            controller_states: [ControllerState::default(); 2],
            controller_connected: [false; 2],
            events,
        })
    }

    fn pump_events(&mut self) {
        loop {
            let state = match self.instance.poll_event(&mut self.event_buffer) {
                Ok(Some(xr::Event::SessionStateChanged(change))) => change.state(),
                Ok(Some(xr::Event::InstanceLossPending(_))) => {
                    self.events.push_back(VrEvent::Quit);
                    continue;
                }
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(err) => {
                    log::error!("OpenXR poll_event failed: {err}");
                    break;
                }
            };
            self.on_state_change(state);
        }
    }

    fn on_state_change(&mut self, state: xr::SessionState) {
        log::debug!("OpenXR session state {:?} -> {:?}", self.state, state);
        let was_focused = self.state == xr::SessionState::FOCUSED;
        self.state = state;

        match state {
            xr::SessionState::READY => match self.session.begin(VIEW_TYPE) {
                Ok(_) => self.running = true,
                Err(err) => log::error!("OpenXR session begin failed: {err}"),
            },
            xr::SessionState::STOPPING => {
                self.finish_frame();
                if let Err(err) = self.session.end() {
                    log::error!("OpenXR session end failed: {err}");
                }
                self.running = false;
            }
            xr::SessionState::EXITING | xr::SessionState::LOSS_PENDING => {
                self.running = false;
                self.events.push_back(VrEvent::Quit);
            }
            _ => {}
        }

        if let Some(event) = focus_event(was_focused, state == xr::SessionState::FOCUSED) {
            self.events.push_back(event);
        }
    }

    /// Ends the open frame, with a projection layer when both eyes made it.
    fn finish_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };

        let result = if frame.should_render && frame.submitted == [true, true] {
            let extent = xr::Extent2Di {
                width: self.render_target_size.width as i32,
                height: self.render_target_size.height as i32,
            };
            let eyes = &self.eyes;
            let views = [0, 1].map(|i| {
                xr::CompositionLayerProjectionView::new()
                    .pose(frame.views[i].pose)
                    .fov(frame.views[i].fov)
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(&eyes[i].swapchain)
                            .image_array_index(0)
                            .image_rect(xr::Rect2Di {
                                offset: xr::Offset2Di { x: 0, y: 0 },
                                extent,
                            }),
                    )
            });
            let layer = xr::CompositionLayerProjection::new()
                .space(&self.stage_space)
                .views(&views);
            let layers: [&xr::CompositionLayerBase<xr::Vulkan>; 1] = [&layer];
            self.frame_stream
                .end(frame.display_time, xr::EnvironmentBlendMode::OPAQUE, &layers)
        } else {
            self.frame_stream
                .end(frame.display_time, xr::EnvironmentBlendMode::OPAQUE, &[])
        };

        if let Err(err) = result {
            log::error!("OpenXR end frame failed: {err}");
        }
    }

    fn locate(&self, space: &xr::Space, time: xr::Time) -> Option<Mat4> {
        match space.locate(&self.stage_space, time) {
            Ok(location) if pose_is_tracked(location.location_flags) => {
                Some(pose_to_mat4(&location.pose))
            }
            Ok(_) => None,
            Err(err) => {
                log::debug!("OpenXR locate failed: {err}");
                None
            }
        }
    }

    fn update_controllers(
        &mut self,
        time: xr::Time,
        poses: &mut [TrackedDevicePose; MAX_TRACKED_DEVICES],
    ) {
        let Some(controls) = &self.controls else {
            return;
        };
        if let Err(err) = controls.sync(&self.session) {
            log::debug!("OpenXR sync_actions failed: {err}");
            return;
        }

        for hand in 0..2 {
            let matrix = self.locate(&controls.grip_spaces[hand], time);
            let connected = matrix.is_some();
            if let Some(matrix) = matrix {
                poses[1 + hand] = tracked(matrix);
            }
            self.controller_states[hand] = controls.state(&self.session, hand);

            if connected != self.controller_connected[hand] {
                self.controller_connected[hand] = connected;
                self.events.push_back(if connected {
                    VrEvent::DeviceActivated(1 + hand)
                } else {
                    VrEvent::DeviceDeactivated(1 + hand)
                });
            }
        }
    }

    fn upload_eye(
        &mut self,
        eye: Eye,
        pixels: &[u8],
        color_space: ColorSpace,
    ) -> Result<(), BackendError> {
        let chain = &mut self.eyes[eye.index()];
        let index = chain.swapchain.acquire_image().context("OpenXR acquire image")? as usize;
        let timeout = xr::Duration::from_nanos(IMAGE_WAIT_TIMEOUT_NS);
        if let Err(result) = chain.swapchain.wait_image(timeout) {
            let _ = chain.swapchain.release_image();
            return Err(BackendError::Xr {
                context: "OpenXR wait image",
                result,
            });
        }

        let converted = convert_pixels(pixels, color_space, &self.format);
        let size = self.render_target_size;
        let uploaded = match (chain.images.get(index), chain.layouts.get(index)) {
            (Some(&image), Some(&layout)) => {
                self.uploader
                    .upload(image, layout, size.width, size.height, &converted)
            }
            _ => Err(BackendError::Unsupported("swapchain image index out of range")),
        };
        let released = chain.swapchain.release_image().context("OpenXR release image");

        let layout = uploaded?;
        chain.layouts[index] = layout;
        released
    }
}

fn create_eye_swapchain(
    session: &xr::Session<xr::Vulkan>,
    format: SwapchainFormat,
    size: Extent,
) -> Result<EyeSwapchain, BackendError> {
    let swapchain = session
        .create_swapchain(&xr::SwapchainCreateInfo {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                | xr::SwapchainUsageFlags::TRANSFER_DST,
            format: format.raw,
            sample_count: 1,
            width: size.width,
            height: size.height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        })
        .context("OpenXR create swapchain")?;
    let images: Vec<vk::Image> = swapchain
        .enumerate_images()
        .context("OpenXR swapchain images")?
        .into_iter()
        .map(vk::Image::from_raw)
        .collect();
    let layouts = vec![vk::ImageLayout::UNDEFINED; images.len()];
    Ok(EyeSwapchain {
        swapchain,
        images,
        layouts,
    })
}

impl VrRuntime for OpenXrRuntime {
    fn recommended_render_target_size(&self) -> Extent {
        self.render_target_size
    }

    fn wait_get_poses(&mut self, poses: &mut [TrackedDevicePose; MAX_TRACKED_DEVICES]) {
        self.finish_frame();
        self.pump_events();
        poses.fill(TrackedDevicePose::default());

        if !self.running {
            std::thread::sleep(IDLE_SLEEP);
            return;
        }

        let frame_state = match self.frame_waiter.wait() {
            Ok(state) => state,
            Err(err) => {
                log::error!("OpenXR wait frame failed: {err}");
                return;
            }
        };
        if let Err(err) = self.frame_stream.begin() {
            log::error!("OpenXR begin frame failed: {err}");
            return;
        }
        let time = frame_state.predicted_display_time;

        let views = match self.session.locate_views(VIEW_TYPE, time, &self.stage_space) {
            Ok((_, views)) if views.len() >= 2 => views,
            Ok(_) => Vec::new(),
            Err(err) => {
                log::error!("OpenXR locate_views failed: {err}");
                Vec::new()
            }
        };
        let should_render = frame_state.should_render && !views.is_empty();

        if let Some(head) = self.locate(&self.view_space, time) {
            poses[HMD_DEVICE_INDEX] = tracked(head);
            if !views.is_empty() {
                let from_head = head.inverse();
                for i in 0..2 {
                    self.eye_to_head[i] = from_head * pose_to_mat4(&views[i].pose);
                    self.eye_fov[i] = views[i].fov;
                }
            }
        }
        self.update_controllers(time, poses);

        self.frame = Some(OpenFrame {
            display_time: time,
            should_render,
            views,
            submitted: [false; 2],
        });
    }

    fn projection_matrix(&self, eye: Eye, near: f32, far: f32) -> HmdMatrix44 {
        HmdMatrix44::from_mat4(fov_projection(&self.eye_fov[eye.index()], near, far))
    }

    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34 {
        HmdMatrix34::from_mat4(self.eye_to_head[eye.index()])
    }

    fn has_input_focus(&self) -> bool {
        self.state == xr::SessionState::FOCUSED
    }

    fn texture_transfer(&self) -> TextureTransfer {
        TextureTransfer::Pixels
    }

    fn submit(&mut self, eye: Eye, texture: &SubmitTexture<'_>) -> Result<(), CompositorError> {
        let (should_render, already) = match &self.frame {
            Some(frame) => (frame.should_render, frame.submitted[eye.index()]),
            None => return Err(CompositorError::RequestFailed),
        };
        if !self.has_input_focus() {
            return Err(CompositorError::DoNotHaveFocus);
        }
        if already {
            return Err(CompositorError::AlreadySubmitted);
        }
        let Some(pixels) = texture.pixels else {
            return Err(CompositorError::InvalidTexture);
        };
        if texture.extent != self.render_target_size {
            return Err(CompositorError::InvalidTexture);
        }

        if should_render {
            if let Err(err) = self.upload_eye(eye, pixels, texture.color_space) {
                log::error!("{eye} eye upload failed: {err}");
                return Err(CompositorError::RequestFailed);
            }
        }

        let done = match self.frame.as_mut() {
            Some(frame) => {
                frame.submitted[eye.index()] = true;
                frame.submitted == [true, true]
            }
            None => false,
        };
        if done {
            self.finish_frame();
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<VrEvent> {
        if self.events.is_empty() {
            self.pump_events();
        }
        self.events.pop_front()
    }

    fn device_class(&self, index: usize) -> DeviceClass {
        match index {
            HMD_DEVICE_INDEX => DeviceClass::Hmd,
            1 | 2 if self.controls.is_some() => DeviceClass::Controller,
            _ => DeviceClass::Invalid,
        }
    }

    fn controller_state(&self, index: usize) -> Option<ControllerState> {
        match index {
            1 | 2 if self.controls.is_some() => Some(self.controller_states[index - 1]),
            _ => None,
        }
    }

    fn device_string(&self, index: usize, property: DeviceProperty) -> Option<String> {
        if index != HMD_DEVICE_INDEX {
            return None;
        }
        Some(match property {
            DeviceProperty::TrackingSystemName => self.runtime_name.clone(),
            DeviceProperty::SerialNumber => self.serial.clone(),
            DeviceProperty::ModelNumber => self.system_name.clone(),
        })
    }
}

impl Drop for OpenXrRuntime {
    fn drop(&mut self) {
        self.finish_frame();
        if self.running {
            let _ = self.session.request_exit();
        }
    }
}

/// Buttons and grip poses for both hands.
struct Controls {
    action_set: xr::ActionSet,
    trigger: xr::Action<f32>,
    trigger_click: xr::Action<bool>,
    squeeze: xr::Action<f32>,
    squeeze_click: xr::Action<bool>,
    pad: xr::Action<xr::Vector2f>,
    pad_click: xr::Action<bool>,
    menu: xr::Action<bool>,
    grip_spaces: [xr::Space; 2],
    _grip_pose: xr::Action<xr::Posef>,
    hands: [xr::Path; 2],
}

impl Controls {
    fn new(instance: &xr::Instance, session: &xr::Session<xr::Vulkan>) -> Result<Self, BackendError> {
        let action_set = instance
            .create_action_set("pointvr", "Point cloud viewer", 0)
            .context("OpenXR action set")?;
        let hands = [
            instance.string_to_path("/user/hand/left").context("OpenXR path")?,
            instance.string_to_path("/user/hand/right").context("OpenXR path")?,
        ];

        let trigger = action_set
            .create_action("trigger", "Trigger", &hands)
            .context("OpenXR action trigger")?;
        let trigger_click = action_set
            .create_action("trigger_click", "Trigger Click", &hands)
            .context("OpenXR action trigger_click")?;
        let squeeze = action_set
            .create_action("squeeze", "Squeeze", &hands)
            .context("OpenXR action squeeze")?;
        let squeeze_click = action_set
            .create_action("squeeze_click", "Squeeze Click", &hands)
            .context("OpenXR action squeeze_click")?;
        let pad = action_set
            .create_action("pad", "Touchpad", &hands)
            .context("OpenXR action pad")?;
        let pad_click = action_set
            .create_action("pad_click", "Touchpad Click", &hands)
            .context("OpenXR action pad_click")?;
        let menu = action_set
            .create_action("menu", "Menu", &hands)
            .context("OpenXR action menu")?;
        let grip_pose = action_set
            .create_action::<xr::Posef>("grip_pose", "Grip Pose", &hands)
            .context("OpenXR action grip_pose")?;

        for (profile, paths) in PROFILE_BINDINGS {
            let Ok(profile_path) = instance.string_to_path(profile) else {
                continue;
            };
            let mut bindings = Vec::new();
            for (kind, path) in *paths {
                for hand in ["left", "right"] {
                    let Ok(path) = instance.string_to_path(&format!("/user/hand/{hand}/{path}"))
                    else {
                        continue;
                    };
                    bindings.push(match kind {
                        Input::Trigger => xr::Binding::new(&trigger, path),
                        Input::TriggerClick => xr::Binding::new(&trigger_click, path),
                        Input::Squeeze => xr::Binding::new(&squeeze, path),
                        Input::SqueezeClick => xr::Binding::new(&squeeze_click, path),
                        Input::Pad => xr::Binding::new(&pad, path),
                        Input::PadClick => xr::Binding::new(&pad_click, path),
                        Input::Menu => xr::Binding::new(&menu, path),
                        Input::GripPose => xr::Binding::new(&grip_pose, path),
                    });
                }
            }
            if let Err(err) = instance.suggest_interaction_profile_bindings(profile_path, &bindings)
            {
                log::debug!("OpenXR bindings for {profile} rejected: {err}");
            }
        }

        session
            .attach_action_sets(&[&action_set])
            .context("OpenXR attach actions")?;

        let grip_spaces = [
            grip_pose
                .create_space(session.clone(), hands[0], xr::Posef::IDENTITY)
                .context("OpenXR left grip space")?,
            grip_pose
                .create_space(session.clone(), hands[1], xr::Posef::IDENTITY)
                .context("OpenXR right grip space")?,
        ];

        Ok(Self {
            action_set,
            trigger,
            trigger_click,
            squeeze,
            squeeze_click,
            pad,
            pad_click,
            menu,
            grip_spaces,
            _grip_pose: grip_pose,
            hands,
        })
    }

    fn sync(&self, session: &xr::Session<xr::Vulkan>) -> Result<(), BackendError> {
        session
            .sync_actions(&[xr::ActiveActionSet::new(&self.action_set)])
            .context("OpenXR sync actions")
    }

    fn state(&self, session: &xr::Session<xr::Vulkan>, hand: usize) -> ControllerState {
        let path = self.hands[hand];
        let float = |action: &xr::Action<f32>| {
            action
                .state(session, path)
                .ok()
                .filter(|s| s.is_active)
                .map_or(0.0, |s| s.current_state)
        };
        let flag = |action: &xr::Action<bool>| {
            action
                .state(session, path)
                .ok()
                .is_some_and(|s| s.is_active && s.current_state)
        };
        let pad = self
            .pad
            .state(session, path)
            .ok()
            .filter(|s| s.is_active)
            .map_or(Vec2::ZERO, |s| Vec2::new(s.current_state.x, s.current_state.y));

        HandInput {
            trigger: float(&self.trigger).max(if flag(&self.trigger_click) { 1.0 } else { 0.0 }),
            squeeze: float(&self.squeeze).max(if flag(&self.squeeze_click) { 1.0 } else { 0.0 }),
            pad,
            pad_click: flag(&self.pad_click),
            menu: flag(&self.menu),
        }
        .to_controller_state()
    }
}

#[derive(Copy, Clone)]
enum Input {
    Trigger,
    TriggerClick,
    Squeeze,
    SqueezeClick,
    Pad,
    PadClick,
    Menu,
    GripPose,
}

/// Per-profile component paths below `/user/hand/<hand>/`.
const PROFILE_BINDINGS: &[(&str, &[(Input, &str)])] = &[
    (
        "/interaction_profiles/khr/simple_controller",
        &[
            (Input::TriggerClick, "input/select/click"),
            (Input::Menu, "input/menu/click"),
            (Input::GripPose, "input/grip/pose"),
        ],
    ),
    (
        "/interaction_profiles/oculus/touch_controller",
        &[
            (Input::Trigger, "input/trigger/value"),
            (Input::Squeeze, "input/squeeze/value"),
            (Input::Pad, "input/thumbstick"),
            (Input::PadClick, "input/thumbstick/click"),
            (Input::GripPose, "input/grip/pose"),
        ],
    ),
    (
        "/interaction_profiles/valve/index_controller",
        &[
            (Input::Trigger, "input/trigger/value"),
            (Input::Squeeze, "input/squeeze/value"),
            (Input::Pad, "input/thumbstick"),
            (Input::PadClick, "input/thumbstick/click"),
            (Input::Menu, "input/b/click"),
            (Input::GripPose, "input/grip/pose"),
        ],
    ),
    (
        "/interaction_profiles/microsoft/motion_controller",
        &[
            (Input::Trigger, "input/trigger/value"),
            (Input::SqueezeClick, "input/squeeze/click"),
            (Input::Pad, "input/trackpad"),
            (Input::PadClick, "input/trackpad/click"),
            (Input::Menu, "input/menu/click"),
            (Input::GripPose, "input/grip/pose"),
        ],
    ),
    (
        "/interaction_profiles/htc/vive_controller",
        &[
            (Input::Trigger, "input/trigger/value"),
            (Input::SqueezeClick, "input/squeeze/click"),
            (Input::Pad, "input/trackpad"),
            (Input::PadClick, "input/trackpad/click"),
            (Input::Menu, "input/menu/click"),
            (Input::GripPose, "input/grip/pose"),
        ],
    ),
];

/// One hand's action values after a sync.
#[derive(Copy, Clone, Debug, Default)]
struct HandInput {
    trigger: f32,
    squeeze: f32,
    pad: Vec2,
    pad_click: bool,
    menu: bool,
}

impl HandInput {
    fn to_controller_state(self) -> ControllerState {
        let mut state = ControllerState::default()
            .with_axis(0, self.pad)
            .with_axis(1, Vec2::new(self.trigger, 0.0));
        if self.trigger > PRESS_THRESHOLD {
            state = state.with_button(Button::Trigger);
        }
        if self.squeeze > PRESS_THRESHOLD {
            state = state.with_button(Button::Grip);
        }
        if self.pad_click {
            state = state.with_button(Button::Touchpad);
        }
        if self.menu {
            state = state.with_button(Button::ApplicationMenu);
        }
        state
    }
}

fn recommended_size(views: &[xr::ViewConfigurationView]) -> Option<Extent> {
    if views.len() < 2 {
        return None;
    }
    let width = views.iter().map(|v| v.recommended_image_rect_width).max()?;
    let height = views.iter().map(|v| v.recommended_image_rect_height).max()?;
    Some(Extent::new(width, height))
}

fn focus_event(was_focused: bool, focused: bool) -> Option<VrEvent> {
    match (was_focused, focused) {
        (false, true) => Some(VrEvent::InputFocusCaptured),
        (true, false) => Some(VrEvent::InputFocusReleased),
        _ => None,
    }
}

fn pose_is_tracked(flags: xr::SpaceLocationFlags) -> bool {
    flags.contains(xr::SpaceLocationFlags::POSITION_VALID)
        && flags.contains(xr::SpaceLocationFlags::ORIENTATION_VALID)
}

fn pose_to_mat4(pose: &xr::Posef) -> Mat4 {
    let o = pose.orientation;
    let p = pose.position;
    Mat4::from_rotation_translation(
        Quat::from_xyzw(o.x, o.y, o.z, o.w).normalize(),
        Vec3::new(p.x, p.y, p.z),
    )
}

fn tracked(matrix: Mat4) -> TrackedDevicePose {
    TrackedDevicePose {
        device_to_absolute_tracking: HmdMatrix34::from_mat4(matrix),
        pose_is_valid: true,
        device_is_connected: true,
        ..Default::default()
    }
}

fn fov_projection(fov: &xr::Fovf, near: f32, far: f32) -> Mat4 {
    frustum_from_tangents(
        fov.angle_left.tan(),
        fov.angle_right.tan(),
        fov.angle_down.tan(),
        fov.angle_up.tan(),
        near,
        far,
    )
}

fn default_fov() -> xr::Fovf {
    let half = 45f32.to_radians();
    xr::Fovf {
        angle_left: -half,
        angle_right: half,
        angle_up: half,
        angle_down: -half,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(width: u32, height: u32) -> xr::ViewConfigurationView {
        xr::ViewConfigurationView {
            recommended_image_rect_width: width,
            max_image_rect_width: width * 2,
            recommended_image_rect_height: height,
            max_image_rect_height: height * 2,
            recommended_swapchain_sample_count: 1,
            max_swapchain_sample_count: 4,
        }
    }

    #[test]
    fn render_size_covers_both_views() {
        let size = recommended_size(&[view(1440, 1584), view(1448, 1580)]).unwrap();
        assert_eq!(size, Extent::new(1448, 1584));
        assert!(recommended_size(&[view(1440, 1584)]).is_none());
    }

    #[test]
    fn pose_becomes_rigid_transform() {
        let pose = xr::Posef {
            orientation: xr::Quaternionf {
                x: 0.0,
                y: std::f32::consts::FRAC_1_SQRT_2,
                z: 0.0,
                w: std::f32::consts::FRAC_1_SQRT_2,
            },
            position: xr::Vector3f {
                x: 1.0,
                y: 1.6,
                z: -2.0,
            },
        };
        let matrix = pose_to_mat4(&pose);
        assert!(matrix.w_axis.truncate().abs_diff_eq(Vec3::new(1.0, 1.6, -2.0), 1e-6));
        // a quarter turn about +y sends -z to -x
        let forward = matrix.transform_vector3(Vec3::NEG_Z);
        assert!(forward.abs_diff_eq(Vec3::NEG_X, 1e-5));
    }

    #[test]
    fn symmetric_fov_matches_perspective() {
        let half = 45f32.to_radians();
        let fov = xr::Fovf {
            angle_left: -half,
            angle_right: half,
            angle_up: half,
            angle_down: -half,
        };
        let expected = Mat4::perspective_rh(2.0 * half, 1.0, 0.1, 100.0);
        assert!(fov_projection(&fov, 0.1, 100.0).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn canted_fov_shifts_the_center() {
        let fov = xr::Fovf {
            angle_left: -0.9,
            angle_right: 0.7,
            angle_up: 0.8,
            angle_down: -0.8,
        };
        let projection = fov_projection(&fov, 0.1, 100.0);
        assert!(projection.z_axis.x < 0.0);
        assert!(projection.z_axis.y.abs() < 1e-6);
    }

    #[test]
    fn hand_input_maps_to_buttons_and_axes() {
        let state = HandInput {
            trigger: 0.8,
            squeeze: 0.9,
            pad: Vec2::new(0.0, 0.5),
            pad_click: true,
            menu: false,
        }
        .to_controller_state();
        assert_ne!(state.buttons_pressed & Button::Trigger.mask(), 0);
        assert_ne!(state.buttons_pressed & Button::Grip.mask(), 0);
        assert_ne!(state.buttons_pressed & Button::Touchpad.mask(), 0);
        assert_eq!(state.buttons_pressed & Button::ApplicationMenu.mask(), 0);
        assert_eq!(state.axes[0], Vec2::new(0.0, 0.5));
        assert_eq!(state.axes[1], Vec2::new(0.8, 0.0));
    }

    #[test]
    fn light_pressure_is_not_a_press() {
        let state = HandInput {
            trigger: 0.3,
            squeeze: 0.5,
            ..Default::default()
        }
        .to_controller_state();
        assert_eq!(state.buttons_pressed, 0);
        assert_eq!(state.axes[1].x, 0.3);
    }

    #[test]
    fn focus_changes_produce_one_event() {
        assert_eq!(focus_event(false, true), Some(VrEvent::InputFocusCaptured));
        assert_eq!(focus_event(true, false), Some(VrEvent::InputFocusReleased));
        assert_eq!(focus_event(true, true), None);
        assert_eq!(focus_event(false, false), None);
    }

    #[test]
    fn untracked_poses_are_dropped() {
        let both = xr::SpaceLocationFlags::POSITION_VALID | xr::SpaceLocationFlags::ORIENTATION_VALID;
        assert!(pose_is_tracked(both));
        assert!(!pose_is_tracked(xr::SpaceLocationFlags::ORIENTATION_VALID));
    }
}
