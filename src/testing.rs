//! Recording fakes for the device and runtime seams.
//!
//! `FakeDevice` tracks every live attachment handle so leak checks are exact;
//! `ScriptedRuntime` exposes its call log through a shared handle so a test can
//! inspect it after the runtime has moved into a `VrSystem`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::compositor::{PresentationWindow, SceneRenderer, ViewContext, ViewSlot};
use crate::controller::{Controller, ControllerState};
use crate::device::{
    Attachment, AttachmentDesc, AttachmentKind, ClearColor, Extent, FramebufferStatus, PassTarget,
    RenderDevice, TextureHandle, check_attachments,
};
use crate::error::{CompositorError, DeviceError, VrInitError};
use crate::eye::Eye;
use crate::math::{HmdMatrix34, HmdMatrix44, frustum_from_tangents};
use crate::runtime::{
    ColorSpace, DeviceClass, DeviceProperty, MAX_TRACKED_DEVICES, RuntimeProvider, SubmitTexture,
    TextureTransfer, TrackedDevicePose, VrEvent, VrRuntime,
};

pub fn submit_texture(raw: u32) -> SubmitTexture<'static> {
    SubmitTexture {
        handle: TextureHandle::new(raw).unwrap(),
        extent: Extent::new(1512, 1680),
        color_space: ColorSpace::Gamma,
        pixels: None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    Create { handle: TextureHandle, kind: AttachmentKind, samples: u32 },
    BeginFrame,
    AcquireWindow,
    BeginPass { target: Option<TextureHandle>, viewport: Extent },
    Resolve { src: TextureHandle, dst: TextureHandle },
    Flush,
    ReadPixels { handle: TextureHandle },
    EndFrame { presented: bool },
}

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub calls: Vec<DeviceCall>,
    pub live: BTreeSet<TextureHandle>,
}

impl DeviceLog {
    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

pub struct FakeTexture {
    handle: TextureHandle,
    extent: Extent,
    samples: u32,
    kind: AttachmentKind,
    log: Rc<RefCell<DeviceLog>>,
}

impl Attachment for FakeTexture {
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

impl Drop for FakeTexture {
    fn drop(&mut self) {
        self.log.borrow_mut().live.remove(&self.handle);
    }
}

pub struct FakeFrame;

pub struct FakeWindowImage;

/// The open pass: target handle (`None` for the window) and viewport.
pub struct FakePass {
    pub target: Option<TextureHandle>,
    pub viewport: Extent,
}

pub struct FakeDevice {
    log: Rc<RefCell<DeviceLog>>,
    next_handle: Cell<u32>,
    window: Extent,
    max_dimension: u32,
    supported_samples: Vec<u32>,
    allocation_budget: Cell<Option<usize>>,
    surface_lost: Cell<bool>,
    readback_fails: Cell<bool>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            log: Rc::default(),
            next_handle: Cell::new(1),
            window: Extent::new(1280, 720),
            max_dimension: 8192,
            supported_samples: vec![1, 2, 4, 8],
            allocation_budget: Cell::new(None),
            surface_lost: Cell::new(false),
            readback_fails: Cell::new(false),
        }
    }

    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.max_dimension = max;
        self
    }

    pub fn with_supported_samples(mut self, samples: &[u32]) -> Self {
        self.supported_samples = samples.to_vec();
        self
    }

    /// Allow only `n` more allocations before failing.
    pub fn fail_after_allocations(&self, n: usize) {
        self.allocation_budget.set(Some(n));
    }

    pub fn set_surface_lost(&self, lost: bool) {
        self.surface_lost.set(lost);
    }

    pub fn set_readback_fails(&self, fails: bool) {
        self.readback_fails.set(fails);
    }

    pub fn log(&self) -> Rc<RefCell<DeviceLog>> {
        Rc::clone(&self.log)
    }

    pub fn live_handles(&self) -> usize {
        self.log.borrow().live.len()
    }

    pub fn clear_calls(&self) {
        self.log.borrow_mut().calls.clear();
    }

    fn record(&self, call: DeviceCall) {
        self.log.borrow_mut().calls.push(call);
    }
}

impl RenderDevice for FakeDevice {
    type Texture = FakeTexture;
    type Frame = FakeFrame;
    type WindowImage = FakeWindowImage;
    type Pass<'f>
        = FakePass
    where
        Self: 'f;

    fn create_attachment(&self, desc: &AttachmentDesc) -> Result<FakeTexture, DeviceError> {
        if let Some(budget) = self.allocation_budget.get() {
            if budget == 0 {
                return Err(DeviceError::Unsupported("out of memory".to_string()));
            }
            self.allocation_budget.set(Some(budget - 1));
        }

        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        let handle = TextureHandle::new(raw).unwrap();
        self.log.borrow_mut().live.insert(handle);
        self.record(DeviceCall::Create {
            handle,
            kind: desc.kind,
            samples: desc.samples,
        });
        Ok(FakeTexture {
            handle,
            extent: desc.extent,
            samples: desc.samples,
            kind: desc.kind,
            log: Rc::clone(&self.log),
        })
    }

    fn framebuffer_status(
        &self,
        color: &FakeTexture,
        depth: Option<&FakeTexture>,
    ) -> FramebufferStatus {
        let status = check_attachments(color, depth);
        if !status.is_complete() {
            return status;
        }
        let extent = color.extent();
        if extent.width > self.max_dimension || extent.height > self.max_dimension {
            return FramebufferStatus::ExceedsLimits {
                extent,
                max: self.max_dimension,
            };
        }
        if !self.supported_samples.contains(&color.samples()) {
            return FramebufferStatus::UnsupportedSampleCount(color.samples());
        }
        FramebufferStatus::Complete
    }

    fn begin_frame(&self) -> FakeFrame {
        self.record(DeviceCall::BeginFrame);
        FakeFrame
    }

    fn acquire_window(&self) -> Result<FakeWindowImage, DeviceError> {
        if self.surface_lost.get() {
            return Err(DeviceError::Surface("surface lost".to_string()));
        }
        self.record(DeviceCall::AcquireWindow);
        Ok(FakeWindowImage)
    }

    fn begin_pass<'f>(
        &'f self,
        _frame: &'f mut FakeFrame,
        target: PassTarget<'f, FakeTexture, FakeWindowImage>,
        _clear: ClearColor,
    ) -> FakePass {
        let (target, viewport) = match target {
            PassTarget::Framebuffer { color, .. } => (Some(color.handle()), color.extent()),
            PassTarget::Window(_) => (None, self.window),
        };
        self.record(DeviceCall::BeginPass { target, viewport });
        FakePass { target, viewport }
    }

    fn resolve(&self, _frame: &mut FakeFrame, src: &FakeTexture, dst: &FakeTexture) {
        self.record(DeviceCall::Resolve {
            src: src.handle(),
            dst: dst.handle(),
        });
    }

    fn flush(&self, _frame: &mut FakeFrame) {
        self.record(DeviceCall::Flush);
    }

    /// Every byte of the result is the low byte of the texture handle.
    fn read_pixels(&self, texture: &FakeTexture) -> Result<Vec<u8>, DeviceError> {
        if self.readback_fails.get() {
            return Err(DeviceError::Readback("device lost".to_string()));
        }
        self.record(DeviceCall::ReadPixels {
            handle: texture.handle(),
        });
        let Extent { width, height } = texture.extent();
        Ok(vec![
            texture.handle().get() as u8;
            (width * height * 4) as usize
        ])
    }

    fn end_frame(&self, _frame: FakeFrame, window: Option<FakeWindowImage>) {
        self.record(DeviceCall::EndFrame {
            presented: window.is_some(),
        });
    }

    fn window_extent(&self) -> Extent {
        self.window
    }
}

#[derive(Debug)]
pub struct RuntimeLog {
    pub waits: usize,
    pub submits: Vec<Eye>,
    pub submitted_handles: Vec<TextureHandle>,
    pub focus: bool,
    pub rejections: Vec<(Eye, CompositorError)>,
    /// Pose sets handed out by successive waits: `(slot, Some(pose))` is a
    /// valid pose, `(slot, None)` an invalid one. Empty means "HMD at origin".
    pub next_poses: VecDeque<Vec<(usize, Option<Mat4>)>>,
    pub events: VecDeque<VrEvent>,
    pub controllers: Vec<usize>,
    /// First byte and length of the pixels attached to each submission.
    pub submitted_pixels: Vec<Option<(u8, usize)>>,
}

pub struct ScriptedRuntime {
    log: Rc<RefCell<RuntimeLog>>,
    render_target_size: Extent,
    transfer: TextureTransfer,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(RuntimeLog {
                waits: 0,
                submits: Vec::new(),
                submitted_handles: Vec::new(),
                focus: true,
                rejections: Vec::new(),
                next_poses: VecDeque::new(),
                events: VecDeque::new(),
                controllers: Vec::new(),
                submitted_pixels: Vec::new(),
            })),
            render_target_size: Extent::new(1512, 1680),
            transfer: TextureTransfer::Handle,
        }
    }

    pub fn wants_pixels(mut self) -> Self {
        self.transfer = TextureTransfer::Pixels;
        self
    }

    pub fn focused(self, focus: bool) -> Self {
        self.log.borrow_mut().focus = focus;
        self
    }

    pub fn reject(self, eye: Eye, err: CompositorError) -> Self {
        self.log.borrow_mut().rejections.push((eye, err));
        self
    }

    pub fn render_target_size(mut self, width: u32, height: u32) -> Self {
        self.render_target_size = Extent::new(width, height);
        self
    }

    pub fn log(&self) -> Rc<RefCell<RuntimeLog>> {
        Rc::clone(&self.log)
    }
}

impl VrRuntime for ScriptedRuntime {
    fn recommended_render_target_size(&self) -> Extent {
        self.render_target_size
    }

    fn wait_get_poses(&mut self, poses: &mut [TrackedDevicePose; MAX_TRACKED_DEVICES]) {
        let mut log = self.log.borrow_mut();
        log.waits += 1;
        *poses = [TrackedDevicePose::default(); MAX_TRACKED_DEVICES];
        let script = log
            .next_poses
            .pop_front()
            .unwrap_or_else(|| vec![(0, Some(Mat4::IDENTITY))]);
        for (index, pose) in script {
            poses[index] = TrackedDevicePose {
                device_to_absolute_tracking: HmdMatrix34::from_mat4(pose.unwrap_or(Mat4::IDENTITY)),
                pose_is_valid: pose.is_some(),
                device_is_connected: true,
                ..Default::default()
            };
        }
    }

    fn projection_matrix(&self, _eye: Eye, near: f32, far: f32) -> HmdMatrix44 {
        HmdMatrix44::from_mat4(frustum_from_tangents(-1.0, 1.0, -1.0, 1.0, near, far))
    }

    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34 {
        let x = match eye {
            Eye::Left => -0.032,
            Eye::Right => 0.032,
        };
        HmdMatrix34::from_mat4(Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
    }

    fn has_input_focus(&self) -> bool {
        self.log.borrow().focus
    }

    fn texture_transfer(&self) -> TextureTransfer {
        self.transfer
    }

    fn submit(&mut self, eye: Eye, texture: &SubmitTexture<'_>) -> Result<(), CompositorError> {
        let mut log = self.log.borrow_mut();
        log.submits.push(eye);
        log.submitted_handles.push(texture.handle);
        let pixels = texture
            .pixels
            .map(|p| (p.first().copied().unwrap_or_default(), p.len()));
        log.submitted_pixels.push(pixels);
        match log.rejections.iter().find(|(e, _)| *e == eye) {
            Some((_, err)) => Err(*err),
            None => Ok(()),
        }
    }

    fn poll_event(&mut self) -> Option<VrEvent> {
        self.log.borrow_mut().events.pop_front()
    }

    fn device_class(&self, index: usize) -> DeviceClass {
        if index == 0 {
            DeviceClass::Hmd
        } else if self.log.borrow().controllers.contains(&index) {
            DeviceClass::Controller
        } else {
            DeviceClass::Invalid
        }
    }

    fn controller_state(&self, index: usize) -> Option<ControllerState> {
        self.log
            .borrow()
            .controllers
            .contains(&index)
            .then(ControllerState::default)
    }

    fn device_string(&self, index: usize, _property: DeviceProperty) -> Option<String> {
        (index == 0).then(|| "scripted".to_string())
    }
}

/// Hands out a `ScriptedRuntime`; presence flags fail init the way a real
/// provider does.
pub struct ScriptedProvider {
    pub hmd_present: bool,
    pub runtime_installed: bool,
    pub runtime: ScriptedRuntime,
}

impl RuntimeProvider for ScriptedProvider {
    type Runtime = ScriptedRuntime;

    fn is_hmd_present(&self) -> bool {
        self.hmd_present
    }

    fn is_runtime_installed(&self) -> bool {
        self.runtime_installed
    }

    fn init(self) -> Result<ScriptedRuntime, VrInitError> {
        Ok(self.runtime)
    }
}

#[derive(Default)]
pub struct RecordingScene {
    pub prepared: usize,
    pub rendered: Vec<(ViewSlot, Option<TextureHandle>, Extent)>,
    pub views: Vec<ViewContext>,
    pub controllers_seen: usize,
}

impl SceneRenderer<FakeDevice> for RecordingScene {
    fn prepare(&mut self, _device: &FakeDevice, controllers: &[Controller]) {
        self.prepared += 1;
        self.controllers_seen = controllers.len();
    }

    fn render(&mut self, _device: &FakeDevice, pass: &mut FakePass, view: &ViewContext) {
        self.rendered.push((view.slot, pass.target, pass.viewport));
        self.views.push(*view);
    }
}

#[derive(Default)]
pub struct RecordingWindow {
    pub presented: Vec<(TextureHandle, TextureHandle, Extent, Extent)>,
    pub clears: Vec<ClearColor>,
}

impl PresentationWindow<FakeDevice> for RecordingWindow {
    fn present(
        &mut self,
        _device: &FakeDevice,
        _frame: &mut FakeFrame,
        _window: &FakeWindowImage,
        left: &FakeTexture,
        right: &FakeTexture,
        clear: ClearColor,
    ) {
        self.presented
            .push((left.handle(), right.handle(), left.extent(), right.extent()));
        self.clears.push(clear);
    }
}
