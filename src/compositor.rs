//! Per-frame orchestration of the stereo pipeline.
//!
//! [`FrameCompositor`] owns the VR stage (session + eye buffers) when one is
//! available and renders each frame in the active [`RenderMode`]:
//!
//! * `Vr`: wait for poses, draw the left then the right eye, resolve both,
//!   flush, submit both to the compositor (only with input focus), and mirror
//!   the resolved images into the desktop window. The window is only touched
//!   for the mirror; if its image cannot be acquired the mirror is skipped and
//!   the headset still gets its frame.
//! * `Standard`: one pass into the window with the desktop camera.
//!
//! Mode requests are applied at the start of the next frame.

use glam::{Mat4, Vec3};

use crate::controller::Controller;
use crate::device::{Attachment, ClearColor, PassTarget, RenderDevice};
use crate::error::{FrameError, FramebufferError};
use crate::eye::Eye;
use crate::eye_buffers::EyeBufferManager;
use crate::runtime::{ColorSpace, SubmitTexture, TextureTransfer, VrRuntime};
use crate::vr_system::{EventSummary, SubmitOutcome, VrSystem};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Vr,
    Standard,
}

impl RenderMode {
    pub fn toggled(self) -> Self {
        match self {
            RenderMode::Vr => RenderMode::Standard,
            RenderMode::Standard => RenderMode::Vr,
        }
    }
}

/// Which view a scene draw is for. Each slot has its own camera uniforms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewSlot {
    Eye(Eye),
    Desktop,
}

impl ViewSlot {
    pub const ALL: [ViewSlot; 3] = [
        ViewSlot::Eye(Eye::Left),
        ViewSlot::Eye(Eye::Right),
        ViewSlot::Desktop,
    ];

    pub fn index(self) -> usize {
        match self {
            ViewSlot::Eye(eye) => eye.index(),
            ViewSlot::Desktop => 2,
        }
    }
}

/// Camera matrices for one scene draw.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ViewContext {
    pub slot: ViewSlot,
    pub view: Mat4,
    pub projection: Mat4,
    /// Camera position in world space.
    pub eye_position: Vec3,
}

impl ViewContext {
    pub fn for_eye<R: VrRuntime>(system: &VrSystem<R>, eye: Eye) -> Self {
        let view = system.eye_view(eye);
        Self {
            slot: ViewSlot::Eye(eye),
            view,
            projection: system.projection_matrix(eye),
            eye_position: view.inverse().w_axis.truncate(),
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Draws the world into whatever target is bound.
///
/// `render` must not rebind or resize the target.
pub trait SceneRenderer<D: RenderDevice> {
    /// Called once per frame before any view is drawn.
    fn prepare(&mut self, _device: &D, _controllers: &[Controller]) {}

    fn render(&mut self, device: &D, pass: &mut D::Pass<'_>, view: &ViewContext);
}

/// Shows the two resolved eye images on the desktop.
pub trait PresentationWindow<D: RenderDevice> {
    fn present(
        &mut self,
        device: &D,
        frame: &mut D::Frame,
        window: &D::WindowImage,
        left: &D::Texture,
        right: &D::Texture,
        clear: ClearColor,
    );
}

/// What one call to [`FrameCompositor::render_frame`] did.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub mode: RenderMode,
    pub pose_fetches: u32,
    pub scene_calls: u32,
    /// `None` outside VR mode.
    pub submission: Option<SubmitOutcome>,
    pub mirrored: bool,
}

impl FrameReport {
    fn new(mode: RenderMode) -> Self {
        Self {
            mode,
            pose_fetches: 0,
            scene_calls: 0,
            submission: None,
            mirrored: false,
        }
    }
}

/// A live VR session together with its eye buffers.
pub struct VrStage<D: RenderDevice, R: VrRuntime> {
    pub system: VrSystem<R>,
    pub eye_buffers: EyeBufferManager<D>,
}

pub struct FrameCompositor<D: RenderDevice, R: VrRuntime> {
    vr: Option<VrStage<D, R>>,
    mode: RenderMode,
    pending_mode: Option<RenderMode>,
    clear: ClearColor,
}

impl<D: RenderDevice, R: VrRuntime> FrameCompositor<D, R> {
    /// A compositor with no VR stage. Always renders in `Standard` mode.
    pub fn desktop(clear: ClearColor) -> Self {
        Self {
            vr: None,
            mode: RenderMode::Standard,
            pending_mode: None,
            clear,
        }
    }

    /// Allocates eye buffers for `system` and starts in `mode`.
    ///
    /// If the buffers cannot be created the session is dropped, the
    /// compositor stays desktop-only and the error is returned for reporting.
    pub fn attach_vr(
        &mut self,
        device: &D,
        system: VrSystem<R>,
        samples: u32,
        mode: RenderMode,
    ) -> Result<(), FramebufferError> {
        self.detach_vr();

        let mut eye_buffers = EyeBufferManager::new(samples);
        if let Err(err) = eye_buffers.initialize(device, system.runtime()) {
            log::error!("VR disabled: {err}");
            return Err(err);
        }
        self.vr = Some(VrStage {
            system,
            eye_buffers,
        });
        self.mode = mode;
        self.pending_mode = None;
        Ok(())
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn has_vr(&self) -> bool {
        self.vr.is_some()
    }

    pub fn vr_stage(&self) -> Option<&VrStage<D, R>> {
        self.vr.as_ref()
    }

    pub fn vr_stage_mut(&mut self) -> Option<&mut VrStage<D, R>> {
        self.vr.as_mut()
    }

    /// Switch modes at the next frame boundary.
    pub fn request_mode(&mut self, mode: RenderMode) {
        self.pending_mode = Some(mode);
    }

    pub fn toggle_mode(&mut self) {
        let current = self.pending_mode.unwrap_or(self.mode);
        self.request_mode(current.toggled());
    }

    fn apply_pending_mode(&mut self) {
        let Some(mode) = self.pending_mode.take() else {
            return;
        };
        if mode == self.mode {
            return;
        }
        if mode == RenderMode::Vr && self.vr.is_none() {
            log::warn!("VR mode requested but no VR session is available");
            return;
        }
        log::info!("switching render mode: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
    }

    /// Drains runtime events; returns whether the runtime asked to quit.
    pub fn process_vr_events(&mut self) -> bool {
        match self.vr.as_mut() {
            Some(stage) => {
                let EventSummary { quit_requested, .. } = stage.system.process_events();
                quit_requested
            }
            None => false,
        }
    }

    /// Renders one frame in the current mode.
    ///
    /// `desktop_view` is used in `Standard` mode only.
    pub fn render_frame<S, W>(
        &mut self,
        device: &D,
        scene: &mut S,
        window: &mut W,
        desktop_view: &ViewContext,
    ) -> Result<FrameReport, FrameError>
    where
        S: SceneRenderer<D>,
        W: PresentationWindow<D>,
    {
        self.apply_pending_mode();
        let clear = self.clear;

        if self.mode == RenderMode::Vr {
            if let Some(stage) = self.vr.as_mut() {
                return Self::render_vr(stage, device, scene, window, clear);
            }
        }
        Self::render_standard(self.vr.as_ref(), device, scene, desktop_view, clear)
    }

    fn render_vr<S, W>(
        stage: &mut VrStage<D, R>,
        device: &D,
        scene: &mut S,
        window: &mut W,
        clear: ClearColor,
    ) -> Result<FrameReport, FrameError>
    where
        S: SceneRenderer<D>,
        W: PresentationWindow<D>,
    {
        let mut report = FrameReport::new(RenderMode::Vr);

        stage.system.wait_and_fetch_poses();
        report.pose_fetches += 1;
        scene.prepare(device, stage.system.controllers());

        let mut frame = device.begin_frame();

        for eye in Eye::BOTH {
            let view = ViewContext::for_eye(&stage.system, eye);
            let mut pass = stage
                .eye_buffers
                .bind_render_target(device, &mut frame, eye, clear)?;
            scene.render(device, &mut pass, &view);
            report.scene_calls += 1;
        }

        stage.eye_buffers.resolve_all(device, &mut frame)?;
        // Submitted textures must be finished before the compositor reads them.
        device.flush(&mut frame);

        let (Some(left), Some(right)) = (
            stage.eye_buffers.resolved_texture(Eye::Left),
            stage.eye_buffers.resolved_texture(Eye::Right),
        ) else {
            return Err(FramebufferError::NotInitialized.into());
        };

        let [left_pixels, right_pixels] = read_back(device, &stage.system, [left, right]);
        let outcome = stage.system.submit_eye_textures(
            &submit_texture(left, left_pixels.as_deref()),
            &submit_texture(right, right_pixels.as_deref()),
        );
        report.submission = Some(outcome);

        let window_image = match device.acquire_window() {
            Ok(image) => {
                window.present(device, &mut frame, &image, left, right, clear);
                report.mirrored = true;
                Some(image)
            }
            Err(err) => {
                log::warn!("desktop mirror skipped: {err}");
                None
            }
        };

        device.end_frame(frame, window_image);
        Ok(report)
    }

    fn render_standard<S>(
        stage: Option<&VrStage<D, R>>,
        device: &D,
        scene: &mut S,
        desktop_view: &ViewContext,
        clear: ClearColor,
    ) -> Result<FrameReport, FrameError>
    where
        S: SceneRenderer<D>,
    {
        let mut report = FrameReport::new(RenderMode::Standard);
        let controllers = stage.map(|s| s.system.controllers()).unwrap_or(&[]);
        scene.prepare(device, controllers);

        let image = device.acquire_window()?;
        let mut frame = device.begin_frame();
        {
            let mut pass = device.begin_pass(&mut frame, PassTarget::Window(&image), clear);
            scene.render(device, &mut pass, desktop_view);
            report.scene_calls += 1;
        }
        device.end_frame(frame, Some(image));
        Ok(report)
    }

    /// Releases eye buffers and ends the VR session. Idempotent.
    pub fn shutdown(&mut self) {
        self.detach_vr();
        self.mode = RenderMode::Standard;
        self.pending_mode = None;
    }

    fn detach_vr(&mut self) {
        if let Some(mut stage) = self.vr.take() {
            stage.eye_buffers.shutdown();
            drop(stage.system);
            log::info!("VR session closed");
        }
    }
}

fn submit_texture<'a, T: Attachment>(texture: &T, pixels: Option<&'a [u8]>) -> SubmitTexture<'a> {
    SubmitTexture {
        handle: texture.handle(),
        extent: texture.extent(),
        color_space: ColorSpace::Gamma,
        pixels,
    }
}

/// Copies both eyes back to the CPU when the runtime needs pixels and will
/// accept a submission. A failed read leaves that eye without pixels; the
/// runtime rejects it and the next frame tries again.
fn read_back<D: RenderDevice, R: VrRuntime>(
    device: &D,
    system: &VrSystem<R>,
    textures: [&D::Texture; 2],
) -> [Option<Vec<u8>>; 2] {
    if system.runtime().texture_transfer() != TextureTransfer::Pixels || !system.has_input_focus()
    {
        return [None, None];
    }
    textures.map(|texture| match device.read_pixels(texture) {
        Ok(pixels) => Some(pixels),
        Err(err) => {
            log::warn!("eye texture {} not read back: {err}", texture.handle());
            None
        }
    })
}
