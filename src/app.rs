use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use glam::{Vec2, Vec3};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::KeyCode;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::cloud_scene::PointCloudScene;
use crate::compositor::{FrameCompositor, RenderMode};
use crate::controller::{Button, ControllerState};
use crate::device::ClearColor;
use crate::error::{ConfigError, VrInitError};
use crate::eye_buffers::{DEFAULT_SAMPLE_COUNT, validate_sample_count};
use crate::freelook_camera::FreelookCamera;
use crate::gpu::GpuContext;
use crate::input::Input;
use crate::mirror::MirrorWindow;
use crate::point_cloud::PointCloud;
use crate::runtime::{HeadsetProvider, HeadsetRuntime, RuntimeKind, SimulatedConfig};
use crate::vr_system::{ClipPlanes, VrSystem};

/// Points in the procedural cloud shown when no file is given.
const DEMO_POINTS: usize = 20_000;

/// Speed of the keyboard-driven simulated controller, in meters per second.
const SIMULATED_HAND_SPEED: f32 = 0.5;

/// Configuration for the viewer.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// MSAA samples for the eye render targets.
    pub samples: u32,
    pub clip: ClipPlanes,
    pub start_mode: RenderMode,
    pub cloud_path: Option<PathBuf>,
    pub runtime: RuntimeKind,
    /// Continue on the desktop when VR cannot start, instead of stopping.
    pub allow_desktop_fallback: bool,
    pub clear_color: ClearColor,
    /// Vertical field of view of the desktop camera, in degrees.
    pub desktop_fov: f32,
    /// Used when `runtime` is [`RuntimeKind::Simulated`].
    pub headset: SimulatedConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "pointvr".to_string(),
            width: 1280,
            height: 720,
            samples: DEFAULT_SAMPLE_COUNT,
            clip: ClipPlanes::default(),
            start_mode: RenderMode::Vr,
            cloud_path: None,
            runtime: RuntimeKind::default(),
            allow_desktop_fallback: false,
            clear_color: ClearColor::default(),
            desktop_fov: 70.0,
            headset: SimulatedConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn clip_planes(mut self, clip: ClipPlanes) -> Self {
        self.clip = clip;
        self
    }

    pub fn start_mode(mut self, mode: RenderMode) -> Self {
        self.start_mode = mode;
        self
    }

    pub fn cloud(mut self, path: impl Into<PathBuf>) -> Self {
        self.cloud_path = Some(path.into());
        self
    }

    pub fn runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn allow_desktop_fallback(mut self, allow: bool) -> Self {
        self.allow_desktop_fallback = allow;
        self
    }

    pub fn desktop_fov(mut self, degrees: f32) -> Self {
        self.desktop_fov = degrees;
        self
    }

    pub fn clear_color(mut self, clear: ClearColor) -> Self {
        self.clear_color = clear;
        self
    }

    pub fn headset(mut self, headset: SimulatedConfig) -> Self {
        self.headset = headset;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sample_count(self.samples)?;
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroSize {
                width: self.width,
                height: self.height,
            });
        }
        ClipPlanes::new(self.clip.near, self.clip.far)?;
        if !(self.desktop_fov > 0.0 && self.desktop_fov < 180.0) {
            return Err(ConfigError::FieldOfView(self.desktop_fov));
        }
        Ok(())
    }
}

/// Loads the configured cloud, or the demo sphere when none is set.
pub fn load_cloud(config: &AppConfig) -> anyhow::Result<PointCloud> {
    match &config.cloud_path {
        Some(path) => PointCloud::load_raw(path)
            .with_context(|| format!("cannot load point cloud {}", path.display())),
        None => {
            log::info!("no point cloud given, showing a {DEMO_POINTS}-point demo sphere");
            Ok(PointCloud::demo_sphere(DEMO_POINTS))
        }
    }
}

/// Opens the VR session on the configured runtime.
///
/// A failure is returned unless `allow_desktop_fallback` is set, in which
/// case it is logged and the viewer continues on the desktop.
pub fn init_vr(config: &AppConfig) -> Result<Option<VrSystem<HeadsetRuntime>>, VrInitError> {
    let provider = HeadsetProvider::new(config.runtime, config.headset.clone());
    log::info!("opening {} headset", provider.kind());
    match VrSystem::init(provider, config.clip) {
        Ok(system) => Ok(Some(system)),
        Err(err) if config.allow_desktop_fallback => {
            log::warn!("{err}; continuing in desktop mode");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Text of the blocking dialog shown when VR cannot start.
fn startup_failure_message(err: &VrInitError) -> String {
    format!(
        "{err}.\n\nConnect a headset and start your OpenXR runtime, or run with \
         --allow-desktop to use the desktop view, or --simulate for a software headset."
    )
}

/// Shows `err` in a modal dialog and waits for the user to dismiss it.
fn report_startup_failure(err: &VrInitError) {
    log::error!("{err}");
    rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title("pointvr: VR unavailable")
        .set_description(startup_failure_message(err))
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

/// Keyboard stand-in for the right controller of the simulated headset.
///
/// `G` holds the grip and `T` the touchpad; the arrow keys push the touchpad
/// forward or back. `I`/`K`, `J`/`L` and `U`/`O` move the hand along -z/+z,
/// -x/+x and -y/+y. Returns the controller state and this frame's motion.
fn simulated_controller_input(input: &Input, dt: f32) -> (ControllerState, Vec3) {
    let mut state = ControllerState::default();
    if input.key_down(KeyCode::KeyG) {
        state = state.with_button(Button::Grip);
    }
    if input.key_down(KeyCode::KeyT) {
        state = state.with_button(Button::Touchpad);
    }
    let mut pad = 0.0;
    if input.key_down(KeyCode::ArrowUp) {
        pad += 1.0;
    }
    if input.key_down(KeyCode::ArrowDown) {
        pad -= 1.0;
    }
    state = state.with_axis(0, Vec2::new(0.0, pad));

    let mut direction = Vec3::ZERO;
    for (key, axis) in [
        (KeyCode::KeyI, Vec3::NEG_Z),
        (KeyCode::KeyK, Vec3::Z),
        (KeyCode::KeyJ, Vec3::NEG_X),
        (KeyCode::KeyL, Vec3::X),
        (KeyCode::KeyU, Vec3::NEG_Y),
        (KeyCode::KeyO, Vec3::Y),
    ] {
        if input.key_down(key) {
            direction += axis;
        }
    }
    (state, direction * SIMULATED_HAND_SPEED * dt)
}

/// Run the viewer until the window closes or the runtime asks to quit.
///
/// # Example
/// ```ignore
/// pointvr::run(AppConfig::new().samples(8).start_mode(RenderMode::Standard))?;
/// ```
pub fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let cloud = load_cloud(&config)?;
    let system = match init_vr(&config) {
        Ok(system) => system,
        Err(err) => {
            report_startup_failure(&err);
            return Err(err).context("VR is unavailable");
        }
    };

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PointVrApp {
        state: AppState::Pending(Box::new(Pending {
            config,
            cloud,
            system,
        })),
        error: None,
    };
    event_loop.run_app(&mut app).context("event loop failed")?;

    match app.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct Pending {
    config: AppConfig,
    cloud: PointCloud,
    system: Option<VrSystem<HeadsetRuntime>>,
}

struct Running {
    window: Arc<Window>,
    gpu: GpuContext,
    compositor: FrameCompositor<GpuContext, HeadsetRuntime>,
    scene: PointCloudScene,
    mirror: MirrorWindow,
    camera: FreelookCamera,
    input: Input,
    last_frame: Instant,
    cloud_path: Option<PathBuf>,
}

enum AppState {
    Pending(Box<Pending>),
    Running(Box<Running>),
    Stopped,
}

struct PointVrApp {
    state: AppState,
    error: Option<anyhow::Error>,
}

impl Running {
    fn start(event_loop: &ActiveEventLoop, pending: Pending) -> anyhow::Result<Self> {
        let Pending {
            config,
            cloud,
            system,
        } = pending;

        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .context("failed to create window")?,
        );
        let gpu = GpuContext::new(window.clone())?;

        let mut compositor = FrameCompositor::desktop(config.clear_color);
        if let Some(system) = system {
            if compositor
                .attach_vr(&gpu, system, config.samples, config.start_mode)
                .is_err()
            {
                log::warn!("continuing in desktop mode");
            }
        }
        log::info!("starting in {:?} mode", compositor.mode());

        let scene = PointCloudScene::new(&gpu, config.samples, cloud);
        let mirror = MirrorWindow::new(&gpu);

        Ok(Self {
            window,
            gpu,
            compositor,
            scene,
            mirror,
            camera: FreelookCamera::new()
                .fov(config.desktop_fov)
                .clip_planes(config.clip.near, config.clip.far),
            input: Input::new(),
            last_frame: Instant::now(),
            cloud_path: config.cloud_path,
        })
    }

    fn reload_cloud(&mut self) {
        let Some(path) = &self.cloud_path else {
            log::info!("no point cloud file to reload");
            return;
        };
        match PointCloud::load_raw(path) {
            Ok(cloud) => {
                log::info!("reloaded {} ({} points)", path.display(), cloud.vertex_count());
                self.scene.set_cloud(&self.gpu, cloud);
            }
            Err(err) => log::error!("cannot reload {}: {err}", path.display()),
        }
    }

    fn drive_simulated_hand(&mut self, dt: f32) {
        let Some(stage) = self.compositor.vr_stage_mut() else {
            return;
        };
        if let HeadsetRuntime::Simulated(runtime) = stage.system.runtime_mut() {
            let (state, motion) = simulated_controller_input(&self.input, dt);
            runtime.set_controller_state(1, state);
            runtime.move_controller(1, motion);
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.compositor.process_vr_events() {
            log::info!("VR runtime requested quit");
            event_loop.exit();
            return;
        }

        if self.input.key_pressed(KeyCode::Escape) {
            event_loop.exit();
            return;
        }
        if self.input.key_pressed(KeyCode::Backquote) {
            self.compositor.toggle_mode();
        }
        if self.input.key_pressed(KeyCode::KeyH) {
            self.scene.toggle_helpers();
        }
        if self.input.key_pressed(KeyCode::KeyR) {
            self.scene.reset_position();
        }
        if self.input.key_pressed(KeyCode::F5) {
            self.reload_cloud();
        }

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.drive_simulated_hand(dt);

        self.camera.update(&self.input, dt);
        let desktop_view = self.camera.camera().view_context(self.gpu.aspect());

        match self.compositor.render_frame(
            &self.gpu,
            &mut self.scene,
            &mut self.mirror,
            &desktop_view,
        ) {
            Ok(report) => log::trace!("{report:?}"),
            Err(err) => log::warn!("frame skipped: {err}"),
        }

        self.input.begin_frame();
        self.window.request_redraw();
    }
}

impl ApplicationHandler for PointVrApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self.state, AppState::Pending(_)) {
            return;
        }
        let AppState::Pending(pending) = std::mem::replace(&mut self.state, AppState::Stopped)
        else {
            return;
        };

        match Running::start(event_loop, *pending) {
            Ok(running) => {
                running.window.request_redraw();
                self.state = AppState::Running(Box::new(running));
            }
            Err(err) => {
                log::error!("{err:#}");
                self.error = Some(err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let AppState::Running(running) = &mut self.state else {
            return;
        };

        running.input.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                running.gpu.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                running.redraw(event_loop);
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let AppState::Running(running) = &mut self.state {
            running.compositor.shutdown();
        }
        self.state = AppState::Stopped;
    }
}
