//! The point-cloud scene: the cloud itself, helper primitives and controller
//! overlays.

use std::time::Instant;

use glam::{Mat4, Vec3};

use crate::compositor::{SceneRenderer, ViewContext};
use crate::controller::{Button, Controller};
use crate::gpu::GpuContext;
use crate::point_cloud::{PointCloud, PointVertex};
use crate::scene_pass::{GeometryBuffer, ModelSlot, Primitive, ScenePass};

/// Vertices reserved for controller overlays.
const OVERLAY_CAPACITY: u32 = 64;

/// Half the number of grid cells along each floor axis.
const GRID_HALF_CELLS: i32 = 5;
const GRID_SPACING: f32 = 0.5;

/// Length of the axis markers drawn at each controller, in meters.
const CONTROLLER_AXIS_LENGTH: f32 = 0.1;

const WHITE: Vec3 = Vec3::ONE;
const MAGENTA: Vec3 = Vec3::new(1.0, 0.0, 1.0);

/// A line grid on the floor plane (y = 0), centered at the origin.
pub fn grid_lines(half_cells: i32, spacing: f32) -> Vec<PointVertex> {
    let extent = half_cells as f32 * spacing;
    let color = Vec3::splat(0.3);
    let mut vertices = Vec::with_capacity((half_cells as usize * 2 + 1) * 4);
    for i in -half_cells..=half_cells {
        let t = i as f32 * spacing;
        vertices.push(PointVertex::new(Vec3::new(t, 0.0, -extent), color));
        vertices.push(PointVertex::new(Vec3::new(t, 0.0, extent), color));
        vertices.push(PointVertex::new(Vec3::new(-extent, 0.0, t), color));
        vertices.push(PointVertex::new(Vec3::new(extent, 0.0, t), color));
    }
    vertices
}

/// Red, green and blue lines along the X, Y and Z axes of `transform`.
pub fn axis_lines(transform: Mat4, length: f32) -> [PointVertex; 6] {
    let origin = transform.transform_point3(Vec3::ZERO);
    let axis = |dir: Vec3| PointVertex::new(transform.transform_point3(dir * length), dir);
    [
        PointVertex::new(origin, Vec3::X),
        axis(Vec3::X),
        PointVertex::new(origin, Vec3::Y),
        axis(Vec3::Y),
        PointVertex::new(origin, Vec3::Z),
        axis(Vec3::Z),
    ]
}

/// A ray out of the controller while the touchpad is held.
///
/// Pushing the thumb forward on the pad (positive y) lengthens the ray. The
/// ray fades from white at the controller to magenta at its tip.
pub fn pointer_ray(controller: &Controller) -> Option<[PointVertex; 2]> {
    if !controller.is_button_down(Button::Touchpad) {
        return None;
    }
    let reach = -0.8 - 0.6 * controller.axis(0).y;
    let pose = controller.device_to_absolute();
    Some([
        PointVertex::new(pose.transform_point3(Vec3::ZERO), WHITE),
        PointVertex::new(pose.transform_point3(Vec3::new(0.0, 0.0, reach)), MAGENTA),
    ])
}

/// Axis markers and pointer rays for every tracked controller, in world space.
pub fn controller_overlay(controllers: &[Controller]) -> Vec<PointVertex> {
    let mut vertices = Vec::with_capacity(controllers.len() * 8);
    for controller in controllers {
        vertices.extend(axis_lines(
            controller.device_to_absolute(),
            CONTROLLER_AXIS_LENGTH,
        ));
        if let Some(ray) = pointer_ray(controller) {
            vertices.extend(ray);
        }
    }
    vertices
}

#[derive(Clone, Copy, Debug)]
struct Grab {
    device_index: usize,
    start_inverse: Mat4,
    base_offset: Mat4,
}

/// Moves the point cloud with a controller while its grip is held.
///
/// The cloud follows the controller rigidly: each frame the controller's
/// motion since the grab started is applied on top of the offset the cloud
/// had at that moment.
#[derive(Clone, Debug, Default)]
pub struct MoveTool {
    grab: Option<Grab>,
}

impl MoveTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_grabbing(&self) -> bool {
        self.grab.is_some()
    }

    /// Returns true while the cloud is being moved.
    pub fn update(&mut self, controllers: &[Controller], cloud: &mut PointCloud) -> bool {
        if let Some(grab) = self.grab {
            let holder = controllers
                .iter()
                .find(|c| c.device_index() == grab.device_index)
                .filter(|c| c.is_button_down(Button::Grip));
            match holder {
                Some(controller) => {
                    let delta = controller.device_to_absolute() * grab.start_inverse;
                    cloud.set_offset(cloud.offset_for_world_delta(delta, grab.base_offset));
                    return true;
                }
                None => {
                    log::debug!("released point cloud from device {}", grab.device_index);
                    self.grab = None;
                }
            }
        }

        let Some(controller) = controllers.iter().find(|c| c.is_button_down(Button::Grip)) else {
            return false;
        };
        log::debug!("grabbed point cloud with device {}", controller.device_index());
        self.grab = Some(Grab {
            device_index: controller.device_index(),
            start_inverse: controller.device_to_absolute().inverse(),
            base_offset: cloud.offset(),
        });
        true
    }
}

/// Lets `controllers` move the cloud, then returns this frame's overlay.
pub fn apply_controllers(
    move_tool: &mut MoveTool,
    controllers: &[Controller],
    cloud: &mut PointCloud,
) -> Vec<PointVertex> {
    move_tool.update(controllers, cloud);
    controller_overlay(controllers)
}

/// Draws a [`PointCloud`] with its bounding box, optional floor grid and axes,
/// and controller overlays.
pub struct PointCloudScene {
    pass: ScenePass,
    cloud: PointCloud,
    cloud_points: GeometryBuffer,
    cloud_box: GeometryBuffer,
    helpers: GeometryBuffer,
    overlay: GeometryBuffer,
    show_helpers: bool,
    move_tool: MoveTool,
    start_time: Instant,
}

impl PointCloudScene {
    pub fn new(gpu: &GpuContext, eye_samples: u32, cloud: PointCloud) -> Self {
        let pass = ScenePass::new(gpu, eye_samples);

        let mut helper_vertices = grid_lines(GRID_HALF_CELLS, GRID_SPACING);
        helper_vertices.extend(axis_lines(Mat4::IDENTITY, 1.0));
        let helpers = pass.create_geometry(gpu, "Helper Lines", &helper_vertices);
        let overlay = pass.create_dynamic_geometry(gpu, "Controller Overlay", OVERLAY_CAPACITY);
        let (cloud_points, cloud_box) = Self::upload_cloud(&pass, gpu, &cloud);

        Self {
            pass,
            cloud,
            cloud_points,
            cloud_box,
            helpers,
            overlay,
            show_helpers: true,
            move_tool: MoveTool::new(),
            start_time: Instant::now(),
        }
    }

    fn upload_cloud(
        pass: &ScenePass,
        gpu: &GpuContext,
        cloud: &PointCloud,
    ) -> (GeometryBuffer, GeometryBuffer) {
        let points = if cloud.is_empty() {
            pass.create_dynamic_geometry(gpu, "Point Cloud", 1)
        } else {
            pass.create_geometry(gpu, "Point Cloud", cloud.vertices())
        };
        let bounds = pass.create_geometry(gpu, "Point Cloud Bounds", &cloud.bounding_box_lines());
        (points, bounds)
    }

    pub fn set_cloud(&mut self, gpu: &GpuContext, cloud: PointCloud) {
        let (points, bounds) = Self::upload_cloud(&self.pass, gpu, &cloud);
        self.cloud = cloud;
        self.cloud_points = points;
        self.cloud_box = bounds;
        self.move_tool = MoveTool::new();
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn toggle_helpers(&mut self) {
        self.show_helpers = !self.show_helpers;
        log::info!(
            "helper primitives {}",
            if self.show_helpers { "shown" } else { "hidden" }
        );
    }

    pub fn reset_position(&mut self) {
        self.cloud.reset_position();
        self.move_tool = MoveTool::new();
        log::info!("point cloud placement reset");
    }
}

impl SceneRenderer<GpuContext> for PointCloudScene {
    fn prepare(&mut self, gpu: &GpuContext, controllers: &[Controller]) {
        let overlay = apply_controllers(&mut self.move_tool, controllers, &mut self.cloud);
        self.overlay.write(gpu, &overlay);

        self.pass
            .write_model(gpu, ModelSlot::Cloud, self.cloud.model_matrix(), [1.0; 4]);
        self.pass
            .write_model(gpu, ModelSlot::World, Mat4::IDENTITY, [1.0; 4]);
    }

    fn render(&mut self, gpu: &GpuContext, pass: &mut wgpu::RenderPass<'_>, view: &ViewContext) {
        let time = self.start_time.elapsed().as_secs_f32();
        self.pass.begin_view(gpu, pass, view, time);

        let slot = view.slot;
        self.pass.draw(
            pass,
            slot,
            Primitive::Points,
            ModelSlot::Cloud,
            &self.cloud_points,
        );
        self.pass
            .draw(pass, slot, Primitive::Lines, ModelSlot::Cloud, &self.cloud_box);
        if self.show_helpers {
            self.pass
                .draw(pass, slot, Primitive::Lines, ModelSlot::World, &self.helpers);
        }
        self.pass
            .draw(pass, slot, Primitive::Lines, ModelSlot::World, &self.overlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerState;
    use glam::Vec2;

    fn controller(index: usize, state: ControllerState, pose: Mat4) -> Controller {
        let mut controller = Controller::new(index);
        controller.update(state, pose);
        controller
    }

    fn position(vertex: &PointVertex) -> Vec3 {
        Vec3::from_array(vertex.position)
    }

    #[test]
    fn grid_spans_both_floor_axes() {
        let lines = grid_lines(2, 0.5);
        assert_eq!(lines.len(), 5 * 4);
        assert!(lines.iter().all(|v| v.position[1] == 0.0));
        let max_x = lines.iter().map(|v| v.position[0]).fold(f32::MIN, f32::max);
        let min_z = lines.iter().map(|v| v.position[2]).fold(f32::MAX, f32::min);
        assert_eq!(max_x, 1.0);
        assert_eq!(min_z, -1.0);
    }

    #[test]
    fn axis_lines_follow_transform() {
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let lines = axis_lines(transform, 0.5);
        assert_eq!(position(&lines[0]), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(position(&lines[1]), Vec3::new(1.5, 2.0, 3.0));
        assert_eq!(position(&lines[5]), Vec3::new(1.0, 2.0, 3.5));
        assert_eq!(lines[3].color, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn pointer_ray_needs_touchpad() {
        let idle = controller(1, ControllerState::default(), Mat4::IDENTITY);
        assert!(pointer_ray(&idle).is_none());
    }

    #[test]
    fn pointer_ray_length_follows_touchpad_y() {
        let pose = Mat4::from_translation(Vec3::new(0.2, 1.0, 0.0));
        let state = ControllerState::default()
            .with_button(Button::Touchpad)
            .with_axis(0, Vec2::new(0.0, 0.5));
        let ray = pointer_ray(&controller(1, state, pose)).expect("touchpad held");

        assert_eq!(position(&ray[0]), Vec3::new(0.2, 1.0, 0.0));
        assert!((position(&ray[1]) - Vec3::new(0.2, 1.0, -1.1)).length() < 1e-6);
        assert_eq!(ray[0].color, [1.0, 1.0, 1.0]);
        assert_eq!(ray[1].color, [1.0, 0.0, 1.0]);
    }

    #[test]
    fn overlay_has_markers_and_rays() {
        let pointing = ControllerState::default().with_button(Button::Touchpad);
        let controllers = [
            controller(1, ControllerState::default(), Mat4::IDENTITY),
            controller(2, pointing, Mat4::IDENTITY),
        ];
        assert_eq!(controller_overlay(&controllers).len(), 6 + 6 + 2);
        assert!(controller_overlay(&[]).is_empty());
        assert!(controller_overlay(&controllers).len() <= OVERLAY_CAPACITY as usize);
    }

    #[test]
    fn grip_drags_cloud_with_controller() {
        let mut cloud = PointCloud::demo_sphere(64);
        let base_model = cloud.model_matrix();
        let mut tool = MoveTool::new();
        let grip = ControllerState::default().with_button(Button::Grip);

        let start = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
        assert!(tool.update(&[controller(1, grip, start)], &mut cloud));
        assert!(tool.is_grabbing());

        let moved = Mat4::from_translation(Vec3::new(0.3, 1.0, -0.2));
        assert!(tool.update(&[controller(1, grip, moved)], &mut cloud));

        let expected = Mat4::from_translation(Vec3::new(0.3, 0.0, -0.2)) * base_model;
        let point = Vec3::new(0.5, -0.25, 0.1);
        let got = cloud.model_matrix().transform_point3(point);
        assert!((got - expected.transform_point3(point)).length() < 1e-4);
    }

    #[test]
    fn releasing_grip_keeps_offset() {
        let mut cloud = PointCloud::demo_sphere(64);
        let mut tool = MoveTool::new();
        let grip = ControllerState::default().with_button(Button::Grip);

        tool.update(&[controller(1, grip, Mat4::IDENTITY)], &mut cloud);
        let moved = Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0));
        tool.update(&[controller(1, grip, moved)], &mut cloud);
        let offset = cloud.offset();

        assert!(!tool.update(&[controller(1, ControllerState::default(), moved)], &mut cloud));
        assert!(!tool.is_grabbing());
        assert_eq!(cloud.offset(), offset);
    }

    #[test]
    fn simulated_grip_moves_cloud_through_vr_system() {
        use crate::runtime::{SimulatedConfig, SimulatedProvider};
        use crate::vr_system::{ClipPlanes, VrSystem};

        let provider = SimulatedProvider::new(SimulatedConfig::new().unpaced().controllers(2));
        let mut system = VrSystem::init(provider, ClipPlanes::default()).unwrap();
        let mut cloud = PointCloud::demo_sphere(64);
        let mut tool = MoveTool::new();

        system.wait_and_fetch_poses();
        let idle = apply_controllers(&mut tool, system.controllers(), &mut cloud);
        assert_eq!(idle.len(), 12);
        assert!(!tool.is_grabbing());

        let held = ControllerState::default()
            .with_button(Button::Grip)
            .with_button(Button::Touchpad);
        system.runtime_mut().set_controller_state(1, held);
        system.wait_and_fetch_poses();
        let overlay = apply_controllers(&mut tool, system.controllers(), &mut cloud);
        assert!(tool.is_grabbing());
        assert_eq!(overlay.len(), 12 + 2);
        let grabbed = cloud.model_matrix();

        system.runtime_mut().move_controller(1, Vec3::new(0.0, 0.0, -0.4));
        system.wait_and_fetch_poses();
        apply_controllers(&mut tool, system.controllers(), &mut cloud);
        let shift = cloud.model_matrix().w_axis - grabbed.w_axis;
        assert!(shift.z < -0.35, "cloud followed the controller: {shift}");

        system
            .runtime_mut()
            .set_controller_state(1, ControllerState::default());
        system.wait_and_fetch_poses();
        apply_controllers(&mut tool, system.controllers(), &mut cloud);
        assert!(!tool.is_grabbing());
    }

    #[test]
    fn grab_ends_when_controller_disappears() {
        let mut cloud = PointCloud::demo_sphere(64);
        let mut tool = MoveTool::new();
        let grip = ControllerState::default().with_button(Button::Grip);

        tool.update(&[controller(3, grip, Mat4::IDENTITY)], &mut cloud);
        assert!(!tool.update(&[], &mut cloud));
        assert!(!tool.is_grabbing());
    }
}
