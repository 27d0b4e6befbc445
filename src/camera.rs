use glam::{Mat4, Vec3};

use crate::compositor::{ViewContext, ViewSlot};

/// The desktop camera used in Standard mode.
///
/// Provides position, orientation, field of view and clip planes.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.6, 0.5),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: 70f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, position: impl Into<Vec3>) -> Self {
        self.position = position.into();
        self
    }

    pub fn looking_at(mut self, target: impl Into<Vec3>) -> Self {
        let forward = (target.into() - self.position).normalize_or_zero();
        if forward != Vec3::ZERO {
            self.forward = forward;
        }
        self
    }

    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    /// Right-handed perspective with 0..1 depth, matching the eye projections.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    /// Matrices for a Standard-mode draw into the window.
    pub fn view_context(&self, aspect: f32) -> ViewContext {
        ViewContext {
            slot: ViewSlot::Desktop,
            view: self.view_matrix(),
            projection: self.projection_matrix(aspect),
            eye_position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_maps_camera_to_origin() {
        let camera = Camera::new().at([1.0, 2.0, 3.0]);
        let p = camera.view_matrix().transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert!(p.length() < 1e-6);
    }

    #[test]
    fn looking_at_target_puts_it_on_negative_z() {
        let camera = Camera::new().at([0.0, 0.0, 0.0]).looking_at([5.0, 0.0, 0.0]);
        let p = camera.view_matrix().transform_point3(Vec3::new(5.0, 0.0, 0.0));
        assert!((p - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-5);
        assert!((camera.right() - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn looking_at_own_position_keeps_direction() {
        let camera = Camera::new().at([1.0, 1.0, 1.0]).looking_at([1.0, 1.0, 1.0]);
        assert_eq!(camera.forward, Vec3::NEG_Z);
    }

    #[test]
    fn view_context_is_desktop_slot() {
        let context = Camera::new().view_context(16.0 / 9.0);
        assert_eq!(context.slot, ViewSlot::Desktop);
        assert_eq!(context.eye_position, Camera::new().position);
    }
}
