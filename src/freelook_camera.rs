//! A first-person freelook camera for Standard mode.
//!
//! [`FreelookCamera`] moves with WASD, Space and Left Shift, and looks around
//! while the right mouse button is held. Releasing the button leaves the
//! cursor free for the window.
//!
//! ```ignore
//! let mut camera = FreelookCamera::new()
//!     .position([0.0, 1.6, 0.5])
//!     .fov(80.0);
//!
//! // In frame loop:
//! camera.update(&input, dt);
//! let view = camera.camera().view_context(gpu.aspect());
//! ```

use std::f32::consts::FRAC_PI_2;

use glam::Vec3;
use winit::event::MouseButton;
use winit::keyboard::KeyCode;

use crate::camera::Camera;
use crate::input::Input;

const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.01;

#[derive(Clone, Debug)]
pub struct FreelookCamera {
    pub position: Vec3,
    /// Horizontal angle in radians. 0 = looking toward -Z.
    pub yaw: f32,
    /// Vertical angle in radians. 0 = horizontal, positive = up.
    pub pitch: f32,
    /// Field of view in radians.
    pub fov: f32,
    /// Radians per pixel of mouse drag.
    pub sensitivity: f32,
    /// Movement speed in meters per second.
    pub speed: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for FreelookCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.6, 0.5),
            yaw: 0.0,
            pitch: -0.3,
            fov: 70f32.to_radians(),
            sensitivity: 0.003,
            speed: 1.5,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl FreelookCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(mut self, position: impl Into<Vec3>) -> Self {
        self.position = position.into();
        self
    }

    /// Set the field of view in degrees.
    pub fn fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Set the look direction using a direction vector.
    pub fn looking_toward(mut self, direction: impl Into<Vec3>) -> Self {
        let dir = direction.into().normalize_or_zero();
        self.yaw = dir.x.atan2(-dir.z);
        self.pitch = dir.y.asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self
    }

    fn forward_direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
        .normalize_or_zero()
    }

    fn right_direction(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), 0.0, self.yaw.sin()).normalize_or_zero()
    }

    /// Update the camera based on input and delta time.
    pub fn update(&mut self, input: &Input, dt: f32) {
        if input.mouse_down(MouseButton::Right) {
            let delta = input.mouse_delta();
            self.yaw += delta.x * self.sensitivity;
            self.pitch -= delta.y * self.sensitivity;
        }
        self.pitch = self.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);

        let forward = self.forward_direction();
        let right = self.right_direction();
        let mut velocity = Vec3::ZERO;

        if input.key_down(KeyCode::KeyW) {
            velocity += forward;
        }
        if input.key_down(KeyCode::KeyS) {
            velocity -= forward;
        }
        if input.key_down(KeyCode::KeyA) {
            velocity -= right;
        }
        if input.key_down(KeyCode::KeyD) {
            velocity += right;
        }
        if input.key_down(KeyCode::Space) {
            velocity += Vec3::Y;
        }
        if input.key_down(KeyCode::ShiftLeft) {
            velocity -= Vec3::Y;
        }

        if velocity.length_squared() > 0.0 {
            self.position += velocity.normalize() * self.speed * dt;
        }
    }

    /// Get the current camera state.
    pub fn camera(&self) -> Camera {
        Camera {
            position: self.position,
            forward: self.forward_direction(),
            up: Vec3::Y,
            fov: self.fov,
            near: self.near,
            far: self.far,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn forward_key_moves_along_view_direction() {
        let mut camera = FreelookCamera::new().position(Vec3::ZERO).looking_toward(Vec3::NEG_Z);
        let mut input = Input::new();
        input.press_key(KeyCode::KeyW);

        camera.update(&input, 0.5);
        assert!((camera.position - Vec3::new(0.0, 0.0, -0.75)).length() < 1e-5);
    }

    #[test]
    fn mouse_only_looks_while_dragging() {
        let mut camera = FreelookCamera::new();
        let yaw = camera.yaw;
        let mut input = Input::new();
        input.cursor_moved(Vec2::new(10.0, 10.0));
        input.cursor_moved(Vec2::new(110.0, 10.0));

        camera.update(&input, 0.016);
        assert_eq!(camera.yaw, yaw);

        input.press_mouse(MouseButton::Right);
        camera.update(&input, 0.016);
        assert!((camera.yaw - yaw - 0.3).abs() < 1e-5);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = FreelookCamera::new();
        let mut input = Input::new();
        input.press_mouse(MouseButton::Right);
        input.cursor_moved(Vec2::ZERO);
        input.cursor_moved(Vec2::new(0.0, -100_000.0));
        camera.update(&input, 0.016);
        assert!(camera.pitch <= PITCH_LIMIT);
        assert!(camera.camera().forward.y > 0.99);
    }
}
