//! Conversions between the VR runtime's matrix layout and `glam`.
//!
//! The runtime hands out row-major matrices: a 3x4 affine transform for poses
//! and eye offsets and a full 4x4 for projections. `glam` stores columns, so
//! both conversions transpose.

use glam::{Mat4, Vec4};

/// Row-major 3x4 affine transform (rotation in the left 3x3, translation in
/// the last column).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HmdMatrix34 {
    pub m: [[f32; 4]; 3],
}

impl HmdMatrix34 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Builds the runtime layout from an affine `glam` matrix. The bottom row
    /// of `mat` is dropped.
    pub fn from_mat4(mat: Mat4) -> Self {
        let rows = mat.transpose().to_cols_array_2d();
        Self {
            m: [rows[0], rows[1], rows[2]],
        }
    }
}

impl Default for HmdMatrix34 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Row-major 4x4 matrix, used for projections.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HmdMatrix44 {
    pub m: [[f32; 4]; 4],
}

impl HmdMatrix44 {
    pub fn from_mat4(mat: Mat4) -> Self {
        Self {
            m: mat.transpose().to_cols_array_2d(),
        }
    }
}

pub fn mat34_to_mat4(matrix: &HmdMatrix34) -> Mat4 {
    let m = &matrix.m;
    Mat4::from_cols(
        Vec4::new(m[0][0], m[1][0], m[2][0], 0.0),
        Vec4::new(m[0][1], m[1][1], m[2][1], 0.0),
        Vec4::new(m[0][2], m[1][2], m[2][2], 0.0),
        Vec4::new(m[0][3], m[1][3], m[2][3], 1.0),
    )
}

pub fn mat44_to_mat4(matrix: &HmdMatrix44) -> Mat4 {
    Mat4::from_cols_array_2d(&matrix.m).transpose()
}

/// Right-handed off-axis projection from half-angle tangents, depth mapped
/// to `0..1`.
///
/// `left` and `bottom` are negative for a frustum that straddles the view
/// axis.
pub fn frustum_from_tangents(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> Mat4 {
    let x_scale = 2.0 / (right - left);
    let y_scale = 2.0 / (top - bottom);
    let x_offset = (right + left) / (right - left);
    let y_offset = (top + bottom) / (top - bottom);
    let z = far / (near - far);

    Mat4::from_cols(
        Vec4::new(x_scale, 0.0, 0.0, 0.0),
        Vec4::new(0.0, y_scale, 0.0, 0.0),
        Vec4::new(x_offset, y_offset, z, -1.0),
        Vec4::new(0.0, 0.0, z * near, 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn approx(a: Mat4, b: Mat4) -> bool {
        a.abs_diff_eq(b, 1e-5)
    }

    #[test]
    fn mat34_translation_lands_in_last_column() {
        let raw = HmdMatrix34 {
            m: [
                [1.0, 0.0, 0.0, 1.0],
                [0.0, 1.0, 0.0, 2.0],
                [0.0, 0.0, 1.0, 3.0],
            ],
        };
        let mat = mat34_to_mat4(&raw);
        assert_eq!(mat.w_axis, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(
            mat.transform_point3(Vec3::ZERO),
            Vec3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn mat34_survives_layout_round_trip() {
        let pose = Mat4::from_rotation_translation(
            Quat::from_rotation_y(0.7),
            Vec3::new(0.2, 1.6, -0.4),
        );
        assert!(approx(mat34_to_mat4(&HmdMatrix34::from_mat4(pose)), pose));
    }

    #[test]
    fn mat44_is_transposed() {
        let mut raw = HmdMatrix44 { m: [[0.0; 4]; 4] };
        raw.m[3][2] = -1.0;
        let mat = mat44_to_mat4(&raw);
        assert_eq!(mat.z_axis.w, -1.0);
    }

    #[test]
    fn symmetric_frustum_matches_glam_perspective() {
        let fov = 90f32.to_radians();
        let t = (fov / 2.0).tan();
        let ours = frustum_from_tangents(-t, t, -t, t, 0.1, 100.0);
        let glams = Mat4::perspective_rh(fov, 1.0, 0.1, 100.0);
        assert!(approx(ours, glams));
    }

    #[test]
    fn frustum_maps_near_and_far_to_unit_depth() {
        let proj = frustum_from_tangents(-1.2, 0.9, -1.1, 1.0, 0.1, 100.0);
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -0.1));
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -100.0));
        assert!(near.z.abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-4);
    }
}
