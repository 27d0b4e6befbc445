//! Per-device transforms synchronised once per frame.

use glam::Mat4;

use crate::math::mat34_to_mat4;
use crate::runtime::{MAX_TRACKED_DEVICES, TrackedDevicePose};

/// Latest transform for every tracked device slot.
///
/// A slot holds the world-to-device transform (the inverse of the runtime's
/// device-to-tracking pose) from the last frame its pose was valid. Slots that
/// stop reporting keep that value; [`is_valid`](Self::is_valid) tells whether
/// it is current.
#[derive(Clone, Debug)]
pub struct PoseTable {
    transforms: [Option<Mat4>; MAX_TRACKED_DEVICES],
    valid: [bool; MAX_TRACKED_DEVICES],
    device_to_absolute: [Option<Mat4>; MAX_TRACKED_DEVICES],
}

impl Default for PoseTable {
    fn default() -> Self {
        Self {
            transforms: [None; MAX_TRACKED_DEVICES],
            valid: [false; MAX_TRACKED_DEVICES],
            device_to_absolute: [None; MAX_TRACKED_DEVICES],
        }
    }
}

impl PoseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies a fresh pose set in. Invalid entries leave their slot untouched
    /// apart from the validity flag.
    pub fn update(&mut self, poses: &[TrackedDevicePose; MAX_TRACKED_DEVICES]) {
        for (index, pose) in poses.iter().enumerate() {
            self.valid[index] = pose.pose_is_valid;
            if pose.pose_is_valid {
                let device_to_absolute = mat34_to_mat4(&pose.device_to_absolute_tracking);
                self.device_to_absolute[index] = Some(device_to_absolute);
                self.transforms[index] = Some(device_to_absolute.inverse());
            }
        }
    }

    /// World-to-device transform from the last valid pose, or `None` if the
    /// slot never had one.
    pub fn device_transform(&self, index: usize) -> Option<Mat4> {
        self.transforms.get(index).copied().flatten()
    }

    /// Device-to-world pose from the last valid pose.
    pub fn device_to_absolute(&self, index: usize) -> Option<Mat4> {
        self.device_to_absolute.get(index).copied().flatten()
    }

    /// Whether the most recent update marked the slot valid.
    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }

    pub fn valid_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.valid
            .iter()
            .enumerate()
            .filter_map(|(index, valid)| valid.then_some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::HmdMatrix34;
    use glam::Vec3;

    fn pose_at(position: Vec3) -> TrackedDevicePose {
        TrackedDevicePose {
            device_to_absolute_tracking: HmdMatrix34::from_mat4(Mat4::from_translation(position)),
            pose_is_valid: true,
            device_is_connected: true,
            ..Default::default()
        }
    }

    #[test]
    fn never_valid_slot_is_unknown() {
        let mut table = PoseTable::new();
        let poses = [TrackedDevicePose::default(); MAX_TRACKED_DEVICES];
        table.update(&poses);
        assert_eq!(table.device_transform(3), None);
        assert!(!table.is_valid(3));
        assert_eq!(table.device_transform(MAX_TRACKED_DEVICES + 5), None);
    }

    #[test]
    fn valid_pose_is_stored_inverted() {
        let mut table = PoseTable::new();
        let mut poses = [TrackedDevicePose::default(); MAX_TRACKED_DEVICES];
        poses[0] = pose_at(Vec3::new(0.0, 1.7, 0.0));
        table.update(&poses);

        let transform = table.device_transform(0).unwrap();
        let mapped = transform.transform_point3(Vec3::new(0.0, 1.7, 0.0));
        assert!(mapped.length() < 1e-6);
        assert_eq!(table.valid_indices().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn stale_slot_keeps_last_valid_transform() {
        let mut table = PoseTable::new();
        let mut poses = [TrackedDevicePose::default(); MAX_TRACKED_DEVICES];
        poses[2] = pose_at(Vec3::new(1.0, 2.0, 3.0));
        table.update(&poses);

        poses[2] = TrackedDevicePose {
            device_to_absolute_tracking: HmdMatrix34::from_mat4(Mat4::from_translation(
                Vec3::new(9.0, 9.0, 9.0),
            )),
            pose_is_valid: false,
            ..Default::default()
        };
        table.update(&poses);

        assert!(!table.is_valid(2));
        let expected = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)).inverse();
        assert!(table.device_transform(2).unwrap().abs_diff_eq(expected, 1e-6));
    }
}
