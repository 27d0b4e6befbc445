//! Point clouds in the interleaved XYZRGB interchange format.
//!
//! A cloud is a flat `f32` buffer, six floats per vertex. It carries its
//! bounds and two transforms: `placement`, computed by
//! [`reset_position`](PointCloud::reset_position) to put the cloud in front of
//! a standing user, and `offset`, the user's manipulation on top of that.

use std::f32::consts::PI;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::error::PointCloudError;

/// Floats per vertex: X, Y, Z, R, G, B.
pub const FLOATS_PER_VERTEX: usize = 6;

/// Widest extent of the cloud after [`PointCloud::reset_position`], in meters.
pub const FIT_SIZE: f32 = 0.6;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PointVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl PointVertex {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
        }
    }

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PointVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const ZERO: Aabb = Aabb {
        min: Vec3::ZERO,
        max: Vec3::ZERO,
    };

    /// Bounds of `points`; an empty set gives the zero box at the origin.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self::ZERO;
        };
        points.fold(
            Aabb {
                min: first,
                max: first,
            },
            |b, p| Aabb {
                min: b.min.min(p),
                max: b.max.max(p),
            },
        )
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        self.min + self.size() * 0.5
    }

    /// The twelve edges as a line list: four along Y, four along X, four
    /// along Z.
    #[rustfmt::skip]
    pub fn edges(&self, color: Vec3) -> [PointVertex; 24] {
        let (lo, hi) = (self.min, self.max);
        let v = |x: f32, y: f32, z: f32| PointVertex::new(Vec3::new(x, y, z), color);
        [
            v(lo.x, lo.y, lo.z), v(lo.x, hi.y, lo.z),
            v(hi.x, lo.y, lo.z), v(hi.x, hi.y, lo.z),
            v(lo.x, lo.y, hi.z), v(lo.x, hi.y, hi.z),
            v(hi.x, lo.y, hi.z), v(hi.x, hi.y, hi.z),

            v(lo.x, lo.y, lo.z), v(hi.x, lo.y, lo.z),
            v(lo.x, hi.y, lo.z), v(hi.x, hi.y, lo.z),
            v(lo.x, lo.y, hi.z), v(hi.x, lo.y, hi.z),
            v(lo.x, hi.y, hi.z), v(hi.x, hi.y, hi.z),

            v(lo.x, lo.y, lo.z), v(lo.x, lo.y, hi.z),
            v(lo.x, hi.y, lo.z), v(lo.x, hi.y, hi.z),
            v(hi.x, lo.y, lo.z), v(hi.x, lo.y, hi.z),
            v(hi.x, hi.y, lo.z), v(hi.x, hi.y, hi.z),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct PointCloud {
    data: Vec<f32>,
    bounds: Aabb,
    placement: Mat4,
    offset: Mat4,
}

impl PointCloud {
    /// Wraps an interleaved buffer and places it in front of the user.
    pub fn from_interleaved(data: Vec<f32>) -> Result<Self, PointCloudError> {
        if data.len() % FLOATS_PER_VERTEX != 0 {
            return Err(PointCloudError::MalformedLength(
                data.len() * std::mem::size_of::<f32>(),
            ));
        }
        let bounds = Aabb::from_points(
            data.chunks_exact(FLOATS_PER_VERTEX)
                .map(|v| Vec3::new(v[0], v[1], v[2])),
        );
        let mut cloud = Self {
            data,
            bounds,
            placement: Mat4::IDENTITY,
            offset: Mat4::IDENTITY,
        };
        cloud.reset_position();
        Ok(cloud)
    }

    pub fn from_vertices(vertices: &[PointVertex]) -> Self {
        let data: Vec<f32> = bytemuck::cast_slice(vertices).to_vec();
        let bounds = Aabb::from_points(vertices.iter().map(|v| Vec3::from_array(v.position)));
        let mut cloud = Self {
            data,
            bounds,
            placement: Mat4::IDENTITY,
            offset: Mat4::IDENTITY,
        };
        cloud.reset_position();
        cloud
    }

    /// Reads a raw little-endian `f32` XYZRGB file.
    pub fn load_raw(path: impl AsRef<Path>) -> Result<Self, PointCloudError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| PointCloudError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cloud = Self::from_le_bytes(&bytes)?;
        log::info!(
            "loaded {} points from {}",
            cloud.vertex_count(),
            path.display()
        );
        Ok(cloud)
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, PointCloudError> {
        if bytes.len() % std::mem::size_of::<PointVertex>() != 0 {
            return Err(PointCloudError::MalformedLength(bytes.len()));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_interleaved(data)
    }

    /// Points on a unit sphere laid out along a golden spiral, colored by
    /// position.
    pub fn demo_sphere(count: usize) -> Self {
        let golden_angle = PI * (3.0 - 5f32.sqrt());
        let vertices: Vec<PointVertex> = (0..count)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
                let radius = (1.0 - y * y).max(0.0).sqrt();
                let theta = golden_angle * i as f32;
                let position = Vec3::new(theta.cos() * radius, y, theta.sin() * radius);
                PointVertex::new(position, position * 0.5 + Vec3::splat(0.5))
            })
            .collect();
        Self::from_vertices(&vertices)
    }

    pub fn vertex_count(&self) -> usize {
        self.data.len() / FLOATS_PER_VERTEX
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn vertices(&self) -> &[PointVertex] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// White line list around the cloud, in cloud space.
    pub fn bounding_box_lines(&self) -> [PointVertex; 24] {
        self.bounds.edges(Vec3::ONE)
    }

    /// Scales the cloud so its widest extent is [`FIT_SIZE`] and centers it at
    /// chest height just in front of the user. Clears the offset.
    pub fn reset_position(&mut self) {
        let size = self.bounds.size();
        let widest = size.max_element();
        let scale = if widest > f32::EPSILON {
            FIT_SIZE / widest
        } else {
            1.0
        };
        let position = Vec3::new(0.0, 0.9, -0.3 - size.z * 0.5 * scale);

        self.placement = Mat4::from_translation(position)
            * Mat4::from_scale(Vec3::splat(scale))
            * Mat4::from_translation(-self.bounds.center());
        self.offset = Mat4::IDENTITY;
    }

    pub fn offset(&self) -> Mat4 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Mat4) {
        self.offset = offset;
    }

    /// Offset that makes the model matrix equal `world_delta * model` where
    /// `model` is the matrix obtained with `base_offset`.
    pub fn offset_for_world_delta(&self, world_delta: Mat4, base_offset: Mat4) -> Mat4 {
        self.placement.inverse() * world_delta * self.placement * base_offset
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.placement * self.offset
    }
}
