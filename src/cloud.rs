//! Point cloud storage and rigid transformation.
//!
//! Points are stored as `[f32; 3]` (storage stays f32, solver math runs in
//! f64). Clouds are owned outside the engine and shared into the SLAM graph
//! behind an `Arc`; the engine never mutates a cloud it was handed.

use nalgebra::{Matrix4, Point3};

/// An ordered sequence of finite 3D points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<[f32; 3]>,
}

impl PointCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cloud from raw points, dropping any with a non-finite
    /// coordinate.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = [f32; 3]>,
    {
        let points = points
            .into_iter()
            .filter(|p| p[0].is_finite() && p[1].is_finite() && p[2].is_finite())
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get a point by index, or `None` when out of range.
    pub fn point(&self, index: usize) -> Option<[f32; 3]> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[[f32; 3]] {
        &self.points
    }

    pub fn push(&mut self, point: [f32; 3]) {
        self.points.push(point);
    }

    /// Append all points of `other`, preserving order.
    pub fn extend_from(&mut self, other: &PointCloud) {
        self.points.extend_from_slice(&other.points);
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32; 3]> {
        self.points.iter()
    }
}

impl FromIterator<[f32; 3]> for PointCloud {
    fn from_iter<I: IntoIterator<Item = [f32; 3]>>(iter: I) -> Self {
        Self::from_points(iter)
    }
}

/// Transform every point of a cloud by a 4x4 affine transform.
///
/// The math runs in f64 and the result is stored back as f32.
pub fn transform_point_cloud(cloud: &PointCloud, transform: &Matrix4<f64>) -> PointCloud {
    let points = cloud
        .iter()
        .map(|p| {
            let q = transform.transform_point(&Point3::new(p[0] as f64, p[1] as f64, p[2] as f64));
            [q.x as f32, q.y as f32, q.z as f32]
        })
        .collect();
    PointCloud { points }
}
