//! Synthetic clouds and correspondence helpers for tests.
//!
//! Generators are deterministic; tests that want noise seed their own rng.

use nalgebra::{Matrix4, Vector6};

use crate::cloud::{transform_point_cloud, PointCloud};
use crate::graph::Correspondence;
use crate::pose::pose_to_transform;

/// Four points spanning all three axes: the origin plus the unit points.
pub fn unit_tetrahedron() -> PointCloud {
    PointCloud::from_points([
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ])
}

/// Four corners of the unit square in the xy-plane.
pub fn unit_square() -> PointCloud {
    PointCloud::from_points([
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
    ])
}

/// The eight corners of the unit cube.
pub fn cube_corners() -> PointCloud {
    let mut points = Vec::with_capacity(8);
    for x in [0.0, 1.0] {
        for y in [0.0, 1.0] {
            for z in [0.0, 1.0] {
                points.push([x, y, z]);
            }
        }
    }
    PointCloud::from_points(points)
}

/// Pair index `k` of one cloud with index `k` of the other, for `n` points.
pub fn identity_correspondences(n: usize) -> Vec<Correspondence> {
    (0..n).map(|i| Correspondence::new(i, i)).collect()
}

/// Shift every point of a cloud by a constant offset.
pub fn translated(cloud: &PointCloud, offset: [f32; 3]) -> PointCloud {
    PointCloud::from_points(
        cloud
            .iter()
            .map(|p| [p[0] + offset[0], p[1] + offset[1], p[2] + offset[2]]),
    )
}

/// Transform a cloud by the compounding transform of a pose.
pub fn posed(cloud: &PointCloud, pose: &Vector6<f64>) -> PointCloud {
    transform_point_cloud(cloud, &pose_to_transform(pose))
}

/// Analytic inverse of a pose's compounding transform.
pub fn inverse_transform(pose: &Vector6<f64>) -> Matrix4<f64> {
    let t = pose_to_transform(pose);
    let r = t.fixed_view::<3, 3>(0, 0).transpose();
    let p = t.fixed_view::<3, 1>(0, 3).clone_owned();

    let mut inv = Matrix4::identity();
    inv.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    inv.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-(r * p)));
    inv
}

/// The cloud a sensor posed at `pose` would observe of `world`: transforming
/// the result by `pose` recovers `world`.
pub fn observed_from(world: &PointCloud, pose: &Vector6<f64>) -> PointCloud {
    transform_point_cloud(world, &inverse_transform(pose))
}

/// Root mean square distance between two clouds of equal length, paired by
/// index.
pub fn rms_distance(a: &PointCloud, b: &PointCloud) -> f64 {
    assert_eq!(a.len(), b.len(), "clouds must pair point for point");
    if a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(p, q)| {
            let dx = (p[0] - q[0]) as f64;
            let dy = (p[1] - q[1]) as f64;
            let dz = (p[2] - q[2]) as f64;
            dx * dx + dy * dy + dz * dz
        })
        .sum();
    (sum / a.len() as f64).sqrt()
}
