//! Pose math for the Euler-angle pose representation.
//!
//! A pose is a 6-vector `[tx, ty, tz, roll, pitch, yaw]` (angles in radians)
//! describing a rigid transform: roll about x, pitch about y, yaw about z,
//! composed in ZYX (yaw-pitch-roll) order. The solver works entirely in this
//! parametrization. Note that the convention is singular at `cos(pitch) = 0`,
//! where [`incidence_correction`] loses rank; callers near that configuration
//! should expect degraded updates.

use nalgebra::{Isometry3, Matrix4, Matrix6, UnitQuaternion, Vector3, Vector6};

/// Build the 4x4 affine compounding transform of a pose.
///
/// The rotation block is `Rz(yaw) * Ry(pitch) * Rx(roll)`, the translation
/// column is `(tx, ty, tz)`. Every transform used by the engine goes through
/// this function so that all components agree on the convention.
pub fn pose_to_transform(pose: &Vector6<f64>) -> Matrix4<f64> {
    let (sx, cx) = pose[3].sin_cos();
    let (sy, cy) = pose[4].sin_cos();
    let (sz, cz) = pose[5].sin_cos();
    let syx = sy * sx;
    let syc = sy * cx;

    let mut t = Matrix4::identity();
    t[(0, 0)] = cz * cy;
    t[(0, 1)] = cz * syx - sz * cx;
    t[(0, 2)] = sz * sx + cz * syc;
    t[(0, 3)] = pose[0];
    t[(1, 0)] = sz * cy;
    t[(1, 1)] = cz * cx + sz * syx;
    t[(1, 2)] = sz * syc - cz * sx;
    t[(1, 3)] = pose[1];
    t[(2, 0)] = -sy;
    t[(2, 1)] = cy * sx;
    t[(2, 2)] = cy * cx;
    t[(2, 3)] = pose[2];
    t
}

/// Apply the compounding transform of `pose` to a single point.
///
/// This is the exact trigonometric expansion of
/// `pose_to_transform(pose) * [v, 1]`, kept in scalar form so the edge
/// linearizer can transform just the correspondence points without building
/// a matrix per pose.
pub fn linearized_compound(pose: &Vector6<f64>, point: &Vector3<f64>) -> Vector3<f64> {
    let (sx, cx) = pose[3].sin_cos();
    let (sy, cy) = pose[4].sin_cos();
    let (sz, cz) = pose[5].sin_cos();

    // Shared subterms of the ZYX rotation applied point-wise.
    let tilted = point.x * cy + sy * (point.y * sx + point.z * cx);
    let swung = point.y * cx - point.z * sx;

    Vector3::new(
        pose[0] + cz * tilted - sz * swung,
        pose[1] + sz * tilted + cz * swung,
        pose[2] - point.x * sy + cy * (point.y * sx + point.z * cx),
    )
}

/// Jacobian relating differential changes of the global pose representation
/// to differential changes in the linearized compounding frame.
///
/// The inverse of this matrix maps a Gauss-Newton step back onto the Euler
/// pose coordinates. Starts from the identity; only the listed entries are
/// overwritten. Singular when `cos(pitch) = 0`.
pub fn incidence_correction(pose: &Vector6<f64>) -> Matrix6<f64> {
    let (sx, cx) = pose[3].sin_cos();
    let (sy, cy) = pose[4].sin_cos();

    let mut out = Matrix6::identity();
    out[(0, 4)] = pose[1] * sx - pose[2] * cx;
    out[(0, 5)] = pose[1] * cx * cy + pose[2] * sx * cy;
    out[(1, 3)] = pose[2];
    out[(1, 4)] = -pose[0] * sx;
    out[(1, 5)] = -pose[0] * cx * cy + pose[2] * sy;
    out[(2, 3)] = -pose[1];
    out[(2, 4)] = pose[0] * cx;
    out[(2, 5)] = -pose[0] * sx * cy - pose[1] * sy;
    out[(3, 5)] = sy;
    out[(4, 4)] = sx;
    out[(4, 5)] = cx * cy;
    out[(5, 4)] = cx;
    out[(5, 5)] = -sx * cy;
    out
}

/// Convert a pose vector to an `Isometry3` for interop with nalgebra-based
/// callers.
pub fn pose_to_isometry(pose: &Vector6<f64>) -> Isometry3<f64> {
    let translation = Vector3::new(pose[0], pose[1], pose[2]);
    let rotation = UnitQuaternion::from_euler_angles(pose[3], pose[4], pose[5]);
    Isometry3::from_parts(translation.into(), rotation)
}

/// Convert an `Isometry3` to a pose vector `[tx, ty, tz, roll, pitch, yaw]`.
pub fn isometry_to_pose(isometry: &Isometry3<f64>) -> Vector6<f64> {
    let t = isometry.translation.vector;
    let (roll, pitch, yaw) = isometry.rotation.euler_angles();
    Vector6::new(t.x, t.y, t.z, roll, pitch, yaw)
}
