//! Per-edge linearization.
//!
//! For one edge this builds the 6x6 system matrix `M` and 6-vector `z` from
//! the compounded correspondence points, estimates the pose difference
//! `D = M^-1 z`, measures the residual variance `s^2` of that fit, and
//! scales `M` and `z` by `1/s^2` into the information matrix and
//! information vector the global solver consumes.
//!
//! The accumulation loop is scalar on purpose; per-point matrix operations
//! are not worth their overhead here.

use nalgebra::{Matrix6, Vector3, Vector6};
use tracing::warn;

use crate::cloud::PointCloud;
use crate::graph::Correspondence;
use crate::pose::linearized_compound;

/// Linearization of one edge constraint.
#[derive(Debug, Clone)]
pub struct EdgeLinearization {
    /// Information matrix `C^-1 = M / s^2`.
    pub cinv: Matrix6<f64>,
    /// Information vector `C^-1 D = z / s^2`.
    pub cinvd: Vector6<f64>,
    /// Residual variance `s^2` after clamping, the weight denominator.
    pub residual_variance: f64,
}

/// Linearize an edge from its endpoint clouds, their current poses, and the
/// correspondence list.
///
/// Only the points referenced by a correspondence are compounded, in f64.
/// Correspondences that index outside either cloud are skipped with a
/// warning. `residual_epsilon` bounds `s^2` away from zero so a perfectly
/// satisfied constraint produces a large but finite weight.
pub fn linearize_edge(
    source_cloud: &PointCloud,
    source_pose: &Vector6<f64>,
    target_cloud: &PointCloud,
    target_pose: &Vector6<f64>,
    corrs: &[Correspondence],
    residual_epsilon: f64,
) -> EdgeLinearization {
    // Compound the referenced point pairs into the common frame.
    let mut pairs = Vec::with_capacity(corrs.len());
    let mut skipped = 0usize;
    for corr in corrs {
        match (
            source_cloud.point(corr.index_query),
            target_cloud.point(corr.index_match),
        ) {
            (Some(q), Some(r)) => {
                let q = linearized_compound(
                    source_pose,
                    &Vector3::new(q[0] as f64, q[1] as f64, q[2] as f64),
                );
                let r = linearized_compound(
                    target_pose,
                    &Vector3::new(r[0] as f64, r[1] as f64, r[2] as f64),
                );
                pairs.push((q, r));
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("{skipped} correspondences reference out-of-range point indices; skipped");
    }
    let m = pairs.len();

    // Accumulate M (on top of the identity) and z from the pair midpoints
    // and differences.
    let mut mm = Matrix6::<f64>::identity();
    let mut mz = Vector6::<f64>::zeros();
    for (q, r) in &pairs {
        let x = (q.x + r.x) / 2.0;
        let y = (q.y + r.y) / 2.0;
        let z = (q.z + r.z) / 2.0;
        let dx = q.x - r.x;
        let dy = q.y - r.y;
        let dz = q.z - r.z;

        mm[(0, 4)] -= y;
        mm[(0, 5)] += z;
        mm[(1, 3)] -= z;
        mm[(1, 4)] += x;
        mm[(2, 3)] += y;
        mm[(2, 5)] -= x;
        mm[(3, 4)] -= x * z;
        mm[(3, 5)] -= x * y;
        mm[(4, 5)] -= y * z;
        mm[(3, 3)] += y * y + z * z;
        mm[(4, 4)] += x * x + y * y;
        mm[(5, 5)] += x * x + z * z;

        mz[0] += dx;
        mz[1] += dy;
        mz[2] += dz;
        mz[3] += y * dz - z * dy;
        mz[4] += x * dy - y * dx;
        mz[5] += z * dx - x * dz;
    }

    mm[(0, 0)] = m as f64;
    mm[(1, 1)] = m as f64;
    mm[(2, 2)] = m as f64;

    // Mirror the upper triangle; M must come out exactly symmetric.
    mm[(4, 0)] = mm[(0, 4)];
    mm[(5, 0)] = mm[(0, 5)];
    mm[(3, 1)] = mm[(1, 3)];
    mm[(4, 1)] = mm[(1, 4)];
    mm[(3, 2)] = mm[(2, 3)];
    mm[(5, 2)] = mm[(2, 5)];
    mm[(4, 3)] = mm[(3, 4)];
    mm[(5, 3)] = mm[(3, 5)];
    mm[(5, 4)] = mm[(4, 5)];

    // Pose difference estimate. M is symmetric positive definite for
    // non-degenerate correspondence geometry, so Cholesky first, SVD as the
    // fallback.
    let d = match mm.cholesky() {
        Some(chol) => chol.solve(&mz),
        None => mm
            .svd(true, true)
            .solve(&mz, 1e-15)
            .unwrap_or_else(|_| Vector6::zeros()),
    };

    // Residual variance of the fit.
    let mut ss = 0.0;
    for (q, r) in &pairs {
        let x = (q.x + r.x) / 2.0;
        let y = (q.y + r.y) / 2.0;
        let z = (q.z + r.z) / 2.0;
        let dx = q.x - r.x;
        let dy = q.y - r.y;
        let dz = q.z - r.z;

        let rx = dx - (d[0] + z * d[5] - y * d[4]);
        let ry = dy - (d[1] + x * d[4] - z * d[3]);
        let rz = dz - (d[2] + y * d[3] - x * d[5]);
        ss += rx * rx + ry * ry + rz * rz;
    }
    let ss = ss.max(residual_epsilon);

    EdgeLinearization {
        cinv: mm / ss,
        cinvd: mz / ss,
        residual_variance: ss,
    }
}
