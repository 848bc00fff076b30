//! Globally consistent multi-view point cloud alignment (Lu-Milios).
//!
//! This library jointly aligns a collection of 3D point clouds given sparse
//! point-to-point correspondences between pairs of clouds. Every cloud gets
//! a 6-DOF pose (translation plus roll/pitch/yaw Euler angles); the first
//! cloud is the fixed reference. Correspondence estimation, cloud loading
//! and visualization are external concerns: the engine consumes clouds and
//! correspondences and produces poses.
//!
//! # Architecture
//!
//! One alignment pass is split into phases:
//! - Phase 1: per-edge linearization (information matrix + information
//!   vector from the endpoint clouds and their correspondences)
//! - Phase 2: assembly of the block-structured global system `G X = B` over
//!   all non-reference poses
//! - Phase 3: dense column-pivoted QR solve
//! - Phase 4: incidence-corrected pose updates
//!
//! `compute` repeats the passes a fixed number of times; edges cache their
//! linearization and only recompute when an endpoint pose or the
//! correspondence list changed.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use lum_registration::{Correspondence, Lum, PointCloud};
//!
//! let mut lum = Lum::new();
//! let a = lum.add_point_cloud(Arc::new(PointCloud::from_points(scan_a)));
//! let b = lum.add_point_cloud(Arc::new(PointCloud::from_points(scan_b)));
//! lum.set_correspondences(a, b, pairs);
//! lum.set_max_iterations(10);
//! lum.compute();
//!
//! let pose_b = lum.get_pose(b);
//! let merged = lum.concatenated_cloud();
//! ```

/// Print to stdout only when the `test-verbose` feature is enabled.
///
/// Use this macro in tests for debug output that is normally too verbose.
/// Enable with: `cargo test --features test-verbose`
#[macro_export]
macro_rules! test_println {
    ($($arg:tt)*) => {
        #[cfg(feature = "test-verbose")]
        println!($($arg)*);
    };
}

pub mod cloud;
pub mod graph;
pub mod linearize;
pub mod lum;
pub mod pose;
pub mod solver;
pub mod test_utils;

pub use cloud::{transform_point_cloud, PointCloud};
pub use graph::{Correspondence, Edge, GraphError, SlamGraph, Vertex};
pub use linearize::{linearize_edge, EdgeLinearization};
pub use lum::{Lum, LumBuilder, LumConfig};
pub use pose::{
    incidence_correction, isometry_to_pose, linearized_compound, pose_to_isometry,
    pose_to_transform,
};
pub use solver::{apply_updates, assemble_system, solve_system};
