//! High-level globally consistent alignment engine.
//!
//! `Lum` owns the SLAM graph and drives the iterative maximum-likelihood
//! alignment. One pass linearizes every stale edge, assembles and solves the
//! global system `G X = B`, and applies incidence-corrected updates to all
//! non-reference poses. The pass count is fixed; there is no convergence
//! check, so callers pick `max_iterations` to taste.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use lum_registration::{Correspondence, Lum, PointCloud};
//!
//! let mut lum = Lum::new();
//! let a = lum.add_point_cloud(Arc::new(cloud_a));
//! let b = lum.add_point_cloud(Arc::new(cloud_b));
//! lum.set_correspondences(a, b, correspondences);
//! lum.set_max_iterations(10);
//! lum.compute();
//!
//! let pose_b = lum.get_pose(b);
//! let merged = lum.concatenated_cloud();
//! ```

use std::sync::Arc;

use nalgebra::{Matrix4, Vector6};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cloud::{transform_point_cloud, PointCloud};
use crate::graph::{Correspondence, SlamGraph};
use crate::linearize::{linearize_edge, EdgeLinearization};
use crate::pose::pose_to_transform;
use crate::solver::{apply_updates, assemble_system, solve_system};

/// Tuning knobs of the engine.
#[derive(Debug, Clone)]
pub struct LumConfig {
    /// Number of outer passes `compute` runs.
    pub max_iterations: usize,

    /// Lower bound on the per-edge residual variance `s^2` before it is
    /// inverted into an information weight. Keeps a perfectly satisfied
    /// constraint at a large but finite weight.
    pub residual_epsilon: f64,
}

impl Default for LumConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            residual_epsilon: 1e-12,
        }
    }
}

/// Builder for [`Lum`].
#[derive(Debug, Clone, Default)]
pub struct LumBuilder {
    config: LumConfig,
}

impl LumBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of outer passes.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the residual variance floor.
    pub fn residual_epsilon(mut self, residual_epsilon: f64) -> Self {
        self.config.residual_epsilon = residual_epsilon;
        self
    }

    pub fn build(self) -> Lum {
        Lum::with_config(self.config)
    }
}

/// Globally consistent multi-view alignment engine (Lu-Milios).
///
/// Clouds are added one at a time; the first becomes the fixed reference.
/// Pairwise point-to-point correspondences form the graph edges. `compute`
/// then solves jointly for all non-reference poses.
#[derive(Debug, Default)]
pub struct Lum {
    graph: SlamGraph,
    config: LumConfig,
}

impl Lum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LumConfig) -> Self {
        Self {
            graph: SlamGraph::new(),
            config,
        }
    }

    pub fn builder() -> LumBuilder {
        LumBuilder::new()
    }

    pub fn config(&self) -> &LumConfig {
        &self.config
    }

    /// The underlying SLAM graph, read-only.
    pub fn graph(&self) -> &SlamGraph {
        &self.graph
    }

    /// Add a cloud with a zero initial pose; returns its vertex id. The
    /// first cloud becomes the reference.
    pub fn add_point_cloud(&mut self, cloud: Arc<PointCloud>) -> usize {
        self.graph.add_point_cloud(cloud)
    }

    /// Add a cloud with an initial pose estimate; the pose is ignored for
    /// the reference cloud.
    pub fn add_point_cloud_with_pose(
        &mut self,
        cloud: Arc<PointCloud>,
        pose: Vector6<f64>,
    ) -> usize {
        self.graph.add_point_cloud_with_pose(cloud, pose)
    }

    pub fn set_pose(&mut self, vertex: usize, pose: Vector6<f64>) {
        self.graph.set_pose(vertex, pose);
    }

    pub fn get_pose(&self, vertex: usize) -> Vector6<f64> {
        self.graph.get_pose(vertex)
    }

    pub fn set_correspondences(
        &mut self,
        source: usize,
        target: usize,
        corrs: Vec<Correspondence>,
    ) {
        self.graph.set_correspondences(source, target, corrs);
    }

    pub fn get_correspondences(
        &self,
        source: usize,
        target: usize,
    ) -> Option<Arc<Vec<Correspondence>>> {
        self.graph.get_correspondences(source, target)
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.config.max_iterations = max_iterations;
    }

    pub fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    pub fn num_vertices(&self) -> usize {
        self.graph.num_vertices()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.num_edges()
    }

    /// Run the alignment: `max_iterations` passes of per-edge linearization,
    /// global solve, and incidence-corrected pose updates.
    ///
    /// Needs at least 2 vertices; warns and returns otherwise. A rank
    /// deficient global system (some non-reference vertex without any
    /// incident edge) aborts the run with a warning, keeping the poses of
    /// the last completed pass.
    pub fn compute(&mut self) {
        let n = self.graph.num_vertices();
        if n < 2 {
            warn!("the SLAM graph needs at least 2 vertices before computing");
            return;
        }

        for pass in 0..self.config.max_iterations {
            self.linearize_stale_edges();

            let (g, b) = assemble_system(&self.graph);
            let x = match solve_system(g, &b) {
                Some(x) => x,
                None => {
                    warn!("global system is rank deficient in pass {pass}; aborting");
                    return;
                }
            };
            debug!("pass {pass}: step norm {:.3e}", x.norm());

            apply_updates(&mut self.graph, &x);
        }
    }

    /// Union of all clouds transformed by their current poses, concatenated
    /// in vertex-id order.
    pub fn concatenated_cloud(&self) -> PointCloud {
        let mut out = PointCloud::new();
        for vertex in self.graph.vertices() {
            let transformed =
                transform_point_cloud(vertex.cloud(), &pose_to_transform(&vertex.pose()));
            out.extend_from(&transformed);
        }
        out
    }

    /// Compounding transform of a vertex's current pose. Out-of-range
    /// vertices read as the zero pose, so this degrades to the identity
    /// with a warning.
    pub fn transformation(&self, vertex: usize) -> Matrix4<f64> {
        pose_to_transform(&self.graph.get_pose(vertex))
    }

    /// A vertex's cloud transformed by its current pose. Warns and returns
    /// an empty cloud for an out-of-range vertex.
    pub fn transformed_cloud(&self, vertex: usize) -> PointCloud {
        match self.graph.vertex(vertex) {
            Some(v) => transform_point_cloud(v.cloud(), &pose_to_transform(&v.pose())),
            None => {
                warn!("transformed_cloud of non-existing vertex {vertex}; returning empty");
                PointCloud::new()
            }
        }
    }

    /// Relinearize every edge whose cache went stale. Edges only read
    /// immutable vertex state here, so they are processed in parallel and
    /// the results written back serially.
    fn linearize_stale_edges(&mut self) {
        let residual_epsilon = self.config.residual_epsilon;
        let graph = &self.graph;

        let fresh: Vec<(usize, EdgeLinearization)> = graph
            .edges()
            .par_iter()
            .enumerate()
            .filter(|(_, edge)| !edge.is_computed())
            .map(|(idx, edge)| {
                let source = &graph.vertices()[edge.source()];
                let target = &graph.vertices()[edge.target()];
                let lin = linearize_edge(
                    source.cloud(),
                    &source.pose(),
                    target.cloud(),
                    &target.pose(),
                    edge.correspondences(),
                    residual_epsilon,
                );
                (idx, lin)
            })
            .collect();

        for (idx, lin) in fresh {
            self.graph.store_linearization(idx, lin.cinv, lin.cinvd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        cube_corners, identity_correspondences, observed_from, posed, rms_distance, translated,
        unit_square, unit_tetrahedron,
    };
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};
    use std::f64::consts::FRAC_PI_6;

    fn shared(cloud: PointCloud) -> Arc<PointCloud> {
        Arc::new(cloud)
    }

    #[test]
    fn test_builder_and_accessors() {
        let lum = Lum::builder()
            .max_iterations(12)
            .residual_epsilon(1e-10)
            .build();

        assert_eq!(lum.max_iterations(), 12);
        assert_eq!(lum.config().residual_epsilon, 1e-10);
        assert_eq!(lum.num_vertices(), 0);
        assert_eq!(lum.num_edges(), 0);
    }

    #[test]
    fn test_compute_with_single_vertex_is_a_noop() {
        let mut lum = Lum::new();
        lum.add_point_cloud(shared(unit_tetrahedron()));

        lum.compute();

        assert_relative_eq!(lum.get_pose(0), Vector6::zeros(), epsilon = 0.0);
        assert_eq!(lum.concatenated_cloud().len(), 4);
    }

    #[test]
    fn test_two_cloud_pure_translation() {
        let a = unit_tetrahedron();
        let b = translated(&a, [1.0, 0.0, 0.0]);

        let mut lum = Lum::new();
        let va = lum.add_point_cloud(shared(a));
        let vb = lum.add_point_cloud(shared(b));
        lum.set_correspondences(va, vb, identity_correspondences(4));
        lum.set_max_iterations(10);
        lum.compute();

        let pose = lum.get_pose(vb);
        assert_relative_eq!(pose[0], -1.0, epsilon = 1e-3);
        for i in 1..6 {
            assert_relative_eq!(pose[i], 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_two_cloud_translation_with_noise() {
        let mut rng = StdRng::seed_from_u64(42);
        let noise = Normal::new(0.0, 0.002).unwrap();

        let points: Vec<[f32; 3]> = (0..30)
            .map(|_| {
                [
                    rng.gen_range(-1.0f32..1.0),
                    rng.gen_range(-1.0f32..1.0),
                    rng.gen_range(-1.0f32..1.0),
                ]
            })
            .collect();
        let a = PointCloud::from_points(points.iter().copied());
        let b = PointCloud::from_points(points.iter().map(|p| {
            [
                p[0] + 1.0 + noise.sample(&mut rng) as f32,
                p[1] + noise.sample(&mut rng) as f32,
                p[2] + noise.sample(&mut rng) as f32,
            ]
        }));

        let mut lum = Lum::new();
        let va = lum.add_point_cloud(shared(a));
        let vb = lum.add_point_cloud(shared(b));
        lum.set_correspondences(va, vb, identity_correspondences(30));
        lum.set_max_iterations(10);
        lum.compute();

        let pose = lum.get_pose(vb);
        assert_relative_eq!(pose[0], -1.0, epsilon = 1e-2);
        assert_relative_eq!(pose[1], 0.0, epsilon = 1e-2);
        assert_relative_eq!(pose[2], 0.0, epsilon = 1e-2);
    }

    #[test]
    fn test_two_cloud_pure_yaw() {
        let a = unit_square();
        let yaw = Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, FRAC_PI_6);
        let b = posed(&a, &yaw);

        let mut lum = Lum::new();
        let va = lum.add_point_cloud(shared(a));
        let vb = lum.add_point_cloud(shared(b));
        lum.set_correspondences(va, vb, identity_correspondences(4));
        lum.set_max_iterations(10);
        lum.compute();

        let pose = lum.get_pose(vb);
        assert_relative_eq!(pose[5], -FRAC_PI_6, epsilon = 1e-2);
    }

    #[test]
    fn test_three_cloud_cycle_overlaps() {
        let world = cube_corners();
        let p1 = Vector6::new(0.1, -0.05, 0.02, 0.01, -0.02, 0.03);
        let p2 = Vector6::new(-0.06, 0.12, -0.04, -0.02, 0.015, -0.025);

        let mut lum = Lum::new();
        let v0 = lum.add_point_cloud(shared(world.clone()));
        let v1 = lum.add_point_cloud(shared(observed_from(&world, &p1)));
        let v2 = lum.add_point_cloud(shared(observed_from(&world, &p2)));
        let corrs = || identity_correspondences(8);
        lum.set_correspondences(v0, v1, corrs());
        lum.set_correspondences(v1, v2, corrs());
        lum.set_correspondences(v2, v0, corrs());
        lum.set_max_iterations(10);
        lum.compute();

        let out = lum.concatenated_cloud();
        assert_eq!(out.len(), 24);
        let copy = |k: usize| {
            PointCloud::from_points((0..8).map(|i| out.point(8 * k + i).unwrap()))
        };
        assert!(rms_distance(&copy(0), &copy(1)) < 1e-2);
        assert!(rms_distance(&copy(0), &copy(2)) < 1e-2);

        // The gauge is fixed at vertex 0, so the solved poses approach the
        // generating motions.
        let pose1 = lum.get_pose(v1);
        let pose2 = lum.get_pose(v2);
        crate::test_println!("solved poses: {pose1:?} {pose2:?}");
        for i in 0..6 {
            assert_relative_eq!(pose1[i], p1[i], epsilon = 1e-2);
            assert_relative_eq!(pose2[i], p2[i], epsilon = 1e-2);
        }
    }

    #[test]
    fn test_reference_stays_fixed() {
        let a = unit_tetrahedron();
        let b = translated(&a, [0.5, -0.25, 0.75]);

        let mut lum = Lum::new();
        let va = lum.add_point_cloud(shared(a));
        let vb = lum.add_point_cloud(shared(b));
        lum.set_correspondences(va, vb, identity_correspondences(4));
        lum.set_max_iterations(10);
        lum.compute();

        assert_relative_eq!(lum.get_pose(va), Vector6::zeros(), epsilon = 0.0);
    }

    #[test]
    fn test_identity_fixed_point() {
        let world = cube_corners();
        let p1 = Vector6::new(0.1, 0.2, -0.1, 0.05, -0.03, 0.08);

        let mut lum = Lum::new();
        let v0 = lum.add_point_cloud(shared(world.clone()));
        let v1 = lum.add_point_cloud_with_pose(shared(observed_from(&world, &p1)), p1);
        lum.set_correspondences(v0, v1, identity_correspondences(8));
        lum.set_max_iterations(1);
        lum.compute();

        // All correspondences were already satisfied, so one pass must not
        // move anything.
        let pose = lum.get_pose(v1);
        for i in 0..6 {
            assert_relative_eq!(pose[i], p1[i], epsilon = 1e-4);
        }
        assert_relative_eq!(lum.get_pose(v0), Vector6::zeros(), epsilon = 0.0);
    }

    #[test]
    fn test_invalid_inputs_leave_engine_usable() {
        let a = unit_tetrahedron();
        let b = translated(&a, [1.0, 0.0, 0.0]);

        let mut lum = Lum::new();
        let va = lum.add_point_cloud(shared(a));
        let vb = lum.add_point_cloud(shared(b));
        lum.set_correspondences(va, vb, identity_correspondences(4));

        // Self loop, short list, bad vertex: all skipped.
        lum.set_correspondences(va, va, identity_correspondences(4));
        lum.set_correspondences(va, vb, identity_correspondences(2));
        lum.set_correspondences(9, vb, identity_correspondences(4));
        assert_eq!(lum.num_edges(), 1);
        assert_eq!(lum.get_correspondences(va, vb).unwrap().len(), 4);

        lum.set_max_iterations(10);
        lum.compute();

        let pose = lum.get_pose(vb);
        assert_relative_eq!(pose[0], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_reference_pose_rejection() {
        let mut lum = Lum::new();
        lum.add_point_cloud(shared(unit_tetrahedron()));

        lum.set_pose(0, Vector6::new(1.0, 2.0, 3.0, 0.0, 0.0, 0.0));

        assert_relative_eq!(lum.get_pose(0), Vector6::zeros(), epsilon = 0.0);
    }

    #[test]
    fn test_forward_and_backward_edges_are_equivalent() {
        let a = unit_tetrahedron();
        let b = translated(&a, [0.4, -0.3, 0.2]);

        let mut forward = Lum::new();
        let fa = forward.add_point_cloud(shared(a.clone()));
        let fb = forward.add_point_cloud(shared(b.clone()));
        forward.set_correspondences(fa, fb, identity_correspondences(4));
        forward.set_max_iterations(10);
        forward.compute();

        let mut backward = Lum::new();
        let ba = backward.add_point_cloud(shared(a));
        let bb = backward.add_point_cloud(shared(b));
        backward.set_correspondences(bb, ba, identity_correspondences(4));
        backward.set_max_iterations(10);
        backward.compute();

        let rms = rms_distance(&forward.concatenated_cloud(), &backward.concatenated_cloud());
        assert!(rms < 1e-3, "forward/backward mismatch: rms {rms}");
    }

    #[test]
    fn test_transformation_and_transformed_cloud() {
        let a = unit_tetrahedron();
        let b = translated(&a, [1.0, 0.0, 0.0]);

        let mut lum = Lum::new();
        let va = lum.add_point_cloud(shared(a.clone()));
        let vb = lum.add_point_cloud(shared(b));
        lum.set_correspondences(va, vb, identity_correspondences(4));
        lum.set_max_iterations(10);
        lum.compute();

        let t = lum.transformation(vb);
        assert_relative_eq!(t[(0, 3)], -1.0, epsilon = 1e-3);

        // Aligned, the second cloud lands on the first.
        let aligned = lum.transformed_cloud(vb);
        assert!(rms_distance(&a, &aligned) < 1e-3);

        // Out of range degrades gracefully.
        assert_relative_eq!(lum.transformation(9), Matrix4::identity(), epsilon = 0.0);
        assert!(lum.transformed_cloud(9).is_empty());
    }

    #[test]
    fn test_concatenated_cloud_preserves_vertex_order() {
        let a = unit_tetrahedron();
        let b = translated(&a, [10.0, 0.0, 0.0]);

        let mut lum = Lum::new();
        lum.add_point_cloud(shared(a.clone()));
        lum.add_point_cloud(shared(b.clone()));

        // Poses are still zero, so the clouds come back verbatim, first
        // cloud first.
        let out = lum.concatenated_cloud();
        assert_eq!(out.len(), 8);
        assert_relative_eq!(out.point(0).unwrap()[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(out.point(4).unwrap()[0], 10.0, epsilon = 1e-6);
    }
}
