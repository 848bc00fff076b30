//! SLAM graph: per-vertex clouds and poses, per-edge correspondence
//! constraints with cached linearizations.
//!
//! The graph owns its vertex and edge tables exclusively; clouds and
//! correspondence lists are reference-counted and never mutated from this
//! side. Vertex ids are dense 0-based indices. Vertex 0 is the reference:
//! its pose is identically zero and cannot be changed.
//!
//! Invalid mutations are rejected with a warning on the logging channel and
//! skipped; the graph stays usable afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{Matrix6, Vector6};
use thiserror::Error;
use tracing::warn;

use crate::cloud::PointCloud;

/// A pair of point indices linking a point in the source cloud of an edge to
/// a point in its target cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correspondence {
    /// Index into the source vertex's cloud.
    pub index_query: usize,
    /// Index into the target vertex's cloud.
    pub index_match: usize,
}

impl Correspondence {
    pub fn new(index_query: usize, index_match: usize) -> Self {
        Self {
            index_query,
            index_match,
        }
    }
}

/// Why a graph mutation was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("vertex {0} does not exist")]
    VertexOutOfRange(usize),

    #[error("the pose of the reference vertex is fixed at the origin")]
    ReferencePoseImmutable,

    #[error("source and target vertex must differ (got {0} twice)")]
    SelfLoop(usize),

    #[error("a correspondence set needs at least 3 entries, got {0}")]
    TooFewCorrespondences(usize),

    #[error("no edge from vertex {0} to vertex {1}")]
    EdgeAbsent(usize, usize),
}

/// A graph vertex: one point cloud and its current pose estimate.
#[derive(Debug, Clone)]
pub struct Vertex {
    cloud: Arc<PointCloud>,
    pose: Vector6<f64>,
}

impl Vertex {
    pub fn cloud(&self) -> &Arc<PointCloud> {
        &self.cloud
    }

    pub fn pose(&self) -> Vector6<f64> {
        self.pose
    }
}

/// A directed edge carrying a correspondence constraint between two vertices
/// and the cached linearization of that constraint.
///
/// `computed` is true only while `cinv` and `cinvd` reflect the current
/// poses of both endpoints and the current correspondence list; any pose or
/// correspondence change clears it.
#[derive(Debug, Clone)]
pub struct Edge {
    source: usize,
    target: usize,
    corrs: Arc<Vec<Correspondence>>,
    pub(crate) cinv: Matrix6<f64>,
    pub(crate) cinvd: Vector6<f64>,
    pub(crate) computed: bool,
}

impl Edge {
    pub fn source(&self) -> usize {
        self.source
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn correspondences(&self) -> &[Correspondence] {
        &self.corrs
    }

    /// Whether the cached linearization is valid for the current poses and
    /// correspondences.
    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Cached information matrix of this edge's constraint.
    pub fn information_matrix(&self) -> Matrix6<f64> {
        self.cinv
    }

    /// Cached information vector of this edge's constraint.
    pub fn information_vector(&self) -> Vector6<f64> {
        self.cinvd
    }
}

/// The SLAM graph.
#[derive(Debug, Default)]
pub struct SlamGraph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    edge_index: HashMap<(usize, usize), usize>,
}

impl SlamGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a vertex with a zero pose and return its id. The first call
    /// yields id 0, the reference vertex.
    pub fn add_point_cloud(&mut self, cloud: Arc<PointCloud>) -> usize {
        let id = self.vertices.len();
        self.vertices.push(Vertex {
            cloud,
            pose: Vector6::zeros(),
        });
        id
    }

    /// Append a vertex with an initial pose estimate and return its id.
    ///
    /// The pose argument is ignored for the first cloud, which becomes the
    /// reference and stays at the origin.
    pub fn add_point_cloud_with_pose(
        &mut self,
        cloud: Arc<PointCloud>,
        pose: Vector6<f64>,
    ) -> usize {
        let id = self.add_point_cloud(cloud);
        if id == 0 {
            warn!("the pose estimate is ignored for the first cloud; it becomes the reference");
        } else {
            self.vertices[id].pose = pose;
        }
        id
    }

    /// Set the pose estimate of a vertex and invalidate the cached
    /// linearization of every incident edge. Warns and does nothing for the
    /// reference vertex or an out-of-range id.
    pub fn set_pose(&mut self, vertex: usize, pose: Vector6<f64>) {
        if let Err(err) = self.try_set_pose(vertex, pose) {
            warn!("set_pose skipped: {err}");
        }
    }

    pub(crate) fn try_set_pose(
        &mut self,
        vertex: usize,
        pose: Vector6<f64>,
    ) -> Result<(), GraphError> {
        if vertex == 0 && !self.vertices.is_empty() {
            return Err(GraphError::ReferencePoseImmutable);
        }
        if vertex >= self.vertices.len() {
            return Err(GraphError::VertexOutOfRange(vertex));
        }
        self.vertices[vertex].pose = pose;
        self.invalidate_incident_edges(vertex);
        Ok(())
    }

    /// Current pose estimate of a vertex. Warns and returns the zero vector
    /// for an out-of-range id.
    pub fn get_pose(&self, vertex: usize) -> Vector6<f64> {
        match self.vertices.get(vertex) {
            Some(v) => v.pose,
            None => {
                warn!("get_pose of non-existing vertex {vertex}; returning zero");
                Vector6::zeros()
            }
        }
    }

    /// Set the correspondence list of the directed edge `(source, target)`,
    /// creating the edge if absent. Warns and does nothing when the list has
    /// fewer than 3 entries, a vertex is out of range, or the edge would be
    /// a self-loop.
    pub fn set_correspondences(
        &mut self,
        source: usize,
        target: usize,
        corrs: Vec<Correspondence>,
    ) {
        if let Err(err) = self.try_set_correspondences(source, target, corrs) {
            warn!("set_correspondences skipped: {err}");
        }
    }

    pub(crate) fn try_set_correspondences(
        &mut self,
        source: usize,
        target: usize,
        corrs: Vec<Correspondence>,
    ) -> Result<(), GraphError> {
        if corrs.len() < 3 {
            return Err(GraphError::TooFewCorrespondences(corrs.len()));
        }
        let n = self.vertices.len();
        if source >= n {
            return Err(GraphError::VertexOutOfRange(source));
        }
        if target >= n {
            return Err(GraphError::VertexOutOfRange(target));
        }
        if source == target {
            return Err(GraphError::SelfLoop(source));
        }

        if self.edge_index.contains_key(&(target, source)) {
            // Both directions now constrain the same pair; the solver sums
            // them, which doubles the weight of this constraint.
            warn!("edge ({source}, {target}) mirrors existing edge ({target}, {source})");
        }

        let corrs = Arc::new(corrs);
        match self.edge_index.get(&(source, target)) {
            Some(&idx) => {
                let edge = &mut self.edges[idx];
                edge.corrs = corrs;
                edge.computed = false;
            }
            None => {
                self.edge_index.insert((source, target), self.edges.len());
                self.edges.push(Edge {
                    source,
                    target,
                    corrs,
                    cinv: Matrix6::zeros(),
                    cinvd: Vector6::zeros(),
                    computed: false,
                });
            }
        }
        Ok(())
    }

    /// Correspondence list of the directed edge `(source, target)`. Warns
    /// and returns `None` for invalid vertices or a missing edge.
    pub fn get_correspondences(
        &self,
        source: usize,
        target: usize,
    ) -> Option<Arc<Vec<Correspondence>>> {
        let n = self.vertices.len();
        if source >= n || target >= n {
            warn!(
                "get_correspondences between non-existing vertices ({source}, {target})"
            );
            return None;
        }
        match self.edge_index.get(&(source, target)) {
            Some(&idx) => Some(Arc::clone(&self.edges[idx].corrs)),
            None => {
                warn!("{}", GraphError::EdgeAbsent(source, target));
                None
            }
        }
    }

    pub fn vertex(&self, id: usize) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Index of the directed edge `(source, target)`, if present.
    pub(crate) fn edge_between(&self, source: usize, target: usize) -> Option<usize> {
        self.edge_index.get(&(source, target)).copied()
    }

    /// Store a freshly computed linearization on an edge and mark its cache
    /// valid.
    pub(crate) fn store_linearization(
        &mut self,
        edge_idx: usize,
        cinv: Matrix6<f64>,
        cinvd: Vector6<f64>,
    ) {
        let edge = &mut self.edges[edge_idx];
        edge.cinv = cinv;
        edge.cinvd = cinvd;
        edge.computed = true;
    }

    fn invalidate_incident_edges(&mut self, vertex: usize) {
        for edge in &mut self.edges {
            if edge.source == vertex || edge.target == vertex {
                edge.computed = false;
            }
        }
    }
}
