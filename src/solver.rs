//! Global system assembly and solution.
//!
//! One solver step stacks every edge's cached information matrix and vector
//! into the block-structured system `G X = B` over all non-reference poses,
//! solves it with a dense column-pivoted QR decomposition, and maps the
//! resulting step back onto the Euler pose coordinates through the inverse
//! incidence correction.
//!
//! `G` is `6(n-1)` square and block-sparse; a sparse representation would be
//! the natural next step for large graphs.

use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::graph::SlamGraph;
use crate::pose::incidence_correction;

/// Assemble `G` and `B` from the cached edge linearizations.
///
/// Row block `i - 1` covers vertex `i` (vertex 0 is the fixed reference and
/// has no block). For each vertex pair the forward edge is preferred; a
/// backward edge contributes with a negated information vector. Returns
/// zero-dimensional matrices when the graph has fewer than 2 vertices.
pub fn assemble_system(graph: &SlamGraph) -> (DMatrix<f64>, DVector<f64>) {
    let n = graph.num_vertices();
    if n < 2 {
        return (DMatrix::zeros(0, 0), DVector::zeros(0));
    }
    let dim = 6 * (n - 1);
    let mut g = DMatrix::<f64>::zeros(dim, dim);
    let mut b = DVector::<f64>::zeros(dim);

    for vi in 1..n {
        let row = 6 * (vi - 1);
        for vj in 0..n {
            let (edge_idx, forward) = match graph.edge_between(vi, vj) {
                Some(idx) => (idx, true),
                None => match graph.edge_between(vj, vi) {
                    Some(idx) => (idx, false),
                    None => continue,
                },
            };
            let edge = &graph.edges()[edge_idx];

            if vj > 0 {
                let col = 6 * (vj - 1);
                let mut block = g.fixed_view_mut::<6, 6>(row, col);
                block.copy_from(&(-edge.cinv));
            }
            let mut diag = g.fixed_view_mut::<6, 6>(row, row);
            diag += edge.cinv;

            let sign = if forward { 1.0 } else { -1.0 };
            let mut segment = b.fixed_rows_mut::<6>(row);
            segment += edge.cinvd * sign;
        }
    }

    (g, b)
}

/// Solve `G X = B` with a column-pivoted Householder QR decomposition.
///
/// Returns `None` when the factorization finds `G` rank deficient, which
/// happens when some non-reference vertex has no incident edge.
pub fn solve_system(g: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    g.col_piv_qr().solve(b)
}

/// Apply the solved step to every non-reference vertex:
/// `pose_i <- pose_i - incidence_correction(pose_i)^-1 * X_i`.
///
/// Updates go through `SlamGraph::set_pose`, so the incident edge caches are
/// invalidated for the next pass. A vertex whose incidence correction is
/// singular (pitch at +-pi/2) keeps its pose and is reported.
pub fn apply_updates(graph: &mut SlamGraph, x: &DVector<f64>) {
    for vi in 1..graph.num_vertices() {
        let pose = graph.get_pose(vi);
        let correction = incidence_correction(&pose);
        let inv = match correction.try_inverse() {
            Some(inv) => inv,
            None => {
                warn!("incidence correction of vertex {vi} is singular; keeping its pose");
                continue;
            }
        };
        let xi = x.fixed_rows::<6>(6 * (vi - 1)).clone_owned();
        graph.set_pose(vi, pose - inv * xi);
    }
}
