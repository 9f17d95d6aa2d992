// src/register/mesh.rs

//! Piecewise-affine resampling over a triangulated quadrilateral mesh.
//!
//! Callers that need non-rigid correction supply a regular grid of sample
//! nodes (1-indexed pixel coordinates of the original measurements) together
//! with the motion-warped position of every node. Each grid quad splits into
//! two triangles; a warped triangle maps onto its source triangle by the
//! affine transform its three vertex correspondences define, so every output
//! pixel inside it is the barycentric combination of the three vertex pixel
//! values. Pixels covered by no triangle stay NaN.

use crate::image::frame::{Frame, Stack};
use crate::utils::error::{Error, Result};

/// Node grid addressed column-major: node `(iy, ix)` lives at `iy + ny*ix`.
struct MeshGrid<'a> {
    x_sample: &'a [f64],
    y_sample: &'a [f64],
    nx: usize,
    ny: usize,
}

impl<'a> MeshGrid<'a> {
    fn new(x_sample: &'a [f64], y_sample: &'a [f64]) -> Result<Self> {
        let nx = x_sample.len();
        let ny = y_sample.len();
        if nx < 2 || ny < 2 {
            return Err(Error::Arguments(format!(
                "mesh needs at least a 2x2 node grid, got {ny}x{nx}"
            )));
        }
        if x_sample.windows(2).any(|w| w[1] <= w[0])
            || y_sample.windows(2).any(|w| w[1] <= w[0])
        {
            return Err(Error::Arguments(
                "sample coordinates must be strictly increasing".into(),
            ));
        }
        Ok(MeshGrid { x_sample, y_sample, nx, ny })
    }

    fn node(&self, iy: usize, ix: usize) -> usize {
        iy + self.ny * ix
    }

    /// Source-pixel value at a node; 1-indexed coordinates, NaN outside.
    fn node_value(&self, source: &Frame<f32>, iy: usize, ix: usize) -> f32 {
        let col = self.x_sample[ix] - 1.0;
        let row = self.y_sample[iy] - 1.0;
        let (r, c) = (row.round(), col.round());
        if r < 0.0 || c < 0.0 || r >= source.height() as f64 || c >= source.width() as f64 {
            f32::NAN
        } else {
            source.get(r as usize, c as usize)
        }
    }
}

/// One warped triangle with per-vertex values.
struct Triangle {
    x: [f64; 3],
    y: [f64; 3],
    v: [f32; 3],
}

impl Triangle {
    /// Fills every output pixel whose center lies inside the triangle.
    fn rasterize(&self, out: &mut Frame<f32>) {
        let denom = (self.y[1] - self.y[2]) * (self.x[0] - self.x[2])
            + (self.x[2] - self.x[1]) * (self.y[0] - self.y[2]);
        if denom.abs() < 1e-12 {
            return; // degenerate (collapsed) triangle
        }

        let min_x = self.x.iter().cloned().fold(f64::INFINITY, f64::min).floor().max(0.0);
        let max_x = self
            .x
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
            .ceil()
            .min(out.width() as f64 - 1.0);
        let min_y = self.y.iter().cloned().fold(f64::INFINITY, f64::min).floor().max(0.0);
        let max_y = self
            .y
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
            .ceil()
            .min(out.height() as f64 - 1.0);
        if min_x > max_x || min_y > max_y {
            return;
        }

        const EDGE_EPS: f64 = 1e-9;
        for col in min_x as usize..=max_x as usize {
            for row in min_y as usize..=max_y as usize {
                let px = col as f64;
                let py = row as f64;
                let l0 = ((self.y[1] - self.y[2]) * (px - self.x[2])
                    + (self.x[2] - self.x[1]) * (py - self.y[2]))
                    / denom;
                let l1 = ((self.y[2] - self.y[0]) * (px - self.x[2])
                    + (self.x[0] - self.x[2]) * (py - self.y[2]))
                    / denom;
                let l2 = 1.0 - l0 - l1;
                if l0 >= -EDGE_EPS && l1 >= -EDGE_EPS && l2 >= -EDGE_EPS {
                    out.set(
                        row,
                        col,
                        (l0 * self.v[0] as f64 + l1 * self.v[1] as f64 + l2 * self.v[2] as f64)
                            as f32,
                    );
                }
            }
        }
    }
}

/// Warps `source` onto a regular grid through the triangulated mesh.
///
/// `x_sample`/`y_sample` are the 1-indexed pixel coordinates of the grid
/// nodes; `x_target`/`y_target` (length `ny·nx`, column-major) are the
/// warped positions of those nodes. The output has the source dimensions;
/// pixels outside every warped triangle are NaN.
pub fn barycentric_mesh_warp(
    source: &Frame<f32>,
    x_sample: &[f64],
    y_sample: &[f64],
    x_target: &[f64],
    y_target: &[f64],
) -> Result<Frame<f32>> {
    let grid = MeshGrid::new(x_sample, y_sample)?;
    let num_nodes = grid.nx * grid.ny;
    if x_target.len() != num_nodes || y_target.len() != num_nodes {
        return Err(Error::Arguments(format!(
            "target node arrays must hold {num_nodes} positions, got {} and {}",
            x_target.len(),
            y_target.len()
        )));
    }

    let mut out = Frame::new(source.width(), source.height(), f32::NAN);

    for ix in 0..grid.nx - 1 {
        for iy in 0..grid.ny - 1 {
            let corners = [
                (iy, ix),
                (iy + 1, ix),
                (iy, ix + 1),
                (iy + 1, ix + 1),
            ];
            let values: Vec<f32> =
                corners.iter().map(|&(r, c)| grid.node_value(source, r, c)).collect();
            let xs: Vec<f64> =
                corners.iter().map(|&(r, c)| x_target[grid.node(r, c)] - 1.0).collect();
            let ys: Vec<f64> =
                corners.iter().map(|&(r, c)| y_target[grid.node(r, c)] - 1.0).collect();

            // Split the quad along its diagonal: (00, 10, 01) and (11, 01, 10)
            Triangle {
                x: [xs[0], xs[1], xs[2]],
                y: [ys[0], ys[1], ys[2]],
                v: [values[0], values[1], values[2]],
            }
            .rasterize(&mut out);
            Triangle {
                x: [xs[3], xs[2], xs[1]],
                y: [ys[3], ys[2], ys[1]],
                v: [values[3], values[2], values[1]],
            }
            .rasterize(&mut out);
        }
    }

    Ok(out)
}

/// Per-frame variant: `x_target`/`y_target` carry one node layer per frame.
pub fn barycentric_mesh_warp_stack(
    source: &Stack<f32>,
    x_sample: &[f64],
    y_sample: &[f64],
    x_target: &[f64],
    y_target: &[f64],
) -> Result<Stack<f32>> {
    let num_nodes = x_sample.len() * y_sample.len();
    let num_frames = source.len();
    if num_frames == 0 {
        return Err(Error::InvalidInput("input stack has no frames".into()));
    }
    if x_target.len() != num_nodes * num_frames || y_target.len() != num_nodes * num_frames {
        return Err(Error::Arguments(format!(
            "per-frame target arrays must hold {} positions, got {} and {}",
            num_nodes * num_frames,
            x_target.len(),
            y_target.len()
        )));
    }

    let mut out = Stack::new();
    for (index, frame) in source.iter().enumerate() {
        let lo = index * num_nodes;
        let hi = lo + num_nodes;
        out.push(barycentric_mesh_warp(
            frame,
            x_sample,
            y_sample,
            &x_target[lo..hi],
            &y_target[lo..hi],
        )?)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_mesh_reproduces_nodes() {
        let source = Frame::from_fn(4, 4, |r, c| (r * 4 + c) as f32);
        let x_sample = [1.0, 4.0];
        let y_sample = [1.0, 4.0];
        // Targets equal samples: the warp is the identity over the quad
        let x_target = [1.0, 1.0, 4.0, 4.0];
        let y_target = [1.0, 4.0, 1.0, 4.0];
        let out =
            barycentric_mesh_warp(&source, &x_sample, &y_sample, &x_target, &y_target).unwrap();

        assert_eq!(out.get(0, 0), source.get(0, 0));
        assert_eq!(out.get(3, 3), source.get(3, 3));
        assert_eq!(out.get(3, 0), source.get(3, 0));
    }

    #[test]
    fn test_interior_is_barycentric_blend() {
        // Node values 0, 10, 20, 30 over a unit-spaced 2x2 mesh: the warp is
        // piecewise linear between them
        let source = Frame::from_fn(3, 3, |r, c| match (r, c) {
            (0, 0) => 0.0,
            (2, 0) => 10.0,
            (0, 2) => 20.0,
            (2, 2) => 30.0,
            _ => f32::NAN,
        });
        let x_sample = [1.0, 3.0];
        let y_sample = [1.0, 3.0];
        let x_target = [1.0, 1.0, 3.0, 3.0];
        let y_target = [1.0, 3.0, 1.0, 3.0];
        let out =
            barycentric_mesh_warp(&source, &x_sample, &y_sample, &x_target, &y_target).unwrap();

        // (1, 1) sits on the shared diagonal: lower triangle gives the
        // average of nodes 10 and 20
        assert!((out.get(1, 1) - 15.0).abs() < 1e-4);
        // Midpoint of the left edge blends 0 and 10
        assert!((out.get(1, 0) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_uncovered_pixels_are_nan() {
        let source = Frame::new(6, 6, 1.0f32);
        let x_sample = [1.0, 3.0];
        let y_sample = [1.0, 3.0];
        // Mesh shifted far away: nothing in frame is covered
        let x_target = [100.0, 100.0, 102.0, 102.0];
        let y_target = [100.0, 102.0, 100.0, 102.0];
        let out =
            barycentric_mesh_warp(&source, &x_sample, &y_sample, &x_target, &y_target).unwrap();
        assert!(out.data().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_shape_errors() {
        let source = Frame::new(4, 4, 0.0f32);
        assert!(barycentric_mesh_warp(&source, &[1.0], &[1.0, 2.0], &[0.0; 2], &[0.0; 2])
            .is_err());
        assert!(barycentric_mesh_warp(
            &source,
            &[1.0, 2.0],
            &[1.0, 2.0],
            &[0.0; 3],
            &[0.0; 4]
        )
        .is_err());
        // Non-monotonic samples
        assert!(barycentric_mesh_warp(
            &source,
            &[2.0, 1.0],
            &[1.0, 2.0],
            &[0.0; 4],
            &[0.0; 4]
        )
        .is_err());
    }

    #[test]
    fn test_per_frame_targets() {
        let frames = vec![Frame::new(3, 3, 2.0f32), Frame::new(3, 3, 8.0f32)];
        let stack = Stack::from_frames(frames).unwrap();
        let x_sample = [1.0, 3.0];
        let y_sample = [1.0, 3.0];
        let one = [1.0, 1.0, 3.0, 3.0, 1.0, 1.0, 3.0, 3.0];
        let one_y = [1.0, 3.0, 1.0, 3.0, 1.0, 3.0, 1.0, 3.0];
        let out =
            barycentric_mesh_warp_stack(&stack, &x_sample, &y_sample, &one, &one_y).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.get(0).get(1, 1), 2.0);
        assert_eq!(out.get(1).get(1, 1), 8.0);
    }
}
