// src/resample/condenser.rs

//! Area-weighted resampling between two rectangular grids.
//!
//! A [`Condenser`] precomputes, for every target row and column, the range of
//! contributing source rows/columns and their fractional overlap weights, so
//! that resampling a whole stack pays the bin geometry cost once. The
//! per-pixel reduction is a Welford-style incremental weighted mean, which
//! keeps precision over wide bins and lets NaN or masked source pixels drop
//! out without biasing the result.

use crate::image::frame::Frame;
use crate::image::pixel::Pixel;
use crate::utils::error::{Error, Result};

const EDGE_TOLERANCE: f64 = 1e-15;

/// Precomputed mapping from a source grid onto a target grid.
pub struct Condenser {
    pub source_width: usize,
    pub source_height: usize,
    pub target_width: usize,
    pub target_height: usize,
    row_start: Vec<usize>,
    row_bound: Vec<usize>,
    row_weight: Vec<Vec<f64>>,
    col_start: Vec<usize>,
    col_bound: Vec<usize>,
    col_weight: Vec<Vec<f64>>,
}

/// Bin edges and per-pixel overlaps for one dimension. Weights of bin `t` sum
/// to the bin width `num_source / num_target`.
fn contributions(
    num_target: usize,
    num_source: usize,
) -> (Vec<usize>, Vec<usize>, Vec<Vec<f64>>) {
    let bin_width = num_source as f64 / num_target as f64;
    let mut start = vec![0usize; num_target];
    let mut bound = vec![0usize; num_target];
    let mut weight = Vec::with_capacity(num_target);

    for tgt in 0..num_target {
        let mut bin_start = tgt as f64 * bin_width;
        let bin_edge = bin_start + bin_width;
        start[tgt] = (bin_start + EDGE_TOLERANCE) as usize; // floor
        bound[tgt] = ((bin_edge - EDGE_TOLERANCE) as usize + 1).min(num_source); // ceil

        let mut w = Vec::with_capacity(bound[tgt] - start[tgt]);
        for pix in start[tgt]..bound[tgt] {
            let pix_up = if pix + 1 < bound[tgt] { (pix + 1) as f64 } else { bin_edge };
            w.push(pix_up - bin_start);
            bin_start = pix_up;
        }
        weight.push(w);
    }

    (start, bound, weight)
}

impl Condenser {
    pub fn new(
        source_width: usize,
        source_height: usize,
        target_width: usize,
        target_height: usize,
    ) -> Result<Self> {
        if source_width == 0 || source_height == 0 || target_width == 0 || target_height == 0 {
            return Err(Error::Arguments(format!(
                "condenser dimensions must be positive, got {source_height}x{source_width} -> \
                 {target_height}x{target_width}"
            )));
        }

        let (row_start, row_bound, row_weight) = contributions(target_height, source_height);
        let (col_start, col_bound, col_weight) = contributions(target_width, source_width);

        Ok(Condenser {
            source_width,
            source_height,
            target_width,
            target_height,
            row_start,
            row_bound,
            row_weight,
            col_start,
            col_bound,
            col_weight,
        })
    }

    pub fn row_range(&self, target_row: usize) -> (usize, usize) {
        (self.row_start[target_row], self.row_bound[target_row])
    }

    pub fn col_range(&self, target_col: usize) -> (usize, usize) {
        (self.col_start[target_col], self.col_bound[target_col])
    }

    pub fn row_weights(&self, target_row: usize) -> &[f64] {
        &self.row_weight[target_row]
    }

    pub fn col_weights(&self, target_col: usize) -> &[f64] {
        &self.col_weight[target_col]
    }

    /// Resamples one frame into `target`.
    ///
    /// Each target pixel is the weighted mean of its source bin; NaN pixels,
    /// non-positive weights and `masked` source positions are skipped. A bin
    /// with zero accumulated weight produces `empty_value`; otherwise the mean
    /// plus `offset` is saturate-cast into the target type.
    pub fn condense<S: Pixel, T: Pixel>(
        &self,
        source: &Frame<S>,
        target: &mut Frame<T>,
        offset: f64,
        masked: Option<&[bool]>,
        empty_value: T,
    ) {
        debug_assert_eq!(source.width(), self.source_width);
        debug_assert_eq!(source.height(), self.source_height);
        debug_assert_eq!(target.width(), self.target_width);
        debug_assert_eq!(target.height(), self.target_height);

        let src = source.data();
        let tgt = target.data_mut();

        let mut tgt_pix = 0usize;
        for tgt_col in 0..self.target_width {
            for tgt_row in 0..self.target_height {
                let mut mean = 0.0f64;
                let mut sum_weight = 0.0f64;

                let w_cols = &self.col_weight[tgt_col];
                for (ci, src_col) in (self.col_start[tgt_col]..self.col_bound[tgt_col]).enumerate()
                {
                    let col_base = self.source_height * src_col;
                    let w_rows = &self.row_weight[tgt_row];
                    for (ri, src_row) in
                        (self.row_start[tgt_row]..self.row_bound[tgt_row]).enumerate()
                    {
                        if masked.is_some_and(|m| m[src_row + col_base]) {
                            continue;
                        }
                        accumulate_mean(
                            &mut mean,
                            &mut sum_weight,
                            src[src_row + col_base].to_f64(),
                            w_rows[ri] * w_cols[ci],
                        );
                    }
                }

                tgt[tgt_pix] = if sum_weight > 0.0 {
                    T::from_f64(mean + offset)
                } else {
                    empty_value
                };
                tgt_pix += 1;
            }
        }
    }
}

#[inline]
fn accumulate_mean(mean: &mut f64, weight: &mut f64, x: f64, w: f64) {
    if w <= 0.0 || x != x {
        return;
    }
    *weight += w;
    *mean += (x - *mean) * w / *weight;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_bin_width() {
        let (_, _, weights) = contributions(3, 7);
        let bin_width = 7.0 / 3.0;
        for w in &weights {
            let sum: f64 = w.iter().sum();
            assert!((sum - bin_width).abs() < 1e-12, "bin weights sum to {sum}");
        }
    }

    #[test]
    fn test_bound_minus_start_matches_weight_len() {
        for (nt, ns) in [(3usize, 7usize), (4, 4), (5, 16), (4, 2)] {
            let (start, bound, weights) = contributions(nt, ns);
            for t in 0..nt {
                assert_eq!(bound[t] - start[t], weights[t].len(), "nt={nt} ns={ns} t={t}");
                assert!(bound[t] <= ns);
            }
        }
    }

    #[test]
    fn test_exact_downscale_by_two() {
        let source = Frame::from_fn(4, 4, |r, c| (r * 4 + c) as f32);
        let condenser = Condenser::new(4, 4, 2, 2).unwrap();
        let mut target = Frame::new(2, 2, 0.0f32);
        condenser.condense(&source, &mut target, 0.0, None, f32::NAN);
        // Top-left 2x2 block of (r*4 + c): values 0, 1, 4, 5 → mean 2.5
        assert!((target.get(0, 0) - 2.5).abs() < 1e-6);
        // Bottom-right block: 10, 11, 14, 15 → 12.5
        assert!((target.get(1, 1) - 12.5).abs() < 1e-6);
    }

    #[test]
    fn test_conservation() {
        // Sum over target pixels of mean * bin area equals the source sum
        let source = Frame::from_fn(7, 5, |r, c| ((r * 13 + c * 7) % 11) as f32);
        let condenser = Condenser::new(7, 5, 3, 2).unwrap();
        let mut target = Frame::new(3, 2, 0.0f32);
        condenser.condense(&source, &mut target, 0.0, None, f32::NAN);

        let bin_area = (7.0 / 3.0) * (5.0 / 2.0);
        let target_sum: f64 = target.data().iter().map(|&v| v as f64 * bin_area).sum();
        let source_sum: f64 = source.data().iter().map(|&v| v as f64).sum();
        let tol = 10.0 * f64::EPSILON * source.len() as f64 * source_sum.abs().max(1.0);
        assert!(
            (target_sum - source_sum).abs() < tol,
            "target {target_sum} vs source {source_sum}"
        );
    }

    #[test]
    fn test_nan_source_pixels_skipped() {
        let mut source = Frame::new(2, 2, 6.0f32);
        source.set(0, 0, f32::NAN);
        let condenser = Condenser::new(2, 2, 1, 1).unwrap();
        let mut target = Frame::new(1, 1, 0.0f32);
        condenser.condense(&source, &mut target, 0.0, None, f32::NAN);
        assert!((target.get(0, 0) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_fully_masked_bin_is_empty_value() {
        let source = Frame::new(2, 2, 1.0f32);
        let condenser = Condenser::new(2, 2, 1, 1).unwrap();
        let mut target = Frame::new(1, 1, 0.0f32);
        let masked = vec![true; 4];
        condenser.condense(&source, &mut target, 0.0, Some(&masked), -5.0f32);
        assert_eq!(target.get(0, 0), -5.0);
    }

    #[test]
    fn test_upscale_replicates_fractions() {
        let source = Frame::from_vec(2, 1, vec![10.0f32, 20.0]).unwrap();
        let condenser = Condenser::new(2, 1, 4, 1).unwrap();
        let mut target = Frame::new(4, 1, 0.0f32);
        condenser.condense(&source, &mut target, 0.0, None, f32::NAN);
        assert_eq!(target.data(), &[10.0, 10.0, 20.0, 20.0]);
    }

    #[test]
    fn test_saturating_integer_output() {
        let source = Frame::new(2, 2, 300.0f32);
        let condenser = Condenser::new(2, 2, 1, 1).unwrap();
        let mut target = Frame::new(1, 1, 0u8);
        condenser.condense(&source, &mut target, 0.0, None, 0u8);
        assert_eq!(target.get(0, 0), 255);
    }
}
