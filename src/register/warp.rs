// src/register/warp.rs

//! Rigid frame translation: integer shifts as bulk copies, sub-pixel shifts
//! as separable interpolation with a constant fractional phase.
//!
//! A pure translation means every output pixel samples the source at the same
//! fractional offset, so each interpolation kernel collapses to one set of
//! tap weights per axis, computed once per frame. Samples falling outside the
//! source contribute the empty value, the equivalent of a constant border.
//! When a resize is requested the translated frame is fed straight into the
//! area condenser without materializing the intermediate image.

use crate::image::frame::Frame;
use crate::resample::condenser::Condenser;
use crate::utils::error::{Error, Result};

/// Interpolation mode for sub-pixel warps. `IntegerShift` disables sub-pixel
/// registration entirely and uses the fast copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
    Cubic,
    Area,
    Lanczos4,
    IntegerShift,
}

impl Interpolation {
    pub fn name(self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearestNeighbor",
            Interpolation::Linear => "linear",
            Interpolation::Cubic => "cubic",
            Interpolation::Area => "area",
            Interpolation::Lanczos4 => "lanczos4",
            Interpolation::IntegerShift => "integerShift",
        }
    }

    /// True when the mode supports fractional shifts.
    pub fn is_subpixel(self) -> bool {
        !matches!(self, Interpolation::IntegerShift)
    }
}

/// Copies `source` shifted by whole pixels: `target[r, c] =
/// source[r - delta_rows, c - delta_cols]`, with out-of-range positions set
/// to `empty_value`.
pub fn shift_frame(
    target: &mut Frame<f32>,
    source: &Frame<f32>,
    delta_cols: isize,
    delta_rows: isize,
    empty_value: f32,
) {
    debug_assert_eq!(target.width(), source.width());
    debug_assert_eq!(target.height(), source.height());

    let height = source.height() as isize;
    let width = source.width() as isize;
    let src = source.data();
    let tgt = target.data_mut();

    for t_col in 0..width {
        let s_col = t_col - delta_cols;
        let col_base = (t_col * height) as usize;

        // Whole column out of range
        if s_col < 0 || s_col >= width {
            tgt[col_base..col_base + height as usize].fill(empty_value);
            continue;
        }

        let src_base = (s_col * height) as usize;
        let mut t_row = 0isize;
        let mut s_row = -delta_rows;

        while s_row < 0 && t_row < height {
            tgt[col_base + t_row as usize] = empty_value;
            t_row += 1;
            s_row += 1;
        }
        while s_row < height && t_row < height {
            tgt[col_base + t_row as usize] = src[src_base + s_row as usize];
            t_row += 1;
            s_row += 1;
        }
        while t_row < height {
            tgt[col_base + t_row as usize] = empty_value;
            t_row += 1;
        }
    }
}

/// Tap offsets (relative to the floor of the sample coordinate) and weights
/// for one axis at fractional phase `frac ∈ [0, 1)`.
fn kernel_taps(interp: Interpolation, frac: f64) -> (Vec<isize>, Vec<f64>) {
    match interp {
        Interpolation::Nearest => {
            if frac < 0.5 {
                (vec![0], vec![1.0])
            } else {
                (vec![1], vec![1.0])
            }
        }
        // Area resizing is handled by the condenser; for a pure translation
        // it reduces to bilinear sampling
        Interpolation::Linear | Interpolation::Area => {
            (vec![0, 1], vec![1.0 - frac, frac])
        }
        Interpolation::Cubic => {
            const A: f64 = -0.75;
            let w_m1 = ((A * (frac + 1.0) - 5.0 * A) * (frac + 1.0) + 8.0 * A) * (frac + 1.0)
                - 4.0 * A;
            let w_0 = ((A + 2.0) * frac - (A + 3.0)) * frac * frac + 1.0;
            let g1 = 1.0 - frac;
            let w_1 = ((A + 2.0) * g1 - (A + 3.0)) * g1 * g1 + 1.0;
            let w_2 = 1.0 - w_m1 - w_0 - w_1;
            (vec![-1, 0, 1, 2], vec![w_m1, w_0, w_1, w_2])
        }
        Interpolation::Lanczos4 => {
            if frac < 1e-12 {
                return (vec![0], vec![1.0]);
            }
            let sinc = |t: f64| -> f64 {
                if t.abs() < 1e-12 {
                    1.0
                } else {
                    let pt = std::f64::consts::PI * t;
                    pt.sin() / pt
                }
            };
            let offsets: Vec<isize> = (-3..=4).collect();
            let mut weights: Vec<f64> = offsets
                .iter()
                .map(|&k| {
                    let t = frac - k as f64;
                    sinc(t) * sinc(t / 4.0)
                })
                .collect();
            let sum: f64 = weights.iter().sum();
            for w in &mut weights {
                *w /= sum;
            }
            (offsets, weights)
        }
        Interpolation::IntegerShift => (vec![0], vec![1.0]),
    }
}

/// Separable translation sampler: precomputed taps for `(dx, dy)`.
struct TranslationSampler {
    base_col: isize,
    base_row: isize,
    col_offsets: Vec<isize>,
    col_weights: Vec<f64>,
    row_offsets: Vec<isize>,
    row_weights: Vec<f64>,
}

impl TranslationSampler {
    fn new(dx: f64, dy: f64, interp: Interpolation) -> Self {
        // Sample coordinate for output (r, c) is (r - dy, c - dx); split the
        // constant part into integer base and fractional phase
        let qx = (-dx).floor();
        let qy = (-dy).floor();
        let (col_offsets, col_weights) = kernel_taps(interp, -dx - qx);
        let (row_offsets, row_weights) = kernel_taps(interp, -dy - qy);
        TranslationSampler {
            base_col: qx as isize,
            base_row: qy as isize,
            col_offsets,
            col_weights,
            row_offsets,
            row_weights,
        }
    }

    /// Interpolated source value for output pixel `(row, col)`.
    #[inline]
    fn sample(&self, source: &Frame<f32>, row: usize, col: usize, empty_value: f32) -> f32 {
        let height = source.height() as isize;
        let width = source.width() as isize;
        let src = source.data();

        let mut acc = 0.0f64;
        for (co, &cw) in self.col_offsets.iter().zip(&self.col_weights) {
            let sc = col as isize + self.base_col + co;
            for (ro, &rw) in self.row_offsets.iter().zip(&self.row_weights) {
                let w = cw * rw;
                if w == 0.0 {
                    continue; // keep zero-weight taps from spreading a NaN fill
                }
                let sr = row as isize + self.base_row + ro;
                let value = if sr >= 0 && sr < height && sc >= 0 && sc < width {
                    src[(sr + height * sc) as usize] as f64
                } else {
                    empty_value as f64
                };
                acc += w * value;
            }
        }
        acc as f32
    }
}

/// Translates `source` by `(dx, dy)` with sub-pixel interpolation:
/// `target[r, c]` samples the source at `(r - dy, c - dx)`.
///
/// With `Interpolation::IntegerShift` the shift is rounded and the bulk copy
/// path is used.
pub fn translate_frame(
    target: &mut Frame<f32>,
    source: &Frame<f32>,
    dx: f64,
    dy: f64,
    interp: Interpolation,
    empty_value: f32,
) {
    if !interp.is_subpixel() {
        shift_frame(target, source, dx.round() as isize, dy.round() as isize, empty_value);
        return;
    }

    let sampler = TranslationSampler::new(dx, dy, interp);
    let height = target.height();
    let width = target.width();
    let tgt = target.data_mut();
    let mut index = 0usize;
    for col in 0..width {
        for row in 0..height {
            tgt[index] = sampler.sample(source, row, col, empty_value);
            index += 1;
        }
    }
}

/// Fused translate-then-condense: resamples the translated frame onto the
/// condenser's target grid in one pass, never materializing the intermediate
/// full-resolution image. `nan_mask` marks condensed output pixels that are
/// forced to `empty_value`.
pub fn translate_condense(
    target: &mut Frame<f32>,
    source: &Frame<f32>,
    dx: f64,
    dy: f64,
    interp: Interpolation,
    condenser: &Condenser,
    nan_mask: Option<&[bool]>,
    empty_value: f32,
) -> Result<()> {
    if target.width() != condenser.target_width || target.height() != condenser.target_height {
        return Err(Error::Arguments(format!(
            "condensed target is {}x{}, condenser expects {}x{}",
            target.height(),
            target.width(),
            condenser.target_height,
            condenser.target_width
        )));
    }
    if let Some(mask) = nan_mask {
        if mask.len() != target.len() {
            return Err(Error::Arguments(format!(
                "nanMask must match the condensed output ({} vs {})",
                mask.len(),
                target.len()
            )));
        }
    }

    let use_integer = !interp.is_subpixel();
    let (idx, idy) = (dx.round() as isize, dy.round() as isize);
    let sampler = TranslationSampler::new(dx, dy, interp);
    let height = source.height() as isize;
    let width = source.width() as isize;

    let tgt_height = target.height();
    let tgt_width = target.width();
    let tgt = target.data_mut();

    let mut tgt_pix = 0usize;
    for tgt_col in 0..tgt_width {
        for tgt_row in 0..tgt_height {
            if nan_mask.is_some_and(|m| m[tgt_pix]) {
                tgt[tgt_pix] = empty_value;
                tgt_pix += 1;
                continue;
            }

            let (col_start, col_bound) = condenser.col_range(tgt_col);
            let (row_start, row_bound) = condenser.row_range(tgt_row);
            let w_cols = condenser.col_weights(tgt_col);
            let w_rows = condenser.row_weights(tgt_row);

            let mut mean = 0.0f64;
            let mut sum_weight = 0.0f64;
            for (ci, src_col) in (col_start..col_bound).enumerate() {
                for (ri, src_row) in (row_start..row_bound).enumerate() {
                    let value = if use_integer {
                        let sr = src_row as isize - idy;
                        let sc = src_col as isize - idx;
                        if sr >= 0 && sr < height && sc >= 0 && sc < width {
                            source.data()[(sr + height * sc) as usize]
                        } else {
                            empty_value
                        }
                    } else {
                        sampler.sample(source, src_row, src_col, empty_value)
                    };

                    let w = w_rows[ri] * w_cols[ci];
                    if w > 0.0 && value == value {
                        sum_weight += w;
                        mean += (value as f64 - mean) * w / sum_weight;
                    }
                }
            }

            tgt[tgt_pix] = if sum_weight > 0.0 { mean as f32 } else { empty_value };
            tgt_pix += 1;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Frame<f32> {
        Frame::from_fn(width, height, |r, c| (r * 100 + c) as f32)
    }

    #[test]
    fn test_integer_shift_convention() {
        let source = ramp(5, 5);
        let mut shifted = Frame::new(5, 5, 0.0f32);
        shift_frame(&mut shifted, &source, 1, 2, -1.0);

        // shifted[r, c] == source[r - 2, c - 1] where in bounds
        for r in 0..5usize {
            for c in 0..5usize {
                let expect = if r >= 2 && c >= 1 { source.get(r - 2, c - 1) } else { -1.0 };
                assert_eq!(shifted.get(r, c), expect, "at ({r}, {c})");
            }
        }
    }

    #[test]
    fn test_shift_round_trip_restores_interior() {
        let source = ramp(8, 8);
        let mut forward = Frame::new(8, 8, 0.0f32);
        let mut back = Frame::new(8, 8, 0.0f32);
        shift_frame(&mut forward, &source, 2, -3, f32::NAN);
        shift_frame(&mut back, &forward, -2, 3, f32::NAN);

        // Equality holds outside a (|dx|, |dy|) border on the entry side
        for r in 3..8usize {
            for c in 0..6usize {
                assert_eq!(back.get(r, c), source.get(r, c), "at ({r}, {c})");
            }
        }
    }

    #[test]
    fn test_linear_translation_exact_on_ramp() {
        // Bilinear interpolation reproduces a linear ramp exactly
        let source = ramp(8, 8);
        let mut out = Frame::new(8, 8, 0.0f32);
        translate_frame(&mut out, &source, -0.5, -0.25, Interpolation::Linear, f32::NAN);

        // target(r, c) samples source at (r + 0.25, c + 0.5)
        for r in 0..7usize {
            for c in 0..7usize {
                let expect = (r as f32 + 0.25) * 100.0 + (c as f32 + 0.5);
                assert!(
                    (out.get(r, c) - expect).abs() < 1e-3,
                    "at ({r}, {c}): {} vs {expect}",
                    out.get(r, c)
                );
            }
        }
    }

    #[test]
    fn test_zero_translation_is_identity() {
        let source = ramp(6, 6);
        for interp in [
            Interpolation::Nearest,
            Interpolation::Linear,
            Interpolation::Cubic,
            Interpolation::Lanczos4,
        ] {
            let mut out = Frame::new(6, 6, f32::NAN);
            translate_frame(&mut out, &source, 0.0, 0.0, interp, f32::NAN);
            // Wide kernels reach the border, where the NaN fill bleeds in;
            // check the interior
            for r in 3..4usize {
                for c in 3..4usize {
                    assert!(
                        (out.get(r, c) - source.get(r, c)).abs() < 1e-4,
                        "{interp:?} at ({r}, {c})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_cubic_weights_sum_to_one() {
        for frac in [0.0, 0.25, 0.5, 0.9] {
            let (_, w) = kernel_taps(Interpolation::Cubic, frac);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "frac {frac}: sum {sum}");
        }
    }

    #[test]
    fn test_lanczos_weights_sum_to_one() {
        for frac in [0.1, 0.5, 0.99] {
            let (offsets, w) = kernel_taps(Interpolation::Lanczos4, frac);
            assert_eq!(offsets.len(), 8);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "frac {frac}: sum {sum}");
        }
        // Zero phase collapses to the identity tap
        let (offsets, w) = kernel_taps(Interpolation::Lanczos4, 0.0);
        assert_eq!(offsets, vec![0]);
        assert_eq!(w, vec![1.0]);
    }

    #[test]
    fn test_out_of_bounds_uses_empty_value() {
        let source = Frame::new(4, 4, 7.0f32);
        let mut out = Frame::new(4, 4, 0.0f32);
        translate_frame(&mut out, &source, 10.0, 0.0, Interpolation::Linear, -9.0);
        for &v in out.data() {
            assert_eq!(v, -9.0);
        }
    }

    #[test]
    fn test_fused_matches_two_pass() {
        let source = Frame::from_fn(8, 8, |r, c| ((r * 31 + c * 17) % 23) as f32);
        let condenser = Condenser::new(8, 8, 4, 4).unwrap();
        let (dx, dy) = (0.5, -0.75);

        // Two-pass reference
        let mut translated = Frame::new(8, 8, 0.0f32);
        translate_frame(&mut translated, &source, dx, dy, Interpolation::Linear, 0.0);
        let mut two_pass = Frame::new(4, 4, 0.0f32);
        condenser.condense(&translated, &mut two_pass, 0.0, None, f32::NAN);

        // Fused
        let mut fused = Frame::new(4, 4, 0.0f32);
        translate_condense(
            &mut fused,
            &source,
            dx,
            dy,
            Interpolation::Linear,
            &condenser,
            None,
            0.0,
        )
        .unwrap();

        for (a, b) in fused.data().iter().zip(two_pass.data()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_fused_nan_mask_forces_empty() {
        let source = Frame::new(4, 4, 3.0f32);
        let condenser = Condenser::new(4, 4, 2, 2).unwrap();
        let mut mask = vec![false; 4];
        mask[0] = true;
        let mut out = Frame::new(2, 2, 0.0f32);
        translate_condense(
            &mut out,
            &source,
            0.0,
            0.0,
            Interpolation::Linear,
            &condenser,
            Some(&mask),
            f32::NAN,
        )
        .unwrap();
        assert!(out.data()[0].is_nan());
        assert_eq!(out.data()[1], 3.0);
    }
}
