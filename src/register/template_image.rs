// src/register/template_image.rs

//! Median reference image across a stack of accumulator frames.
//!
//! The template for each registration iteration is the per-pixel median of
//! the rebinned, shifted stack. Bins that aggregated several frames carry a
//! compensation weight of `1 / non-empty-count` so that partially empty bins
//! stay on the same intensity scale; bins that saw no frames at all are
//! omitted from the median.

use bitvec::vec::BitVec;

use crate::image::frame::Frame;
use crate::utils::quick_select::median;

/// Writes into `out` the per-pixel median across `frames`.
///
/// `weights[i]` scales every pixel of frame `i` before the median (1.0 when
/// absent); `omit` flags frames to leave out entirely. NaN samples are
/// skipped per pixel; a pixel with no valid sample across the stack becomes
/// 0, the median of an empty selection.
pub fn median_stack(
    frames: &[Frame<f32>],
    weights: Option<&[f64]>,
    omit: Option<&BitVec>,
    out: &mut Frame<f32>,
    scratch: &mut Vec<f32>,
) {
    debug_assert!(!frames.is_empty());
    debug_assert!(weights.is_none_or(|w| w.len() == frames.len()));
    debug_assert!(omit.is_none_or(|o| o.len() == frames.len()));

    let num_pixels = out.len();
    scratch.reserve(frames.len());

    for px in 0..num_pixels {
        scratch.clear();
        for (index, frame) in frames.iter().enumerate() {
            if omit.is_some_and(|o| o[index]) {
                continue;
            }
            let scale = weights.map_or(1.0, |w| w[index]);
            let value = (frame.data()[px] as f64 * scale) as f32;
            if value == value {
                scratch.push(value);
            }
        }
        let n = scratch.len();
        out.data_mut()[px] = median(scratch, n);
    }
}
