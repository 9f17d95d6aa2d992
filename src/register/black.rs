// src/register/black.rs

//! Empty ("black") frame detection.
//!
//! A frame is empty when its pixel distribution is statistically
//! indistinguishable from the sensor noise floor. The noise model is
//! bootstrapped from the first frame of the stack unless the caller supplies
//! a precomputed zero level, e.g. one carried over from an earlier file of
//! the same acquisition.

use bitvec::vec::BitVec;

use crate::image::frame::{Frame, Stack};
use crate::image::pixel::Pixel;
use crate::utils::stats::SampleStatistics;

/// Default number of noise standard deviations above the mean that still
/// counts as "zero".
pub const EMPTY_N_SIGMAS: f64 = 5.0;

/// Outcome of a detection pass: per-frame flags plus the zero level in force.
#[derive(Debug, Clone)]
pub struct EmptyFrames {
    pub flags: BitVec,
    pub zero_value: f64,
}

impl EmptyFrames {
    /// All-false flags for a stack where detection is disabled.
    pub fn none(num_frames: usize) -> Self {
        EmptyFrames { flags: BitVec::repeat(false, num_frames), zero_value: f64::NAN }
    }

    pub fn is_empty_frame(&self, index: usize) -> bool {
        self.flags[index]
    }

    pub fn count(&self) -> usize {
        self.flags.count_ones()
    }
}

fn frame_statistics<P: Pixel>(frame: &Frame<P>) -> SampleStatistics {
    let mut stats = SampleStatistics::new();
    for &value in frame.data() {
        stats.add(value.to_f64(), 1.0);
    }
    stats
}

fn count_at_or_below<P: Pixel>(frame: &Frame<P>, threshold: f64) -> usize {
    // NaN pixels fail the comparison and are never counted
    frame.data().iter().filter(|&&v| v.to_f64() <= threshold).count()
}

/// Classifies each frame as empty or not.
///
/// With no precomputed `zero_value`, the first frame defines the noise floor:
/// its mean plus `n_sigmas` RMS becomes the per-pixel zero threshold and the
/// frame itself is marked empty by construction. A frame is then empty iff
/// its count of pixels at or below the threshold reaches
/// `empty_prob^(H·W) · H·W`, the whole-frame expectation for per-pixel
/// probability `empty_prob`.
pub fn detect_empty_frames<P: Pixel>(
    frames: &[&Frame<P>],
    empty_prob: f64,
    zero_value: Option<f64>,
    n_sigmas: f64,
) -> EmptyFrames {
    let mut flags = BitVec::repeat(false, frames.len());
    let Some(first) = frames.first() else {
        return EmptyFrames { flags, zero_value: f64::NAN };
    };

    let max_zero_value = match zero_value {
        Some(v) if v.is_finite() => v,
        _ => {
            let stats = frame_statistics(first);
            flags.set(0, true); // defines the noise floor
            stats.mean() + n_sigmas * stats.rms()
        }
    };

    // Convert the per-pixel probability into a whole-frame expectation
    let num_pixels = first.len();
    let frame_prob = empty_prob.powi(num_pixels as i32);
    for (index, frame) in frames.iter().enumerate() {
        let num_zeros = count_at_or_below(frame, max_zero_value);
        if num_zeros as f64 >= frame_prob * num_pixels as f64 {
            flags.set(index, true);
        }
    }

    EmptyFrames { flags, zero_value: max_zero_value }
}

/// Convenience wrapper over a whole [`Stack`].
pub fn detect_empty_stack<P: Pixel>(
    stack: &Stack<P>,
    empty_prob: f64,
    zero_value: Option<f64>,
    n_sigmas: f64,
) -> EmptyFrames {
    let frames: Vec<&Frame<P>> = stack.iter().collect();
    detect_empty_frames(&frames, empty_prob, zero_value, n_sigmas)
}
