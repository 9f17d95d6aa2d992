// src/register/motion.rs

//! Iterative template-matching motion correction.
//!
//! Each iteration aligns every frame against the median template built from
//! the previous iteration's shifted stack, then refreshes the template from
//! the newly shifted frames, until the largest inter-iteration shift change
//! drops below a threshold or the iteration cap is reached. Empty (black)
//! frames are pinned at zero shift and excluded from the template. Reaching
//! the cap without convergence is not an error; callers inspect
//! [`MotionResult::converged`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitvec::vec::BitVec;
use log::{debug, warn};

use crate::image::frame::{for_any_stack, AnyStack, Frame, Stack};
use crate::image::geom::Region;
use crate::image::pixel::Pixel;
use crate::register::black::{detect_empty_frames, EmptyFrames, EMPTY_N_SIGMAS};
use crate::register::metric::{estimate_shift, MatchMethod};
use crate::register::template_image::median_stack;
use crate::register::warp::{shift_frame, translate_condense, translate_frame, Interpolation};
use crate::resample::condenser::Condenser;
use crate::resample::scaled_dim;
use crate::utils::error::{Error, Result};
use crate::utils::stats::SampleStatistics;

/// Tuning knobs for one correction run.
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Maximum shift searched per axis, in pixels.
    pub max_shift: usize,
    /// Iteration cap.
    pub max_iter: usize,
    /// Convergence threshold on the largest shift change between iterations.
    pub stop_below_shift: f64,
    /// Per-pixel probability for black-frame detection; `None` disables it.
    pub black_tolerance: Option<f64>,
    /// Precomputed zero level for black-frame detection, overriding the
    /// bootstrap from the first frame.
    pub zero_value: Option<f64>,
    /// Number of consecutive frames aggregated per median data point.
    pub median_rebin: usize,
    /// `(offset, skip)` frame subsampling applied before correction.
    pub frame_skip: Option<(usize, usize)>,
    /// Warp interpolation; `IntegerShift` disables sub-pixel registration.
    pub interpolation: Interpolation,
    /// Template-matching score.
    pub match_method: MatchMethod,
    /// Fill value for out-of-range pixels; `None` uses the stack mean.
    pub empty_value: Option<f64>,
    /// Keep the per-frame metric surfaces of the last iteration.
    pub store_surfaces: bool,
    /// Noise widths above the mean treated as "zero" when bootstrapping the
    /// black-frame threshold.
    pub empty_sigmas: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig {
            max_shift: 10,
            max_iter: 5,
            stop_below_shift: 0.0,
            black_tolerance: None,
            zero_value: None,
            median_rebin: 1,
            frame_skip: None,
            interpolation: Interpolation::Linear,
            match_method: MatchMethod::CorrCoeffNormed,
            empty_value: None,
            store_surfaces: true,
            empty_sigmas: EMPTY_N_SIGMAS,
        }
    }
}

/// The parameters actually in force for a finished run.
#[derive(Debug, Clone)]
pub struct MotionParams {
    pub max_shift: usize,
    pub max_iter: usize,
    pub stop_below_shift: f64,
    pub black_tolerance: Option<f64>,
    pub median_rebin: usize,
    pub frame_skip: Option<(usize, usize)>,
    pub interpolation: Interpolation,
    pub match_method: MatchMethod,
    pub empty_value: f64,
}

/// Per-frame template-matching diagnostics from the last iteration.
#[derive(Debug, Clone)]
pub struct MotionMetric {
    /// Tag of the correlation method used.
    pub name: &'static str,
    pub surface_height: usize,
    pub surface_width: usize,
    /// `surface_height · surface_width` values per frame, column-major,
    /// frames concatenated. Empty when surface storage is disabled.
    pub values: Vec<f32>,
    /// Per-frame optimum score; NaN for frames never scored.
    pub optimum: Vec<f64>,
}

/// Output bundle of a correction run.
#[derive(Debug, Clone)]
pub struct MotionResult {
    /// `num_frames × iterations` matrix, column-major; column `i` holds the
    /// per-frame shifts after iteration `i`.
    pub x_shifts: Vec<f64>,
    pub y_shifts: Vec<f64>,
    pub num_frames: usize,
    /// `(height, width, frames)` of the corrected input.
    pub input_size: (usize, usize, usize),
    /// Final template image.
    pub reference: Frame<f32>,
    pub metric: MotionMetric,
    pub params: MotionParams,
    /// Iterations actually performed.
    pub iterations: usize,
    /// Frames classified as empty.
    pub empty_frames: BitVec,
}

impl MotionResult {
    /// Whether the run stopped on the shift tolerance rather than the cap.
    pub fn converged(&self) -> bool {
        self.iterations < self.params.max_iter
    }

    /// Shift of `frame` recorded after `iteration` (0-based).
    pub fn shift_at(&self, frame: usize, iteration: usize) -> (f64, f64) {
        let idx = frame + iteration * self.num_frames;
        (self.x_shifts[idx], self.y_shifts[idx])
    }

    /// Final per-frame shifts, from the last completed iteration; empty when
    /// no iteration completed.
    pub fn final_shifts(&self) -> (&[f64], &[f64]) {
        if self.iterations == 0 {
            return (&[], &[]);
        }
        let lo = (self.iterations - 1) * self.num_frames;
        let hi = lo + self.num_frames;
        (&self.x_shifts[lo..hi], &self.y_shifts[lo..hi])
    }
}

/// Cooperative cancellation handle, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of correcting one frame within an iteration.
enum FrameOutcome {
    Corrected { col_shift: f64, row_shift: f64, optimum: f64, surface: Option<Vec<f32>> },
    Empty,
    Skipped,
}

/// Result of processing one median bin's frames.
struct BinOutput {
    bin_frame: Frame<f32>,
    count: usize,
    outcomes: Vec<FrameOutcome>,
}

/// Shared, immutable view of everything one iteration's frame work needs.
struct IterationContext<'a, P: Pixel> {
    frames: &'a [&'a Frame<P>],
    empty: &'a BitVec,
    reference: &'a Frame<f32>,
    region: Region,
    method: MatchMethod,
    interpolation: Interpolation,
    subpixel: bool,
    empty_value: f32,
    prev_x: &'a [f64],
    prev_y: &'a [f64],
    median_rebin: usize,
    store_surfaces: bool,
    cancel: Option<&'a CancelToken>,
    width: usize,
    height: usize,
}

impl<P: Pixel> IterationContext<'_, P> {
    /// Corrects the frames of one bin, accumulating their warped sum.
    ///
    /// Bins own their scratch buffers, so bins are independent and may run
    /// on separate workers; ordering within an iteration is not observable.
    fn process_bin(&self, bin: usize) -> BinOutput {
        let lo = bin * self.median_rebin;
        let hi = ((bin + 1) * self.median_rebin).min(self.frames.len());

        let mut bin_frame = Frame::new(self.width, self.height, 0.0f32);
        let mut frm_input = Frame::new(self.width, self.height, 0.0f32);
        let mut frm_temp = Frame::new(self.width, self.height, 0.0f32);
        let mut count = 0usize;
        let mut outcomes = Vec::with_capacity(hi - lo);

        for index in lo..hi {
            if self.cancel.is_some_and(CancelToken::is_cancelled) {
                outcomes.push(FrameOutcome::Skipped);
                continue;
            }
            if self.empty[index] {
                outcomes.push(FrameOutcome::Empty);
                continue;
            }

            self.frames[index].convert_into(&mut frm_input);
            let (estimate, surface) = estimate_shift(
                &frm_input,
                self.reference,
                self.region,
                self.method,
                self.subpixel,
            );

            // A non-finite optimum means the metric degenerated on this
            // frame; reuse the previous iteration's shift and surface it in
            // the diagnostics
            let (col_shift, row_shift) = if estimate.optimum.is_finite() {
                (estimate.col_shift, estimate.row_shift)
            } else {
                (self.prev_x[index], self.prev_y[index])
            };

            translate_frame(
                &mut frm_temp,
                &frm_input,
                col_shift,
                row_shift,
                self.interpolation,
                self.empty_value,
            );
            if count == 0 {
                bin_frame.data_mut().copy_from_slice(frm_temp.data());
            } else {
                for (acc, &v) in bin_frame.data_mut().iter_mut().zip(frm_temp.data()) {
                    *acc += v;
                }
            }
            count += 1;

            outcomes.push(FrameOutcome::Corrected {
                col_shift,
                row_shift,
                optimum: estimate.optimum,
                surface: self.store_surfaces.then(|| surface.values),
            });
        }

        BinOutput { bin_frame, count, outcomes }
    }
}

/// Motion-corrects `stack`, optionally starting from a caller-supplied
/// template stack (its median is the first iteration's reference).
///
/// Cancellation yields [`Error::Cancelled`] carrying the partial result for
/// the iterations that completed.
pub fn motion_correct<P: Pixel>(
    stack: &Stack<P>,
    template: Option<&Stack<f32>>,
    config: &MotionConfig,
    cancel: Option<&CancelToken>,
) -> Result<MotionResult> {
    // ------------------------------------------------------------------
    // Validation and frame selection
    if config.median_rebin == 0 {
        return Err(Error::Arguments("medianRebin must be positive".into()));
    }
    if stack.is_empty() {
        return Err(Error::InvalidInput("input stack has no frames".into()));
    }

    let mut frames: Vec<&Frame<P>> = stack.iter().collect();
    if let Some((offset, skip)) = config.frame_skip {
        frames = frames.into_iter().skip(offset).step_by(1 + skip).collect();
        if frames.is_empty() {
            return Err(Error::InvalidInput(format!(
                "frameSkip ({offset}, {skip}) leaves no frames"
            )));
        }
    }

    let height = stack.height();
    let width = stack.width();
    let num_frames = frames.len();
    if width * height < 3 {
        return Err(Error::InvalidInput(
            "input image too small, must have at least 3 pixels".into(),
        ));
    }

    // The rebin factor cannot exceed the frame count
    let mut median_rebin = config.median_rebin;
    let mut num_median = num_frames / median_rebin;
    if num_median < 1 {
        warn!(
            "medianRebin = {median_rebin} exceeds the number of frames ({num_frames}); \
             this is equivalent to using the mean"
        );
        num_median = 1;
        median_rebin = num_frames;
    }

    // The template size restricts the maximum allowable shift
    let first_ref_row = config.max_shift.min((height - 1) / 2);
    let first_ref_col = config.max_shift.min((width - 1) / 2);
    let region = Region::inset(height, width, first_ref_row, first_ref_col);
    let surface_height = 2 * first_ref_row + 1;
    let surface_width = 2 * first_ref_col + 1;
    let surface_len = surface_height * surface_width;

    // ------------------------------------------------------------------
    // Black-frame detection
    let empty = match config.black_tolerance {
        Some(prob) => detect_empty_frames(&frames, prob, config.zero_value, config.empty_sigmas),
        None => EmptyFrames::none(num_frames),
    };
    if empty.count() > 0 {
        debug!("{} of {} frame(s) classified as empty", empty.count(), num_frames);
    }

    // ------------------------------------------------------------------
    // Empty value: caller-supplied, or the stack mean (which also guards
    // against a uniform stack, on which registration is undefined)
    let empty_value = match config.empty_value {
        Some(v) => v,
        None => {
            let mut stats = SampleStatistics::new();
            for frame in &frames {
                for &value in frame.data() {
                    stats.add(value.to_f64(), 1.0);
                }
            }
            if stats.maximum() <= stats.minimum() {
                return Err(Error::InvalidInput(format!(
                    "invalid range [{:.3}, {:.3}] of pixel values; the image cannot be \
                     completely uniform for motion correction",
                    stats.minimum(),
                    stats.maximum()
                )));
            }
            stats.mean()
        }
    };
    let empty_fill = empty_value as f32;

    // ------------------------------------------------------------------
    // Initial median bins: sums of the raw (unshifted) non-empty frames
    let mut bins: Vec<Frame<f32>> = Vec::with_capacity(num_median);
    let mut bin_counts = vec![0usize; num_median];
    for bin in 0..num_median {
        let lo = bin * median_rebin;
        let hi = ((bin + 1) * median_rebin).min(num_frames);
        let mut acc = Frame::new(width, height, 0.0f32);
        for index in lo..hi {
            if empty.flags[index] {
                continue;
            }
            for (dst, src) in acc.data_mut().iter_mut().zip(frames[index].data()) {
                *dst += src.to_f32();
            }
            bin_counts[bin] += 1;
        }
        bins.push(acc);
    }

    // ------------------------------------------------------------------
    // Output storage
    let mut x_shifts = vec![0.0f64; num_frames * config.max_iter];
    let mut y_shifts = vec![0.0f64; num_frames * config.max_iter];
    let mut metric_values = if config.store_surfaces {
        vec![0.0f32; surface_len * num_frames]
    } else {
        Vec::new()
    };
    let mut optimum = vec![f64::NAN; num_frames];

    let mut img_ref = Frame::new(width, height, 0.0f32);
    let mut frm_temp = Frame::new(width, height, 0.0f32);
    let mut scratch: Vec<f32> = Vec::new();

    let subpixel = config.interpolation.is_subpixel();
    let recenter = config.black_tolerance.is_none();

    let mut iteration = 0usize;
    let mut mid_x = 0.0f64;
    let mut mid_y = 0.0f64;
    let mut max_rel_shift = f64::INFINITY;

    let make_result = |x: Vec<f64>,
                       y: Vec<f64>,
                       reference: Frame<f32>,
                       values: Vec<f32>,
                       optimum: Vec<f64>,
                       iterations: usize,
                       empty_flags: BitVec| MotionResult {
        x_shifts: x,
        y_shifts: y,
        num_frames,
        input_size: (height, width, num_frames),
        reference,
        metric: MotionMetric {
            name: config.match_method.name(),
            surface_height,
            surface_width,
            values,
            optimum,
        },
        params: MotionParams {
            max_shift: config.max_shift,
            max_iter: config.max_iter,
            stop_below_shift: config.stop_below_shift,
            black_tolerance: config.black_tolerance,
            median_rebin,
            frame_skip: config.frame_skip,
            interpolation: config.interpolation,
            match_method: config.match_method,
            empty_value,
        },
        iterations,
        empty_frames: empty_flags,
    };

    loop {
        // --------------------------------------------------------------
        // Build or refresh the template
        let bin_weights: Vec<f64> = bin_counts
            .iter()
            .map(|&c| if c > 1 { 1.0 / c as f64 } else { 1.0 })
            .collect();
        let bin_omit: BitVec = bin_counts.iter().map(|&c| c == 0).collect();

        let user_template =
            if iteration == 0 { template.filter(|t| !t.is_empty()) } else { None };
        if let Some(user) = user_template {
            let user_frames: Vec<Frame<f32>> = user.iter().cloned().collect();
            median_stack(&user_frames, None, None, &mut img_ref, &mut scratch);
        } else if mid_x != 0.0 || mid_y != 0.0 {
            // Translate the reference so as to waste as few pixels as possible
            median_stack(&bins, Some(&bin_weights), Some(&bin_omit), &mut frm_temp, &mut scratch);
            if subpixel {
                translate_frame(
                    &mut img_ref,
                    &frm_temp,
                    -mid_x,
                    -mid_y,
                    config.interpolation,
                    empty_fill,
                );
            } else {
                shift_frame(
                    &mut img_ref,
                    &frm_temp,
                    (-mid_x).round() as isize,
                    (-mid_y).round() as isize,
                    empty_fill,
                );
            }
        } else {
            median_stack(&bins, Some(&bin_weights), Some(&bin_omit), &mut img_ref, &mut scratch);
        }

        // --------------------------------------------------------------
        // Stop once shifts settle or the cap is reached
        if max_rel_shift < config.stop_below_shift {
            debug!(
                "converged after {iteration} iteration(s): max shift change {max_rel_shift:.4} \
                 < {:.4}",
                config.stop_below_shift
            );
            break;
        }
        if iteration >= config.max_iter {
            break;
        }
        iteration += 1;

        // Previous iteration's shifts, for the convergence measure and for
        // frames whose metric degenerates this iteration
        let cur = iteration - 1;
        let (prev_x, prev_y): (Vec<f64>, Vec<f64>) = if cur == 0 {
            (vec![0.0; num_frames], vec![0.0; num_frames])
        } else {
            let lo = (cur - 1) * num_frames;
            (
                x_shifts[lo..lo + num_frames].to_vec(),
                y_shifts[lo..lo + num_frames].to_vec(),
            )
        };

        let context = IterationContext {
            frames: &frames,
            empty: &empty.flags,
            reference: &img_ref,
            region,
            method: config.match_method,
            interpolation: config.interpolation,
            subpixel,
            empty_value: empty_fill,
            prev_x: &prev_x,
            prev_y: &prev_y,
            median_rebin,
            store_surfaces: config.store_surfaces,
            cancel,
            width,
            height,
        };

        let bin_outputs = run_bins(&context, num_median);

        // --------------------------------------------------------------
        // Merge per-bin outputs into shift history and diagnostics
        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        max_rel_shift = f64::NEG_INFINITY;

        for (bin, output) in bin_outputs.into_iter().enumerate() {
            bin_counts[bin] = output.count;
            bins[bin] = output.bin_frame;

            let lo = bin * median_rebin;
            for (offset, outcome) in output.outcomes.into_iter().enumerate() {
                let index = lo + offset;
                match outcome {
                    FrameOutcome::Corrected { col_shift, row_shift, optimum: opt, surface } => {
                        max_rel_shift = max_rel_shift.max((col_shift - prev_x[index]).abs());
                        max_rel_shift = max_rel_shift.max((row_shift - prev_y[index]).abs());
                        x_shifts[cur * num_frames + index] = col_shift;
                        y_shifts[cur * num_frames + index] = row_shift;
                        min_x = min_x.min(col_shift);
                        max_x = max_x.max(col_shift);
                        min_y = min_y.min(row_shift);
                        max_y = max_y.max(row_shift);
                        optimum[index] = opt;
                        if let Some(values) = surface {
                            metric_values[index * surface_len..(index + 1) * surface_len]
                                .copy_from_slice(&values);
                        }
                    }
                    FrameOutcome::Empty | FrameOutcome::Skipped => {
                        // Empty frames keep zero shift; skipped frames were
                        // interrupted by cancellation
                    }
                }
            }
        }

        if cancel.is_some_and(CancelToken::is_cancelled) {
            let completed = iteration - 1;
            let mut x = x_shifts;
            let mut y = y_shifts;
            x.truncate(completed * num_frames);
            y.truncate(completed * num_frames);
            return Err(Error::Cancelled(Box::new(make_result(
                x,
                y,
                img_ref,
                metric_values,
                optimum,
                completed,
                empty.flags,
            ))));
        }

        // --------------------------------------------------------------
        // Recenter the shift distribution symmetrically about zero, so the
        // template drifts as little as possible. Skipped when black-frame
        // detection pins empty frames at exactly zero.
        if recenter && min_x.is_finite() && min_y.is_finite() {
            mid_x = (min_x + max_x) / 2.0;
            mid_y = (min_y + max_y) / 2.0;
            for index in 0..num_frames {
                x_shifts[cur * num_frames + index] -= mid_x;
                y_shifts[cur * num_frames + index] -= mid_y;
            }
        }
    }

    // ------------------------------------------------------------------
    // Truncate shift history to the iterations actually performed
    let mut x = x_shifts;
    let mut y = y_shifts;
    x.truncate(iteration * num_frames);
    y.truncate(iteration * num_frames);

    Ok(make_result(x, y, img_ref, metric_values, optimum, iteration, empty.flags))
}

/// Runs all bins of one iteration, in parallel when the `rayon` feature is
/// enabled and there is more than one bin.
#[cfg(feature = "rayon")]
fn run_bins<P: Pixel>(context: &IterationContext<'_, P>, num_median: usize) -> Vec<BinOutput> {
    use rayon::prelude::*;
    if num_median > 1 {
        (0..num_median).into_par_iter().map(|bin| context.process_bin(bin)).collect()
    } else {
        (0..num_median).map(|bin| context.process_bin(bin)).collect()
    }
}

#[cfg(not(feature = "rayon"))]
fn run_bins<P: Pixel>(context: &IterationContext<'_, P>, num_median: usize) -> Vec<BinOutput> {
    (0..num_median).map(|bin| context.process_bin(bin)).collect()
}

/// Dispatch wrapper over a type-erased stack.
pub fn motion_correct_any(
    stack: &AnyStack,
    template: Option<&Stack<f32>>,
    config: &MotionConfig,
    cancel: Option<&CancelToken>,
) -> Result<MotionResult> {
    for_any_stack!(stack, s => motion_correct(s, template, config, cancel))
}

/// Materializes the corrected stack by applying per-frame shifts, optionally
/// fused with an area resize.
///
/// `x_shifts` and `y_shifts` must be provided together and match the frame
/// count; likewise `x_scale`/`y_scale`. With scaling, each frame is
/// translated and condensed in a single pass.
pub fn correct_frames<P: Pixel>(
    stack: &Stack<P>,
    x_shifts: Option<&[f64]>,
    y_shifts: Option<&[f64]>,
    x_scale: Option<f64>,
    y_scale: Option<f64>,
    interpolation: Interpolation,
    nan_mask: Option<&[bool]>,
    empty_value: f32,
) -> Result<Stack<f32>> {
    let shifts = match (x_shifts, y_shifts) {
        (Some(x), Some(y)) => Some((x, y)),
        (None, None) => None,
        _ => {
            return Err(Error::Arguments(
                "if xShift is provided, yShift must be provided as well, and vice versa".into(),
            ));
        }
    };
    if x_scale.is_some() != y_scale.is_some() {
        return Err(Error::Arguments(
            "if xScale is provided, yScale must be provided as well, and vice versa".into(),
        ));
    }
    if stack.is_empty() {
        return Err(Error::InvalidInput("input stack has no frames".into()));
    }
    if let Some((x, y)) = shifts {
        if x.len() != stack.len() || y.len() != stack.len() {
            return Err(Error::Arguments(format!(
                "number of shifts ({}, {}) does not match the number of frames ({})",
                x.len(),
                y.len(),
                stack.len()
            )));
        }
    }

    let condenser = match (x_scale, y_scale) {
        (Some(sx), Some(sy)) => {
            if sx <= 0.0 || sy <= 0.0 {
                return Err(Error::Arguments(format!(
                    "scale factors must be positive, got ({sx}, {sy})"
                )));
            }
            Some(Condenser::new(
                stack.width(),
                stack.height(),
                scaled_dim(stack.width(), sx),
                scaled_dim(stack.height(), sy),
            )?)
        }
        _ => None,
    };

    let mut out = Stack::new();
    let mut frm_input = Frame::new(stack.width(), stack.height(), 0.0f32);
    for (index, frame) in stack.iter().enumerate() {
        frame.convert_into(&mut frm_input);
        let (dx, dy) = match shifts {
            Some((x, y)) => (x[index], y[index]),
            None => (0.0, 0.0),
        };

        let corrected = match &condenser {
            Some(cond) => {
                let mut target =
                    Frame::new(cond.target_width, cond.target_height, empty_value);
                translate_condense(
                    &mut target,
                    &frm_input,
                    dx,
                    dy,
                    interpolation,
                    cond,
                    nan_mask,
                    empty_value,
                )?;
                target
            }
            None => {
                let mut target = Frame::new(stack.width(), stack.height(), empty_value);
                translate_frame(&mut target, &frm_input, dx, dy, interpolation, empty_value);
                if let Some(mask) = nan_mask {
                    if mask.len() != target.len() {
                        return Err(Error::Arguments(format!(
                            "nanMask must have the same number of elements as a frame \
                             ({} vs {})",
                            mask.len(),
                            target.len()
                        )));
                    }
                    for (value, &m) in target.data_mut().iter_mut().zip(mask) {
                        if m {
                            *value = empty_value;
                        }
                    }
                }
                target
            }
        };
        out.push(corrected)?;
    }
    Ok(out)
}
