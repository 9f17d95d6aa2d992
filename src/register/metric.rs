// src/register/metric.rs

//! Template-matching metric surfaces and sub-pixel peak refinement.
//!
//! The reference image is cropped by the maximum allowed shift on each side;
//! sliding that window over a frame produces one score per candidate integer
//! shift. The extremum of the surface is the integer shift, optionally
//! refined to sub-pixel precision by a parabolic fit through the three cells
//! centered on the peak: log-domain for the correlation metrics (a Gaussian
//! peak model), plain quadratic for the squared-difference metrics whose
//! values may be zero or the fit target is a minimum.

use crate::image::frame::Frame;
use crate::image::geom::Region;

/// Template-matching score, mirroring the OpenCV `TM_*` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    SquaredDifference,
    SqDiffNormed,
    CrossCorrelation,
    CrossCorrNormed,
    CorrelationCoeff,
    CorrCoeffNormed,
}

impl MatchMethod {
    /// Tag used in the diagnostics bundle.
    pub fn name(self) -> &'static str {
        match self {
            MatchMethod::SquaredDifference => "squaredDifference",
            MatchMethod::SqDiffNormed => "sqDiffNormed",
            MatchMethod::CrossCorrelation => "crossCorrelation",
            MatchMethod::CrossCorrNormed => "crossCorrNormed",
            MatchMethod::CorrelationCoeff => "correlationCoeff",
            MatchMethod::CorrCoeffNormed => "corrCoeffNormed",
        }
    }

    /// Squared-difference variants score best at the *minimum*.
    pub fn is_squared_difference(self) -> bool {
        matches!(self, MatchMethod::SquaredDifference | MatchMethod::SqDiffNormed)
    }

    fn is_normed(self) -> bool {
        matches!(
            self,
            MatchMethod::SqDiffNormed | MatchMethod::CrossCorrNormed | MatchMethod::CorrCoeffNormed
        )
    }
}

/// Score values over all candidate shifts, column-major like a frame.
///
/// `values[row + height*col]` is the score of placing the template with its
/// top-left corner at `(row, col)` of the frame; the surface center
/// corresponds to zero shift.
#[derive(Debug, Clone)]
pub struct MetricSurface {
    pub height: usize,
    pub width: usize,
    pub values: Vec<f32>,
}

impl MetricSurface {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row + self.height * col]
    }

    pub fn center(&self) -> (usize, usize) {
        (self.height / 2, self.width / 2)
    }

    /// Location and value of the extremum: minimum for squared-difference
    /// methods, maximum otherwise. Non-finite cells are skipped; if every
    /// cell is non-finite the surface center is reported with a NaN value.
    pub fn optimum(&self, method: MatchMethod) -> Peak {
        let minimize = method.is_squared_difference();
        let mut best: Option<(usize, f32)> = None;
        for (index, &value) in self.values.iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, b)) => {
                    if minimize {
                        value < b
                    } else {
                        value > b
                    }
                }
            };
            if better {
                best = Some((index, value));
            }
        }

        match best {
            Some((index, value)) => Peak {
                row: index % self.height,
                col: index / self.height,
                value: value as f64,
            },
            None => {
                let (r0, c0) = self.center();
                Peak { row: r0, col: c0, value: f64::NAN }
            }
        }
    }
}

/// Integer extremum of a metric surface.
#[derive(Debug, Clone, Copy)]
pub struct Peak {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// A per-frame shift estimate in the output-samples-source convention:
/// positive `col_shift` means the frame content moved right relative to the
/// template, and warping by `(col_shift, row_shift)` aligns it.
#[derive(Debug, Clone, Copy)]
pub struct ShiftEstimate {
    pub col_shift: f64,
    pub row_shift: f64,
    pub optimum: f64,
}

/// Computes the full metric surface of `frame` against `reference` cropped to
/// `region`. The surface has `frame - template + 1` cells per axis, which for
/// a symmetric inset of `max_shift` is `2·max_shift + 1`.
pub fn metric_surface(
    frame: &Frame<f32>,
    reference: &Frame<f32>,
    region: Region,
    method: MatchMethod,
) -> MetricSurface {
    let th = region.height;
    let tw = region.width;
    let height = frame.height() - th + 1;
    let width = frame.width() - tw + 1;
    let n = (th * tw) as f64;

    // Template statistics are shared by every candidate shift
    let mut sum_t = 0.0f64;
    let mut sum_t2 = 0.0f64;
    for col in region.col0..region.col_end() {
        for row in region.row0..region.row_end() {
            let t = reference.get(row, col) as f64;
            sum_t += t;
            sum_t2 += t * t;
        }
    }
    let mean_t = sum_t / n;

    let mut values = vec![0.0f32; height * width];
    for sc in 0..width {
        for sr in 0..height {
            let mut sum_i = 0.0f64;
            let mut sum_i2 = 0.0f64;
            let mut cross = 0.0f64;
            for col in 0..tw {
                for row in 0..th {
                    let i = frame.get(sr + row, sc + col) as f64;
                    let t = reference.get(region.row0 + row, region.col0 + col) as f64;
                    sum_i += i;
                    sum_i2 += i * i;
                    cross += i * t;
                }
            }

            let score = match method {
                MatchMethod::SquaredDifference | MatchMethod::SqDiffNormed => {
                    let sq = sum_i2 - 2.0 * cross + sum_t2;
                    if method.is_normed() {
                        normalize(sq, (sum_i2 * sum_t2).sqrt(), 1.0)
                    } else {
                        sq
                    }
                }
                MatchMethod::CrossCorrelation => cross,
                MatchMethod::CrossCorrNormed => {
                    normalize(cross, (sum_i2 * sum_t2).sqrt(), 0.0)
                }
                MatchMethod::CorrelationCoeff => cross - sum_i * mean_t,
                MatchMethod::CorrCoeffNormed => {
                    let mean_i = sum_i / n;
                    let var_i = sum_i2 - n * mean_i * mean_i;
                    let var_t = sum_t2 - n * mean_t * mean_t;
                    let num = cross - n * mean_i * mean_t;
                    normalize(num, (var_i * var_t).sqrt(), 0.0)
                }
            };
            values[sr + height * sc] = score as f32;
        }
    }

    MetricSurface { height, width, values }
}

/// Degenerate denominators (a flat patch under a normalized metric) yield the
/// method's worst score rather than a spurious optimum.
#[inline]
fn normalize(numerator: f64, denominator: f64, degenerate: f64) -> f64 {
    if denominator > f64::MIN_POSITIVE && denominator.is_finite() {
        numerator / denominator
    } else {
        degenerate
    }
}

/// Refines an integer peak to sub-pixel precision and converts it to the
/// shift convention. Returns `(col_shift, row_shift)`.
///
/// With `subpixel` off, or when the peak sits on the surface boundary, the
/// integer peak is used directly.
pub fn refine_shift(
    surface: &MetricSurface,
    peak: Peak,
    method: MatchMethod,
    subpixel: bool,
) -> (f64, f64) {
    let (r0, c0) = surface.center();
    let interior = peak.row > 0
        && peak.row + 1 < surface.height
        && peak.col > 0
        && peak.col + 1 < surface.width;

    let (mut x_peak, mut y_peak) = (0.0f64, 0.0f64);
    if subpixel && interior {
        // Gaussian (log-parabolic) fit for correlation metrics; plain
        // quadratic for squared differences, whose values may be zero
        let fit = |m_minus: f64, m_center: f64, m_plus: f64| -> f64 {
            let (a, b, c) = if method.is_squared_difference() {
                (m_minus, m_center, m_plus)
            } else {
                (m_minus.ln(), m_center.ln(), m_plus.ln())
            };
            let p = (a - c) / (2.0 * a - 4.0 * b + 2.0 * c);
            if p.is_nan() { 0.0 } else { p }
        };

        x_peak = fit(
            surface.get(peak.row, peak.col - 1) as f64,
            surface.get(peak.row, peak.col) as f64,
            surface.get(peak.row, peak.col + 1) as f64,
        );
        y_peak = fit(
            surface.get(peak.row - 1, peak.col) as f64,
            surface.get(peak.row, peak.col) as f64,
            surface.get(peak.row + 1, peak.col) as f64,
        );
    }

    let col_shift = -((peak.col as f64 - c0 as f64) + x_peak);
    let row_shift = -((peak.row as f64 - r0 as f64) + y_peak);
    (col_shift, row_shift)
}

/// One-call shift estimation: surface, extremum, refinement.
pub fn estimate_shift(
    frame: &Frame<f32>,
    reference: &Frame<f32>,
    region: Region,
    method: MatchMethod,
    subpixel: bool,
) -> (ShiftEstimate, MetricSurface) {
    let surface = metric_surface(frame, reference, region, method);
    let peak = surface.optimum(method);
    let (col_shift, row_shift) = refine_shift(&surface, peak, method, subpixel);
    (ShiftEstimate { col_shift, row_shift, optimum: peak.value }, surface)
}
