// src/filter/adaptive_median.rs

//! Category-adaptive median filter.
//!
//! The footprint mask assigns each position a category index; categories are
//! consulted in order of increasing index, pooling their values until the
//! pooled sample is large enough relative to the positions seen so far. The
//! median of that pool becomes the output. Categories at or beyond the
//! declared count mark positions to ignore entirely.

use crate::filter::{apply_filter, check_selection, FilterKernel, NeighborhoodPlan};
use crate::image::frame::Frame;
use crate::image::pixel::Pixel;
use crate::utils::error::{Error, Result};
use crate::utils::quick_select::median;

struct AdaptiveMedianKernel<'a, P> {
    category: &'a [i32],
    num_categories: usize,
    target_frac: f64,
    category_values: Vec<Vec<f32>>,
    num_pixels: Vec<usize>,
    scratch: Vec<f32>,
    empty_value: P,
}

impl<P: Pixel> FilterKernel<P> for AdaptiveMedianKernel<'_, P> {
    fn clear(&mut self) {
        for values in &mut self.category_values {
            values.clear();
        }
        self.num_pixels.fill(0);
    }

    fn add(&mut self, value: P, mask_pixel: usize, _source_pixel: usize, _target_pixel: usize) {
        let cat = self.category[mask_pixel];
        if cat >= 0 && (cat as usize) < self.num_categories {
            // Footprint positions count towards the fraction test even when
            // their pixel is NaN; only valid values join the pool.
            self.num_pixels[cat as usize] += 1;
            if !value.is_nan() {
                self.category_values[cat as usize].push(value.to_f32());
            }
        }
    }

    fn compute(&mut self) -> P {
        self.scratch.clear();
        let mut seen_so_far = 0usize;
        for cat in 0..self.num_categories {
            self.scratch.extend_from_slice(&self.category_values[cat]);
            seen_so_far += self.num_pixels[cat];

            if self.scratch.len() as f64 > self.target_frac * seen_so_far as f64 {
                let n = self.scratch.len();
                if n == 0 {
                    break;
                }
                return P::from_f64(median(&mut self.scratch, n) as f64);
            }
        }
        self.empty_value
    }
}

/// Median filter whose footprint is partitioned into ordered categories.
///
/// `category` holds indices `0..num_categories`; larger values (or negatives)
/// exclude the position. Iteration over categories stops at the first one for
/// which the pooled valid-value count exceeds `target_frac` times the
/// footprint positions seen so far; the pooled median is returned, or
/// `empty_value` when no category passes.
pub fn adaptive_median_filter<P: Pixel>(
    image: &Frame<P>,
    category: &Frame<i32>,
    num_categories: usize,
    target_frac: f64,
    selection: Option<&[bool]>,
    empty_value: P,
) -> Result<Frame<P>> {
    if num_categories == 0 {
        return Err(Error::Arguments("numCategories must be positive".into()));
    }
    let plan =
        NeighborhoodPlan::new(image.width(), image.height(), category.width(), category.height())?;
    check_selection("selection", selection, image.len())?;

    let mask_len = category.len();
    let mut kernel = AdaptiveMedianKernel {
        category: category.data(),
        num_categories,
        target_frac,
        category_values: (0..num_categories).map(|_| Vec::with_capacity(mask_len)).collect(),
        num_pixels: vec![0; num_categories],
        scratch: Vec::with_capacity(mask_len),
        empty_value,
    };
    let mut target = Frame::new(image.width(), image.height(), empty_value);
    apply_filter(&plan, &mut kernel, &mut target, image, selection);
    Ok(target)
}
