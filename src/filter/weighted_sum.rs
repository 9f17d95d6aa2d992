// src/filter/weighted_sum.rs

//! Weighted-sum filters: a fixed 2D weight kernel, and an adaptive variant
//! whose weights vary per output pixel.

use crate::filter::{apply_filter, check_selection, FilterKernel, NeighborhoodPlan};
use crate::image::frame::Frame;
use crate::image::pixel::Pixel;
use crate::utils::error::{Error, Result};

struct WeightedSumKernel<'a, P> {
    weight: &'a [f64],
    masked: Option<&'a [bool]>,
    min_weight: f64,
    empty_value: P,
    sum_pixels: f64,
    sum_weight: f64,
}

impl<P: Pixel> FilterKernel<P> for WeightedSumKernel<'_, P> {
    fn clear(&mut self) {
        self.sum_pixels = 0.0;
        self.sum_weight = 0.0;
    }

    fn add(&mut self, value: P, mask_pixel: usize, source_pixel: usize, _target_pixel: usize) {
        let w = self.weight[mask_pixel];
        if w == w
            && !value.is_nan()
            && self.masked.is_none_or(|m| !m[source_pixel])
        {
            self.sum_pixels += w * value.to_f64();
            self.sum_weight += w;
        }
    }

    fn compute(&mut self) -> P {
        if self.sum_weight > self.min_weight {
            P::from_f64(self.sum_pixels / self.sum_weight)
        } else {
            self.empty_value
        }
    }
}

/// Filters `image` with the odd-sized weight kernel `weight`.
///
/// NaN weight entries and NaN pixels are excluded from both numerator and
/// denominator; `masked` suppresses matching source positions; output pixels
/// whose accumulated weight does not exceed `min_weight` receive
/// `empty_value`.
pub fn weighted_sum_filter<P: Pixel>(
    image: &Frame<P>,
    weight: &Frame<f64>,
    masked: Option<&[bool]>,
    selection: Option<&[bool]>,
    min_weight: f64,
    empty_value: P,
) -> Result<Frame<P>> {
    let plan =
        NeighborhoodPlan::new(image.width(), image.height(), weight.width(), weight.height())?;
    check_selection("selection", selection, image.len())?;
    check_selection("masked", masked, image.len())?;

    let mut kernel = WeightedSumKernel {
        weight: weight.data(),
        masked,
        min_weight,
        empty_value,
        sum_pixels: 0.0,
        sum_weight: 0.0,
    };
    let mut target = Frame::new(image.width(), image.height(), empty_value);
    apply_filter(&plan, &mut kernel, &mut target, image, selection);
    Ok(target)
}

struct AdaptiveSumKernel<'a, P> {
    weight: &'a [f64],
    mask_len: usize,
    min_weight: f64,
    empty_value: P,
    sum_pixels: f64,
    sum_weight: f64,
}

impl<P: Pixel> FilterKernel<P> for AdaptiveSumKernel<'_, P> {
    fn clear(&mut self) {
        self.sum_pixels = 0.0;
        self.sum_weight = 0.0;
    }

    fn add(&mut self, value: P, mask_pixel: usize, _source_pixel: usize, target_pixel: usize) {
        let w = self.weight[mask_pixel + target_pixel * self.mask_len];
        if w == w && !value.is_nan() {
            self.sum_pixels += w * value.to_f64();
            self.sum_weight += w;
        }
    }

    fn compute(&mut self) -> P {
        if self.sum_weight > self.min_weight {
            P::from_f64(self.sum_pixels / self.sum_weight)
        } else {
            self.empty_value
        }
    }
}

/// Weighted-sum filter whose kernel carries a per-target-pixel depth.
///
/// `weight` has shape `mask_height × mask_width × (H·W)` in column-major
/// order; the `(·, ·, p)` slice is consulted when computing output pixel `p`.
pub fn adaptive_weighted_sum_filter<P: Pixel>(
    image: &Frame<P>,
    weight: &[f64],
    mask_height: usize,
    mask_width: usize,
    selection: Option<&[bool]>,
    empty_value: P,
) -> Result<Frame<P>> {
    let plan = NeighborhoodPlan::new(image.width(), image.height(), mask_width, mask_height)?;
    check_selection("selection", selection, image.len())?;

    let mask_len = mask_height * mask_width;
    if weight.len() != mask_len * image.len() {
        return Err(Error::Arguments(format!(
            "adaptive weight must have depth equal to the number of image pixels \
             ({} elements expected, got {})",
            mask_len * image.len(),
            weight.len()
        )));
    }

    let mut kernel = AdaptiveSumKernel {
        weight,
        mask_len,
        min_weight: 0.0,
        empty_value,
        sum_pixels: 0.0,
        sum_weight: 0.0,
    };
    let mut target = Frame::new(image.width(), image.height(), empty_value);
    apply_filter(&plan, &mut kernel, &mut target, image, selection);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_weights_average() {
        let image = Frame::from_fn(3, 3, |r, c| (r * 3 + c) as f32);
        let weight = Frame::new(3, 3, 1.0f64);
        let out = weighted_sum_filter(&image, &weight, None, None, 0.0, f32::NAN).unwrap();
        // Center pixel: mean of all nine values (0..8 rearranged) = 4
        assert!((out.get(1, 1) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_nan_pixels_excluded() {
        let mut image = Frame::new(3, 3, 2.0f32);
        image.set(1, 1, f32::NAN);
        let weight = Frame::new(3, 3, 1.0f64);
        let out = weighted_sum_filter(&image, &weight, None, None, 0.0, f32::NAN).unwrap();
        // The NaN neighbor drops out of the average, which stays 2
        assert!((out.get(1, 1) - 2.0).abs() < 1e-6);
        assert!(!out.get(1, 1).is_nan());
    }

    #[test]
    fn test_nan_weight_entries_ignored() {
        let image = Frame::from_fn(3, 1, |_r, c| c as f32 * 10.0);
        let mut weight = Frame::new(3, 1, 1.0f64);
        weight.set(0, 0, f64::NAN); // drop the left neighbor
        let out = weighted_sum_filter(&image, &weight, None, None, 0.0, f32::NAN).unwrap();
        // Middle pixel averages itself and the right neighbor only
        assert!((out.get(0, 1) - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_masked_yields_empty_value() {
        let image = Frame::new(2, 2, 1.0f32);
        let weight = Frame::new(1, 1, 1.0f64);
        let masked = vec![true; 4];
        let out =
            weighted_sum_filter(&image, &weight, Some(&masked), None, 0.0, -7.0f32).unwrap();
        assert_eq!(out.get(0, 0), -7.0);
    }

    #[test]
    fn test_integer_output_rounds() {
        let image = Frame::from_vec(3, 1, vec![1u8, 2, 4]).unwrap();
        let weight = Frame::new(3, 1, 1.0f64);
        let out = weighted_sum_filter(&image, &weight, None, None, 0.0, 0u8).unwrap();
        // Middle: (1+2+4)/3 = 2.33 → 2
        assert_eq!(out.get(0, 1), 2);
    }

    #[test]
    fn test_adaptive_depth_validated() {
        let image = Frame::new(2, 2, 0.0f32);
        let err = adaptive_weighted_sum_filter(&image, &[1.0; 3], 1, 1, None, 0.0).unwrap_err();
        assert!(matches!(err, Error::Arguments(_)));
    }

    #[test]
    fn test_adaptive_weights_vary_per_pixel() {
        // 1x1 mask: output p = image p weighted by weight[p], i.e. identity
        // wherever the weight is positive.
        let image = Frame::from_vec(2, 1, vec![3.0f32, 9.0]).unwrap();
        let weight = vec![0.5, 2.0];
        let out = adaptive_weighted_sum_filter(&image, &weight, 1, 1, None, f32::NAN).unwrap();
        assert_eq!(out.data(), &[3.0, 9.0]);
    }
}
