// src/filter/median.rs

//! Median filter over a boolean footprint mask.

use crate::filter::{apply_filter, check_selection, FilterKernel, NeighborhoodPlan};
use crate::image::frame::Frame;
use crate::image::pixel::Pixel;
use crate::utils::error::{Error, Result};
use crate::utils::quick_select::median;

struct MedianKernel<'a, P> {
    mask: &'a [bool],
    scratch: Vec<f32>,
    empty_value: P,
}

impl<P: Pixel> FilterKernel<P> for MedianKernel<'_, P> {
    fn clear(&mut self) {
        self.scratch.clear();
    }

    fn add(&mut self, value: P, mask_pixel: usize, _source_pixel: usize, _target_pixel: usize) {
        if self.mask[mask_pixel] && !value.is_nan() {
            self.scratch.push(value.to_f32());
        }
    }

    fn compute(&mut self) -> P {
        let n = self.scratch.len();
        if n == 0 {
            return self.empty_value;
        }
        P::from_f64(median(&mut self.scratch, n) as f64)
    }
}

/// Median of the neighborhood pixels selected by the odd-sized boolean `mask`.
///
/// NaN pixels are ignored; an all-NaN (or fully unmasked) footprint produces
/// `empty_value`.
pub fn median_filter<P: Pixel>(
    image: &Frame<P>,
    mask: &Frame<bool>,
    selection: Option<&[bool]>,
    empty_value: P,
) -> Result<Frame<P>> {
    if mask.width() % 2 == 0 || mask.height() % 2 == 0 {
        return Err(Error::Arguments(format!(
            "mask must have odd dimensions, got {}x{}",
            mask.height(),
            mask.width()
        )));
    }
    let plan = NeighborhoodPlan::new(image.width(), image.height(), mask.width(), mask.height())?;
    check_selection("selection", selection, image.len())?;

    let mut kernel = MedianKernel {
        mask: mask.data(),
        scratch: Vec::with_capacity(mask.len()),
        empty_value,
    };
    let mut target = Frame::new(image.width(), image.height(), empty_value);
    apply_filter(&plan, &mut kernel, &mut target, image, selection);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_impulse_noise() {
        let mut image = Frame::new(5, 5, 10.0f32);
        image.set(2, 2, 1000.0);
        let mask = Frame::new(3, 3, true);
        let out = median_filter(&image, &mask, None, f32::NAN).unwrap();
        assert_eq!(out.get(2, 2), 10.0);
    }

    #[test]
    fn test_nan_neighbors_skipped() {
        let mut image = Frame::new(3, 3, 4.0f32);
        image.set(0, 0, f32::NAN);
        image.set(2, 2, f32::NAN);
        let mask = Frame::new(3, 3, true);
        let out = median_filter(&image, &mask, None, f32::NAN).unwrap();
        for &v in out.data() {
            assert_eq!(v, 4.0);
        }
    }

    #[test]
    fn test_all_nan_footprint_gives_empty_value() {
        let image = Frame::new(2, 2, f32::NAN);
        let mask = Frame::new(1, 1, true);
        let out = median_filter(&image, &mask, None, -3.0f32).unwrap();
        assert_eq!(out.data(), &[-3.0; 4]);
    }

    #[test]
    fn test_integer_median() {
        let image = Frame::from_vec(3, 1, vec![9u8, 1, 5]).unwrap();
        let mask = Frame::new(3, 1, true);
        let out = median_filter(&image, &mask, None, 0u8).unwrap();
        assert_eq!(out.get(0, 1), 5);
    }
}
