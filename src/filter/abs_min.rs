// src/filter/abs_min.rs

//! Absolute-minimum-from-reference filter: each output pixel becomes the
//! neighborhood value closest to a reference level.

use crate::filter::{apply_filter, check_selection, FilterKernel, NeighborhoodPlan};
use crate::image::frame::Frame;
use crate::image::pixel::Pixel;
use crate::utils::error::Result;

struct AbsMinKernel<'a, P> {
    weight: &'a [f64],
    masked: Option<&'a [bool]>,
    ref_value: f64,
    empty_value: P,
    min_value: P,
    num_compared: usize,
}

impl<P: Pixel> FilterKernel<P> for AbsMinKernel<'_, P> {
    fn clear(&mut self) {
        self.min_value = self.empty_value;
        self.num_compared = 0;
    }

    fn add(&mut self, value: P, mask_pixel: usize, source_pixel: usize, _target_pixel: usize) {
        let w = self.weight[mask_pixel];
        if w == w
            && !value.is_nan()
            && self.masked.is_none_or(|m| !m[source_pixel])
        {
            if self.num_compared < 1
                || (value.to_f64() - self.ref_value).abs()
                    < (self.min_value.to_f64() - self.ref_value).abs()
            {
                self.min_value = value;
            }
            self.num_compared += 1;
        }
    }

    fn compute(&mut self) -> P {
        self.min_value
    }
}

/// For each output pixel, returns the admitted neighborhood pixel whose
/// distance `|pixel - ref_value|` is smallest, or `empty_value` if no pixel
/// was admitted. The weight kernel only gates admission here: NaN entries
/// exclude their mask position.
pub fn abs_min_filter<P: Pixel>(
    image: &Frame<P>,
    weight: &Frame<f64>,
    ref_value: f64,
    masked: Option<&[bool]>,
    selection: Option<&[bool]>,
    empty_value: P,
) -> Result<Frame<P>> {
    let plan =
        NeighborhoodPlan::new(image.width(), image.height(), weight.width(), weight.height())?;
    check_selection("selection", selection, image.len())?;
    check_selection("masked", masked, image.len())?;

    let mut kernel = AbsMinKernel {
        weight: weight.data(),
        masked,
        ref_value,
        empty_value,
        min_value: empty_value,
        num_compared: 0,
    };
    let mut target = Frame::new(image.width(), image.height(), empty_value);
    apply_filter(&plan, &mut kernel, &mut target, image, selection);
    Ok(target)
}
