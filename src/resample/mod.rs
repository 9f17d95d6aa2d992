//! Area-weighted image resampling.

pub mod condenser;

pub use condenser::Condenser;

use crate::image::frame::{Frame, Stack};
use crate::image::pixel::Pixel;
use crate::utils::error::{Error, Result};

/// Rounded target dimension for a scale factor.
pub fn scaled_dim(source: usize, scale: f64) -> usize {
    (source as f64 * scale).round() as usize
}

/// Resizes one frame by `(x_scale, y_scale)` using area-weighted resampling.
///
/// Output is `f32` with NaN as the empty value; `nan_mask` marks source
/// pixels to exclude.
pub fn resize_frame<P: Pixel>(
    source: &Frame<P>,
    x_scale: f64,
    y_scale: f64,
    nan_mask: Option<&[bool]>,
) -> Result<Frame<f32>> {
    if x_scale <= 0.0 || y_scale <= 0.0 {
        return Err(Error::Arguments(format!(
            "scale factors must be positive, got ({x_scale}, {y_scale})"
        )));
    }
    if let Some(mask) = nan_mask {
        if mask.len() != source.len() {
            return Err(Error::Arguments(format!(
                "nanMask must have the same number of elements as the image ({} vs {})",
                mask.len(),
                source.len()
            )));
        }
    }

    let target_width = scaled_dim(source.width(), x_scale);
    let target_height = scaled_dim(source.height(), y_scale);
    let condenser =
        Condenser::new(source.width(), source.height(), target_width, target_height)?;
    let mut target = Frame::new(target_width, target_height, 0.0f32);
    condenser.condense(source, &mut target, 0.0, nan_mask, f32::NAN);
    Ok(target)
}

/// Resizes every frame of a stack with a single precomputed [`Condenser`].
pub fn resize_stack<P: Pixel>(
    stack: &Stack<P>,
    x_scale: f64,
    y_scale: f64,
    nan_mask: Option<&[bool]>,
) -> Result<Stack<f32>> {
    if stack.is_empty() {
        return Err(Error::InvalidInput("input stack has no frames".into()));
    }
    if x_scale <= 0.0 || y_scale <= 0.0 {
        return Err(Error::Arguments(format!(
            "scale factors must be positive, got ({x_scale}, {y_scale})"
        )));
    }
    if let Some(mask) = nan_mask {
        if mask.len() != stack.get(0).len() {
            return Err(Error::Arguments(format!(
                "nanMask must have the same number of elements as one frame ({} vs {})",
                mask.len(),
                stack.get(0).len()
            )));
        }
    }

    let target_width = scaled_dim(stack.width(), x_scale);
    let target_height = scaled_dim(stack.height(), y_scale);
    let condenser = Condenser::new(stack.width(), stack.height(), target_width, target_height)?;

    let mut out = Stack::new();
    for frame in stack.iter() {
        let mut target = Frame::new(target_width, target_height, 0.0f32);
        condenser.condense(frame, &mut target, 0.0, nan_mask, f32::NAN);
        out.push(target)?;
    }
    Ok(out)
}
