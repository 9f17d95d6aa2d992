//! Pixel types, frame buffers and geometry.

pub mod frame;
pub mod geom;
pub mod pixel;

pub use frame::{AnyStack, Frame, Stack};
pub use geom::Region;
pub use pixel::{dispatch, Pixel, PixelKind, PixelVisitor};
