//! Frame registration: black-frame detection, shift estimation, warping,
//! template construction and the motion-correction loop.

pub mod black;
pub mod mesh;
pub mod metric;
pub mod motion;
pub mod template_image;
pub mod warp;

pub use black::{detect_empty_frames, detect_empty_stack, EmptyFrames, EMPTY_N_SIGMAS};
pub use mesh::{barycentric_mesh_warp, barycentric_mesh_warp_stack};
pub use metric::{estimate_shift, metric_surface, MatchMethod, MetricSurface, ShiftEstimate};
pub use motion::{
    correct_frames, motion_correct, motion_correct_any, CancelToken, MotionConfig, MotionMetric,
    MotionParams, MotionResult,
};
pub use template_image::median_stack;
pub use warp::{shift_frame, translate_condense, translate_frame, Interpolation};
