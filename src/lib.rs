//! A Rust library for motion correction of multi-frame microscopy stacks.
//!
//! This crate implements an in-memory registration and resampling pipeline:
//! for each frame of a two-dimensional image stack it estimates a rigid or
//! sub-pixel translation against a median template built from the stack
//! itself, warps the frame accordingly, and iterates until the shifts
//! settle. Alongside the engine it provides the local statistical filters
//! and area-weighted resampling it is built from, usable on their own.
//!
//! # Quick Start
//!
//! ```ignore
//! use stackreg::{motion_correct, MotionConfig, Stack};
//!
//! let stack: Stack<u16> = load_frames()?;
//! let config = MotionConfig {
//!     max_shift: 15,
//!     max_iter: 5,
//!     stop_below_shift: 0.1,
//!     ..MotionConfig::default()
//! };
//! let result = motion_correct(&stack, None, &config, None)?;
//!
//! let (dx, dy) = result.final_shifts();
//! let corrected = stackreg::correct_frames(
//!     &stack, Some(dx), Some(dy), None, None,
//!     result.params.interpolation, None,
//!     result.params.empty_value as f32,
//! )?;
//! ```
//!
//! # Features
//!
//! - **One pixel-type decision**: every kernel is generic over the ten
//!   supported integer and float encodings; dispatch happens once at ingest
//! - **NaN-aware kernels**: filters, resampling and templates all skip NaN
//!   samples and produce a configurable empty sentinel
//! - **Optional parallelism**: enable the `rayon` feature to fan the
//!   per-frame work of one iteration across cores

// Core modules
pub mod filter;
pub mod image;
pub mod io;
pub mod register;
pub mod resample;
pub mod utils;

// Primary pipeline API
pub use register::{
    correct_frames, motion_correct, motion_correct_any, CancelToken, Interpolation, MatchMethod,
    MotionConfig, MotionMetric, MotionParams, MotionResult,
};

// Image types
pub use image::{AnyStack, Frame, Pixel, PixelKind, Stack};

// Standalone operations
pub use filter::{
    abs_min_filter, adaptive_median_filter, adaptive_weighted_sum_filter, median_filter,
    weighted_sum_filter,
};
pub use register::{barycentric_mesh_warp, barycentric_mesh_warp_stack, detect_empty_stack};
pub use resample::{resize_frame, resize_stack, Condenser};

// Error types
pub use utils::error::{Error, Result};
