// src/utils/error.rs

use thiserror::Error;

use crate::register::motion::MotionResult;

/// The primary error type for all operations in the registration library.
///
/// Kernel code paths never panic on bad data; every failure surfaces as one of
/// these variants with a one-line diagnostic. Stack-level variants carry the
/// offending file path or frame index where one exists.
#[derive(Error, Debug)]
pub enum Error {
    /// Incorrect number or combination of arguments to an entry point.
    #[error("usage error: {0}")]
    Usage(String),

    /// An individual argument failed validation (shape, parity, pairing).
    #[error("invalid argument: {0}")]
    Arguments(String),

    /// Pixel encoding that the dispatcher cannot map to a supported kind.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Input data on which the requested operation is undefined.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A file in a multi-file stack disagrees with the rest on geometry or encoding.
    #[error("inconsistent stack: {detail} ({path})")]
    InconsistentStack { path: String, detail: String },

    /// Cancellation was requested; carries the partially populated result, with
    /// `iterations` reflecting the last completed iteration.
    #[error("motion correction cancelled after {} completed iteration(s)", .0.iterations)]
    Cancelled(Box<MotionResult>),

    /// An error occurred during I/O in a frame source implementation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for registration operations.
pub type Result<T> = std::result::Result<T, Error>;
