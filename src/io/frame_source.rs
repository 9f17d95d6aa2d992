// src/io/frame_source.rs

//! The contract between the pipeline and whatever decodes image files.
//!
//! TIFF decoding itself lives outside this crate; a [`FrameSource`] hands the
//! pipeline one raw frame buffer at a time together with a [`Header`]
//! describing geometry and sample encoding. [`collect_stack`] performs the
//! single runtime pixel-kind decision and materializes a typed stack.

use crate::image::frame::{AnyStack, Frame, Stack};
use crate::image::pixel::{dispatch, Pixel, PixelKind, PixelVisitor};
use crate::utils::error::{Error, Result};

/// TIFF sample-format tag, reduced to the variants the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    UInt,
    Int,
    IeeeFp,
}

impl SampleFormat {
    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::UInt => "UInt",
            SampleFormat::Int => "Int",
            SampleFormat::IeeeFp => "IEEEFP",
        }
    }
}

/// Stack geometry and encoding, as read from an image file's header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub width: usize,
    pub height: usize,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    pub frames: usize,
    /// Saved channel list for ScanImage files; empty when absent.
    pub channels: Vec<i32>,
}

/// Yields successive frames of one stack.
pub trait FrameSource {
    fn header(&self) -> &Header;

    /// Raw sample bytes of the next frame, column-major, or `None` at the
    /// end of the stack.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;

    /// Rewinds to the first frame.
    fn reset(&mut self);
}

/// Heuristic for files that omit the sample-format tag: signed integer if a
/// negative minimum sample value is declared, IEEE floating-point at 32 bits
/// and above, unsigned integer otherwise.
pub fn guess_sample_format(bits_per_sample: u16, min_sample_value: Option<f64>) -> SampleFormat {
    match min_sample_value {
        Some(_) => log::warn!(
            "sample format tag missing, deducing from the minimum sample value"
        ),
        None => log::warn!(
            "sample format tag missing, guessing from {bits_per_sample} bits per sample"
        ),
    }
    if bits_per_sample >= 32 {
        SampleFormat::IeeeFp
    } else if min_sample_value.is_some_and(|v| v < 0.0) {
        SampleFormat::Int
    } else {
        SampleFormat::UInt
    }
}

/// Maps a header onto the pixel kind the pipeline will dispatch at.
///
/// Grayscale only: more than one saved channel is rejected here, as are
/// unsupported depth/format combinations.
pub fn pixel_kind_for(header: &Header) -> Result<PixelKind> {
    if header.channels.len() > 1 {
        return Err(Error::UnsupportedFormat(format!(
            "multi-channel stacks are not supported ({} channels saved)",
            header.channels.len()
        )));
    }

    use PixelKind::*;
    let kind = match (header.sample_format, header.bits_per_sample) {
        (SampleFormat::UInt, 8) => U8,
        (SampleFormat::UInt, 16) => U16,
        (SampleFormat::UInt, 32) => U32,
        (SampleFormat::UInt, 64) => U64,
        (SampleFormat::Int, 8) => I8,
        (SampleFormat::Int, 16) => I16,
        (SampleFormat::Int, 32) => I32,
        (SampleFormat::Int, 64) => I64,
        (SampleFormat::IeeeFp, 32) => F32,
        (SampleFormat::IeeeFp, 64) => F64,
        (format, bits) => {
            return Err(Error::UnsupportedFormat(format!(
                "{bits}-bit {} samples are not supported",
                format.name()
            )));
        }
    };
    Ok(kind)
}

struct StackCollector<'a> {
    source: &'a mut dyn FrameSource,
}

impl PixelVisitor for StackCollector<'_> {
    type Output = Result<AnyStack>;

    fn visit<P: Pixel>(self) -> Result<AnyStack> {
        let header = self.source.header().clone();
        let mut stack = Stack::<P>::new();
        while let Some(bytes) = self.source.next_frame()? {
            stack.push(Frame::from_bytes(header.width, header.height, &bytes)?)?;
        }
        Ok(P::wrap_stack(stack))
    }
}

/// Drains a frame source into a typed stack, deciding the pixel type once
/// from the header.
pub fn collect_stack(source: &mut dyn FrameSource) -> Result<AnyStack> {
    let kind = pixel_kind_for(source.header())?;
    dispatch(kind, StackCollector { source })
}

/// In-memory frame source: the implementation used by tests and by callers
/// that already hold decoded data.
pub struct MemoryFrameSource {
    header: Header,
    frames: Vec<Vec<u8>>,
    cursor: usize,
}

impl MemoryFrameSource {
    pub fn new(header: Header, frames: Vec<Vec<u8>>) -> Result<Self> {
        if header.frames != frames.len() {
            return Err(Error::Arguments(format!(
                "header declares {} frames but {} were provided",
                header.frames,
                frames.len()
            )));
        }
        let frame_bytes =
            header.width * header.height * (header.bits_per_sample as usize / 8);
        for (index, frame) in frames.iter().enumerate() {
            if frame.len() != frame_bytes {
                return Err(Error::Arguments(format!(
                    "frame {index} holds {} bytes, expected {frame_bytes}",
                    frame.len()
                )));
            }
        }
        Ok(MemoryFrameSource { header, frames, cursor: 0 })
    }

    /// Wraps an already-typed stack.
    pub fn from_stack<P: Pixel>(stack: &Stack<P>) -> Self {
        let sample_format = match P::KIND {
            PixelKind::F32 | PixelKind::F64 => SampleFormat::IeeeFp,
            PixelKind::I8 | PixelKind::I16 | PixelKind::I32 | PixelKind::I64 => SampleFormat::Int,
            _ => SampleFormat::UInt,
        };
        let header = Header {
            width: stack.width(),
            height: stack.height(),
            bits_per_sample: (P::KIND.bytes() * 8) as u16,
            sample_format,
            frames: stack.len(),
            channels: Vec::new(),
        };
        let frames = stack
            .iter()
            .map(|frame| bytemuck::cast_slice(frame.data()).to_vec())
            .collect();
        MemoryFrameSource { header, frames, cursor: 0 }
    }
}

impl FrameSource for MemoryFrameSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.cursor >= self.frames.len() {
            return Ok(None);
        }
        let frame = self.frames[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(frame))
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}
