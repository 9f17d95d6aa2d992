// src/io/stack_info.rs

//! Aggregate geometry of a (possibly multi-file) image stack.
//!
//! Before any frame is decoded, the per-file headers are checked against
//! each other: every file of a stack must agree on width, height, bit depth,
//! sample format and saved channel list, or the whole stack is rejected
//! naming the offending file. An optional `(first, last)` frame range limits
//! how much of the concatenated stack later stages will read.

use crate::io::frame_source::{Header, SampleFormat};
use crate::utils::error::{Error, Result};

/// One file's contribution to a stack.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub header: Header,
}

/// Validated summary of a multi-file stack.
#[derive(Debug, Clone)]
pub struct StackInfo {
    pub width: usize,
    pub height: usize,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    /// Total frames retained after range selection.
    pub frames: usize,
    pub file_paths: Vec<String>,
    /// Frames retained per file, parallel to `file_paths`.
    pub file_frames: Vec<usize>,
    pub channels: Vec<i32>,
    /// The inclusive frame range applied, normalized to the stack length.
    pub frame_range: (usize, usize),
}

impl StackInfo {
    /// Validates cross-file consistency and applies the frame range.
    ///
    /// `frame_range` is an inclusive, zero-based `(first, last)` pair over
    /// the concatenated stack; `None` keeps everything.
    pub fn scan(files: &[FileInfo], frame_range: Option<(usize, usize)>) -> Result<StackInfo> {
        let Some(first) = files.first() else {
            return Err(Error::Usage("at least one input file is required".into()));
        };

        let reference = &first.header;
        for file in &files[1..] {
            let header = &file.header;
            let mismatch = |what: &str| Error::InconsistentStack {
                path: file.path.clone(),
                detail: format!("{what} is inconsistent with other file(s)"),
            };
            if header.width != reference.width {
                return Err(mismatch("image width"));
            }
            if header.height != reference.height {
                return Err(mismatch("image height"));
            }
            if header.bits_per_sample != reference.bits_per_sample {
                return Err(mismatch("bits per sample"));
            }
            if header.sample_format != reference.sample_format {
                return Err(mismatch("sample format"));
            }
            if header.channels != reference.channels {
                return Err(mismatch("channel list"));
            }
        }

        let total: usize = files.iter().map(|f| f.header.frames).sum();
        let (range_first, range_last) = match frame_range {
            Some((first, last)) => {
                if first > last {
                    return Err(Error::Arguments(format!(
                        "frame range ({first}, {last}) is reversed"
                    )));
                }
                if first >= total {
                    return Err(Error::Arguments(format!(
                        "frame range starts at {first} but the stack holds {total} frame(s)"
                    )));
                }
                (first, last.min(total.saturating_sub(1)))
            }
            None => (0, total.saturating_sub(1)),
        };

        // Count how many frames of each file fall inside the range
        let mut file_frames = Vec::with_capacity(files.len());
        let mut offset = 0usize;
        for file in files {
            let file_first = offset;
            let file_last = offset + file.header.frames; // exclusive
            let lo = range_first.max(file_first);
            let hi = (range_last + 1).min(file_last);
            file_frames.push(hi.saturating_sub(lo));
            offset = file_last;
        }

        Ok(StackInfo {
            width: reference.width,
            height: reference.height,
            bits_per_sample: reference.bits_per_sample,
            sample_format: reference.sample_format,
            frames: file_frames.iter().sum(),
            file_paths: files.iter().map(|f| f.path.clone()).collect(),
            file_frames,
            channels: reference.channels.clone(),
            frame_range: (range_first, range_last),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, frames: usize) -> FileInfo {
        FileInfo {
            path: path.into(),
            header: Header {
                width: 512,
                height: 256,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
                frames,
                channels: vec![1],
            },
        }
    }

    #[test]
    fn test_consistent_files_aggregate() {
        let info = StackInfo::scan(&[file("a.tif", 100), file("b.tif", 50)], None).unwrap();
        assert_eq!(info.frames, 150);
        assert_eq!(info.file_frames, vec![100, 50]);
        assert_eq!(info.frame_range, (0, 149));
        assert_eq!(info.channels, vec![1]);
    }

    #[test]
    fn test_mismatched_geometry_names_file() {
        let mut b = file("b.tif", 50);
        b.header.width = 511;
        let err = StackInfo::scan(&[file("a.tif", 100), b], None).unwrap_err();
        match err {
            Error::InconsistentStack { path, detail } => {
                assert_eq!(path, "b.tif");
                assert!(detail.contains("width"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_channels_rejected() {
        let mut b = file("b.tif", 10);
        b.header.channels = vec![1, 2];
        assert!(matches!(
            StackInfo::scan(&[file("a.tif", 10), b], None),
            Err(Error::InconsistentStack { .. })
        ));
    }

    #[test]
    fn test_frame_range_splits_across_files() {
        let info =
            StackInfo::scan(&[file("a.tif", 100), file("b.tif", 50)], Some((90, 119))).unwrap();
        assert_eq!(info.frames, 30);
        assert_eq!(info.file_frames, vec![10, 20]);
        assert_eq!(info.frame_range, (90, 119));
    }

    #[test]
    fn test_frame_range_clamped_to_stack() {
        let info = StackInfo::scan(&[file("a.tif", 20)], Some((5, 1000))).unwrap();
        assert_eq!(info.frames, 15);
        assert_eq!(info.frame_range, (5, 19));
    }

    #[test]
    fn test_bad_ranges_rejected() {
        assert!(StackInfo::scan(&[file("a.tif", 20)], Some((10, 5))).is_err());
        assert!(StackInfo::scan(&[file("a.tif", 20)], Some((20, 30))).is_err());
        assert!(StackInfo::scan(&[], None).is_err());
    }
}
