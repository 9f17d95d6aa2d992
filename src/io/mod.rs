//! Frame-source contracts, stack header validation and ScanImage metadata.

pub mod frame_source;
pub mod scan_image;
pub mod stack_info;

pub use frame_source::{
    collect_stack, guess_sample_format, pixel_kind_for, FrameSource, Header, MemoryFrameSource,
    SampleFormat,
};
pub use scan_image::{channel_list, sync_info, SyncInfo};
pub use stack_info::{FileInfo, StackInfo};
