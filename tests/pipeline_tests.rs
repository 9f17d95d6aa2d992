use stackreg::image::frame::{Frame, Stack};
use stackreg::io::frame_source::{collect_stack, FrameSource, MemoryFrameSource};
use stackreg::io::scan_image::sync_info;
use stackreg::io::stack_info::{FileInfo, StackInfo};
use stackreg::register::mesh::barycentric_mesh_warp;
use stackreg::register::motion::{motion_correct_any, MotionConfig};
use stackreg::register::warp::Interpolation;
use stackreg::{median_filter, resize_stack, weighted_sum_filter};

fn textured(width: usize, height: usize, offset: u16) -> Frame<u16> {
    Frame::from_fn(width, height, |r, c| {
        offset + ((r * 13 + c * 7) % 29) as u16 + (10.0 * ((r as f64 / 4.0).sin() + 1.5)) as u16
    })
}

#[test]
fn test_source_to_correction_pipeline() {
    // Decode-agnostic path: raw bytes in, typed dispatch, motion correction
    let frames: Vec<Frame<u16>> = (0..4).map(|i| textured(24, 24, 100 + i)).collect();
    let stack = Stack::from_frames(frames).unwrap();
    let mut source = MemoryFrameSource::from_stack(&stack);

    let any = collect_stack(&mut source).unwrap();
    let config = MotionConfig {
        max_shift: 3,
        max_iter: 2,
        stop_below_shift: 0.01,
        interpolation: Interpolation::IntegerShift,
        ..MotionConfig::default()
    };
    let result = motion_correct_any(&any, None, &config, None).unwrap();
    assert_eq!(result.num_frames, 4);
    // Identical texture (up to a flat offset): no motion to correct
    for &shift in result.x_shifts.iter().chain(result.y_shifts.iter()) {
        assert_eq!(shift, 0.0);
    }
}

#[test]
fn test_filter_then_resize_chain() {
    let mut image = Frame::from_fn(16, 16, |r, c| ((r + c) % 9) as f32 + 4.0);
    image.set(7, 7, f32::NAN);

    // Denoise with a NaN-aware median, then downscale by two
    let mask = Frame::new(3, 3, true);
    let filtered = median_filter(&image, &mask, None, f32::NAN).unwrap();
    assert!(filtered.data().iter().all(|v| !v.is_nan()));

    let stack = Stack::from_frames(vec![filtered]).unwrap();
    let small = resize_stack(&stack, 0.5, 0.5, None).unwrap();
    assert_eq!((small.width(), small.height()), (8, 8));
    assert!(small.get(0).data().iter().all(|v| !v.is_nan()));
}

#[test]
fn test_weighted_smoothing_preserves_flat_regions() {
    let image = Frame::new(12, 12, 6.5f32);
    let weight = Frame::from_fn(3, 3, |r, c| {
        // Binomial-ish smoothing kernel
        let wr = if r == 1 { 2.0 } else { 1.0 };
        let wc = if c == 1 { 2.0 } else { 1.0 };
        wr * wc
    });
    let out = weighted_sum_filter(&image, &weight, None, None, 0.0, f32::NAN).unwrap();
    for &v in out.data() {
        assert!((v - 6.5).abs() < 1e-6);
    }
}

#[test]
fn test_multi_file_scan_feeds_geometry() {
    let stack = Stack::from_frames(vec![textured(32, 16, 0); 3]).unwrap();
    let source = MemoryFrameSource::from_stack(&stack);
    let header = source.header().clone();

    let files = vec![
        FileInfo { path: "acq_00001.tif".into(), header: header.clone() },
        FileInfo { path: "acq_00002.tif".into(), header },
    ];
    let info = StackInfo::scan(&files, Some((2, 4))).unwrap();
    assert_eq!((info.width, info.height), (32, 16));
    assert_eq!(info.frames, 3);
    assert_eq!(info.file_frames, vec![1, 2]);
}

#[test]
fn test_sync_metadata_alongside_frames() {
    let descriptions = [
        "acquisitionNumbers = 12\nframeTimestamps_sec = 0.00\nepoch = [2016 11 3 10 5 2.25]\nI2CData = {0.01, {7, 7}}\n",
        "frameTimestamps_sec = 0.05\nI2CData = {0.06, {8, 9}}\n",
    ];
    let info = sync_info::<u8>(&descriptions).unwrap();
    assert_eq!(info.acquisition, 12.0);
    assert_eq!(info.payload_width, 2);
    assert_eq!(info.data, vec![7, 7, 8, 9]);
    assert_eq!(info.epoch[1], 11.0);
}

#[test]
fn test_mesh_warp_after_correction() {
    // A rigidly shifted mesh reproduces a translated image at the nodes
    let source = Frame::from_fn(8, 8, |r, c| (r * 8 + c) as f32);
    let x_sample = [2.0, 6.0];
    let y_sample = [2.0, 6.0];
    // Whole mesh moved one pixel right
    let x_target = [3.0, 3.0, 7.0, 7.0];
    let y_target = [2.0, 6.0, 2.0, 6.0];
    let out =
        barycentric_mesh_warp(&source, &x_sample, &y_sample, &x_target, &y_target).unwrap();

    // Node (row 1, col 1) lands at output (1, 2) carrying source (1, 1)
    assert_eq!(out.get(1, 2), source.get(1, 1));
    // Far corner out of the warped mesh: NaN
    assert!(out.get(7, 0).is_nan());
}
