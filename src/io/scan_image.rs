// src/io/scan_image.rs

//! ScanImage synchronization metadata.
//!
//! ScanImage writes a free-text description into every TIFF IFD; the fields
//! the pipeline cares about are extracted by exact name match, one
//! description string per frame:
//!
//! * `acquisitionNumbers` — session identifier, first frame only
//! * `frameTimestamps_sec` — monotonic clock time per frame
//! * `epoch` — wall-clock `[Y, M, D, h, m, s.fff]` vector
//! * `I2CData` — per-frame sync packet `{timestamp, {byte, byte, ...}}`,
//!   or `{}` when nothing was received that frame
//! * `scanimage.SI.hChannels.channelSave` — saved channel list
//!
//! I2C payload bytes are reinterpreted as a caller-chosen numeric type of
//! 1, 2, 4 or 8 bytes, little-endian, and every frame must carry the same
//! number of payload elements.

use byteorder::{ByteOrder, LittleEndian};

use crate::image::pixel::Pixel;
use crate::utils::error::{Error, Result};

const ACQ_NAME: &str = "acquisitionNumbers";
const TIME_NAME: &str = "frameTimestamps_sec";
const EPOCH_NAME: &str = "epoch";
const DATA_NAME: &str = "I2CData";
const CHANNELS_NAME: &str = "scanimage.SI.hChannels.channelSave";

/// Parsed synchronization bundle; `data` is `payload_width × N` column-major.
#[derive(Debug, Clone)]
pub struct SyncInfo<T> {
    pub acquisition: f64,
    pub epoch: [f64; 6],
    pub frame_timestamps: Vec<f64>,
    pub data_timestamps: Vec<f64>,
    pub payload_width: usize,
    pub data: Vec<T>,
}

/// Scalar field of the form `name = 1.25`.
fn scalar_field(desc: &str, name: &str) -> Option<f64> {
    for line in desc.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(name) {
            let value = rest.split_once('=')?.1;
            return parse_leading_number(value);
        }
    }
    None
}

/// Vector field of the form `name = [1 2 3.5]`; a bare scalar after the `=`
/// is accepted as a one-element vector (some ScanImage versions write the
/// channel list that way).
fn vector_field(desc: &str, name: &str) -> Option<Vec<f64>> {
    for line in desc.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(name) {
            let value = rest.split_once('=')?.1;
            let trimmed = value.trim();
            let body = match trimmed.strip_prefix('[') {
                Some(inner) => inner.split(']').next()?,
                None => trimmed,
            };
            let numbers: Vec<f64> = body
                .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
                .filter(|token| !token.is_empty())
                .filter_map(|token| token.parse::<f64>().ok())
                .collect();
            return Some(numbers);
        }
    }
    None
}

fn parse_leading_number(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E'))
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok()
}

/// `I2CData` packet: `(timestamp, payload bytes)`, or `None` for `{}` /
/// missing.
fn i2c_field(desc: &str) -> Option<(f64, Vec<u8>)> {
    for line in desc.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(DATA_NAME) {
            let value = rest.split_once('=')?.1.trim();
            // Empty packet: only braces and whitespace
            if value.chars().all(|c| c == '{' || c == '}' || c.is_whitespace()) {
                return None;
            }

            let inner = value.trim_start_matches('{').trim();
            let timestamp = parse_leading_number(inner)?;

            let payload_text = inner.find('{').map(|open| {
                let rest = &inner[open + 1..];
                rest.split('}').next().unwrap_or("")
            })?;
            let bytes: Vec<u8> = payload_text
                .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
                .filter(|token| !token.is_empty())
                .filter_map(|token| token.parse::<u8>().ok())
                .collect();
            return Some((timestamp, bytes));
        }
    }
    None
}

/// Reinterprets little-endian payload bytes as elements of `T`.
fn decode_payload<T: Pixel>(bytes: &[u8], out: &mut Vec<T>) -> Result<usize> {
    let size = T::KIND.bytes();
    if bytes.len() % size != 0 {
        return Err(Error::InvalidInput(format!(
            "I2C payload of {} byte(s) does not divide into {}-byte elements",
            bytes.len(),
            size
        )));
    }
    for chunk in bytes.chunks_exact(size) {
        let raw = LittleEndian::read_uint(chunk, size).to_le_bytes();
        out.push(bytemuck::pod_read_unaligned(&raw[..size]));
    }
    Ok(bytes.len() / size)
}

/// Extracts the synchronization bundle from per-frame description strings.
///
/// Frames without an I2C packet contribute a NaN timestamp and a zeroed
/// payload; frames whose payload width disagrees with the rest are an error.
pub fn sync_info<T: Pixel + Default>(descriptions: &[&str]) -> Result<SyncInfo<T>> {
    if descriptions.is_empty() {
        return Err(Error::InvalidInput("no frame descriptions provided".into()));
    }

    let acquisition =
        scalar_field(descriptions[0], ACQ_NAME).unwrap_or(f64::NAN);

    let mut epoch = [f64::NAN; 6];
    if let Some(values) = descriptions.iter().find_map(|d| vector_field(d, EPOCH_NAME)) {
        if values.len() != 6 {
            return Err(Error::InvalidInput(format!(
                "epoch must have 6 elements, got {}",
                values.len()
            )));
        }
        epoch.copy_from_slice(&values);
    }

    let mut frame_timestamps = Vec::with_capacity(descriptions.len());
    let mut data_timestamps = Vec::with_capacity(descriptions.len());
    let mut payloads: Vec<Option<Vec<T>>> = Vec::with_capacity(descriptions.len());
    let mut payload_width: Option<usize> = None;

    for (index, desc) in descriptions.iter().enumerate() {
        frame_timestamps.push(scalar_field(desc, TIME_NAME).unwrap_or(f64::NAN));

        match i2c_field(desc) {
            Some((timestamp, bytes)) => {
                let mut elements = Vec::new();
                let width = decode_payload::<T>(&bytes, &mut elements)?;
                match payload_width {
                    Some(expected) if expected != width => {
                        return Err(Error::InvalidInput(format!(
                            "frame {index} carries {width} I2C element(s), other frames \
                             carry {expected}"
                        )));
                    }
                    _ => payload_width = Some(width),
                }
                data_timestamps.push(timestamp);
                payloads.push(Some(elements));
            }
            None => {
                data_timestamps.push(f64::NAN);
                payloads.push(None);
            }
        }
    }

    // Missing packets become zero payloads of the common width
    let width = payload_width.unwrap_or(0);
    let mut data = Vec::with_capacity(width * descriptions.len());
    for payload in payloads {
        match payload {
            Some(elements) => data.extend(elements),
            None => data.extend(std::iter::repeat_with(T::default).take(width)),
        }
    }

    Ok(SyncInfo {
        acquisition,
        epoch,
        frame_timestamps,
        data_timestamps,
        payload_width: width,
        data,
    })
}

/// Saved channel list, if the description carries one.
pub fn channel_list(desc: &str) -> Option<Vec<i32>> {
    vector_field(desc, CHANNELS_NAME)
        .map(|values| values.into_iter().map(|v| v as i32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: &str = "frameNumbers = 1\n\
                         acquisitionNumbers = 3\n\
                         frameTimestamps_sec = 0.000000000\n\
                         epoch = [2017 2 21 14 46 37.336]\n\
                         I2CData = {0.125, {1, 2, 3, 4}}\n";
    const SECOND: &str = "frameNumbers = 2\n\
                          frameTimestamps_sec = 0.033366666\n\
                          I2CData = {}\n";
    const THIRD: &str = "frameNumbers = 3\n\
                         frameTimestamps_sec = 0.066733333\n\
                         I2CData = {0.158, {9, 8, 7, 6}}\n";

    #[test]
    fn test_scalar_and_epoch_extraction() {
        let info = sync_info::<u8>(&[FIRST, SECOND, THIRD]).unwrap();
        assert_eq!(info.acquisition, 3.0);
        assert_eq!(info.epoch[0], 2017.0);
        assert!((info.epoch[5] - 37.336).abs() < 1e-9);
        assert_eq!(info.frame_timestamps.len(), 3);
        assert!((info.frame_timestamps[1] - 0.033366666).abs() < 1e-12);
    }

    #[test]
    fn test_missing_packet_gives_nan_and_zeros() {
        let info = sync_info::<u8>(&[FIRST, SECOND, THIRD]).unwrap();
        assert_eq!(info.payload_width, 4);
        assert!((info.data_timestamps[0] - 0.125).abs() < 1e-12);
        assert!(info.data_timestamps[1].is_nan());
        assert_eq!(&info.data[0..4], &[1, 2, 3, 4]);
        assert_eq!(&info.data[4..8], &[0, 0, 0, 0]);
        assert_eq!(&info.data[8..12], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_payload_reinterpreted_as_wider_type() {
        let info = sync_info::<u16>(&[FIRST, SECOND, THIRD]).unwrap();
        assert_eq!(info.payload_width, 2);
        // Little-endian: {1, 2} → 0x0201, {3, 4} → 0x0403
        assert_eq!(&info.data[0..2], &[0x0201, 0x0403]);
    }

    #[test]
    fn test_inconsistent_payload_width_rejected() {
        let bad = "frameTimestamps_sec = 0.1\nI2CData = {0.2, {5, 5}}\n";
        let err = sync_info::<u8>(&[FIRST, bad]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_indivisible_payload_rejected() {
        let odd = "I2CData = {0.2, {1, 2, 3}}\n";
        assert!(sync_info::<u16>(&[odd]).is_err());
    }

    #[test]
    fn test_channel_list_variants() {
        assert_eq!(
            channel_list("scanimage.SI.hChannels.channelSave = [1;2]"),
            Some(vec![1, 2])
        );
        assert_eq!(
            channel_list("scanimage.SI.hChannels.channelSave = 1"),
            Some(vec![1])
        );
        assert_eq!(channel_list("something.else = [1]"), None);
    }

    #[test]
    fn test_absent_fields_are_nan() {
        let info = sync_info::<u8>(&[SECOND]).unwrap();
        assert!(info.acquisition.is_nan());
        assert!(info.epoch[0].is_nan());
        assert_eq!(info.payload_width, 0);
        assert!(info.data.is_empty());
    }
}
