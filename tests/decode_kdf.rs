//! Integration tests decoding synthetic KDF captures written to disk.

use std::fs;
use std::path::PathBuf;

use kdf_importer::{open, KdfError};
use tempfile::TempDir;

// First entries of the factory calibration tables, used to check the
// applied per-channel multiplier end to end.
const TABLE2_CH0: f64 = 1.140000000000;
const TABLE3_CH0: f64 = 1.314415646676;
const ADC_FULL_SCALE: f64 = 838_860.8;

fn field(buf: &mut Vec<u8>, text: &str, width: usize) {
    assert!(
        text.len() <= width,
        "field '{}' does not fit in {} bytes",
        text,
        width
    );
    buf.extend_from_slice(text.as_bytes());
    buf.resize(buf.len() + (width - text.len()), b' ');
}

/// Writes a fixed-layout KDF header for `channel_count` rows (the last row
/// being the trailer). `declared_header` overrides the header-length field
/// to exercise the consistency check.
fn synth_header(
    channel_count: usize,
    sample_rate: u32,
    system_gain: i64,
    declared_seconds: i64,
    declared_header: Option<u64>,
) -> Vec<u8> {
    let header_bytes = declared_header.unwrap_or((344 + 96 * channel_count) as u64);
    let mut buf = Vec::new();

    buf.push(b' '); // format code byte
    field(&mut buf, "MCG128", 7);
    field(&mut buf, "synthetic subject", 80);
    field(
        &mut buf,
        &format!("Hospital lab MCG system {}", system_gain),
        80,
    );
    field(&mut buf, "14.03.22", 8);
    field(&mut buf, "09.26.53", 8);
    field(&mut buf, &header_bytes.to_string(), 8);
    field(&mut buf, "24BIT", 44);
    field(&mut buf, &declared_seconds.to_string(), 8);
    field(&mut buf, &declared_seconds.to_string(), 8);
    field(&mut buf, &channel_count.to_string(), 4);

    for ch in 0..channel_count - 1 {
        field(&mut buf, &format!("{}X{}", ch, ch + 1), 16);
    }
    field(&mut buf, "TRG", 16);
    for _ in 0..channel_count {
        field(&mut buf, "MAGNETOMETER", 40);
    }
    for _ in 0..channel_count {
        field(&mut buf, "pT", 8);
    }
    for _ in 0..channel_count {
        field(&mut buf, "-2000", 8);
    }
    for _ in 0..channel_count {
        field(&mut buf, "2000", 8);
    }
    for _ in 0..channel_count {
        field(&mut buf, "-8388608", 8);
    }
    for _ in 0..channel_count {
        field(&mut buf, "8388607", 8);
    }
    field(&mut buf, "HP:0.1Hz LP:100Hz", 80);
    field(&mut buf, &sample_rate.to_string(), 8);

    buf
}

fn pack(value: i32) -> [u8; 3] {
    let v = (value as u32) & 0x00ff_ffff;
    [v as u8, (v >> 8) as u8, (v >> 16) as u8]
}

/// One second of data: every usable channel holds `value`, the trailer row
/// holds zeros.
fn constant_frame(channel_count: usize, sample_rate: u32, value: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    for row in 0..channel_count {
        let sample = if row == channel_count - 1 { 0 } else { value };
        for _ in 0..sample_rate {
            buf.extend_from_slice(&pack(sample));
        }
    }
    buf
}

/// One second of data with explicit samples per usable channel row.
fn frame_from_rows(rows: &[&[i32]], channel_count: usize, sample_rate: u32) -> Vec<u8> {
    assert_eq!(rows.len(), channel_count - 1);
    let mut buf = Vec::new();
    for row in rows {
        assert_eq!(row.len(), sample_rate as usize);
        for &sample in *row {
            buf.extend_from_slice(&pack(sample));
        }
    }
    for _ in 0..sample_rate {
        buf.extend_from_slice(&pack(0));
    }
    buf
}

fn write_capture(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn constant_capture(seconds: usize, value: i32, system_gain: i64) -> Vec<u8> {
    let mut bytes = synth_header(2, 4, system_gain, seconds as i64, None);
    for _ in 0..seconds {
        bytes.extend_from_slice(&constant_frame(2, 4, value));
    }
    bytes
}

#[test]
fn constant_capture_decodes_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "constant.kdf", &constant_capture(4, 1000, 3));

    let reader = open(&path).unwrap();
    assert_eq!(reader.header().usable_channels(), 1);
    assert_eq!(reader.header().sample_rate, 4);
    assert_eq!(reader.channels().numbers(), &[1]);
    assert_eq!(reader.channels().labels(), &["X1".to_string()]);

    let channel = reader.read(Some(1), None).unwrap();
    assert_eq!(channel.samples.len(), 16);

    let expected = 1000.0 * TABLE3_CH0 * 1e6 / ADC_FULL_SCALE;
    for &sample in channel.samples.iter() {
        assert!((sample - expected).abs() < 1e-6, "{} != {}", sample, expected);
    }

    let meta = &channel.metadata;
    assert_eq!(meta.device_id, "MCG128");
    assert_eq!(meta.subject_info, "synthetic subject");
    assert_eq!(meta.datetime, "2022-3-14 9:26:53");
    assert_eq!(meta.t0, 1_647_250_013);
    assert_eq!(meta.duration, 4);
    assert_eq!(meta.number, 1);
    assert_eq!(meta.label, "X1");
    assert_eq!(meta.sample_rate, 4);
}

#[test]
fn selection_by_label_matches_selection_by_number() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "constant.kdf", &constant_capture(2, 77, 3));

    let reader = open(&path).unwrap();
    let by_number = reader.read(Some(1), None).unwrap();
    let by_label = reader.read(None, Some("X1")).unwrap();
    assert_eq!(by_number.samples, by_label.samples);
    assert_eq!(by_number.metadata.number, by_label.metadata.number);
}

#[test]
fn gain_code_two_applies_the_other_table() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "gain2.kdf", &constant_capture(1, 1, 2));

    let channel = open(&path).unwrap().read(Some(1), None).unwrap();
    let expected = TABLE2_CH0 * 1e6 / ADC_FULL_SCALE;
    for &sample in channel.samples.iter() {
        assert!((sample - expected).abs() < 1e-9);
    }
}

#[test]
fn unknown_gain_code_falls_back_to_analog_range() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "gain1.kdf", &constant_capture(1, 1, 1));

    let channel = open(&path).unwrap().read(Some(1), None).unwrap();
    // (2000 - (-2000)) * 0.5 * 1000 = 2e6
    let expected = 2e6 / ADC_FULL_SCALE;
    for &sample in channel.samples.iter() {
        assert!((sample - expected).abs() < 1e-9);
    }
}

#[test]
fn trailing_partial_second_is_discarded() {
    let dir = TempDir::new().unwrap();
    let mut bytes = constant_capture(4, 1000, 3);
    bytes.extend_from_slice(&[0xab; 7]); // short of the 24-byte frame
    let path = write_capture(&dir, "partial.kdf", &bytes);

    let channel = open(&path).unwrap().read(Some(1), None).unwrap();
    assert_eq!(channel.samples.len(), 16);
    assert_eq!(channel.metadata.duration, 4);
}

#[test]
fn header_only_capture_yields_no_samples() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "empty.kdf", &synth_header(2, 4, 3, -1, None));

    let channel = open(&path).unwrap().read(Some(1), None).unwrap();
    assert!(channel.samples.is_empty());
    assert_eq!(channel.metadata.duration, 0);
}

#[test]
fn decimation_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "constant.kdf", &constant_capture(4, 500, 3));
    let reader = open(&path).unwrap();

    let halved = reader.read_decimated(Some(1), None, 2).unwrap();
    assert_eq!(halved.samples.len(), 8);

    let full = reader.read(Some(1), None).unwrap();
    assert_eq!(full.samples[0], halved.samples[0]);

    assert!(matches!(
        reader.read_decimated(Some(1), None, 3),
        Err(KdfError::InvalidDecimation { sample_rate: 4, factor: 3 })
    ));
}

#[test]
fn circuit_pulse_is_removed_before_calibration() {
    let dir = TempDir::new().unwrap();
    let mut bytes = synth_header(2, 4, 3, 1, None);
    bytes.extend_from_slice(&frame_from_rows(&[&[10, 2_000_000, 12, 11]], 2, 4));
    let path = write_capture(&dir, "spike.kdf", &bytes);

    let channel = open(&path).unwrap().read(Some(1), None).unwrap();
    let scale = TABLE3_CH0 * 1e6 / ADC_FULL_SCALE;
    let expected = [10.0, 12.0, 12.0, 11.0];
    for (sample, raw) in channel.samples.iter().zip(expected) {
        assert!((sample - raw * scale).abs() < 1e-6);
    }
}

#[test]
fn negative_samples_survive_the_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut bytes = synth_header(2, 4, 3, 1, None);
    bytes.extend_from_slice(&frame_from_rows(&[&[-40, -41, -39, -38]], 2, 4));
    let path = write_capture(&dir, "negative.kdf", &bytes);

    let channel = open(&path).unwrap().read(Some(1), None).unwrap();
    let scale = TABLE3_CH0 * 1e6 / ADC_FULL_SCALE;
    let expected = [-40.0, -41.0, -39.0, -38.0];
    for (sample, raw) in channel.samples.iter().zip(expected) {
        assert!((sample - raw * scale).abs() < 1e-6);
    }
}

#[test]
fn channel_selection_errors() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "constant.kdf", &constant_capture(1, 1, 3));
    let reader = open(&path).unwrap();

    assert!(matches!(
        reader.read(Some(1), Some("X1")),
        Err(KdfError::AmbiguousChannelRequest)
    ));
    assert!(matches!(
        reader.read(None, None),
        Err(KdfError::MissingChannelRequest)
    ));
    assert!(matches!(
        reader.read(Some(99), None),
        Err(KdfError::UnknownChannel(_))
    ));
    assert!(matches!(
        reader.read(None, Some("Y9")),
        Err(KdfError::UnknownChannel(_))
    ));
}

#[test]
fn header_length_mismatch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let actual = (344 + 96 * 2) as u64;
    let bytes = synth_header(2, 4, 3, 0, Some(actual + 1));
    let path = write_capture(&dir, "mismatch.kdf", &bytes);

    assert!(matches!(
        open(&path),
        Err(KdfError::Format { field: "header length", .. })
    ));
}

#[test]
fn wrong_extension_is_rejected_before_reading() {
    let dir = TempDir::new().unwrap();
    let path = write_capture(&dir, "capture.txt", &constant_capture(1, 1, 3));

    assert!(matches!(open(&path), Err(KdfError::UnrecognizedFileFormat)));
}

#[test]
fn truncated_header_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let bytes = synth_header(2, 4, 3, 0, None);
    let path = write_capture(&dir, "short.kdf", &bytes[..200]);

    assert!(matches!(open(&path), Err(KdfError::Format { .. })));
}
