use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDate;
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::calibration::{resolve_gains, ADC_FULL_SCALE};
use crate::types::*;

// Constants used throughout the reader
const BYTES_PER_SAMPLE: usize = 3;
const SIGNED_24_BIT_MAX: i32 = 8_388_607;
const TWO_POW_24: i32 = 16_777_216;
const SPIKE_THRESHOLD_RATIO: i64 = 100;
const READ_BUFFER_BYTES: usize = 65536;

/// Handle to an opened KDF file.
///
/// Holds the parsed header and the active-channel table. Each call to
/// [`read`](Self::read) opens the file again, streams the data region
/// sequentially, and releases the handle before returning, so a reader can
/// serve any number of channel requests and is safe to share across threads
/// behind a reference.
#[derive(Debug, Clone)]
pub struct KdfReader {
    path: PathBuf,
    header: KdfHeader,
    channels: ChannelTable,
}

/// Opens a KDF file, parses its header, and builds the channel table.
///
/// The file handle used for header parsing is dropped before this function
/// returns; no data samples are read until a channel is requested.
pub fn open_file<P: AsRef<Path>>(path: P) -> Result<KdfReader, KdfError> {
    let path = path.as_ref();
    check_extension(path)?;

    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);
    let header = read_header(&mut reader)?;
    let channels = build_channel_table(&header.labels)?;

    debug!(
        "opened {}: {} usable channels, {} Hz, system gain code {}",
        path.display(),
        header.usable_channels(),
        header.sample_rate,
        header.system_gain
    );

    Ok(KdfReader {
        path: path.to_path_buf(),
        header,
        channels,
    })
}

impl KdfReader {
    /// The parsed file header.
    pub fn header(&self) -> &KdfHeader {
        &self.header
    }

    /// The active-channel table derived from the header's label block.
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// Decodes one channel, selected by number or by label.
    ///
    /// Exactly one of `number` and `label` must be given; supplying both is
    /// ambiguous and supplying neither is an error. Returns the calibrated
    /// samples together with the header metadata a downstream time-series
    /// consumer needs.
    pub fn read(&self, number: Option<u32>, label: Option<&str>) -> Result<DecodedChannel, KdfError> {
        self.read_decimated(number, label, 1)
    }

    /// Like [`read`](Self::read), but keeps only every `factor`-th sample of
    /// each one-second window. The factor must evenly divide the sample rate.
    pub fn read_decimated(
        &self,
        number: Option<u32>,
        label: Option<&str>,
        factor: usize,
    ) -> Result<DecodedChannel, KdfError> {
        let index = self.resolve_index(number, label)?;
        let (samples, duration) = self.decode_channel(index, factor)?;

        let metadata = ChannelMetadata {
            device_id: self.header.device_id.clone(),
            subject_info: self.header.subject_info.clone(),
            datetime: self.header.datetime.clone(),
            t0: self.header.t0,
            duration,
            number: self.channels.numbers()[index],
            label: self.channels.labels()[index].clone(),
            sample_rate: self.header.sample_rate,
        };

        Ok(DecodedChannel {
            samples: samples.into(),
            metadata,
        })
    }

    /// Maps a channel selection onto a frame row index.
    fn resolve_index(&self, number: Option<u32>, label: Option<&str>) -> Result<usize, KdfError> {
        match (number, label) {
            (Some(number), None) => self
                .channels
                .index_of_number(number)
                .ok_or_else(|| KdfError::UnknownChannel(number.to_string())),
            (None, Some(label)) => self
                .channels
                .index_of_label(label)
                .ok_or_else(|| KdfError::UnknownChannel(label.to_string())),
            (Some(_), Some(_)) => Err(KdfError::AmbiguousChannelRequest),
            (None, None) => Err(KdfError::MissingChannelRequest),
        }
    }

    /// Streams the data region and decodes a single frame row.
    ///
    /// The number of seconds comes from the file size, never from the
    /// header's declared duration, which is unreliable in captures seen in
    /// the field. Trailing bytes short of a full frame are discarded.
    fn decode_channel(&self, index: usize, factor: usize) -> Result<(Vec<f64>, u64), KdfError> {
        let header = &self.header;
        let rate = header.sample_rate as usize;
        if factor == 0 || rate % factor != 0 {
            return Err(KdfError::InvalidDecimation {
                sample_rate: header.sample_rate,
                factor,
            });
        }

        let gains = resolve_gains(
            header.system_gain,
            &header.minimum_range,
            &header.maximum_range,
            header.usable_channels(),
        )?;
        let scale = gains[index] / ADC_FULL_SCALE;

        let file = File::open(&self.path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);
        reader.seek(SeekFrom::Start(header.header_bytes))?;

        let frame_bytes = header.frame_bytes();
        let data_bytes = file_size.saturating_sub(header.header_bytes);
        let seconds = data_bytes / frame_bytes;
        let leftover = data_bytes % frame_bytes;
        if leftover != 0 {
            debug!("discarding {} trailing bytes short of a full frame", leftover);
        }
        debug!("decoding {} seconds of data for frame row {}", seconds, index);

        let row_bytes = BYTES_PER_SAMPLE * rate;
        let mut frame = vec![0u8; frame_bytes as usize];
        let mut samples = Vec::with_capacity(seconds as usize * (rate / factor));

        for second in 0..seconds {
            let offset = header.header_bytes + second * frame_bytes;
            reader.read_exact(&mut frame).map_err(|err| {
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    KdfError::Truncated {
                        offset,
                        needed: frame_bytes,
                        available: file_size.saturating_sub(offset),
                    }
                } else {
                    KdfError::Io(err)
                }
            })?;

            let row = &frame[index * row_bytes..(index + 1) * row_bytes];
            let mut window = decode_row(row);
            remove_circuit_pulse_noise(&mut window);
            let window = decimate(&window, header.sample_rate, factor)?;
            samples.extend(window.iter().map(|&v| f64::from(v) * scale));
        }

        Ok((samples, seconds))
    }
}

/// Rejects paths that do not carry the raw-capture extension.
fn check_extension(path: &Path) -> Result<(), KdfError> {
    let ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("kdf"))
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(KdfError::UnrecognizedFileFormat)
    }
}

/// Reads the fixed-layout header from a KDF file.
///
/// Every field is fixed-width space-padded ASCII in a strict order. The
/// declared header length must match the byte offset actually consumed once
/// the last field has been read.
fn read_header<R: Read>(reader: &mut R) -> Result<KdfHeader, KdfError> {
    let mut fields = FieldReader::new(reader);

    // The first byte of the identifier block is a non-printable format code;
    // the remaining seven bytes are the device string.
    let id_block = fields.read_bytes(8, "device id")?;
    let device_id = ascii_trimmed(&id_block[1..], "device id")?;

    let subject_info = fields.read_str(80, "subject info")?;
    let recording_info = fields.read_str(80, "recording info")?;
    let system_gain = parse_system_gain(&recording_info)?;

    let date = fields.read_str(8, "recording date")?;
    let time = fields.read_str(8, "recording time")?;
    let (datetime, t0) = resolve_timestamp(&date, &time)?;

    let header_bytes = fields.read_u64(8, "header length")?;
    let data_format = fields.read_str(44, "data format")?;
    let record_count = fields.read_i64(8, "record count")?;
    let declared_duration = fields.read_i64(8, "duration")?;

    let channel_count = fields.read_u64(4, "channel count")? as usize;
    if channel_count < 2 {
        return Err(KdfError::Format {
            field: "channel count",
            reason: format!(
                "{} channels declared, but every capture carries at least one channel plus the trailer row",
                channel_count
            ),
        });
    }

    let labels = fields.read_string_block(16, channel_count, "channel labels")?;
    let coil_types = fields.read_string_block(40, channel_count, "coil types")?;
    let units = fields.read_string_block(8, channel_count, "units")?;
    let minimum_range = fields.read_numeric_block(8, channel_count, "minimum range")?;
    let maximum_range = fields.read_numeric_block(8, channel_count, "maximum range")?;
    let digital_minimum = fields.read_numeric_block(8, channel_count, "digital minimum")?;
    let digital_maximum = fields.read_numeric_block(8, channel_count, "digital maximum")?;

    let prefiltering = fields.read_str(80, "prefiltering")?;
    let sample_rate = fields.read_u64(8, "sample rate")?;
    if sample_rate == 0 {
        return Err(KdfError::Format {
            field: "sample rate",
            reason: "sample rate must be positive".to_string(),
        });
    }

    if fields.offset() != header_bytes {
        return Err(KdfError::Format {
            field: "header length",
            reason: format!(
                "declared {} bytes but {} were consumed by the header fields",
                header_bytes,
                fields.offset()
            ),
        });
    }

    Ok(KdfHeader {
        device_id,
        subject_info,
        recording_info,
        system_gain,
        date,
        time,
        datetime,
        t0,
        header_bytes,
        data_format,
        record_count,
        declared_duration,
        channel_count,
        labels,
        coil_types,
        units,
        minimum_range,
        maximum_range,
        digital_minimum,
        digital_maximum,
        prefiltering,
        sample_rate: sample_rate as u32,
    })
}

/// Extracts the system gain code from the recording-info field.
///
/// The code is the fifth whitespace-separated token when present. A missing
/// token selects code 3, which in turn selects a calibration table, so the
/// default is part of the format contract.
fn parse_system_gain(recording_info: &str) -> Result<i64, KdfError> {
    match recording_info.split_whitespace().nth(4) {
        Some(token) => token.parse::<i64>().map_err(|_| KdfError::Format {
            field: "recording info",
            reason: format!("system gain token '{}' is not an integer", token),
        }),
        None => Ok(3),
    }
}

/// Converts the header's `DD.MM.YY` and `hh.mm.ss` fields into a datetime
/// string and an epoch timestamp. Two-digit years belong to the 2000s.
fn resolve_timestamp(date: &str, time: &str) -> Result<(String, i64), KdfError> {
    let [day, month, year] = parse_dotted_triple(date, "recording date")?;
    let [hour, minute, second] = parse_dotted_triple(time, "recording time")?;
    let year = 2000 + year as i32;

    let timestamp = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| KdfError::Format {
            field: "recording date",
            reason: format!("'{}' '{}' is not a valid date and time", date, time),
        })?;

    let datetime = format!("{}-{}-{} {}:{}:{}", year, month, day, hour, minute, second);
    Ok((datetime, timestamp.and_utc().timestamp()))
}

fn parse_dotted_triple(text: &str, field: &'static str) -> Result<[u32; 3], KdfError> {
    let mut parts = [0u32; 3];
    let tokens: Vec<&str> = text.split('.').collect();
    if tokens.len() != 3 {
        return Err(KdfError::Format {
            field,
            reason: format!("'{}' does not have three dot-separated tokens", text),
        });
    }
    for (slot, token) in parts.iter_mut().zip(&tokens) {
        *slot = token.trim().parse::<u32>().map_err(|_| KdfError::Format {
            field,
            reason: format!("token '{}' is not a number", token),
        })?;
    }
    Ok(parts)
}

/// Builds the active-channel table from the usable header labels.
fn build_channel_table(labels: &[String]) -> Result<ChannelTable, KdfError> {
    let mut numbers = Vec::with_capacity(labels.len());
    let mut axis_labels = Vec::with_capacity(labels.len());

    for raw in labels {
        let (number, label) = parse_axis_label(raw).ok_or_else(|| KdfError::Format {
            field: "channel labels",
            reason: format!("label '{}' does not follow the axis convention", raw),
        })?;
        numbers.push(number);
        axis_labels.push(label);
    }

    Ok(ChannelTable::new(numbers, axis_labels))
}

/// Splits an axis label such as `12X3` or `7Y1` into the one-based channel
/// number and the axis-prefixed label (`X3`, `Y1`).
fn parse_axis_label(raw: &str) -> Option<(u32, String)> {
    for axis in ['X', 'Y'] {
        if let Some((prefix, suffix)) = raw.split_once(axis) {
            if let Ok(sensor) = prefix.parse::<u32>() {
                return Some((sensor + 1, format!("{}{}", axis, suffix)));
            }
        }
    }
    None
}

/// Decodes one frame row of packed 3-byte samples.
fn decode_row(row: &[u8]) -> Vec<i32> {
    row.chunks_exact(BYTES_PER_SAMPLE)
        .map(reconstruct_sample)
        .collect()
}

/// Reconstructs one signed sample from its packed 3-byte form.
///
/// The layout is a 16-bit little-endian pair with the third byte forming the
/// high byte of the 24-bit value; raw values with bit 23 set wrap to
/// negative two's-complement.
fn reconstruct_sample(chunk: &[u8]) -> i32 {
    let raw = LittleEndian::read_u24(chunk) as i32;
    if raw > SIGNED_24_BIT_MAX {
        raw - TWO_POW_24
    } else {
        raw
    }
}

/// Removes circuit pulse noise from a one-second sample window, in place.
///
/// The acquisition hardware occasionally injects a narrow high-amplitude
/// pulse. Each iteration locates the largest absolute value and, when it
/// exceeds 100 times the magnitude of its right neighbor, overwrites it with
/// that neighbor. The window's integer median is appended as a sentinel so
/// the final element always has a right neighbor; the loop re-scans the full
/// window each time, which lets successive iterations repair adjacent
/// pulses. Converges within `len + 1` iterations and is idempotent once no
/// element exceeds the threshold.
pub(crate) fn remove_circuit_pulse_noise(window: &mut Vec<i32>) {
    let length = window.len();
    if length == 0 {
        return;
    }
    window.push(integer_median(window));

    for _ in 0..=length {
        let mut max_index = 0;
        for (i, &value) in window.iter().enumerate() {
            if (i64::from(value)).abs() > (i64::from(window[max_index])).abs() {
                max_index = i;
            }
        }
        // The sentinel median can only tie the maximum, never exceed it, so
        // this bound is a safeguard rather than an expected path.
        if max_index + 1 == window.len() {
            break;
        }
        let threshold = (i64::from(window[max_index + 1])).abs() * SPIKE_THRESHOLD_RATIO;
        if (i64::from(window[max_index])).abs() > threshold {
            window[max_index] = window[max_index + 1];
        } else {
            break;
        }
    }

    window.truncate(length);
}

/// Median of the window, truncated to the integer domain. An even-length
/// window takes the mean of the two middle values, truncated toward zero.
fn integer_median(values: &[i32]) -> i32 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        ((f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0) as i32
    }
}

/// Keeps the first sample of each group of `factor` consecutive samples.
pub(crate) fn decimate(
    window: &[i32],
    sample_rate: u32,
    factor: usize,
) -> Result<Vec<i32>, KdfError> {
    if factor == 0 || sample_rate as usize % factor != 0 {
        return Err(KdfError::InvalidDecimation {
            sample_rate,
            factor,
        });
    }
    Ok(window.iter().copied().step_by(factor).collect())
}

/// Fixed-width ASCII field reader that tracks the byte offset consumed,
/// so the declared header length can be validated afterwards.
struct FieldReader<'a, R: Read> {
    inner: &'a mut R,
    offset: u64,
}

impl<'a, R: Read> FieldReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        FieldReader { inner, offset: 0 }
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn read_bytes(&mut self, len: usize, field: &'static str) -> Result<Vec<u8>, KdfError> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                KdfError::Format {
                    field,
                    reason: "file ended inside the header".to_string(),
                }
            } else {
                KdfError::Io(err)
            }
        })?;
        self.offset += len as u64;
        Ok(buf)
    }

    fn read_str(&mut self, len: usize, field: &'static str) -> Result<String, KdfError> {
        let buf = self.read_bytes(len, field)?;
        ascii_trimmed(&buf, field)
    }

    fn read_i64(&mut self, len: usize, field: &'static str) -> Result<i64, KdfError> {
        let text = self.read_str(len, field)?;
        text.parse::<i64>().map_err(|_| KdfError::Format {
            field,
            reason: format!("'{}' is not a decimal integer", text),
        })
    }

    fn read_u64(&mut self, len: usize, field: &'static str) -> Result<u64, KdfError> {
        let text = self.read_str(len, field)?;
        text.parse::<u64>().map_err(|_| KdfError::Format {
            field,
            reason: format!("'{}' is not an unsigned decimal integer", text),
        })
    }

    /// Reads a block of `count` fixed-width text entries and returns the
    /// usable `count - 1`; the final entry is the trailer row.
    fn read_string_block(
        &mut self,
        width: usize,
        count: usize,
        field: &'static str,
    ) -> Result<Vec<String>, KdfError> {
        let buf = self.read_bytes(width * count, field)?;
        (0..count - 1)
            .map(|i| ascii_trimmed(&buf[i * width..(i + 1) * width], field))
            .collect()
    }

    /// Reads a block of `count` fixed-width numeric entries and returns the
    /// usable `count - 1`; the final entry is the trailer row.
    fn read_numeric_block(
        &mut self,
        width: usize,
        count: usize,
        field: &'static str,
    ) -> Result<Vec<f64>, KdfError> {
        let buf = self.read_bytes(width * count, field)?;
        (0..count - 1)
            .map(|i| {
                let text = ascii_trimmed(&buf[i * width..(i + 1) * width], field)?;
                text.parse::<f64>().map_err(|_| KdfError::Format {
                    field,
                    reason: format!("entry {} ('{}') is not a number", i, text),
                })
            })
            .collect()
    }
}

fn ascii_trimmed(bytes: &[u8], field: &'static str) -> Result<String, KdfError> {
    if !bytes.is_ascii() {
        return Err(KdfError::Format {
            field,
            reason: "field contains non-ASCII bytes".to_string(),
        });
    }
    Ok(String::from_utf8_lossy(bytes).trim().to_string())
}
