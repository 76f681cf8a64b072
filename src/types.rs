use ndarray::Array1;
use std::io;
use thiserror::Error;

/// Header information from a KDF file.
///
/// Contains every fixed-width field of the raw capture header. The header is
/// parsed once when the file is opened and is read-only afterward.
///
/// Every per-channel block in the file declares `channel_count` entries, but
/// the final entry of each block belongs to the trailer row and carries no
/// channel data. The vectors below therefore hold `channel_count - 1` usable
/// entries; this convention is validated at parse time.
#[derive(Debug, Clone)]
pub struct KdfHeader {
    /// Device identifier string from the first header field
    pub device_id: String,
    /// Free-text subject information
    pub subject_info: String,
    /// Free-text recording information
    pub recording_info: String,
    /// Calibration scheme selector embedded in `recording_info`.
    /// Defaults to 3 when the recording-info field carries fewer than
    /// five tokens; the default silently selects a calibration table,
    /// so it must not be changed.
    pub system_gain: i64,
    /// Recording date as written in the header (`DD.MM.YY`)
    pub date: String,
    /// Recording time as written in the header (`hh.mm.ss`)
    pub time: String,
    /// Recording start as a datetime string (`YYYY-M-D h:m:s`)
    pub datetime: String,
    /// Recording start as epoch seconds (UTC)
    pub t0: i64,
    /// Declared header size in bytes
    pub header_bytes: u64,
    /// Data-format descriptor (e.g. "24BIT")
    pub data_format: String,
    /// Declared number of data records; -1 means unknown
    pub record_count: i64,
    /// Declared duration in seconds; unreliable, not used for decoding
    pub declared_duration: i64,
    /// Number of channel rows in each frame, including the trailer row
    pub channel_count: usize,
    /// Per-channel labels (trailer row excluded)
    pub labels: Vec<String>,
    /// Per-channel coil type descriptions (trailer row excluded)
    pub coil_types: Vec<String>,
    /// Per-channel physical units (trailer row excluded)
    pub units: Vec<String>,
    /// Per-channel analog minimum range (trailer row excluded)
    pub minimum_range: Vec<f64>,
    /// Per-channel analog maximum range (trailer row excluded)
    pub maximum_range: Vec<f64>,
    /// Per-channel digital minimum (trailer row excluded)
    pub digital_minimum: Vec<f64>,
    /// Per-channel digital maximum (trailer row excluded)
    pub digital_maximum: Vec<f64>,
    /// Prefiltering description
    pub prefiltering: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl KdfHeader {
    /// Number of usable channels (the trailer row excluded).
    pub fn usable_channels(&self) -> usize {
        self.channel_count - 1
    }

    /// Size in bytes of one second of packed data across all channels.
    pub fn frame_bytes(&self) -> u64 {
        3 * self.channel_count as u64 * self.sample_rate as u64
    }
}

/// Ordered active-channel lookup derived from the header's label block.
///
/// Labels in a KDF file follow the axis convention `<n>X<m>` or `<n>Y<m>`:
/// the numeric prefix is the zero-based sensor index and the remainder is
/// the axis label. The table maps between caller-facing channel numbers or
/// labels and the row index inside each frame.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    numbers: Vec<u32>,
    labels: Vec<String>,
}

impl ChannelTable {
    pub(crate) fn new(numbers: Vec<u32>, labels: Vec<String>) -> Self {
        ChannelTable { numbers, labels }
    }

    /// Active channel numbers, in frame-row order.
    pub fn numbers(&self) -> &[u32] {
        &self.numbers
    }

    /// Active channel labels, indexed consistently with [`numbers`](Self::numbers).
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of active channels.
    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub(crate) fn index_of_number(&self, number: u32) -> Option<usize> {
        self.numbers.iter().position(|&n| n == number)
    }

    pub(crate) fn index_of_label(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }
}

/// Metadata accompanying a decoded channel.
///
/// These are the header facts a downstream time-series consumer needs to
/// interpret the samples; the decoder keeps no reference to them after
/// returning.
#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    /// Device identifier from the header
    pub device_id: String,
    /// Free-text subject information
    pub subject_info: String,
    /// Recording start as a datetime string
    pub datetime: String,
    /// Recording start as epoch seconds (UTC)
    pub t0: i64,
    /// Decoded duration in whole seconds
    pub duration: u64,
    /// Channel number
    pub number: u32,
    /// Channel label
    pub label: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// A single decoded channel: calibrated samples plus their metadata.
///
/// This is the sole product of a [`KdfReader::read`](crate::KdfReader::read)
/// call and is owned entirely by the caller.
#[derive(Debug, Clone)]
pub struct DecodedChannel {
    /// Physically-calibrated samples, one per output tick
    pub samples: Array1<f64>,
    /// Header-derived metadata for this channel
    pub metadata: ChannelMetadata,
}

impl DecodedChannel {
    /// Number of output samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Error conditions raised while reading a KDF file.
#[derive(Debug, Error)]
pub enum KdfError {
    /// The path does not carry the `.kdf` extension
    #[error("illegal file format: expected a .kdf file")]
    UnrecognizedFileFormat,

    /// A header field failed to parse per its fixed-width contract
    #[error("malformed header field '{field}': {reason}")]
    Format {
        /// Name of the offending header field
        field: &'static str,
        /// What went wrong while parsing it
        reason: String,
    },

    /// The data region ended before a promised frame could be read
    #[error(
        "truncated data at byte offset {offset}: frame needs {needed} bytes, {available} remain"
    )]
    Truncated {
        /// Byte offset of the frame that could not be completed
        offset: u64,
        /// Bytes required for the frame
        needed: u64,
        /// Bytes actually available
        available: u64,
    },

    /// The requested channel number or label is not in the recording
    #[error("channel {0} did not exist in the given KDF file")]
    UnknownChannel(String),

    /// Both a channel number and a label were supplied
    #[error("read takes a channel number or a label, but both were given")]
    AmbiguousChannelRequest,

    /// Neither a channel number nor a label was supplied
    #[error("read requires a channel number or a label")]
    MissingChannelRequest,

    /// The decimation factor does not evenly divide the sample rate
    #[error("decimation factor {factor} does not divide sample rate {sample_rate}")]
    InvalidDecimation {
        /// Sample rate of the recording in Hz
        sample_rate: u32,
        /// Requested decimation factor
        factor: usize,
    },

    /// An I/O error occurred during file reading
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
