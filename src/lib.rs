//! Importer for the KDF raw capture format produced by magnetocardiography
//! (MCG) acquisition devices.
//!
//! A KDF file carries a fixed-layout ASCII header followed by one-second
//! frames of packed 3-byte ADC samples, one row per channel plus a trailer
//! row. This crate reconstructs the signed 24-bit samples exactly as the
//! instrument vendor's reference implementation does, removes the circuit
//! pulse artifacts the hardware injects, and applies per-channel gain
//! calibration from the factory tables selected by the header's system gain
//! code.

mod calibration;
mod reader;
pub mod types;

use std::path::Path;

// Re-export types
pub use reader::KdfReader;
pub use types::*;

/// Opens a KDF file and parses its header.
///
/// Channel data is not read until [`KdfReader::read`] is called.
///
/// # Examples
///
/// ```no_run
/// use kdf_importer::open;
///
/// let reader = open("path/to/your/file.kdf")?;
/// println!("Sample rate: {} Hz", reader.header().sample_rate);
///
/// let channel = reader.read(Some(1), None)?;
/// println!("{} calibrated samples", channel.samples.len());
/// # Ok::<(), kdf_importer::KdfError>(())
/// ```
pub fn open<P: AsRef<Path>>(path: P) -> Result<KdfReader, KdfError> {
    reader::open_file(path)
}
