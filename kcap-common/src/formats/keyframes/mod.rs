//! Keyframe tables (VCTM)
//!
//! A keyframe table stores N keys as two parallel blocks: compact time codes
//! and compact per-key component tuples. Both blocks use one of the
//! [`ValueEncoding`]s and are decoded through the shared codec.
//!
//! # Layout
//! ```text
//! 0x00: magic "VCTM"
//! 0x04: entry_count u32 (N)
//! 0x08: coord_start u32
//! 0x0C: entries_start u32
//! 0x10: interpolation u8
//! 0x11: component_count << 4 | value_encoding
//! 0x12: time_scale << 4 | time_encoding
//! 0x13: flags u8
//! 0x14: coord_size u16
//! 0x16: entry_size u16
//! 0x18: reserved f32 × 2
//! entries_start: N × entry_size time codes
//! coord_start:   N × coord_size value tuples
//! ```
//! Both offsets are 4-byte aligned and the table is padded to 4 bytes.

mod header;
mod types;


pub use header::*;
pub use types::*;

use std::borrow::Cow;
use std::sync::OnceLock;

use smallvec::SmallVec;
use tracing::warn;

use super::io::{expect_magic, pad_to, slice_at};
use super::serialization::read_header;
use crate::codec::{align4, decode_value, encode_value, ValueEncoding};
use crate::error::{FormatError, Result};

/// Time codes per second of authoring time when building tables
///
/// One code under [`IMPORT_TIME_SCALE`] is ten engine ticks.
pub const KEYFRAME_CODES_PER_SECOND: f64 = 33.3333;

/// Time scale used for tables built from authoring keys
pub const IMPORT_TIME_SCALE: TimeScale = TimeScale::Every10Frames;

/// Decoded component tuple of one key
pub type Components = SmallVec<[f32; 4]>;

/// One keyframed value track
#[derive(Debug, Clone)]
pub struct KeyframeTable {
    interpolation: InterpolationMode,
    component_count: u8,
    value_encoding: ValueEncoding,
    time_scale: TimeScale,
    time_encoding: TimeEncoding,
    flags: u8,
    reserved: [f32; 2],
    entry_size: u16,
    coord_size: u16,
    times: Vec<u8>,
    values: Vec<u8>,
    decoded_times: OnceLock<Vec<f32>>,
}

impl KeyframeTable {
    /// Encode a table from time codes and flattened component values
    ///
    /// `values` holds `time_codes.len() * component_count` scalars.
    pub fn new(
        interpolation: InterpolationMode,
        time_scale: TimeScale,
        time_encoding: TimeEncoding,
        value_encoding: ValueEncoding,
        component_count: u8,
        time_codes: &[f32],
        values: &[f32],
    ) -> Self {
        debug_assert_eq!(values.len(), time_codes.len() * component_count as usize);

        let entry_size = time_encoding
            .value_encoding()
            .map_or(0, ValueEncoding::byte_width);
        let coord_size = value_encoding.byte_width() * component_count as usize;

        let mut times = Vec::with_capacity(time_codes.len() * entry_size);
        if let Some(encoding) = time_encoding.value_encoding() {
            for &code in time_codes {
                encode_value(code, encoding, &mut times);
            }
        }

        let mut encoded_values = Vec::with_capacity(values.len() * value_encoding.byte_width());
        for &value in values {
            encode_value(value, value_encoding, &mut encoded_values);
        }

        Self {
            interpolation,
            component_count,
            value_encoding,
            time_scale,
            time_encoding,
            flags: 0,
            reserved: [0.0; 2],
            entry_size: entry_size as u16,
            coord_size: coord_size as u16,
            times,
            values: encoded_values,
            decoded_times: OnceLock::new(),
        }
    }

    /// Build a vector track (translation or scale) from authoring keys
    ///
    /// Values are multiplied by `scale`.
    pub fn from_vector_keys(keys: &[VectorKey], ticks_per_second: f64, scale: f32) -> Self {
        let keys = in_time_order(keys, |k| k.time);
        let time_codes = time_codes(keys.iter().map(|k| k.time), ticks_per_second);
        let values: Vec<f32> = keys
            .iter()
            .flat_map(|k| k.value.map(|v| v * scale))
            .collect();
        Self::from_codes(&time_codes, &values, 3)
    }

    /// Build a rotation track from authoring keys
    ///
    /// Each key is negated when it points away from the previously stored
    /// key, so interpolation always takes the short arc.
    pub fn from_quat_keys(keys: &[QuatKey], ticks_per_second: f64) -> Self {
        let keys = in_time_order(keys, |k| k.time);
        let time_codes = time_codes(keys.iter().map(|k| k.time), ticks_per_second);

        let mut values = Vec::with_capacity(keys.len() * 4);
        let mut previous: Option<[f32; 4]> = None;
        for key in keys.iter() {
            let mut q = key.value;
            if let Some(prev) = previous {
                let dot: f32 = prev.iter().zip(q.iter()).map(|(a, b)| a * b).sum();
                if dot < 0.0 {
                    q = q.map(|c| -c);
                }
            }
            values.extend_from_slice(&q);
            previous = Some(q);
        }
        Self::from_codes(&time_codes, &values, 4)
    }

    fn from_codes(time_codes: &[f32], values: &[f32], component_count: u8) -> Self {
        let max_code = time_codes.iter().copied().fold(0.0f32, f32::max);
        Self::new(
            InterpolationMode::for_components(component_count as usize),
            IMPORT_TIME_SCALE,
            TimeEncoding::for_max_code(max_code),
            ValueEncoding::Float16,
            component_count,
            time_codes,
            values,
        )
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Number of keys
    pub fn len(&self) -> usize {
        if self.coord_size == 0 {
            0
        } else {
            self.values.len() / self.coord_size as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn component_count(&self) -> usize {
        self.component_count as usize
    }

    pub fn interpolation(&self) -> InterpolationMode {
        self.interpolation
    }

    pub fn value_encoding(&self) -> ValueEncoding {
        self.value_encoding
    }

    pub fn time_scale(&self) -> TimeScale {
        self.time_scale
    }

    pub fn time_encoding(&self) -> TimeEncoding {
        self.time_encoding
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Decoded and scaled key times, computed once
    pub fn decoded_times(&self) -> &[f32] {
        self.decoded_times.get_or_init(|| {
            let factor = self.time_scale.factor();
            (0..self.len())
                .map(|i| match self.time_encoding.value_encoding() {
                    Some(encoding) => {
                        let start = i * self.entry_size as usize;
                        decode_value(&self.times[start..], encoding) * factor
                    }
                    None => 0.0,
                })
                .collect()
        })
    }

    /// Decoded component tuple of key `entry`
    ///
    /// The stored block is split into `component_count` equal slices no
    /// matter how wide the physical entry is.
    pub fn decoded_components(&self, entry: usize) -> Components {
        let coord_size = self.coord_size as usize;
        let data_size = coord_size / self.component_count.max(1) as usize;
        let block = &self.values[entry * coord_size..(entry + 1) * coord_size];
        block
            .chunks_exact(data_size)
            .take(self.component_count as usize)
            .map(|slice| decode_value(slice, self.value_encoding))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Binary form
    // ------------------------------------------------------------------------

    fn header(&self) -> KeyframeTableHeader {
        let entries_start = KeyframeTableHeader::SIZE;
        let coord_start = align4(entries_start + self.times.len());
        KeyframeTableHeader {
            magic: VCTM_MAGIC,
            entry_count: self.len() as u32,
            coord_start: coord_start as u32,
            entries_start: entries_start as u32,
            interpolation: self.interpolation.ordinal(),
            component_flags: (self.component_count << 4) | self.value_encoding.ordinal(),
            time_flags: (self.time_scale.ordinal() << 4) | self.time_encoding.ordinal(),
            flags: self.flags,
            coord_size: self.coord_size,
            entry_size: self.entry_size,
            reserved: self.reserved,
        }
    }

    /// Serialized size in bytes
    pub fn encoded_size(&self) -> usize {
        KeyframeTableHeader::SIZE + align4(self.times.len()) + align4(self.values.len())
    }

    /// Serialize to the on-disk layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header();
        let mut out = Vec::with_capacity(self.encoded_size());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.times);
        pad_to(&mut out, header.coord_start as usize);
        out.extend_from_slice(&self.values);
        let padded = align4(out.len());
        pad_to(&mut out, padded);
        out
    }

    /// Parse a table from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: KeyframeTableHeader = read_header(bytes)?;
        expect_magic("VCTM", VCTM_MAGIC, header.magic)?;

        let interpolation = InterpolationMode::from_ordinal(header.interpolation).ok_or(
            FormatError::UnknownTag {
                field: "interpolation mode",
                value: header.interpolation as u32,
            },
        )?;
        let value_encoding = ValueEncoding::from_ordinal(header.value_encoding_ordinal()).ok_or(
            FormatError::UnknownTag {
                field: "value encoding",
                value: header.value_encoding_ordinal() as u32,
            },
        )?;
        let time_scale = TimeScale::from_ordinal(header.time_scale_ordinal()).ok_or(
            FormatError::UnknownTag {
                field: "time scale",
                value: header.time_scale_ordinal() as u32,
            },
        )?;
        let time_encoding = TimeEncoding::from_ordinal(header.time_encoding_ordinal()).ok_or(
            FormatError::UnknownTag {
                field: "time encoding",
                value: header.time_encoding_ordinal() as u32,
            },
        )?;

        let component_count = header.component_count();
        if component_count == 0 {
            return Err(FormatError::UnknownTag {
                field: "component count",
                value: 0,
            });
        }
        let needed = value_encoding.byte_width() * component_count as usize;
        if (header.coord_size as usize) < needed {
            return Err(FormatError::Truncated {
                offset: header.coord_start as usize,
                needed,
                available: header.coord_size as usize,
            });
        }
        let time_width = time_encoding.value_encoding().map_or(0, ValueEncoding::byte_width);
        if (header.entry_size as usize) < time_width {
            return Err(FormatError::Truncated {
                offset: header.entries_start as usize,
                needed: time_width,
                available: header.entry_size as usize,
            });
        }

        if header.coord_start % 4 != 0 || header.entries_start % 4 != 0 {
            warn!(
                "VCTM block offsets are not 4-byte aligned (times {:#X}, values {:#X})",
                header.entries_start, header.coord_start
            );
        }

        let times = slice_at(bytes, header.entries_start as usize, header.times_size())?;
        let values = slice_at(bytes, header.coord_start as usize, header.values_size())?;

        let end = align4(
            (header.entries_start as usize + header.times_size())
                .max(header.coord_start as usize + header.values_size()),
        );
        if end != bytes.len() {
            warn!(
                "VCTM spans {:#X} bytes but {:#X} were advertised",
                end,
                bytes.len()
            );
        }

        Ok(Self {
            interpolation,
            component_count,
            value_encoding,
            time_scale,
            time_encoding,
            flags: header.flags,
            reserved: header.reserved,
            entry_size: header.entry_size,
            coord_size: header.coord_size,
            times: times.to_vec(),
            values: values.to_vec(),
            decoded_times: OnceLock::new(),
        })
    }
}

/// Keys sorted by time; out-of-order input is sorted stably with a warning
fn in_time_order<K: Clone>(keys: &[K], time: impl Fn(&K) -> f64) -> Cow<'_, [K]> {
    if keys.windows(2).all(|pair| time(&pair[0]) <= time(&pair[1])) {
        return Cow::Borrowed(keys);
    }
    warn!("{} keyframes are not in time order, sorting them", keys.len());
    let mut sorted = keys.to_vec();
    sorted.sort_by(|a, b| time(a).total_cmp(&time(b)));
    Cow::Owned(sorted)
}

/// Convert authoring times to time codes starting at zero
fn time_codes(times: impl Iterator<Item = f64>, ticks_per_second: f64) -> Vec<f32> {
    let times: Vec<f64> = times.collect();
    let first = times.first().copied().unwrap_or(0.0);
    times
        .into_iter()
        .map(|t| ((t - first) / ticks_per_second * KEYFRAME_CODES_PER_SECOND).round() as f32)
        .collect()
}
