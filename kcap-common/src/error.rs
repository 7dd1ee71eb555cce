//! Error types for KCAP table parsing and reconstruction

use thiserror::Error;

/// Errors raised while parsing or reconstructing KCAP payloads.
///
/// Every variant is fatal for the payload being processed. Recoverable
/// conditions (size mismatches, skipped bindings, singular matrices) are
/// reported through `tracing` instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    /// Payload does not start with the expected magic
    #[error("bad magic for {table}: expected {expected:#010X}, found {found:#010X}")]
    BadMagic {
        table: &'static str,
        expected: u32,
        found: u32,
    },

    /// Payload version is not the one this crate understands
    #[error("unsupported {table} version {found} (expected {expected})")]
    UnsupportedVersion {
        table: &'static str,
        expected: u32,
        found: u32,
    },

    /// A nested pointer table has the wrong number of entries
    #[error("{table} pointer table has {found} entries, expected {expected}")]
    PointerCount {
        table: &'static str,
        expected: usize,
        found: usize,
    },

    /// Data ends before a structure is complete
    #[error("unexpected end of data at offset {offset:#X} ({needed} bytes needed, {available} available)")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// An enum ordinal outside the closed tag space
    #[error("unknown {field} tag {value}")]
    UnknownTag { field: &'static str, value: u32 },

    /// An index into a sibling table is out of range
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// Joint hierarchy violates the tree invariant
    #[error("invalid skeleton: {0}")]
    InvalidSkeleton(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, FormatError>;
