//! Receiver side of the delta format.
//!
//! Parses a delta or snapshot buffer into [`DeltaRecord`]s and patches
//! a local register vector with them.

use crate::delta::{OP_PAIR, OP_RUN, PAIR_LEN, RUN_HEADER_LEN};
use crate::error::RegcastError;

// ── DeltaRecord ──────────────────────────────────────────────────

/// One record of a delta or snapshot buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRecord {
    /// A single changed register.
    Pair { index: u16, value: u8 },
    /// `values.len()` consecutive registers starting at `start`.
    Run { start: u16, values: Vec<u8> },
}

impl DeltaRecord {
    /// Index of the first register this record touches.
    pub fn start(&self) -> usize {
        match self {
            DeltaRecord::Pair { index, .. } => *index as usize,
            DeltaRecord::Run { start, .. } => *start as usize,
        }
    }

    /// Number of registers this record touches.
    pub fn count(&self) -> usize {
        match self {
            DeltaRecord::Pair { .. } => 1,
            DeltaRecord::Run { values, .. } => values.len(),
        }
    }

    /// Size of the record on the wire.
    pub fn wire_len(&self) -> usize {
        match self {
            DeltaRecord::Pair { .. } => PAIR_LEN,
            DeltaRecord::Run { values, .. } => RUN_HEADER_LEN + values.len(),
        }
    }
}

// ── Parsing ──────────────────────────────────────────────────────

/// Parse every record in `buf`.
pub fn decode(buf: &[u8]) -> Result<Vec<DeltaRecord>, RegcastError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let record = read_record(buf, offset)?;
        offset += record.wire_len();
        records.push(record);
    }

    Ok(records)
}

/// Apply every record in `buf` to `state`.
///
/// Records are validated before being written, so a buffer that fails
/// part-way leaves the earlier records applied and the rest untouched.
pub fn apply(state: &mut [u8], buf: &[u8]) -> Result<usize, RegcastError> {
    let mut offset = 0;
    let mut touched = 0;

    while offset < buf.len() {
        let record = read_record(buf, offset)?;
        let start = record.start();
        let end = start + record.count();
        if end > state.len() {
            return Err(RegcastError::IndexOutOfRange {
                index: end - 1,
                len: state.len(),
            });
        }

        match &record {
            DeltaRecord::Pair { value, .. } => state[start] = *value,
            DeltaRecord::Run { values, .. } => state[start..end].copy_from_slice(values),
        }

        touched += record.count();
        offset += record.wire_len();
    }

    Ok(touched)
}

// ── Internal ─────────────────────────────────────────────────────

fn read_record(buf: &[u8], offset: usize) -> Result<DeltaRecord, RegcastError> {
    let rest = &buf[offset..];
    let truncated = |needed: usize| RegcastError::TruncatedRecord {
        offset,
        needed,
        available: rest.len(),
    };

    match rest.first().copied() {
        Some(OP_PAIR) => {
            if rest.len() < PAIR_LEN {
                return Err(truncated(PAIR_LEN));
            }
            Ok(DeltaRecord::Pair {
                index: u16::from_le_bytes([rest[1], rest[2]]),
                value: rest[3],
            })
        }
        Some(OP_RUN) => {
            if rest.len() < RUN_HEADER_LEN {
                return Err(truncated(RUN_HEADER_LEN));
            }
            let count = rest[3] as usize;
            if rest.len() < RUN_HEADER_LEN + count {
                return Err(truncated(RUN_HEADER_LEN + count));
            }
            Ok(DeltaRecord::Run {
                start: u16::from_le_bytes([rest[1], rest[2]]),
                values: rest[RUN_HEADER_LEN..RUN_HEADER_LEN + count].to_vec(),
            })
        }
        Some(op) => Err(RegcastError::UnknownOpcode(op)),
        None => Err(truncated(1)),
    }
}

// ── Tests ────────────────────────────────────────────────────────
