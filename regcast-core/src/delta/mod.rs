//! Binary delta format for register vectors.
//!
//! ## Wire format
//!
//! **Pair record** (4 bytes), one changed register:
//! ```text
//! opcode:  u8  (0x01)
//! index:   u16 (little-endian)
//! value:   u8
//! ```
//!
//! **Run record** (4 + count bytes), consecutive registers:
//! ```text
//! opcode:  u8  (0x02)
//! start:   u16 (little-endian)
//! count:   u8  (1..=255)
//! values:  [u8; count]
//! ```
//!
//! Register values live in `1..=100`, so one byte per value suffices.
//! A delta buffer is a plain concatenation of records; an empty buffer
//! means "nothing changed".

pub mod decoder;
pub mod encoder;

pub use decoder::{DeltaRecord, apply, decode};
pub use encoder::{encode, snapshot};

/// Opcode of a single-register record.
pub const OP_PAIR: u8 = 0x01;

/// Opcode of a multi-register record.
pub const OP_RUN: u8 = 0x02;

/// Wire size of a pair record.
pub const PAIR_LEN: usize = 4;

/// Wire size of a run record header (opcode + start + count).
pub const RUN_HEADER_LEN: usize = 4;

/// Maximum number of values in one run record.
pub const MAX_RUN: usize = u8::MAX as usize;

/// Largest register count addressable by the 16-bit index.
pub const MAX_REGISTERS: usize = u16::MAX as usize + 1;
