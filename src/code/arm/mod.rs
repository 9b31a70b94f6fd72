//! # ARM
//!
//! Encoding and decoding of A32 `b`/`bl` instructions.
//!
//! This is the only place that knows the bit layout of a branch. Everything else passes
//! source/destination addresses and a [`BranchKind`] around and asks this module for the word.

use thiserror::Error;

/// `b` with the "always" condition
const OPCODE_B: u32 = 0xEA00_0000;
/// `bl` with the "always" condition
const OPCODE_BL: u32 = 0xEB00_0000;
/// Link bit that separates `bl` from `b`
const LINK_BIT: u32 = 1 << 24;
/// Signed 24-bit word offset field
const OFFSET_MASK: u32 = 0x00FF_FFFF;
/// Condition field
const COND_MASK: u32 = 0xF000_0000;
/// The "always" condition
const COND_AL: u32 = 0xE000_0000;
/// The unconditional space (`blx imm` lives here, not `b`)
const COND_NV: u32 = 0xF000_0000;

/// The PC reads two instructions ahead of the branch being executed
pub const PC_AHEAD: i128 = 8;
/// Smallest byte displacement (after [`PC_AHEAD`]) a branch can encode
pub const MIN_DISPLACEMENT: i128 = -(1 << 25);
/// Largest byte displacement (after [`PC_AHEAD`]) a branch can encode
pub const MAX_DISPLACEMENT: i128 = (1 << 25) - 4;

/// Flavor of branch to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// `b`: execution does not come back
    Jump,
    /// `bl`: `lr` is set so the destination can return
    Call,
}
impl BranchKind {
    /// Picks [`BranchKind::Call`] when `is_call` is set
    pub fn from_call_flag(is_call: bool) -> Self {
        if is_call {
            Self::Call
        } else {
            Self::Jump
        }
    }

    /// Fixed opcode bits for this kind of branch
    fn opcode(self) -> u32 {
        match self {
            Self::Jump => OPCODE_B,
            Self::Call => OPCODE_BL,
        }
    }
}

/// Reasons a branch cannot be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BranchError {
    /// One of the two addresses is not word-aligned
    #[error("branch from {from:#x} to {to:#x} is not word-aligned")]
    Misaligned {
        /// Address of the branch instruction
        from: usize,
        /// Branch destination
        to: usize,
    },
    /// The destination is outside the +/-32MiB reach of a branch
    #[error("branch from {from:#x} to {to:#x} is out of range (displacement {displacement:#x})")]
    OutOfRange {
        /// Address of the branch instruction
        from: usize,
        /// Branch destination
        to: usize,
        /// Byte displacement after accounting for the pipeline offset
        displacement: i128,
    },
}

/// Encodes a branch at `from` that lands on `to`, or reports why it can't
pub fn checked_branch(from: usize, to: usize, kind: BranchKind) -> Result<u32, BranchError> {
    if from % 4 != 0 || to % 4 != 0 {
        return Err(BranchError::Misaligned { from, to });
    }

    let displacement = to as i128 - from as i128 - PC_AHEAD;
    if !(MIN_DISPLACEMENT..=MAX_DISPLACEMENT).contains(&displacement) {
        return Err(BranchError::OutOfRange {
            from,
            to,
            displacement,
        });
    }

    // truncating to the low 24 bits keeps the two's complement sign of the word offset
    let offset = ((displacement >> 2) as u32) & OFFSET_MASK;
    Ok(kind.opcode() | offset)
}

/// Encodes a branch at `from` that lands on `to`.
///
/// `b` and `bl` for the same pair of addresses only differ in the link bit.
///
/// # Panics
///
/// Both addresses must be word-aligned and `to` must be within reach of `from`
/// (`to - from - 8` in `-0x200_0000..=0x1FF_FFFC`). The hardware can't express anything else, so
/// rather than emit a branch to the wrong place this panics. Use [`checked_branch`] to test first.
pub fn encode_branch(from: usize, to: usize, kind: BranchKind) -> u32 {
    match checked_branch(from, to, kind) {
        Ok(word) => word,
        Err(e) => panic!("{}", e),
    }
}

/// Returns true if `word` is a `b` or `bl` (any condition)
#[inline]
pub fn is_branch(word: u32) -> bool {
    (word & 0x0E00_0000) == 0x0A00_0000 && (word & COND_MASK) != COND_NV
}

/// Returns true if `word` is a `bl` (any condition)
#[inline]
pub fn is_branch_link(word: u32) -> bool {
    is_branch(word) && (word & LINK_BIT) != 0
}

/// Decodes an unconditional branch located at `at`, returning its destination and kind
pub fn decode_branch(word: u32, at: usize) -> Option<(usize, BranchKind)> {
    if !is_branch(word) || (word & COND_MASK) != COND_AL {
        return None;
    }

    // shift the 24-bit field to the top, then arithmetic shift back down to sign extend and scale by 4
    let displacement = (((word & OFFSET_MASK) << 8) as i32 >> 6) as i128;
    let to = at as i128 + PC_AHEAD + displacement;
    let kind = if word & LINK_BIT != 0 {
        BranchKind::Call
    } else {
        BranchKind::Jump
    };
    Some((to as usize, kind))
}
