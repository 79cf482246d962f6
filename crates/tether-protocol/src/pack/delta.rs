//! Git delta format: apply, parse, encode and compute.
//!
//! A delta body is a varint source size, a varint target size, then copy
//! and insert instructions that rebuild the target from the source.

use super::varint::{decode_varint, encode_varint};
use std::collections::HashMap;
use thiserror::Error;

/// Largest literal run a single insert instruction carries.
pub const MAX_INSERT: usize = 0x7f;
/// Largest length a single copy instruction can express.
pub const MAX_COPY: u64 = 0x00ff_ffff;

const WINDOW: usize = 16;
const HASH_PRIME: u64 = 31;
const MAX_BUCKET: usize = 64;

/// Reasons a delta cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// The delta ends in the middle of a header or instruction.
    #[error("delta truncated at byte {0}")]
    Truncated(usize),

    /// Instruction byte 0 is reserved.
    #[error("reserved delta instruction 0x00 at byte {0}")]
    InvalidInstruction(usize),

    /// The base does not have the length the delta was computed against.
    #[error("delta expects a {expected}-byte base, got {actual}")]
    SourceSizeMismatch {
        /// Size recorded in the delta header.
        expected: u64,
        /// Length of the supplied base.
        actual: u64,
    },

    /// A copy reaches outside the base.
    #[error("copy of {len} bytes at {offset} exceeds {base_len}-byte base")]
    CopyOutOfBounds {
        /// Copy start.
        offset: u64,
        /// Copy length.
        len: u64,
        /// Base length.
        base_len: u64,
    },

    /// A copy starts past what the 32-bit offset field can address.
    #[error("copy offset {0} does not fit in 32 bits")]
    OffsetTooLarge(u64),

    /// The rebuilt object does not have the declared length.
    #[error("delta produced {actual} bytes, header declares {expected}")]
    TargetSizeMismatch {
        /// Size recorded in the delta header.
        expected: u64,
        /// Bytes produced.
        actual: u64,
    },
}

/// One delta instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaInstruction {
    /// Copy `len` bytes of the base starting at `offset`.
    Copy {
        /// Start in the base.
        offset: u64,
        /// Bytes to copy.
        len: u64,
    },
    /// Append literal bytes (1..=127 per instruction on the wire).
    Insert(Vec<u8>),
}

/// A decoded delta body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Base length the delta was computed against.
    pub source_size: u64,
    /// Length of the rebuilt object.
    pub target_size: u64,
    /// Instructions in order.
    pub instructions: Vec<DeltaInstruction>,
}

impl Delta {
    /// Decodes a delta body into instructions.
    pub fn parse(delta: &[u8]) -> Result<Self, DeltaError> {
        let (source_size, mut pos) = decode_varint(delta, 0).ok_or(DeltaError::Truncated(0))?;
        let (target_size, n) = decode_varint(delta, pos).ok_or(DeltaError::Truncated(pos))?;
        pos += n;

        let mut instructions = Vec::new();
        while pos < delta.len() {
            let (instruction, next) = read_instruction(delta, pos)?;
            instructions.push(instruction);
            pos = next;
        }
        Ok(Self {
            source_size,
            target_size,
            instructions,
        })
    }

    /// Encodes the delta body. Inserts longer than 127 bytes and copies
    /// longer than [`MAX_COPY`] are split.
    pub fn encode(&self) -> Result<Vec<u8>, DeltaError> {
        let mut out = Vec::new();
        encode_varint(self.source_size, &mut out);
        encode_varint(self.target_size, &mut out);
        for instruction in &self.instructions {
            match instruction {
                DeltaInstruction::Copy { offset, len } => {
                    let mut remaining = *len;
                    let mut offset = *offset;
                    while remaining > 0 {
                        let chunk = remaining.min(MAX_COPY);
                        write_copy(offset, chunk, &mut out)?;
                        offset += chunk;
                        remaining -= chunk;
                    }
                }
                DeltaInstruction::Insert(data) => write_insert(data, &mut out),
            }
        }
        Ok(out)
    }

    /// Rebuilds the target from `base`.
    pub fn apply(&self, base: &[u8]) -> Result<Vec<u8>, DeltaError> {
        apply_delta(base, &self.encode()?)
    }
}

/// Applies a raw delta body to `base`.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let (source_size, mut pos) = decode_varint(delta, 0).ok_or(DeltaError::Truncated(0))?;
    if source_size != base.len() as u64 {
        return Err(DeltaError::SourceSizeMismatch {
            expected: source_size,
            actual: base.len() as u64,
        });
    }
    let (target_size, n) = decode_varint(delta, pos).ok_or(DeltaError::Truncated(pos))?;
    pos += n;

    let mut out = Vec::with_capacity(target_size.min(1 << 24) as usize);
    while pos < delta.len() {
        let (instruction, next) = read_instruction(delta, pos)?;
        match instruction {
            DeltaInstruction::Copy { offset, len } => {
                let end = offset
                    .checked_add(len)
                    .filter(|end| *end <= base.len() as u64)
                    .ok_or(DeltaError::CopyOutOfBounds {
                        offset,
                        len,
                        base_len: base.len() as u64,
                    })?;
                out.extend_from_slice(&base[offset as usize..end as usize]);
            }
            DeltaInstruction::Insert(data) => out.extend_from_slice(&data),
        }
        if out.len() as u64 > target_size {
            return Err(DeltaError::TargetSizeMismatch {
                expected: target_size,
                actual: out.len() as u64,
            });
        }
        pos = next;
    }

    if out.len() as u64 != target_size {
        return Err(DeltaError::TargetSizeMismatch {
            expected: target_size,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

fn read_instruction(delta: &[u8], pos: usize) -> Result<(DeltaInstruction, usize), DeltaError> {
    let cmd = delta[pos];
    let mut i = pos + 1;

    if cmd & 0x80 != 0 {
        let mut offset = 0u64;
        for bit in 0..4 {
            if cmd & (1 << bit) != 0 {
                let byte = *delta.get(i).ok_or(DeltaError::Truncated(i))?;
                offset |= u64::from(byte) << (8 * bit);
                i += 1;
            }
        }
        let mut len = 0u64;
        for bit in 0..3 {
            if cmd & (1 << (4 + bit)) != 0 {
                let byte = *delta.get(i).ok_or(DeltaError::Truncated(i))?;
                len |= u64::from(byte) << (8 * bit);
                i += 1;
            }
        }
        if len == 0 {
            len = 0x10000;
        }
        return Ok((DeltaInstruction::Copy { offset, len }, i));
    }

    if cmd == 0 {
        return Err(DeltaError::InvalidInstruction(pos));
    }
    let end = i + cmd as usize;
    let data = delta.get(i..end).ok_or(DeltaError::Truncated(i))?;
    Ok((DeltaInstruction::Insert(data.to_vec()), end))
}

fn write_copy(offset: u64, len: u64, out: &mut Vec<u8>) -> Result<(), DeltaError> {
    if offset > u64::from(u32::MAX) {
        return Err(DeltaError::OffsetTooLarge(offset));
    }
    let cmd_pos = out.len();
    out.push(0x80);
    let mut cmd = 0x80u8;
    for bit in 0..4 {
        let byte = (offset >> (8 * bit)) as u8;
        if byte != 0 {
            cmd |= 1 << bit;
            out.push(byte);
        }
    }
    // a zero size field means 0x10000
    if len != 0x10000 {
        for bit in 0..3 {
            let byte = (len >> (8 * bit)) as u8;
            if byte != 0 {
                cmd |= 1 << (4 + bit);
                out.push(byte);
            }
        }
    }
    out[cmd_pos] = cmd;
    Ok(())
}

fn write_insert(data: &[u8], out: &mut Vec<u8>) {
    for chunk in data.chunks(MAX_INSERT) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}

/// Computes a delta that rebuilds `target` from `base`.
///
/// Every 16-byte window of the base is indexed by a polynomial rolling
/// hash; the target is scanned with the same hash and each hit is extended
/// forward as far as the bytes agree.
pub fn compute_delta(base: &[u8], target: &[u8]) -> Delta {
    let mut instructions = Vec::new();
    let mut literal = Vec::new();

    if base.len() >= WINDOW && target.len() >= WINDOW {
        let index = build_index(base);
        let top = HASH_PRIME.wrapping_pow(WINDOW as u32 - 1);
        let mut pos = 0;
        let mut hash = window_hash(&target[..WINDOW]);

        while pos + WINDOW <= target.len() {
            if let Some((offset, len)) = longest_match(&index, hash, base, target, pos) {
                if !literal.is_empty() {
                    instructions.push(DeltaInstruction::Insert(std::mem::take(&mut literal)));
                }
                instructions.push(DeltaInstruction::Copy {
                    offset: offset as u64,
                    len: len as u64,
                });
                pos += len;
                if pos + WINDOW <= target.len() {
                    hash = window_hash(&target[pos..pos + WINDOW]);
                }
                continue;
            }

            literal.push(target[pos]);
            if pos + WINDOW < target.len() {
                hash = hash
                    .wrapping_sub(u64::from(target[pos]).wrapping_mul(top))
                    .wrapping_mul(HASH_PRIME)
                    .wrapping_add(u64::from(target[pos + WINDOW]));
            }
            pos += 1;
        }
        literal.extend_from_slice(&target[pos.min(target.len())..]);
    } else {
        literal.extend_from_slice(target);
    }

    if !literal.is_empty() {
        instructions.push(DeltaInstruction::Insert(literal));
    }
    Delta {
        source_size: base.len() as u64,
        target_size: target.len() as u64,
        instructions,
    }
}

fn window_hash(window: &[u8]) -> u64 {
    window.iter().fold(0u64, |hash, &byte| {
        hash.wrapping_mul(HASH_PRIME).wrapping_add(u64::from(byte))
    })
}

fn build_index(base: &[u8]) -> HashMap<u64, Vec<usize>> {
    let mut index: HashMap<u64, Vec<usize>> = HashMap::new();
    let top = HASH_PRIME.wrapping_pow(WINDOW as u32 - 1);
    let mut hash = window_hash(&base[..WINDOW]);
    for start in 0..=base.len() - WINDOW {
        let bucket = index.entry(hash).or_default();
        if bucket.len() < MAX_BUCKET {
            bucket.push(start);
        }
        if start + WINDOW < base.len() {
            hash = hash
                .wrapping_sub(u64::from(base[start]).wrapping_mul(top))
                .wrapping_mul(HASH_PRIME)
                .wrapping_add(u64::from(base[start + WINDOW]));
        }
    }
    index
}

fn longest_match(
    index: &HashMap<u64, Vec<usize>>,
    hash: u64,
    base: &[u8],
    target: &[u8],
    pos: usize,
) -> Option<(usize, usize)> {
    let candidates = index.get(&hash)?;
    let mut best: Option<(usize, usize)> = None;
    for &start in candidates {
        if base[start..start + WINDOW] != target[pos..pos + WINDOW] {
            continue;
        }
        let len = base[start..]
            .iter()
            .zip(&target[pos..])
            .take_while(|(a, b)| a == b)
            .count();
        if best.map_or(true, |(_, best_len)| len > best_len) {
            best = Some((start, len));
        }
    }
    best
}
