/*!
 * Block-level delta codec: a fixed-block signature of an old file, and a
 * script of copy-from-old / literal instructions that reconstruct the new
 * file against that signature.
 *
 * Matching is rsync-style: a fast, rolling Adler-32-like checksum finds
 * candidate blocks, and a strong BLAKE3 hash confirms the match before a
 * `CopyFromOld` instruction is ever emitted.
 */

use std::collections::HashMap;

use crate::error::{Error, Result};

const ADLER_MOD: u32 = 65521;

/// A rolling weak checksum over a fixed-size window. Cheap to recompute one
/// byte at a time as the window slides, which is what makes it practical to
/// scan every byte offset of the new file for a match against the old
/// file's block signature.
#[derive(Debug, Clone)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    window_size: u32,
}

impl RollingChecksum {
    pub fn from_block(data: &[u8]) -> Self {
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in data {
            a = (a + byte as u32) % ADLER_MOD;
            b = (b + a) % ADLER_MOD;
        }
        Self { a, b, window_size: data.len() as u32 }
    }

    pub fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }

    /// Slide the window forward by one byte: drop `old_byte`, admit `new_byte`.
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        self.a = (self.a + ADLER_MOD - old_byte as u32) % ADLER_MOD;
        self.b = (self.b + ADLER_MOD
            - (self.window_size * old_byte as u32) % ADLER_MOD)
            % ADLER_MOD;
        self.a = (self.a + new_byte as u32) % ADLER_MOD;
        self.b = (self.b + self.a) % ADLER_MOD;
    }
}

/// One block's entry in a [`Signature`]: its index in the old file, the
/// fast rolling checksum, and the strong hash used to confirm a candidate
/// match found via the rolling checksum.
#[derive(Debug, Clone, Copy)]
pub struct BlockSignature {
    pub block_index: u32,
    pub weak: u32,
    pub strong: [u8; 32],
}

/// The full fixed-block signature of an old file, computed by the side that
/// holds the prior version (the receiver, in the `WriteFile` flow) and sent
/// to the side building the delta script.
#[derive(Debug, Clone)]
pub struct Signature {
    pub block_size: u32,
    pub blocks: Vec<BlockSignature>,
}

impl Signature {
    pub fn compute(old_data: &[u8], block_size: u32) -> Self {
        let block_size = block_size.max(1);
        let blocks = old_data
            .chunks(block_size as usize)
            .enumerate()
            .map(|(i, chunk)| BlockSignature {
                block_index: i as u32,
                weak: RollingChecksum::from_block(chunk).value(),
                strong: *blake3::hash(chunk).as_bytes(),
            })
            .collect();
        Self { block_size, blocks }
    }

    fn index_by_weak(&self) -> HashMap<u32, Vec<&BlockSignature>> {
        let mut map: HashMap<u32, Vec<&BlockSignature>> = HashMap::new();
        for block in &self.blocks {
            map.entry(block.weak).or_default().push(block);
        }
        map
    }
}

/// One instruction in a delta script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    /// Copy `len` bytes from the old file starting at `offset` (old-file
    /// byte offset, i.e. `block_index * block_size`).
    CopyFromOld { offset: u64, len: u32 },
    /// Append these literal bytes (no match was found in the old file).
    Literal(Vec<u8>),
}

/// A sequence of [`DeltaOp`] that reconstructs the new file against a
/// previously-shared [`Signature`] of the old file.
#[derive(Debug, Clone, Default)]
pub struct DeltaScript {
    pub ops: Vec<DeltaOp>,
}

/// Build a delta script for `new_data` against `signature`, the old file's
/// block signature. Scans every new-file offset using the rolling checksum
/// so block boundaries in the new file need not line up with the old
/// file's.
pub fn build_script(new_data: &[u8], signature: &Signature) -> DeltaScript {
    let block_size = signature.block_size as usize;
    if block_size == 0 || new_data.is_empty() {
        return DeltaScript { ops: vec![DeltaOp::Literal(new_data.to_vec())] };
    }

    let index = signature.index_by_weak();
    let mut ops = Vec::new();
    let mut literal_run = Vec::new();
    let mut pos = 0usize;

    while pos < new_data.len() {
        let window_end = (pos + block_size).min(new_data.len());
        let window = &new_data[pos..window_end];
        let weak = RollingChecksum::from_block(window).value();

        let matched = index.get(&weak).and_then(|candidates| {
            let strong = blake3::hash(window);
            candidates.iter().find(|c| c.strong == *strong.as_bytes())
        });

        if let Some(block) = matched {
            if !literal_run.is_empty() {
                ops.push(DeltaOp::Literal(std::mem::take(&mut literal_run)));
            }
            ops.push(DeltaOp::CopyFromOld {
                offset: block.block_index as u64 * signature.block_size as u64,
                len: window.len() as u32,
            });
            pos = window_end;
        } else {
            literal_run.push(new_data[pos]);
            pos += 1;
        }
    }

    if !literal_run.is_empty() {
        ops.push(DeltaOp::Literal(literal_run));
    }

    DeltaScript { ops }
}

/// Reconstruct the new file's bytes from `script` against `old_data`. The
/// result must equal the original new-file content the sender built the
/// script from.
pub fn apply_script(old_data: &[u8], script: &DeltaScript) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for op in &script.ops {
        match op {
            DeltaOp::Literal(bytes) => out.extend_from_slice(bytes),
            DeltaOp::CopyFromOld { offset, len } => {
                let start = *offset as usize;
                let end = start + *len as usize;
                let slice = old_data.get(start..end).ok_or_else(|| {
                    Error::ProtocolError(format!(
                        "delta script references old-file range {}..{} but old file is {} bytes",
                        start,
                        end,
                        old_data.len()
                    ))
                })?;
                out.extend_from_slice(slice);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_files_produce_all_copy_ops() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(200);
        let sig = Signature::compute(&data, 64);
        let script = build_script(&data, &sig);
        assert!(script.ops.iter().all(|op| matches!(op, DeltaOp::CopyFromOld { .. })));
        let applied = apply_script(&data, &script).unwrap();
        assert_eq!(applied, data);
    }

    #[test]
    fn small_edit_mostly_reuses_old_blocks() {
        let mut old = b"AAAAAAAAAABBBBBBBBBBCCCCCCCCCCDDDDDDDDDD".to_vec();
        old.extend(std::iter::repeat(b'E').take(200));
        let mut new = old.clone();
        // Insert a few bytes near the start, shifting everything after.
        new.splice(5..5, b"XYZ".iter().copied());

        let sig = Signature::compute(&old, 16);
        let script = build_script(&new, &sig);
        let applied = apply_script(&old, &script).unwrap();
        assert_eq!(applied, new);

        let copy_ops = script.ops.iter().filter(|op| matches!(op, DeltaOp::CopyFromOld { .. })).count();
        assert!(copy_ops > 0, "expected at least one reused block after a small edit");
    }

    #[test]
    fn completely_different_content_is_all_literal() {
        let old = vec![0u8; 256];
        let new = vec![1u8; 256];
        let sig = Signature::compute(&old, 32);
        let script = build_script(&new, &sig);
        let applied = apply_script(&old, &script).unwrap();
        assert_eq!(applied, new);
    }

    #[test]
    fn apply_rejects_out_of_range_copy() {
        let old = vec![0u8; 8];
        let script = DeltaScript { ops: vec![DeltaOp::CopyFromOld { offset: 100, len: 4 }] };
        assert!(apply_script(&old, &script).is_err());
    }

    #[test]
    fn rolling_checksum_matches_from_scratch_recompute() {
        let data = b"0123456789abcdef";
        let mut rolling = RollingChecksum::from_block(&data[0..8]);
        // Roll forward by one: drop data[0], admit data[8].
        rolling.roll(data[0], data[8]);
        let direct = RollingChecksum::from_block(&data[1..9]);
        assert_eq!(rolling.value(), direct.value());
    }
}
