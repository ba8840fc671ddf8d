//! Work items as handed over by the work source, and the byte-level
//! transforms binders apply to them before upload.

use serde::{Deserialize, Serialize};

pub const BLOCK_HEADER_LEN: usize = 80;
pub const TARGET_LEN: usize = 32;

/// Precomputed compression state of the first header block plus the
/// remaining header words, as produced by the verifier's `precalc_hash`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub ctx: [u32; 8],
    pub cty: [u32; 12],
}

/// Dataset coordinates for DAG families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagWork {
    pub epoch: u64,
    pub height: u64,
    pub seed_hash: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Raw block header (80 bytes for most families, 168 for credits).
    pub data: Vec<u8>,
    /// Share target, little-endian 256-bit.
    pub target: [u8; TARGET_LEN],
    pub midstate: Option<Vec<u8>>,
    pub block_context: Option<BlockContext>,
    pub dag: Option<DagWork>,
}

impl WorkItem {
    pub fn new(data: Vec<u8>, target: [u8; TARGET_LEN]) -> Self {
        Self {
            data,
            target,
            midstate: None,
            block_context: None,
            dag: None,
        }
    }

    pub fn with_midstate(mut self, midstate: Vec<u8>) -> Self {
        self.midstate = Some(midstate);
        self
    }

    pub fn with_block_context(mut self, block_context: BlockContext) -> Self {
        self.block_context = Some(block_context);
        self
    }

    pub fn with_dag(mut self, dag: DagWork) -> Self {
        self.dag = Some(dag);
        self
    }
}

/// Where in the 256-bit target the kernel's comparison word lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetWord {
    /// Most significant 32-bit word, bytes 28..32.
    U32At28,
    /// Most significant 64-bit word, bytes 24..32.
    U64At24,
}

impl TargetWord {
    pub fn extract(self, target: &[u8; TARGET_LEN]) -> TargetValue {
        match self {
            Self::U32At28 => TargetValue::U32(u32::from_le_bytes([
                target[28], target[29], target[30], target[31],
            ])),
            Self::U64At24 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(&target[24..32]);
                TargetValue::U64(u64::from_le_bytes(word))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetValue {
    U32(u32),
    U64(u64),
}

pub fn swab32(word: u32) -> u32 {
    word.swap_bytes()
}

/// Byte-reverses each 32-bit word of an 80-byte header.
pub fn flip80(data: &[u8]) -> [u8; BLOCK_HEADER_LEN] {
    let mut out = [0u8; BLOCK_HEADER_LEN];
    for (dst, src) in out.chunks_exact_mut(4).zip(data.chunks_exact(4)) {
        dst.copy_from_slice(&[src[3], src[2], src[1], src[0]]);
    }
    out
}

pub(crate) fn le_words<const N: usize>(bytes: &[u8]) -> [u32; N] {
    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip80_reverses_each_word() {
        let data: Vec<u8> = (0..80).collect();
        let flipped = flip80(&data);
        assert_eq!(&flipped[..8], &[3, 2, 1, 0, 7, 6, 5, 4]);
        assert_eq!(&flipped[76..], &[79, 78, 77, 76]);
        assert_eq!(flip80(&flipped).to_vec(), data);
    }

    #[test]
    fn target_words_read_most_significant_end() {
        let mut target = [0u8; TARGET_LEN];
        target[24..32].copy_from_slice(&[0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb, 0xcc, 0xdd]);

        assert_eq!(
            TargetWord::U32At28.extract(&target),
            TargetValue::U32(0xddcc_bbaa)
        );
        assert_eq!(
            TargetWord::U64At24.extract(&target),
            TargetValue::U64(0xddcc_bbaa_0403_0201)
        );
    }

    #[test]
    fn le_words_decodes_little_endian() {
        let words: [u32; 2] = le_words(&[1, 0, 0, 0, 0, 0, 0, 0x80]);
        assert_eq!(words, [1, 0x8000_0000]);
    }
}
