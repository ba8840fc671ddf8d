//! Light-cache generators.
//!
//! Both families fill the cache sequentially from the seed hash and then run
//! a few rounds of memo-hash mixing over it; they differ in hash function
//! and node size.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use sha3::Keccak512;

type Blake2b256 = Blake2b<U32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCacheGenerator {
    /// Keccak-512 over 64-byte nodes.
    EthashKeccak { rounds: usize },
    /// Blake2b with 32-byte output over 32-byte nodes.
    NightcapBlake2b { rounds: usize },
}

impl LightCacheGenerator {
    pub fn node_bytes(self) -> usize {
        match self {
            Self::EthashKeccak { .. } => 64,
            Self::NightcapBlake2b { .. } => 32,
        }
    }

    /// Fills `cache` from `seed`. Trailing bytes that do not make a whole
    /// node are left zero.
    pub fn generate(self, seed: &[u8; 32], cache: &mut [u8]) {
        match self {
            Self::EthashKeccak { rounds } => {
                memo_hash_fill::<64>(seed, cache, rounds, |input| node(&Keccak512::digest(input)))
            }
            Self::NightcapBlake2b { rounds } => {
                memo_hash_fill::<32>(seed, cache, rounds, |input| node(&Blake2b256::digest(input)))
            }
        }
    }
}

fn node<const NODE: usize>(digest: &[u8]) -> [u8; NODE] {
    let mut out = [0u8; NODE];
    out.copy_from_slice(&digest[..NODE]);
    out
}

fn memo_hash_fill<const NODE: usize>(
    seed: &[u8],
    cache: &mut [u8],
    rounds: usize,
    hash: impl Fn(&[u8]) -> [u8; NODE],
) {
    let nodes = cache.len() / NODE;
    if nodes == 0 {
        return;
    }

    cache[..NODE].copy_from_slice(&hash(seed));
    for idx in 1..nodes {
        let (done, rest) = cache.split_at_mut(idx * NODE);
        rest[..NODE].copy_from_slice(&hash(&done[(idx - 1) * NODE..]));
    }

    for _ in 0..rounds {
        for idx in 0..nodes {
            let prev = (idx + nodes - 1) % nodes;
            let head = &cache[idx * NODE..idx * NODE + 4];
            let pick = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize % nodes;
            let mut mixed = [0u8; NODE];
            for (byte, (a, b)) in mixed.iter_mut().zip(
                cache[prev * NODE..(prev + 1) * NODE]
                    .iter()
                    .zip(&cache[pick * NODE..(pick + 1) * NODE]),
            ) {
                *byte = a ^ b;
            }
            cache[idx * NODE..(idx + 1) * NODE].copy_from_slice(&hash(&mixed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_node_is_hash_of_seed() {
        let seed = [0u8; 32];
        let mut cache = vec![0u8; 64 * 4];
        LightCacheGenerator::EthashKeccak { rounds: 0 }.generate(&seed, &mut cache);
        assert_eq!(&cache[..64], &Keccak512::digest(seed)[..]);
        let second = Keccak512::digest(&cache[..64]);
        assert_eq!(&cache[64..128], &second[..]);
    }

    #[test]
    fn generation_is_deterministic_and_seed_dependent() {
        let generator = LightCacheGenerator::NightcapBlake2b { rounds: 3 };
        let mut left = vec![0u8; 32 * 16];
        let mut right = vec![0u8; 32 * 16];
        generator.generate(&[1u8; 32], &mut left);
        generator.generate(&[1u8; 32], &mut right);
        assert_eq!(left, right);

        generator.generate(&[2u8; 32], &mut right);
        assert_ne!(left, right);
    }

    #[test]
    fn mixing_rounds_change_the_cache() {
        let mut plain = vec![0u8; 64 * 8];
        let mut mixed = vec![0u8; 64 * 8];
        LightCacheGenerator::EthashKeccak { rounds: 0 }.generate(&[3u8; 32], &mut plain);
        LightCacheGenerator::EthashKeccak { rounds: 3 }.generate(&[3u8; 32], &mut mixed);
        assert_ne!(plain, mixed);
    }

    #[test]
    fn partial_trailing_node_stays_zero() {
        let mut cache = vec![0u8; 32 * 2 + 7];
        LightCacheGenerator::NightcapBlake2b { rounds: 1 }.generate(&[5u8; 32], &mut cache);
        assert!(cache[64..].iter().all(|byte| *byte == 0));
    }
}
