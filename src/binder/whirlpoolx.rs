//! WhirlpoolX: the first 64 header bytes are compressed on the host and the
//! kernel only finishes the second block.

use super::{ArgBinder, BindOutcome, KernelBinder, WorkShape};
use crate::backend::KernelArg;
use crate::device::DeviceContext;
use crate::error::Result;
use crate::session::MiningSession;
use crate::work::{flip80, TargetWord, WorkItem, BLOCK_HEADER_LEN};

const ROUNDS: usize = 10;
const STAGES: &[&str] = &["whirlpoolx"];

/// First row of the circulant diffusion matrix.
const THETA: [u8; 8] = [1, 1, 4, 1, 8, 5, 2, 9];

const SBOX: [u8; 256] = sbox();

/// S-box built from the E, E^-1 and R 4-bit mini-boxes.
const fn sbox() -> [u8; 256] {
    const E: [u8; 16] = [
        0x1, 0xB, 0x9, 0xC, 0xD, 0x6, 0xF, 0x3, 0xE, 0x8, 0x7, 0x4, 0xA, 0x2, 0x5, 0x0,
    ];
    const R: [u8; 16] = [
        0x7, 0xC, 0xB, 0xD, 0xE, 0x4, 0x9, 0xF, 0x6, 0x3, 0x8, 0xA, 0x2, 0x5, 0x1, 0x0,
    ];
    let mut e_inv = [0u8; 16];
    let mut i = 0;
    while i < 16 {
        e_inv[E[i] as usize] = i as u8;
        i += 1;
    }

    let mut table = [0u8; 256];
    let mut u = 0;
    while u < 256 {
        let a = E[u >> 4];
        let b = e_inv[u & 0xF];
        let r = R[(a ^ b) as usize];
        table[u] = (E[(a ^ r) as usize] << 4) | e_inv[(b ^ r) as usize];
        u += 1;
    }
    table
}

fn round_constant(round: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&SBOX[8 * round..8 * round + 8]);
    u64::from_le_bytes(bytes)
}

/// Multiplication in GF(2^8) reduced by x^8 + x^4 + x^3 + x^2 + 1.
fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80 != 0;
        a <<= 1;
        if carry {
            a ^= 0x1D;
        }
        b >>= 1;
    }
    product
}

/// One round on a state of eight little-endian rows: substitute, shift
/// columns, mix rows, add the round key.
fn round(state: &[u64; 8], key: &[u64; 8]) -> [u64; 8] {
    let mut cells = [[0u8; 8]; 8];
    for (row, word) in state.iter().enumerate() {
        for (col, byte) in word.to_le_bytes().into_iter().enumerate() {
            cells[(row + col) % 8][col] = SBOX[byte as usize];
        }
    }

    let mut out = [0u64; 8];
    for (row, word) in out.iter_mut().enumerate() {
        let mut mixed = [0u8; 8];
        for (col, cell) in mixed.iter_mut().enumerate() {
            for (k, value) in cells[row].iter().enumerate() {
                *cell ^= gf_mul(*value, THETA[(col + 8 - k) % 8]);
            }
        }
        *word = u64::from_le_bytes(mixed) ^ key[row];
    }
    out
}

fn compress(chain: &[u64; 8], block: &[u64; 8]) -> [u64; 8] {
    let mut key = *chain;
    let mut state = [0u64; 8];
    for idx in 0..8 {
        state[idx] = block[idx] ^ key[idx];
    }
    for r in 0..ROUNDS {
        let mut constant = [0u64; 8];
        constant[0] = round_constant(r);
        key = round(&key, &constant);
        state = round(&state, &key);
    }
    for idx in 0..8 {
        state[idx] ^= chain[idx] ^ block[idx];
    }
    state
}

fn words(bytes: &[u8]) -> [u64; 8] {
    let mut out = [0u64; 8];
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *word = u64::from_le_bytes(buf);
    }
    out
}

/// Whirlpool compression of the first 64 bytes of the flipped header from
/// the zero chaining value.
pub fn whirlpool_midblock(flipped: &[u8; BLOCK_HEADER_LEN]) -> [u8; 64] {
    let state = compress(&[0u64; 8], &words(&flipped[..64]));
    let mut out = [0u8; 64];
    for (chunk, word) in out.chunks_exact_mut(8).zip(state) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

pub(crate) struct Whirlpoolx;

impl KernelBinder for Whirlpoolx {
    fn stages(&self) -> &'static [&'static str] {
        STAGES
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN)
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let flipped = flip80(&work.data);
        let midblock = whirlpool_midblock(&flipped);
        let tail = words(&flipped[64..80]);
        let target = TargetWord::U64At24.extract(&work.target);

        let output = ctx.buffers().output;
        let kernels = ctx.stage_kernels(STAGES.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(STAGES[0], kernels[0])
            .arg(KernelArg::Bytes(midblock.to_vec()))
            .arg(tail[0])
            .arg(tail[1])
            .arg(output)
            .arg(target);
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    #[test]
    fn sbox_starts_with_published_values() {
        assert_eq!(&SBOX[..4], &[0x18, 0x23, 0xc6, 0xe8]);
        assert_eq!(round_constant(0), 0x4f01_b887_e8c6_2318);
    }

    #[test]
    fn compression_matches_empty_message_digest() {
        let mut block = [0u8; 64];
        block[0] = 0x80;
        let state = compress(&[0u64; 8], &words(&block));
        let digest: Vec<u8> = state.iter().flat_map(|word| word.to_le_bytes()).collect();
        assert_eq!(
            hex(&digest),
            "19fa61d75522a4669b44e39c1d2e1726c530232130d407f89afee0964997f7a7\
             3e83be698b288febcf88e3e03c4f0757ea8964e59b63d93708b138cc42a66eb3"
        );
    }

    #[test]
    fn midblock_depends_only_on_first_64_bytes() {
        let mut data = [0u8; BLOCK_HEADER_LEN];
        let first = whirlpool_midblock(&data);
        data[70] = 0xff;
        assert_eq!(whirlpool_midblock(&data), first);
        data[3] = 0x01;
        assert_ne!(whirlpool_midblock(&data), first);
    }
}
