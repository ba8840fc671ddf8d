//! Compiled-in algorithm table.
//!
//! Rows are produced by per-family constructors plus small per-entry deltas.
//! Order matters: the first row is the fallback for unknown names.

use std::sync::OnceLock;

use serde::Serialize;
use tracing::warn;

use super::capability::{Capabilities, FinishHash, PrecalcHash, RegenHash};
use super::Family;
use crate::binder::BinderKind;

const SCRATCH_8X16: i64 = 8 * 16 * 4_194_304;
const SCRATCH_4X16: i64 = 4 * 16 * 4_194_304;
const SCRATCH_2X8: i64 = 2 * 8 * 4_194_304;
/// Scratch size is chosen by device setup from thread concurrency.
const SCRATCH_DEVICE_SIZED: i64 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueProperties {
    pub out_of_order: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlgorithmDescriptor {
    pub name: &'static str,
    pub family: Family,
    pub diff_multiplier1: u64,
    pub diff_multiplier2: u64,
    pub share_diff_multiplier: u64,
    pub xintensity_shift: u32,
    pub intensity_shift: u32,
    /// Index of the "found" counter in the output buffer; the buffer holds
    /// `found_idx + 1` result slots.
    pub found_idx: u32,
    pub diff_numerator: u64,
    pub diff1targ: u32,
    pub n_extra_kernels: u32,
    pub rw_buffer_size: i64,
    pub queue_properties: QueueProperties,
    pub capabilities: Capabilities,
}

impl AlgorithmDescriptor {
    fn base(
        name: &'static str,
        family: Family,
        queue_kernel: BinderKind,
        regenhash: RegenHash,
    ) -> Self {
        Self {
            name,
            family,
            diff_multiplier1: 1,
            diff_multiplier2: 1,
            share_diff_multiplier: 1,
            xintensity_shift: 0,
            intensity_shift: 0,
            found_idx: 0xFF,
            diff_numerator: 0xFFFF,
            diff1targ: 0x0000_ffff,
            n_extra_kernels: 0,
            rw_buffer_size: 0,
            queue_properties: QueueProperties { out_of_order: true },
            capabilities: Capabilities {
                regenhash,
                precalc_hash: None,
                queue_kernel,
                gen_hash: FinishHash::DoubleSha256,
            },
        }
    }

    fn multipliers(mut self, primary: u64, secondary: u64, share: u64) -> Self {
        self.diff_multiplier1 = primary;
        self.diff_multiplier2 = secondary;
        self.share_diff_multiplier = share;
        self
    }

    fn difficulty(mut self, numerator: u64, diff1targ: u32) -> Self {
        self.diff_numerator = numerator;
        self.diff1targ = diff1targ;
        self
    }

    fn chained(mut self, n_extra_kernels: u32, rw_buffer_size: i64) -> Self {
        self.n_extra_kernels = n_extra_kernels;
        self.rw_buffer_size = rw_buffer_size;
        self
    }

    fn with_shifts(mut self, xintensity_shift: u32, intensity_shift: u32, found_idx: u32) -> Self {
        self.xintensity_shift = xintensity_shift;
        self.intensity_shift = intensity_shift;
        self.found_idx = found_idx;
        self
    }

    fn in_order(mut self) -> Self {
        self.queue_properties.out_of_order = false;
        self
    }

    fn precalc(mut self, precalc: PrecalcHash) -> Self {
        self.capabilities.precalc_hash = Some(precalc);
        self
    }

    fn finish(mut self, gen_hash: FinishHash) -> Self {
        self.capabilities.gen_hash = gen_hash;
        self
    }

    /// Result slots in the output buffer, including the found counter.
    pub fn output_slots(&self) -> u32 {
        self.found_idx + 1
    }

    /// Kernel stages one submission runs: the main kernel plus the extras.
    pub fn stage_count(&self) -> u32 {
        self.n_extra_kernels + 1
    }
}

fn scrypt(name: &'static str) -> AlgorithmDescriptor {
    AlgorithmDescriptor::base(name, Family::Scrypt, BinderKind::Scrypt, RegenHash::Scrypt)
        .multipliers(1, 65536, 65536)
        .difficulty(0xFFFF_FFFF, 0x0000_ffff)
        .chained(0, SCRATCH_DEVICE_SIZED)
}

fn memory_hard(
    name: &'static str,
    family: Family,
    binder: BinderKind,
    regenhash: RegenHash,
) -> AlgorithmDescriptor {
    AlgorithmDescriptor::base(name, family, binder, regenhash)
        .multipliers(1, 65536, 65536)
        .difficulty(0xFFFF_0000_0000_0000, 0x0000_ffff)
        .chained(0, SCRATCH_DEVICE_SIZED)
}

fn quark(name: &'static str, regenhash: RegenHash) -> AlgorithmDescriptor {
    AlgorithmDescriptor::base(name, Family::Quark, BinderKind::Sph, regenhash)
        .multipliers(256, 256, 256)
        .difficulty(0xFF_FFFF, 0x0000_ffff)
}

fn sph(name: &'static str, family: Family, regenhash: RegenHash) -> AlgorithmDescriptor {
    AlgorithmDescriptor::base(name, family, BinderKind::Sph, regenhash)
}

/// Multi-stage chain sharing one scratch buffer, queued in order.
fn chain(
    name: &'static str,
    family: Family,
    binder: BinderKind,
    regenhash: RegenHash,
    n_extra_kernels: u32,
    rw_buffer_size: i64,
) -> AlgorithmDescriptor {
    AlgorithmDescriptor::base(name, family, binder, regenhash)
        .chained(n_extra_kernels, rw_buffer_size)
        .in_order()
}

fn fugue(name: &'static str, regenhash: RegenHash, gen_hash: FinishHash) -> AlgorithmDescriptor {
    AlgorithmDescriptor::base(name, Family::Fugue, BinderKind::Sph, regenhash)
        .multipliers(1, 256, 256)
        .finish(gen_hash)
}

fn blake(
    name: &'static str,
    family: Family,
    regenhash: RegenHash,
    precalc: PrecalcHash,
) -> AlgorithmDescriptor {
    AlgorithmDescriptor::base(name, family, BinderKind::Blake, regenhash)
        .chained(0, 128)
        .in_order()
        .precalc(precalc)
}

fn build_registry() -> Vec<AlgorithmDescriptor> {
    use BinderKind as B;
    use Family as F;
    use RegenHash as R;

    vec![
        scrypt("ckolivas"),
        scrypt("alexkarnew"),
        scrypt("alexkarnold"),
        scrypt("bufius"),
        scrypt("psw"),
        scrypt("zuikkis"),
        scrypt("arebyp"),
        memory_hard("neoscrypt", F::Neoscrypt, B::Neoscrypt, R::Neoscrypt),
        memory_hard("pluck", F::Pluck, B::Pluck, R::Pluck),
        AlgorithmDescriptor::base("credits", F::Credits, B::Credits, R::Credits)
            .difficulty(0xFFFF_0000_0000_0000, 0x0000_ffff)
            .chained(0, SCRATCH_DEVICE_SIZED),
        AlgorithmDescriptor::base("decred", F::Decred, B::Decred, R::Decred)
            .difficulty(0xFFFF, 0)
            .precalc(PrecalcHash::Decred)
            .finish(FinishHash::RawMerkle),
        memory_hard("yescrypt", F::Yescrypt, B::Yescrypt, R::Yescrypt),
        memory_hard("yescrypt-multi", F::YescryptMulti, B::YescryptMulti, R::Yescrypt)
            .difficulty(0xFFFF, 0x0000_ffff)
            .chained(6, SCRATCH_DEVICE_SIZED),
        quark("quarkcoin", R::Quarkcoin),
        quark("qubitcoin", R::Qubitcoin),
        quark("animecoin", R::Animecoin),
        quark("sifcoin", R::Sifcoin),
        sph("darkcoin", F::X11, R::Darkcoin),
        sph("inkcoin", F::X11, R::Inkcoin),
        sph("myriadcoin-groestl", F::X11, R::MyriadcoinGroestl),
        sph("twecoin", F::Twe, R::Twecoin).finish(FinishHash::Sha256),
        AlgorithmDescriptor::base("maxcoin", F::Keccak, B::Maxcoin, R::Maxcoin)
            .multipliers(1, 256, 1)
            .difficulty(0xFFFF, 0x0000_00ff)
            .finish(FinishHash::Sha256)
            .with_shifts(4, 15, 0x0F),
        chain("darkcoin-mod", F::X11, B::DarkcoinMod, R::Darkcoin, 10, SCRATCH_8X16),
        chain("sibcoin-mod", F::Sibcoin, B::Sibcoin, R::Sibcoin, 11, SCRATCH_8X16),
        chain("skein2", F::Skein2, B::Skein2, R::Skein2, 1, SCRATCH_8X16),
        chain("skunk", F::Skunk, B::Skunk, R::Skunk, 3, SCRATCH_8X16).precalc(PrecalcHash::Skunk),
        chain("tribus", F::Tribus, B::Tribus, R::Tribus, 1, SCRATCH_4X16)
            .precalc(PrecalcHash::Tribus),
        chain("veltor", F::Veltor, B::Veltor, R::Veltor, 3, SCRATCH_8X16),
        sph("marucoin", F::X13, R::Marucoin),
        chain("marucoin-mod", F::X13, B::MarucoinMod, R::Marucoin, 12, SCRATCH_8X16),
        chain("marucoin-modold", F::X13, B::MarucoinModOld, R::Marucoin, 10, SCRATCH_8X16),
        chain("x14", F::X14, B::X14, R::X14, 13, SCRATCH_8X16),
        chain("x14old", F::X14, B::X14Old, R::X14, 10, SCRATCH_8X16),
        chain("bitblock", F::X15, B::Bitblock, R::Bitblock, 14, SCRATCH_4X16),
        chain("bitblockold", F::X15, B::BitblockOld, R::Bitblock, 10, SCRATCH_4X16),
        chain("talkcoin-mod", F::Nist, B::TalkcoinMod, R::Talkcoin, 4, SCRATCH_8X16),
        chain("fresh", F::Fresh, B::Fresh, R::Fresh, 4, SCRATCH_4X16).multipliers(1, 256, 256),
        chain("lyra2re", F::Lyra2re, B::Lyra2re, R::Lyra2re, 4, SCRATCH_2X8)
            .multipliers(1, 128, 128)
            .precalc(PrecalcHash::Blake256),
        AlgorithmDescriptor::base("lyra2rev2", F::Lyra2rev2, B::Lyra2rev2, R::Lyra2rev2)
            .multipliers(1, 256, 256)
            .chained(6, SCRATCH_DEVICE_SIZED)
            .precalc(PrecalcHash::Blake256),
        fugue("fuguecoin", R::Fuguecoin, FinishHash::Sha256),
        fugue("groestlcoin", R::Groestlcoin, FinishHash::Sha256),
        fugue("diamond", R::Groestlcoin, FinishHash::DoubleSha256),
        AlgorithmDescriptor::base("whirlcoin", F::Whirl, B::Whirlcoin, R::Whirlcoin)
            .chained(3, SCRATCH_8X16)
            .finish(FinishHash::Sha256),
        AlgorithmDescriptor::base("whirlpoolx", F::Whirlpoolx, B::Whirlpoolx, R::Whirlpoolx)
            .in_order(),
        blake("blake256r8", F::Blakecoin, R::Blakecoin, PrecalcHash::Blakecoin)
            .difficulty(0xFFFF, 0x0000_00ff)
            .finish(FinishHash::Sha256),
        blake("blake256r14", F::Blake, R::Blake256, PrecalcHash::Blake256).difficulty(0xFFFF, 0),
        blake("vanilla", F::Vanilla, R::Blakecoin, PrecalcHash::Blakecoin)
            .difficulty(0xFFFF, 0x0000_00ff),
        AlgorithmDescriptor::base("ethash", F::Ethash, B::Ethash, R::Ethash)
            .multipliers(1 << 32, 1 << 32, 1)
            .difficulty(0xFFFF_0000_0000_0000, 0)
            .chained(0, 128),
        AlgorithmDescriptor::base("nightcap", F::Nightcap, B::Nightcap, R::Nightcap)
            .multipliers(65536, 65536, 1)
            .difficulty(0xFFFF_FFFF, 0x0000_ffff)
            .chained(0, 128),
    ]
}

pub fn registry() -> &'static [AlgorithmDescriptor] {
    static REGISTRY: OnceLock<Vec<AlgorithmDescriptor>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

/// Case-insensitive exact match, if any.
pub fn find(canonical_name: &str) -> Option<&'static AlgorithmDescriptor> {
    registry()
        .iter()
        .find(|descriptor| descriptor.name.eq_ignore_ascii_case(canonical_name))
}

/// Looks up a canonical name. Unknown names are not an error: they fall back
/// to the first table entry with a warning.
pub fn lookup(canonical_name: &str) -> &'static AlgorithmDescriptor {
    if let Some(descriptor) = find(canonical_name) {
        return descriptor;
    }
    let fallback = &registry()[0];
    warn!(
        algorithm = canonical_name,
        fallback = fallback.name,
        "algorithm not found, using {}",
        fallback.name
    );
    fallback
}
