use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::binder::BinderKind;

/// Host-side recompute routine the verifier runs on a candidate nonce.
/// Named here, implemented by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegenHash {
    Scrypt,
    Neoscrypt,
    Pluck,
    Credits,
    Decred,
    Yescrypt,
    Quarkcoin,
    Qubitcoin,
    Animecoin,
    Sifcoin,
    Darkcoin,
    Inkcoin,
    MyriadcoinGroestl,
    Twecoin,
    Maxcoin,
    Sibcoin,
    Skein2,
    Skunk,
    Tribus,
    Veltor,
    Marucoin,
    X14,
    Bitblock,
    Talkcoin,
    Fresh,
    Lyra2re,
    Lyra2rev2,
    Fuguecoin,
    Groestlcoin,
    Whirlcoin,
    Whirlpoolx,
    Blakecoin,
    Blake256,
    Ethash,
    Nightcap,
}

/// Optional partial precompute that fills [`crate::work::BlockContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrecalcHash {
    Decred,
    Skunk,
    Tribus,
    Blake256,
    Blakecoin,
}

/// Finishing transform used by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishHash {
    DoubleSha256,
    Sha256,
    RawMerkle,
}

impl FinishHash {
    pub fn apply(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::DoubleSha256 => Sha256::digest(Sha256::digest(data)).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::RawMerkle => data.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub regenhash: RegenHash,
    pub precalc_hash: Option<PrecalcHash>,
    pub queue_kernel: BinderKind,
    pub gen_hash: FinishHash,
}
