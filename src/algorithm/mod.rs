use std::fmt;

use serde::Serialize;

pub mod alias;
pub mod capability;
pub mod registry;

pub use alias::{resolve, Alias, Resolution, ALIASES};
pub use capability::{Capabilities, FinishHash, PrecalcHash, RegenHash};
pub use registry::{lookup, registry, AlgorithmDescriptor, QueueProperties};

use crate::binder::BinderKind;

/// nfactor applied when neither the alias nor the user supplies one.
pub const DEFAULT_NFACTOR: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Family {
    Credits,
    Scrypt,
    NScrypt,
    X11,
    X13,
    X14,
    X15,
    Keccak,
    Quark,
    Twe,
    Fugue,
    Nist,
    Fresh,
    Whirl,
    Neoscrypt,
    Whirlpoolx,
    Lyra2re,
    Lyra2rev2,
    Pluck,
    Yescrypt,
    YescryptMulti,
    Blakecoin,
    Blake,
    Decred,
    Vanilla,
    Sibcoin,
    Skein2,
    Skunk,
    Tribus,
    Veltor,
    Ethash,
    Nightcap,
}

impl Family {
    pub fn label(self) -> &'static str {
        match self {
            Self::Credits => "Credits",
            Self::Scrypt => "Scrypt",
            Self::NScrypt => "NScrypt",
            Self::X11 => "X11",
            Self::X13 => "X13",
            Self::X14 => "X14",
            Self::X15 => "X15",
            Self::Keccak => "Keccak",
            Self::Quark => "Quarkcoin",
            Self::Twe => "Twecoin",
            Self::Fugue => "Fugue256",
            Self::Nist => "NIST",
            Self::Fresh => "Fresh",
            Self::Whirl => "Whirlcoin",
            Self::Neoscrypt => "Neoscrypt",
            Self::Whirlpoolx => "WhirlpoolX",
            Self::Lyra2re => "Lyra2RE",
            Self::Lyra2rev2 => "Lyra2REV2",
            Self::Pluck => "Pluck",
            Self::Yescrypt => "Yescrypt",
            Self::YescryptMulti => "Yescrypt-multi",
            Self::Blakecoin => "Blakecoin",
            Self::Blake => "Blake",
            Self::Decred => "Decred",
            Self::Vanilla => "Vanilla",
            Self::Sibcoin => "Sibcoin",
            Self::Skein2 => "Skein2",
            Self::Skunk => "Skunk",
            Self::Tribus => "Tribus",
            Self::Veltor => "Veltor",
            Self::Ethash => "Ethash",
            Self::Nightcap => "Nightcap",
        }
    }

    pub fn uses_dag(self) -> bool {
        matches!(self, Self::Ethash | Self::Nightcap)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-session algorithm selection: a copy of the selected descriptor plus
/// the operator's nfactor and kernel file overrides.
///
/// The family tag is derived: a scrypt config whose nfactor is not 10 is an
/// NScrypt config, and switches back when the nfactor returns to 10.
#[derive(Debug, Clone)]
pub struct AlgorithmConfig {
    settings: AlgorithmDescriptor,
    nfactor: u8,
    n: u64,
    nfactor_override: Option<u8>,
    kernelfile: Option<String>,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            settings: registry()[0].clone(),
            nfactor: 0,
            n: 1,
            nfactor_override: None,
            kernelfile: None,
        }
    }
}

impl AlgorithmConfig {
    pub fn from_name(name: &str) -> Self {
        let mut config = Self::default();
        config.select(name);
        config
    }

    /// Resolves `name`, copies the descriptor and applies the nfactor
    /// precedence: a user-set nfactor wins over the alias default. A kernel
    /// file override survives the descriptor copy.
    pub fn select(&mut self, name: &str) {
        let resolution = resolve(name);
        let nfactor = self
            .nfactor_override
            .or(resolution.default_nfactor)
            .unwrap_or(DEFAULT_NFACTOR);
        self.settings = lookup(resolution.canonical).clone();
        self.apply_nfactor(nfactor);
    }

    /// Operator nfactor override. Sticky across later `select` calls.
    pub fn set_nfactor(&mut self, nfactor: u8) {
        self.nfactor_override = (nfactor > 0).then_some(nfactor);
        self.apply_nfactor(nfactor);
    }

    pub fn set_kernelfile(&mut self, kernelfile: impl Into<String>) {
        let kernelfile = kernelfile.into();
        self.kernelfile = (!kernelfile.is_empty()).then_some(kernelfile);
    }

    fn apply_nfactor(&mut self, nfactor: u8) {
        self.nfactor = nfactor;
        self.n = 1u64 << u32::from(nfactor.min(63));
        self.settings.family = match self.settings.family {
            Family::Scrypt if nfactor != DEFAULT_NFACTOR => Family::NScrypt,
            Family::NScrypt if nfactor == DEFAULT_NFACTOR => Family::Scrypt,
            family => family,
        };
    }

    pub fn name(&self) -> &'static str {
        self.settings.name
    }

    pub fn family(&self) -> Family {
        self.settings.family
    }

    pub fn nfactor(&self) -> u8 {
        self.nfactor
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn kernelfile(&self) -> Option<&str> {
        self.kernelfile.as_deref()
    }

    /// Kernel source base name: the override if set, else the algorithm name.
    pub fn kernel_source(&self) -> &str {
        self.kernelfile().unwrap_or(self.settings.name)
    }

    pub fn descriptor(&self) -> &AlgorithmDescriptor {
        &self.settings
    }

    pub fn binder(&self) -> BinderKind {
        self.settings.capabilities.queue_kernel
    }
}

/// Identity is `(name, kernel file, nfactor)`; other descriptor fields do not
/// take part.
impl PartialEq for AlgorithmConfig {
    fn eq(&self, other: &Self) -> bool {
        self.settings.name.eq_ignore_ascii_case(other.settings.name)
            && self.kernelfile == other.kernelfile
            && self.nfactor == other.nfactor
    }
}

impl Eq for AlgorithmConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_default_nfactor_applies_to_fresh_config() {
        let config = AlgorithmConfig::from_name("nscrypt");
        assert_eq!(config.name(), "ckolivas");
        assert_eq!(config.nfactor(), 11);
        assert_eq!(config.n(), 2048);
        assert_eq!(config.family(), Family::NScrypt);
    }

    #[test]
    fn user_nfactor_wins_over_alias_default() {
        let mut config = AlgorithmConfig::default();
        config.set_nfactor(14);
        config.select("nscrypt");
        assert_eq!(config.nfactor(), 14);
        assert_eq!(config.n(), 1 << 14);

        config.select("scrypt");
        assert_eq!(config.nfactor(), 14);
    }

    #[test]
    fn alias_default_replaces_previous_selection_default() {
        let mut config = AlgorithmConfig::from_name("scrypt");
        assert_eq!(config.nfactor(), 10);
        config.select("adaptive-nfactor");
        assert_eq!(config.nfactor(), 11);
    }

    #[test]
    fn nfactor_toggles_scrypt_family() {
        let mut config = AlgorithmConfig::from_name("scrypt");
        assert_eq!(config.family(), Family::Scrypt);
        config.set_nfactor(10);
        assert_eq!(config.family(), Family::Scrypt);
        config.set_nfactor(7);
        assert_eq!(config.family(), Family::NScrypt);
        config.set_nfactor(10);
        assert_eq!(config.family(), Family::Scrypt);
    }

    #[test]
    fn nfactor_does_not_reclassify_other_families() {
        let mut config = AlgorithmConfig::from_name("neoscrypt");
        config.set_nfactor(7);
        assert_eq!(config.family(), Family::Neoscrypt);
    }

    #[test]
    fn kernelfile_override_survives_reselect() {
        let mut config = AlgorithmConfig::default();
        config.set_kernelfile("custom-x11");
        config.select("x11");
        assert_eq!(config.kernelfile(), Some("custom-x11"));
        assert_eq!(config.kernel_source(), "custom-x11");
        config.select("x13");
        assert_eq!(config.name(), "marucoin-mod");
        assert_eq!(config.kernelfile(), Some("custom-x11"));
    }

    #[test]
    fn equality_ignores_descriptor_fields() {
        let left = AlgorithmConfig::from_name("darkcoin-mod");
        let mut right = left.clone();
        right.settings.diff_multiplier2 = 999;
        right.settings.n_extra_kernels = 0;
        assert_eq!(left, right);

        let mut other_file = left.clone();
        other_file.set_kernelfile("other");
        assert_ne!(left, other_file);

        let mut other_nfactor = left.clone();
        other_nfactor.set_nfactor(12);
        assert_ne!(left, other_nfactor);

        assert_ne!(left, AlgorithmConfig::from_name("x13"));
    }
}
