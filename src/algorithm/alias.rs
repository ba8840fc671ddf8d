/// User-facing name mapped to a canonical registry name, optionally carrying
/// a default nfactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alias {
    pub alias: &'static str,
    pub canonical: &'static str,
    pub nfactor: Option<u8>,
}

const fn alias(alias: &'static str, canonical: &'static str) -> Alias {
    Alias {
        alias,
        canonical,
        nfactor: None,
    }
}

const fn alias_nf(alias: &'static str, canonical: &'static str, nfactor: u8) -> Alias {
    Alias {
        alias,
        canonical,
        nfactor: Some(nfactor),
    }
}

pub const ALIASES: &[Alias] = &[
    alias_nf("scrypt", "ckolivas", 10),
    alias_nf("adaptive-n-factor", "ckolivas", 11),
    alias_nf("adaptive-nfactor", "ckolivas", 11),
    alias_nf("nscrypt", "ckolivas", 11),
    alias_nf("adaptive-nscrypt", "ckolivas", 11),
    alias_nf("adaptive-n-scrypt", "ckolivas", 11),
    alias("x11mod", "darkcoin-mod"),
    alias("x11", "darkcoin-mod"),
    alias("x13mod", "marucoin-mod"),
    alias("x13", "marucoin-mod"),
    alias("x13old", "marucoin-modold"),
    alias("x13modold", "marucoin-modold"),
    alias("x15mod", "bitblock"),
    alias("x15", "bitblock"),
    alias("x15modold", "bitblockold"),
    alias("x15old", "bitblockold"),
    alias("nist5", "talkcoin-mod"),
    alias("keccak", "maxcoin"),
    alias("whirlpool", "whirlcoin"),
    alias("lyra2", "lyra2re"),
    alias("lyra2v2", "lyra2rev2"),
    alias("blakecoin", "blake256r8"),
    alias("blake", "blake256r14"),
    alias("sibcoin", "sibcoin-mod"),
    alias("sib", "sibcoin-mod"),
    alias("doubleskein", "skein2"),
    alias("woodcoin", "skein2"),
    alias("skunkhash", "skunk"),
    alias("signatum", "skunk"),
    alias("thorsriddle", "veltor"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub canonical: &'a str,
    pub default_nfactor: Option<u8>,
}

/// Case-insensitive alias lookup. Names that are not aliases pass through
/// unchanged with no default nfactor.
pub fn resolve(name: &str) -> Resolution<'_> {
    match ALIASES
        .iter()
        .find(|entry| entry.alias.eq_ignore_ascii_case(name))
    {
        Some(entry) => Resolution {
            canonical: entry.canonical,
            default_nfactor: entry.nfactor,
        },
        None => Resolution {
            canonical: name,
            default_nfactor: None,
        },
    }
}
