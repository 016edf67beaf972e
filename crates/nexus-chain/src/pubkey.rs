//! Base58 key/hash newtypes and program-derived address search.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::ChainError;

pub const PUBKEY_LEN: usize = 32;
pub const MAX_SEEDS: usize = 16;
pub const MAX_SEED_LEN: usize = 32;
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

macro_rules! base58_bytes32 {
    ($name:ident, $label:literal) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; PUBKEY_LEN]);

        impl $name {
            pub const fn new_from_array(bytes: [u8; PUBKEY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn try_from_slice(bytes: &[u8]) -> Result<Self, ChainError> {
                let array: [u8; PUBKEY_LEN] = bytes.try_into().map_err(|_| {
                    ChainError::InvalidPubkey(format!(
                        "{} must be {PUBKEY_LEN} bytes, got {}",
                        $label,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            pub fn to_bytes(self) -> [u8; PUBKEY_LEN] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8; PUBKEY_LEN] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&bs58::encode(self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }

        impl FromStr for $name {
            type Err = ChainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let bytes = bs58::decode(value.trim()).into_vec().map_err(|error| {
                    ChainError::InvalidPubkey(format!("{} `{value}`: {error}", $label))
                })?;
                Self::try_from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

base58_bytes32!(Pubkey, "public key");
base58_bytes32!(Hash, "blockhash");

impl Pubkey {
    /// True when the bytes decompress to an ed25519 point, i.e. a key that
    /// could have a private counterpart.
    pub fn is_on_curve(&self) -> bool {
        VerifyingKey::from_bytes(&self.0).is_ok()
    }
}

/// Hashes seeds and program id into an address, rejecting results on the curve.
pub fn create_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Result<Pubkey, ChainError> {
    if seeds.len() > MAX_SEEDS {
        return Err(ChainError::InvalidSeeds(format!(
            "at most {MAX_SEEDS} seeds are allowed, got {}",
            seeds.len()
        )));
    }
    if let Some(seed) = seeds.iter().find(|seed| seed.len() > MAX_SEED_LEN) {
        return Err(ChainError::InvalidSeeds(format!(
            "seed of {} bytes exceeds {MAX_SEED_LEN}",
            seed.len()
        )));
    }

    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);
    let candidate = Pubkey::try_from_slice(&hasher.finalize())?;
    if candidate.is_on_curve() {
        return Err(ChainError::AddressOnCurve);
    }
    Ok(candidate)
}

/// Searches bumps from 255 downward and returns the first off-curve address.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), ChainError> {
    if seeds.len() >= MAX_SEEDS {
        return Err(ChainError::InvalidSeeds(format!(
            "at most {} seeds leave room for the bump",
            MAX_SEEDS - 1
        )));
    }
    for bump in (1..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = seeds.to_vec();
        with_bump.push(&bump_seed);
        match create_program_address(&with_bump, program_id) {
            Ok(address) => return Ok((address, bump)),
            Err(ChainError::AddressOnCurve) => continue,
            Err(error) => return Err(error),
        }
    }
    Err(ChainError::NoViableBump)
}

#[derive(Clone, Copy, PartialEq, Eq)]
/// Ed25519 signature bytes, shown in base58.
pub struct Signature([u8; 64]);

impl Signature {
    pub const LEN: usize = 64;

    pub const fn new_from_array(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 64] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn is_empty_slot(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0; 64])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}
