use crate::ident::Ident;
use crate::result::Error;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

const DOMAIN_TAG: &[u8] = b"TACMESH_CONTROL_FLOW_MESHING";

/// A 256-bit seed from which every random meshing decision is derived.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    inner: [u8; 32],
}

impl Seed {
    /// Fresh seed from the thread-local generator, for runs without `--seed`.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self { inner: seed }
    }

    /// Parses 64 hex digits, optionally prefixed with `0x`.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        if hex.len() != 64 {
            return Err(Error::InvalidSeedLength(hex.len()));
        }

        let mut inner = [0u8; 32];
        hex::decode_to_slice(hex, &mut inner).map_err(|_| Error::InvalidSeedHex)?;
        Ok(Self { inner })
    }

    /// Hex form as printed in reports; round-trips through [`Seed::from_hex`].
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.inner))
    }

    /// Create a deterministic RNG for the whole routine.
    ///
    /// The same seed always yields the same generator, whichever way the seed bytes were
    /// produced.
    pub fn create_deterministic_rng(&self) -> StdRng {
        self.rng_with_salt(&[])
    }

    /// Create the generator for one function.
    ///
    /// Salting with the function identifier keeps each function's stream independent of the
    /// order in which parallel workers pick functions up.
    pub fn function_rng(&self, function: &Ident) -> StdRng {
        self.rng_with_salt(function.as_uuid().as_bytes())
    }

    fn rng_with_salt(&self, salt: &[u8]) -> StdRng {
        let mut hasher = Sha3_256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update(self.inner);
        hasher.update(salt);
        let seed_hash: [u8; 32] = hasher.finalize().into();

        StdRng::from_seed(seed_hash)
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Seed").field(&self.to_hex()).finish()
    }
}
