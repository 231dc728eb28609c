//! Cached PBKDF2 key derivation.
//!
//! Every envelope carries its own random salt, so each encrypt/decrypt
//! needs a per-salt derived key. Derivation is deliberately slow; the
//! cache memoizes it keyed by a one-way hash of master key and salt, so
//! repeated operations against the same envelope family skip the PBKDF2
//! work entirely.

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::MasterKey;
use crate::cache::TierCache;

/// PBKDF2-HMAC-SHA256 iteration count.
///
/// Security parameter. Lower than the common 100k baseline: per-call
/// derivation sits on the OAuth callback path, and the master key is
/// random rather than a password. Overridable via
/// `CryptoConfig::pbkdf2_iterations`.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 10_000;

pub const DERIVED_KEY_LEN: usize = 32;

/// A PBKDF2-derived AES key. Zeroed on drop, including on cache eviction.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; DERIVED_KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

/// Cache key: SHA-256(master_key || salt), hex. One-way, so the cache key
/// itself reveals nothing about the master key.
fn cache_key(master: &MasterKey, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(master.as_bytes());
    hasher.update(salt);
    hex::encode(hasher.finalize())
}

/// Derives a 32-byte key from the master key and salt, consulting the
/// cache first when one is supplied (key rotation derives against a
/// short-lived key and passes `None` to keep it out of the shared cache).
pub fn derive_key(
    master: &MasterKey,
    salt: &[u8],
    iterations: u32,
    cache: Option<&TierCache<String, DerivedKey>>,
) -> DerivedKey {
    let lookup = cache.map(|c| {
        let key = cache_key(master, salt);
        (c, key)
    });

    if let Some((cache, key)) = &lookup {
        if let Some(found) = cache.get(key) {
            return found;
        }
    }

    let mut out = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    pbkdf2_hmac::<Sha256>(master.as_bytes(), salt, iterations, &mut out[..]);
    let derived = DerivedKey(out);

    if let Some((cache, key)) = lookup {
        cache.set(key, derived.clone());
    }

    derived
}
