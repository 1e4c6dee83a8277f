//! Replica identity.
//!
//! An [`Owner`] is derived from a recovery phrase. Devices restored from the
//! same phrase share the owner id and encryption key; each device still keeps
//! its own [`crate::NodeId`] for timestamps.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const PHRASE_GROUPS: usize = 8;
const GROUP_LEN: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid mnemonic: {0}")]
pub struct MnemonicError(String);

/// Recovery phrase: eight dash-separated groups of four hex digits.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mnemonic(String);

impl Mnemonic {
    /// Generate a phrase from 128 bits of entropy.
    pub fn generate() -> Self {
        let mut entropy = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut entropy);
        let hex: String = entropy.iter().map(|b| format!("{:02x}", b)).collect();
        let groups: Vec<&str> = (0..PHRASE_GROUPS)
            .map(|i| &hex[i * GROUP_LEN..(i + 1) * GROUP_LEN])
            .collect();
        Mnemonic(groups.join("-"))
    }

    /// Normalize and validate a user-supplied phrase.
    pub fn parse(phrase: &str) -> Result<Self, MnemonicError> {
        let normalized = phrase.trim().to_ascii_lowercase();
        let groups: Vec<&str> = normalized.split(['-', ' ']).filter(|g| !g.is_empty()).collect();
        let valid = groups.len() == PHRASE_GROUPS
            && groups
                .iter()
                .all(|g| g.len() == GROUP_LEN && g.bytes().all(|b| b.is_ascii_hexdigit()));
        if !valid {
            return Err(MnemonicError(phrase.to_string()));
        }
        Ok(Mnemonic(groups.join("-")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mnemonic(..)")
    }
}

/// Public identifier of an owner, shared by all of its devices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The durable identity of a local store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub mnemonic: Mnemonic,
    pub encryption_key: [u8; 32],
}

impl Owner {
    /// Derive the owner id and encryption key from a phrase.
    pub fn from_mnemonic(mnemonic: Mnemonic) -> Self {
        let id_digest = derive(b"rowsync/owner-id", &mnemonic);
        let id = id_digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        let encryption_key = derive(b"rowsync/encryption-key", &mnemonic);
        Self {
            id: OwnerId(id),
            mnemonic,
            encryption_key,
        }
    }

    pub fn generate() -> Self {
        Self::from_mnemonic(Mnemonic::generate())
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner").field("id", &self.id).finish_non_exhaustive()
    }
}

fn derive(label: &[u8], mnemonic: &Mnemonic) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update([0u8]);
    hasher.update(mnemonic.as_str().as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_phrase_same_owner() {
        let m = Mnemonic::generate();
        let restored = Mnemonic::parse(&m.as_str().to_uppercase()).unwrap();
        assert_eq!(Owner::from_mnemonic(m), Owner::from_mnemonic(restored));
    }

    #[test]
    fn test_distinct_phrases_distinct_owners() {
        let a = Owner::generate();
        let b = Owner::generate();
        assert_ne!(a.id, b.id);
        assert_ne!(a.encryption_key, b.encryption_key);
        assert_eq!(a.id.0.len(), 32);
    }

    #[test]
    fn test_parse_rejects_bad_phrases() {
        assert!(Mnemonic::parse("").is_err());
        assert!(Mnemonic::parse("abcd-efgh").is_err());
        assert!(Mnemonic::parse("0123 4567 89ab cdef 0123 4567 89ab cdef").is_ok());
    }
}
