use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::userop::UserOpError;

/// Largest nonce key accepted by the builder: `2^152 - 1`.
///
/// The EntryPoint reserves 192 bits for the key, modular accounts use the low 40 of those for
/// the validation entity and flags.
pub const MAX_NONCE_KEY: U256 = U256::from_limbs([u64::MAX, u64::MAX, (1u64 << 24) - 1, 0]);

/// A validated nonce key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "U256", into = "U256")]
pub struct NonceKey(U256);

impl NonceKey {
    pub const ZERO: Self = Self(U256::ZERO);

    /// Validate `key` against [`MAX_NONCE_KEY`].
    pub fn check(key: U256) -> Result<(), UserOpError> {
        if key > MAX_NONCE_KEY {
            return Err(UserOpError::InvalidNonceKey { key });
        }
        Ok(())
    }

    pub fn new(key: U256) -> Result<Self, UserOpError> {
        Self::check(key)?;
        Ok(Self(key))
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// Full nonce for this key at sequence `sequence`: `key << 64 | sequence`.
    pub fn nonce_at(&self, sequence: u64) -> U256 {
        (self.0 << 64) | U256::from(sequence)
    }

    /// Key packing used by modular accounts:
    /// `(key << 40) + (entity_id << 8) + global_flag`.
    pub fn modular_account_key(&self, entity_id: u32, is_global_validation: bool) -> U256 {
        (self.0 << 40) + (U256::from(entity_id) << 8) + U256::from(is_global_validation as u8)
    }
}

impl TryFrom<U256> for NonceKey {
    type Error = UserOpError;

    fn try_from(value: U256) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonceKey> for U256 {
    fn from(key: NonceKey) -> Self {
        key.0
    }
}
