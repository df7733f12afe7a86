use std::{collections::HashMap, sync::OnceLock};

use alloy::primitives::U256;

use crate::{
    constants::{CANONICAL_ENTRYPOINT_CHAINS, L1_DATA_FEE_CHAINS},
    error::EngineError,
    fees::{
        math::Multiplier,
        options::{FeeOptionsField, UserOperationFeeOptions},
    },
};

static DEFAULT_FEE_POLICIES: OnceLock<FeePolicyTable> = OnceLock::new();

/// Default fee options keyed by chain id.
///
/// Populated once per process, then only read.
#[derive(Debug, Clone, Default)]
pub struct FeePolicyTable {
    policies: HashMap<u64, UserOperationFeeOptions>,
}

fn multiplier(numerator: u64, denominator: u64) -> Option<FeeOptionsField> {
    Multiplier::from_rational(U256::from(numerator), U256::from(denominator))
        .ok()
        .map(FeeOptionsField::with_multiplier)
}

impl FeePolicyTable {
    /// `maxFeePerGas x1.5` and `maxPriorityFeePerGas x1.05` on every known chain, plus
    /// `preVerificationGas x1.05` where the L1 data fee is charged through it.
    pub fn builtin() -> Self {
        let policies = CANONICAL_ENTRYPOINT_CHAINS
            .iter()
            .map(|&chain_id| {
                let mut options = UserOperationFeeOptions {
                    max_fee_per_gas: multiplier(3, 2),
                    max_priority_fee_per_gas: multiplier(105, 100),
                    ..Default::default()
                };
                if L1_DATA_FEE_CHAINS.contains(&chain_id) {
                    options.pre_verification_gas = multiplier(105, 100);
                }
                (chain_id, options)
            })
            .collect();
        Self { policies }
    }

    /// Replace the entries for the given chains.
    pub fn with_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (u64, UserOperationFeeOptions)>,
    ) -> Result<Self, EngineError> {
        for (chain_id, options) in overrides {
            options.validate()?;
            self.policies.insert(chain_id, options);
        }
        Ok(self)
    }

    /// Fee options for `chain_id`; the identity policy when the chain is unknown.
    pub fn get(&self, chain_id: u64) -> UserOperationFeeOptions {
        self.policies.get(&chain_id).cloned().unwrap_or_default()
    }

    /// Install `table` as the process-wide default. Only the first call wins.
    pub fn install(table: FeePolicyTable) -> Result<(), EngineError> {
        DEFAULT_FEE_POLICIES
            .set(table)
            .map_err(|_| EngineError::InternalError {
                message: "default fee policies are already initialized".to_string(),
            })
    }

    /// The process-wide table, initialized with [`FeePolicyTable::builtin`] on first use.
    pub fn global() -> &'static FeePolicyTable {
        DEFAULT_FEE_POLICIES.get_or_init(FeePolicyTable::builtin)
    }
}

/// Default fee options for `chain_id` from the process-wide table.
pub fn default_fee_options(chain_id: u64) -> UserOperationFeeOptions {
    FeePolicyTable::global().get(chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_chains_get_the_identity_policy() {
        let table = FeePolicyTable::builtin();
        let options = table.get(999_999);
        assert_eq!(options, UserOperationFeeOptions::default());

        let estimate = U256::from(1_000);
        let identity = FeeOptionsField::with_multiplier(Multiplier::IDENTITY);
        assert_eq!(identity.apply(estimate).unwrap(), estimate);
    }

    #[test]
    fn builtin_policies_bump_fees() {
        let table = FeePolicyTable::builtin();

        let mainnet = table.get(1);
        let max_fee = mainnet.max_fee_per_gas.unwrap();
        assert_eq!(max_fee.apply(U256::from(100)).unwrap(), U256::from(150));
        assert!(mainnet.pre_verification_gas.is_none());

        let arbitrum = table.get(42161);
        let pvg = arbitrum.pre_verification_gas.unwrap();
        assert_eq!(pvg.apply(U256::from(100)).unwrap(), U256::from(105));
    }

    #[test]
    fn overrides_replace_whole_entries() {
        let custom = UserOperationFeeOptions {
            max_priority_fee_per_gas: Some(FeeOptionsField::with_percentage(20)),
            ..Default::default()
        };
        let table = FeePolicyTable::builtin()
            .with_overrides([(1, custom.clone())])
            .unwrap();
        assert_eq!(table.get(1), custom);

        let invalid = UserOperationFeeOptions {
            call_gas_limit: Some(FeeOptionsField::with_percentage(5000)),
            ..Default::default()
        };
        assert!(FeePolicyTable::default().with_overrides([(1, invalid)]).is_err());
    }
}
