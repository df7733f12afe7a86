use alloy::primitives::U256;
use opkit_aa_types::{UserOperationStruct, VersionedUserOp};
use opkit_core::{
    chain::Chain,
    error::EngineError,
    fees::{Multiplier, RoundingMode, UserOperationFeeOptions, ValueOrMultiplier},
};

use super::{
    builder::{SentUserOperation, UserOpBuilder},
    middleware::{
        BuildState, DefaultFeeEstimator, Middleware, MiddlewareArgs, UserOperationOverrides,
    },
};
use crate::smart_account::SmartAccount;

/// Smallest bump bundlers accept for a replacement: 10%
pub fn minimum_bump() -> Result<Multiplier, EngineError> {
    Multiplier::from_rational(U256::from(11), U256::from(10))
}

/// `old × 1.1` rounded up, and strictly above `old`.
pub fn bump_fee(old: U256) -> Result<U256, EngineError> {
    let bumped = minimum_bump()?.apply(old, RoundingMode::RoundUp)?;
    let strictly_higher = old
        .checked_add(U256::from(1))
        .ok_or_else(|| EngineError::FeeOverflowError {
            message: format!("cannot bump fee {old}"),
        })?;
    Ok(bumped.max(strictly_higher))
}

/// The fresh operation a replacement starts from: same sender, nonce, calldata and factory.
fn replacement_base(
    user_operation: &VersionedUserOp,
    account: &impl SmartAccount,
) -> Result<UserOperationStruct, EngineError> {
    let previous = user_operation.to_struct()?;
    Ok(UserOperationStruct {
        sender: previous.sender,
        nonce: previous.nonce,
        factory: previous.factory,
        factory_data: previous.factory_data,
        call_data: previous.call_data,
        signature: Some(account.dummy_signature()),
        ..Default::default()
    })
}

/// Replace an unconfirmed operation with one at the same nonce and higher fees, and submit it
/// once.
///
/// Fees are the current estimate of the builder's fee stage, raised to at least 10% over the
/// previous values. `overrides` apply to everything else; the nonce and fees are pinned.
#[tracing::instrument(skip_all, fields(chain_id = builder.chain().chain_id(), sender = %user_operation.sender(), nonce = %user_operation.nonce()))]
pub async fn drop_and_replace<C: Chain, A: SmartAccount>(
    builder: &UserOpBuilder<'_, C, A>,
    account: &A,
    user_operation: &VersionedUserOp,
    overrides: &UserOperationOverrides,
    fee_options: Option<&UserOperationFeeOptions>,
) -> Result<SentUserOperation, EngineError> {
    let chain = builder.chain();
    let base = replacement_base(user_operation, account)?;

    let chain_fee_options = chain.fee_options();
    let fee_options = fee_options.unwrap_or(&chain_fee_options);
    let estimate_overrides = UserOperationOverrides {
        state_overrides: overrides.state_overrides.clone(),
        ..Default::default()
    };
    let args = MiddlewareArgs {
        account,
        chain,
        overrides: &estimate_overrides,
        fee_options,
    };
    let estimated = match builder
        .stack()
        .stages()
        .find(|stage| stage.state() == BuildState::ResolvingFees)
    {
        Some(stage) => stage.run(base.clone(), &args).await?,
        None => DefaultFeeEstimator.run(base.clone(), &args).await?,
    };

    let max_fee_per_gas = estimated
        .max_fee_per_gas
        .unwrap_or_default()
        .max(bump_fee(user_operation.max_fee_per_gas())?);
    let max_priority_fee_per_gas = estimated
        .max_priority_fee_per_gas
        .unwrap_or_default()
        .max(bump_fee(user_operation.max_priority_fee_per_gas())?);

    tracing::debug!(
        old_max_fee_per_gas = %user_operation.max_fee_per_gas(),
        %max_fee_per_gas,
        old_max_priority_fee_per_gas = %user_operation.max_priority_fee_per_gas(),
        %max_priority_fee_per_gas,
        "replacement fees"
    );

    let replacement_overrides = UserOperationOverrides {
        nonce: Some(user_operation.nonce()),
        max_fee_per_gas: Some(ValueOrMultiplier::Value(max_fee_per_gas)),
        max_priority_fee_per_gas: Some(ValueOrMultiplier::Value(max_priority_fee_per_gas)),
        ..overrides.clone()
    };
    let replacement = builder
        .build_from(base, Some(account), &replacement_overrides, Some(fee_options))
        .await?;
    builder.submit(replacement).await
}
