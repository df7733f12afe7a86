use alloy::{
    primitives::Address,
    sol,
    sol_types::SolCall,
};
use opkit_core::{
    error::{ContractErrorToEngineError, EngineError},
    rpc_clients::PublicRpc,
};

pub mod codec;
mod middleware;
mod signer_type;
mod types;

pub use codec::{
    SignedHashes, combine_signatures, format_signatures, parse_upper_limits,
    split_aggregated_signature, split_for_user_operation, with_upper_limits,
};
pub use middleware::MultisigUserOpSigner;
pub use signer_type::get_signer_type;
pub use types::{
    CombineSignaturesParams, MultisigDetails, MultisigSignature, MultisigUserOperationContext,
    SignerType, SplitSignature, UpperLimits, UserOpSignatureType,
};

sol! {
    function ownershipInfoOf(address account) view returns (address[] owners, uint256 threshold);
}

/// Signatures `account` needs, read from the plugin. A zero threshold falls back to the cached
/// one.
pub async fn get_threshold(
    public: &impl PublicRpc,
    details: &MultisigDetails,
    account: Address,
) -> Result<u64, EngineError> {
    let output = public
        .call(
            details.plugin,
            ownershipInfoOfCall { account }.abi_encode().into(),
        )
        .await?;
    let info = ownershipInfoOfCall::abi_decode_returns(&output)
        .map_err(|e| e.to_engine_error(public.chain_id(), Some(details.plugin)))?;

    if info.threshold.is_zero() {
        return Ok(details.cached_threshold);
    }
    let threshold = u64::try_from(info.threshold).map_err(|_| EngineError::ValidationError {
        message: format!("multisig threshold {} is out of range", info.threshold),
    })?;
    tracing::debug!(%account, threshold, owners = info.owners.len(), "multisig threshold");
    Ok(threshold)
}
