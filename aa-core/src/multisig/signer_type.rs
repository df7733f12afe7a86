use alloy::primitives::{Address, Bytes};
use opkit_core::{error::EngineError, rpc_clients::PublicRpc};

use super::{codec::SLOT_LENGTH, types::SignerType};

/// A signer is an EOA when it has no code and its signature is a plain 65-byte ECDSA signature;
/// anything else is verified through ERC-1271.
pub async fn get_signer_type(
    public: &impl PublicRpc,
    signer: Address,
    signature: &Bytes,
) -> Result<SignerType, EngineError> {
    let code = public.get_code(signer).await?;
    if code.is_empty() && signature.len() == SLOT_LENGTH {
        Ok(SignerType::Eoa)
    } else {
        Ok(SignerType::Contract)
    }
}
