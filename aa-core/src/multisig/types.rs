use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// How a multisig owner signs: a plain ECDSA key, or an ERC-1271 contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerType {
    Eoa,
    Contract,
}

/// Which gas values a signature commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserOpSignatureType {
    /// The upper-limit fee values carried at the front of the aggregated signature
    #[serde(rename = "UPPERLIMIT")]
    UpperLimit,
    /// The values in the UserOperation itself
    #[serde(rename = "ACTUAL")]
    Actual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigSignature {
    pub signer: Address,
    pub signature: Bytes,
    pub signer_type: SignerType,
    pub user_op_sig_type: UserOpSignatureType,
}

/// Fee values every owner signing an upper-limit signature agreed to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpperLimits {
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombineSignaturesParams {
    pub signatures: Vec<MultisigSignature>,
    pub upper_limits: UpperLimits,
}

/// An aggregated signature taken apart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSignature {
    pub upper_limits: UpperLimits,
    pub signatures: Vec<MultisigSignature>,
}

/// Signatures collected so far for a multisig UserOperation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigUserOperationContext {
    pub user_op_signature_type: UserOpSignatureType,
    #[serde(default)]
    pub signatures: Option<Vec<MultisigSignature>>,
    #[serde(default)]
    pub aggregated_signature: Option<Bytes>,
}

impl MultisigUserOperationContext {
    /// First signature of a new UserOperation
    pub fn propose() -> Self {
        Self {
            user_op_signature_type: UserOpSignatureType::UpperLimit,
            signatures: None,
            aggregated_signature: None,
        }
    }

    /// Add a signature to an operation other owners already signed
    pub fn co_sign(
        user_op_signature_type: UserOpSignatureType,
        signatures: Vec<MultisigSignature>,
        aggregated_signature: Bytes,
    ) -> Self {
        Self {
            user_op_signature_type,
            signatures: Some(signatures),
            aggregated_signature: Some(aggregated_signature),
        }
    }

    pub fn is_proposal(&self) -> bool {
        self.user_op_signature_type == UserOpSignatureType::UpperLimit
            && self.signatures.is_none()
            && self.aggregated_signature.is_none()
    }
}

/// Where an account's multisig ownership lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigDetails {
    pub plugin: Address,
    /// Used when the plugin reports a threshold of zero
    pub cached_threshold: u64,
}
