//! Byte layout of multisig UserOperation signatures.
//!
//! ```text
//! 0..32    upper limit preVerificationGas
//! 32..64   upper limit maxFeePerGas
//! 64..96   upper limit maxPriorityFeePerGas
//! 96..     k slots of 65 bytes: EOA slots ascending by signer, then contract slots
//! ```
//!
//! An EOA slot is `r ‖ s ‖ v` with `v` in 27/28, plus 32 when the signature covers the actual
//! gas values. A contract slot is `pad32(signer) ‖ signature word ‖ flag` with flag 0 for
//! upper limits and 32 for actual values.

use alloy::primitives::{Address, B256, Bytes, Signature, U256, eip191_hash_message};
use opkit_aa_types::UserOperationStruct;
use opkit_core::{entrypoint::EntrypointDetails, error::EngineError};

use super::types::{
    CombineSignaturesParams, MultisigSignature, SignerType, SplitSignature, UpperLimits,
    UserOpSignatureType,
};

pub const SLOT_LENGTH: usize = 65;
pub const UPPER_LIMITS_LENGTH: usize = 96;

/// Added to `v` (EOA) or used as the flag byte (contract) for [`UserOpSignatureType::Actual`]
const ACTUAL_FLAG: u8 = 32;

fn sig_type_flag(sig_type: UserOpSignatureType) -> u8 {
    match sig_type {
        UserOpSignatureType::UpperLimit => 0,
        UserOpSignatureType::Actual => ACTUAL_FLAG,
    }
}

fn invalid_context(message: impl Into<String>) -> EngineError {
    EngineError::InvalidContextSignatureError {
        message: message.into(),
    }
}

fn invalid_aggregated(message: impl Into<String>) -> EngineError {
    EngineError::InvalidAggregatedSignatureError {
        message: message.into(),
    }
}

fn encode_slot(sig: &MultisigSignature) -> Result<[u8; SLOT_LENGTH], EngineError> {
    let flag = sig_type_flag(sig.user_op_sig_type);
    let mut slot = [0u8; SLOT_LENGTH];

    match sig.signer_type {
        SignerType::Eoa => {
            if sig.signature.len() != SLOT_LENGTH {
                return Err(invalid_context(format!(
                    "EOA signature of {} is {} bytes, expected 65",
                    sig.signer,
                    sig.signature.len()
                )));
            }
            let v = match sig.signature[64] {
                0 | 27 => 27,
                1 | 28 => 28,
                other => {
                    return Err(invalid_context(format!(
                        "EOA signature of {} has invalid v {other}",
                        sig.signer
                    )));
                }
            };
            slot[..64].copy_from_slice(&sig.signature[..64]);
            slot[64] = v + flag;
        }
        SignerType::Contract => {
            // A slot carries one word; dynamic-length contract signatures have no slot layout.
            if sig.signature.len() > 32 {
                return Err(invalid_context(format!(
                    "contract signature of {} is {} bytes; contract signers must sign with a \
                     single 32-byte word, dynamic-length contract signatures are not supported",
                    sig.signer,
                    sig.signature.len()
                )));
            }
            if sig.signature.len() != 32 {
                return Err(invalid_context(format!(
                    "contract signature of {} is {} bytes, expected 32",
                    sig.signer,
                    sig.signature.len()
                )));
            }
            slot[12..32].copy_from_slice(sig.signer.as_slice());
            slot[32..64].copy_from_slice(&sig.signature);
            slot[64] = flag;
        }
    }
    Ok(slot)
}

/// Concatenate signature slots in canonical order: EOA signers ascending by address, then
/// contract signers ascending by address.
pub fn format_signatures(signatures: &[MultisigSignature]) -> Result<Bytes, EngineError> {
    let mut ordered: Vec<&MultisigSignature> = signatures.iter().collect();
    ordered.sort_by_key(|sig| (sig.signer_type == SignerType::Contract, sig.signer));

    let mut encoded = Vec::with_capacity(ordered.len() * SLOT_LENGTH);
    for sig in ordered {
        encoded.extend_from_slice(&encode_slot(sig)?);
    }
    Ok(encoded.into())
}

/// Upper limits followed by the formatted signatures.
pub fn combine_signatures(params: &CombineSignaturesParams) -> Result<Bytes, EngineError> {
    if params.signatures.is_empty() {
        return Err(EngineError::MultisigMissingSignatureError);
    }

    let limits = &params.upper_limits;
    let mut combined = Vec::with_capacity(
        UPPER_LIMITS_LENGTH + params.signatures.len() * SLOT_LENGTH,
    );
    combined.extend_from_slice(&limits.pre_verification_gas.to_be_bytes::<32>());
    combined.extend_from_slice(&limits.max_fee_per_gas.to_be_bytes::<32>());
    combined.extend_from_slice(&limits.max_priority_fee_per_gas.to_be_bytes::<32>());
    combined.extend_from_slice(&format_signatures(&params.signatures)?);
    Ok(combined.into())
}

/// Read the three upper-limit words at the front of an aggregated signature.
pub fn parse_upper_limits(aggregated: &[u8]) -> Result<UpperLimits, EngineError> {
    if aggregated.len() < UPPER_LIMITS_LENGTH {
        return Err(invalid_aggregated(format!(
            "{} bytes is too short to hold the upper limits",
            aggregated.len()
        )));
    }
    Ok(UpperLimits {
        pre_verification_gas: U256::from_be_slice(&aggregated[..32]),
        max_fee_per_gas: U256::from_be_slice(&aggregated[32..64]),
        max_priority_fee_per_gas: U256::from_be_slice(&aggregated[64..96]),
    })
}

/// The operation exactly as upper-limit signers signed it
pub fn with_upper_limits(
    user_op: &UserOperationStruct,
    limits: &UpperLimits,
) -> UserOperationStruct {
    UserOperationStruct {
        pre_verification_gas: Some(limits.pre_verification_gas),
        max_fee_per_gas: Some(limits.max_fee_per_gas),
        max_priority_fee_per_gas: Some(limits.max_priority_fee_per_gas),
        ..user_op.clone()
    }
}

/// Hashes each signature type commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedHashes {
    pub upper_limit: B256,
    pub actual: B256,
}

impl SignedHashes {
    /// Hash `user_op` as is and with `limits` substituted for its fee values.
    pub fn compute(
        user_op: &UserOperationStruct,
        limits: &UpperLimits,
        entrypoint: &EntrypointDetails,
        chain_id: u64,
    ) -> Result<Self, EngineError> {
        let hash = |uo: &UserOperationStruct| -> Result<B256, EngineError> {
            let versioned = uo
                .into_versioned(entrypoint.version)
                .map_err(|e| EngineError::invalid_user_operation(e, uo))?;
            Ok(versioned.hash(entrypoint.address, chain_id)?)
        };
        Ok(Self {
            upper_limit: hash(&with_upper_limits(user_op, limits))?,
            actual: hash(user_op)?,
        })
    }

    fn for_type(&self, sig_type: UserOpSignatureType) -> B256 {
        match sig_type {
            UserOpSignatureType::UpperLimit => self.upper_limit,
            UserOpSignatureType::Actual => self.actual,
        }
    }
}

fn decode_slot(
    index: usize,
    slot: &[u8],
    hashes: &SignedHashes,
) -> Result<MultisigSignature, EngineError> {
    match slot[64] {
        flag @ (0 | ACTUAL_FLAG) => {
            if slot[..12].iter().any(|byte| *byte != 0) {
                return Err(invalid_aggregated(format!(
                    "contract slot {index} has a malformed signer word"
                )));
            }
            Ok(MultisigSignature {
                signer: Address::from_slice(&slot[12..32]),
                signature: Bytes::copy_from_slice(&slot[32..64]),
                signer_type: SignerType::Contract,
                user_op_sig_type: if flag == ACTUAL_FLAG {
                    UserOpSignatureType::Actual
                } else {
                    UserOpSignatureType::UpperLimit
                },
            })
        }
        v @ (27 | 28 | 59 | 60) => {
            let user_op_sig_type = if v > ACTUAL_FLAG {
                UserOpSignatureType::Actual
            } else {
                UserOpSignatureType::UpperLimit
            };
            let mut raw = [0u8; SLOT_LENGTH];
            raw[..64].copy_from_slice(&slot[..64]);
            raw[64] = v - sig_type_flag(user_op_sig_type);

            let signature = Signature::from_raw(&raw).map_err(|e| {
                invalid_aggregated(format!("EOA slot {index} is not a signature: {e}"))
            })?;
            let message_hash = eip191_hash_message(hashes.for_type(user_op_sig_type));
            let signer = signature
                .recover_address_from_prehash(&message_hash)
                .map_err(|e| {
                    invalid_aggregated(format!("EOA slot {index} does not recover: {e}"))
                })?;

            Ok(MultisigSignature {
                signer,
                signature: Bytes::copy_from_slice(&raw),
                signer_type: SignerType::Eoa,
                user_op_sig_type,
            })
        }
        other => Err(invalid_aggregated(format!(
            "slot {index} has unknown type byte {other}"
        ))),
    }
}

/// Inverse of [`combine_signatures`]. EOA signers are recovered from the EIP-191 message of
/// the hash their signature type commits to.
pub fn split_aggregated_signature(
    aggregated: &[u8],
    hashes: &SignedHashes,
) -> Result<SplitSignature, EngineError> {
    let upper_limits = parse_upper_limits(aggregated)?;
    let tail = &aggregated[UPPER_LIMITS_LENGTH..];
    if tail.is_empty() || tail.len() % SLOT_LENGTH != 0 {
        return Err(invalid_aggregated(format!(
            "length {} is not 96 + k * 65 with k >= 1",
            aggregated.len()
        )));
    }

    let signatures = tail
        .chunks_exact(SLOT_LENGTH)
        .enumerate()
        .map(|(index, slot)| decode_slot(index, slot, hashes))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SplitSignature {
        upper_limits,
        signatures,
    })
}

/// Parse the upper limits, then split with hashes of `user_op` under them.
pub fn split_for_user_operation(
    aggregated: &[u8],
    user_op: &UserOperationStruct,
    entrypoint: &EntrypointDetails,
    chain_id: u64,
) -> Result<SplitSignature, EngineError> {
    let limits = parse_upper_limits(aggregated)?;
    let hashes = SignedHashes::compute(user_op, &limits, entrypoint, chain_id)?;
    split_aggregated_signature(aggregated, &hashes)
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{address, b256},
        signers::{SignerSync, local::PrivateKeySigner},
    };

    use super::*;

    const HASHES: SignedHashes = SignedHashes {
        upper_limit: b256!("0x1111111111111111111111111111111111111111111111111111111111111111"),
        actual: b256!("0x2222222222222222222222222222222222222222222222222222222222222222"),
    };

    fn limits() -> UpperLimits {
        UpperLimits {
            pre_verification_gas: U256::from(1000),
            max_fee_per_gas: U256::from(2000),
            max_priority_fee_per_gas: U256::from(3000),
        }
    }

    fn eoa_signature(key: u8, sig_type: UserOpSignatureType) -> MultisigSignature {
        let mut secret = [0u8; 32];
        secret[31] = key;
        let signer = PrivateKeySigner::from_bytes(&B256::from(secret)).unwrap();
        let hash = HASHES.for_type(sig_type);
        let signature = signer.sign_message_sync(hash.as_slice()).unwrap();
        MultisigSignature {
            signer: signer.address(),
            signature: Bytes::from(signature.as_bytes()),
            signer_type: SignerType::Eoa,
            user_op_sig_type: sig_type,
        }
    }

    fn contract_signature(signer: Address) -> MultisigSignature {
        MultisigSignature {
            signer,
            signature: Bytes::copy_from_slice(B256::repeat_byte(0x77).as_slice()),
            signer_type: SignerType::Contract,
            user_op_sig_type: UserOpSignatureType::UpperLimit,
        }
    }

    #[test]
    fn contract_slots_sort_after_eoa_slots() {
        // lowest address of the two, still last
        let contract = contract_signature(address!("0x0000000000000000000000000000000000000001"));
        let eoa = eoa_signature(1, UserOpSignatureType::UpperLimit);

        let combined = combine_signatures(&CombineSignaturesParams {
            signatures: vec![contract.clone(), eoa.clone()],
            upper_limits: limits(),
        })
        .unwrap();

        assert_eq!(combined.len(), 96 + 2 * 65);
        assert_eq!(U256::from_be_slice(&combined[..32]), U256::from(1000));
        assert_eq!(U256::from_be_slice(&combined[32..64]), U256::from(2000));
        assert_eq!(U256::from_be_slice(&combined[64..96]), U256::from(3000));
        assert_eq!(&combined[96..160], &eoa.signature[..64]);
        assert_eq!(&combined[161 + 12..161 + 32], contract.signer.as_slice());
        assert_eq!(combined[225], 0);
    }

    #[test]
    fn split_inverts_combine() {
        let mut signatures = vec![
            eoa_signature(1, UserOpSignatureType::UpperLimit),
            eoa_signature(2, UserOpSignatureType::UpperLimit),
            eoa_signature(3, UserOpSignatureType::Actual),
            contract_signature(address!("0x9999999999999999999999999999999999999999")),
        ];
        let combined = combine_signatures(&CombineSignaturesParams {
            signatures: signatures.clone(),
            upper_limits: limits(),
        })
        .unwrap();

        let split = split_aggregated_signature(&combined, &HASHES).unwrap();
        assert_eq!(split.upper_limits, limits());

        signatures.sort_by_key(|sig| (sig.signer_type == SignerType::Contract, sig.signer));
        assert_eq!(split.signatures, signatures);
    }

    #[test]
    fn actual_signatures_shift_v() {
        let sig = eoa_signature(4, UserOpSignatureType::Actual);
        let formatted = format_signatures(std::slice::from_ref(&sig)).unwrap();
        assert_eq!(formatted[64], sig.signature[64] + 32);
    }

    #[test]
    fn combining_nothing_fails() {
        let err = combine_signatures(&CombineSignaturesParams {
            signatures: vec![],
            upper_limits: limits(),
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::MultisigMissingSignatureError));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let short_contract = MultisigSignature {
            signature: Bytes::from_static(&[1, 2, 3]),
            ..contract_signature(Address::ZERO)
        };
        assert!(matches!(
            format_signatures(&[short_contract]),
            Err(EngineError::InvalidContextSignatureError { .. })
        ));

        let erc1271_contract = MultisigSignature {
            signature: Bytes::from(vec![0x11; 96]),
            ..contract_signature(Address::ZERO)
        };
        match format_signatures(&[erc1271_contract]) {
            Err(EngineError::InvalidContextSignatureError { message }) => {
                assert!(message.contains("96 bytes"), "{message}");
                assert!(message.contains("not supported"), "{message}");
            }
            other => panic!("expected a context signature error, got {other:?}"),
        }

        let combined = combine_signatures(&CombineSignaturesParams {
            signatures: vec![eoa_signature(1, UserOpSignatureType::UpperLimit)],
            upper_limits: limits(),
        })
        .unwrap();

        for bad in [&combined[..95], &combined[..96], &combined[..160]] {
            assert!(matches!(
                split_aggregated_signature(bad, &HASHES),
                Err(EngineError::InvalidAggregatedSignatureError { .. })
            ));
        }

        let mut bad_v = combined.to_vec();
        bad_v[160] = 5;
        assert!(split_aggregated_signature(&bad_v, &HASHES).is_err());

        let mut dirty_contract = combine_signatures(&CombineSignaturesParams {
            signatures: vec![contract_signature(Address::repeat_byte(0x42))],
            upper_limits: limits(),
        })
        .unwrap()
        .to_vec();
        dirty_contract[96] = 1;
        assert!(split_aggregated_signature(&dirty_contract, &HASHES).is_err());
    }
}
