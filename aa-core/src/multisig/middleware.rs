use futures::future::BoxFuture;
use opkit_aa_types::UserOperationStruct;
use opkit_core::{chain::Chain, error::EngineError, signer::SmartAccountSigner};

use super::{
    codec::{SignedHashes, combine_signatures, parse_upper_limits, with_upper_limits},
    get_signer_type, get_threshold,
    types::{
        CombineSignaturesParams, MultisigSignature, MultisigUserOperationContext, UpperLimits,
        UserOpSignatureType,
    },
};
use crate::{
    smart_account::SmartAccount,
    userop::middleware::{BuildState, Middleware, MiddlewareArgs},
};

/// Signing stage for accounts owned through the multisig plugin.
///
/// The first owner proposes with an upper-limit signature over the operation's own fee values.
/// Later owners add theirs to the aggregated signature; an `Actual` signature is only produced
/// once it meets the account's threshold.
pub struct MultisigUserOpSigner {
    context: MultisigUserOperationContext,
}

impl MultisigUserOpSigner {
    pub fn new(context: MultisigUserOperationContext) -> Self {
        Self { context }
    }

    /// Check the context before any network call is made.
    pub fn validate(&self) -> Result<(), EngineError> {
        let context = &self.context;
        if context.user_op_signature_type == UserOpSignatureType::Actual
            && context.signatures.is_none()
            && context.aggregated_signature.is_none()
        {
            return Err(EngineError::InvalidContextSignatureError {
                message: "an ACTUAL signature needs the signatures collected so far".to_string(),
            });
        }
        if !context.is_proposal()
            && (context.signatures.is_none() || context.aggregated_signature.is_none())
        {
            return Err(EngineError::InvalidContextSignatureError {
                message: "co-signing needs both signatures and aggregatedSignature".to_string(),
            });
        }
        Ok(())
    }

    /// Upper limits every signer commits to, and the previously collected signatures
    fn collected(
        &self,
        uo: &UserOperationStruct,
    ) -> Result<(UpperLimits, Vec<MultisigSignature>), EngineError> {
        match (&self.context.signatures, &self.context.aggregated_signature) {
            (Some(signatures), Some(aggregated)) => {
                Ok((parse_upper_limits(aggregated)?, signatures.clone()))
            }
            _ => Ok((
                UpperLimits {
                    pre_verification_gas: uo.pre_verification_gas.unwrap_or_default(),
                    max_fee_per_gas: uo.max_fee_per_gas.unwrap_or_default(),
                    max_priority_fee_per_gas: uo.max_priority_fee_per_gas.unwrap_or_default(),
                },
                Vec::new(),
            )),
        }
    }
}

impl<C: Chain, A: SmartAccount> Middleware<C, A> for MultisigUserOpSigner {
    fn name(&self) -> &'static str {
        "multisig_user_op_signer"
    }

    fn state(&self) -> BuildState {
        BuildState::Signing
    }

    fn run<'a>(
        &'a self,
        uo: UserOperationStruct,
        args: &'a MiddlewareArgs<'a, C, A>,
    ) -> BoxFuture<'a, Result<UserOperationStruct, EngineError>> {
        Box::pin(async move {
            self.validate()?;
            let details = args
                .account
                .multisig()
                .ok_or(EngineError::MultisigAccountExpectedError)?;

            let sig_type = self.context.user_op_signature_type;
            let signer = args.account.signer().address();
            let (upper_limits, mut signatures) = self.collected(&uo)?;
            signatures.retain(|existing| existing.signer != signer);

            let mut uo = match sig_type {
                UserOpSignatureType::UpperLimit => with_upper_limits(&uo, &upper_limits),
                UserOpSignatureType::Actual => uo,
            };

            if sig_type == UserOpSignatureType::Actual {
                let threshold =
                    get_threshold(args.chain.public_client(), &details, args.account.address())
                        .await?;
                let collected = signatures.len() as u64 + 1;
                if collected < threshold {
                    return Err(EngineError::MultisigThresholdNotMetError {
                        collected,
                        threshold,
                    });
                }
            }

            let hashes =
                SignedHashes::compute(&uo, &upper_limits, args.entrypoint(), args.chain.chain_id())?;
            let hash = match sig_type {
                UserOpSignatureType::UpperLimit => hashes.upper_limit,
                UserOpSignatureType::Actual => hashes.actual,
            };
            let signature = args.account.sign_user_operation_hash(hash).await?;

            let signer_type =
                get_signer_type(args.chain.public_client(), signer, &signature).await?;
            signatures.push(MultisigSignature {
                signer,
                signature,
                signer_type,
                user_op_sig_type: sig_type,
            });

            let aggregated = combine_signatures(&CombineSignaturesParams {
                signatures,
                upper_limits,
            })?;

            tracing::debug!(
                %signer,
                ?signer_type,
                ?sig_type,
                length = aggregated.len(),
                "multisig signature added"
            );
            uo.signature = Some(aggregated);
            Ok(uo)
        })
    }
}
