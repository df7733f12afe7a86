use fixtures::*;

use alloy::primitives::{Address, Bytes, U256, address};
use opkit_aa_core::{
    multisig::{
        MultisigDetails, MultisigSignature, MultisigUserOpSigner, MultisigUserOperationContext,
        SignerType, SplitSignature, UserOpSignatureType, split_for_user_operation,
    },
    smart_account::SimpleSmartAccount,
    userop::{UserOpBuilder, UserOperationRequest},
};
use opkit_aa_types::VersionedUserOp;
use opkit_core::{
    error::EngineError,
    transaction::{Call, UserOperationCallData},
};
use serde_json::json;

fn multisig_account(key: u8) -> TestAccount {
    SimpleSmartAccount::new(ACCOUNT, owner(key)).with_multisig(MultisigDetails {
        plugin: MULTISIG_PLUGIN,
        cached_threshold: 2,
    })
}

fn call() -> UserOperationCallData {
    UserOperationCallData::Single(Call {
        target: address!("0x000000000000000000000000000000000000beef"),
        data: Bytes::from_static(&[0x01, 0x02]),
        value: U256::ZERO,
    })
}

async fn sign(
    chain: &FakeChain,
    account: &TestAccount,
    context: MultisigUserOperationContext,
) -> Result<VersionedUserOp, EngineError> {
    let builder = UserOpBuilder::<'_, FakeChain, TestAccount>::standard(chain, json!({}))
        .with_signer(MultisigUserOpSigner::new(context));
    builder
        .build(&UserOperationRequest::new(account, call()))
        .await
}

fn split(chain: &FakeChain, op: &VersionedUserOp) -> SplitSignature {
    split_for_user_operation(
        op.signature(),
        &op.to_struct().unwrap(),
        &chain.entrypoint,
        CHAIN_ID,
    )
    .unwrap()
}

fn signer_of(key: u8) -> Address {
    owner(key).address()
}

#[tokio::test]
async fn propose_then_co_sign_then_execute() {
    setup_tracing();
    let mut chain = FakeChain::new();
    chain.public.threshold = U256::from(3);

    let proposal = sign(&chain, &multisig_account(0xaa), MultisigUserOperationContext::propose())
        .await
        .unwrap();
    assert_eq!(proposal.signature().len(), 96 + 65);

    let proposed = split(&chain, &proposal);
    assert_eq!(proposed.upper_limits.max_fee_per_gas, proposal.max_fee_per_gas());
    assert_eq!(
        proposed.upper_limits.pre_verification_gas,
        proposal.pre_verification_gas()
    );
    assert_eq!(
        proposed.signatures,
        vec![MultisigSignature {
            signer: signer_of(0xaa),
            signature: proposed.signatures[0].signature.clone(),
            signer_type: SignerType::Eoa,
            user_op_sig_type: UserOpSignatureType::UpperLimit,
        }]
    );

    let co_signed = sign(
        &chain,
        &multisig_account(0xbb),
        MultisigUserOperationContext::co_sign(
            UserOpSignatureType::UpperLimit,
            proposed.signatures.clone(),
            proposal.signature().clone(),
        ),
    )
    .await
    .unwrap();
    assert_eq!(co_signed.signature().len(), 96 + 2 * 65);

    let collected = split(&chain, &co_signed);
    assert_eq!(collected.upper_limits, proposed.upper_limits);
    let mut signers: Vec<Address> = collected.signatures.iter().map(|s| s.signer).collect();
    signers.sort();
    let mut expected = vec![signer_of(0xaa), signer_of(0xbb)];
    expected.sort();
    assert_eq!(signers, expected);

    let executed = sign(
        &chain,
        &multisig_account(0xcc),
        MultisigUserOperationContext::co_sign(
            UserOpSignatureType::Actual,
            collected.signatures.clone(),
            co_signed.signature().clone(),
        ),
    )
    .await
    .unwrap();
    assert_eq!(executed.signature().len(), 96 + 3 * 65);

    let final_split = split(&chain, &executed);
    let actual: Vec<&MultisigSignature> = final_split
        .signatures
        .iter()
        .filter(|s| s.user_op_sig_type == UserOpSignatureType::Actual)
        .collect();
    assert_eq!(actual.len(), 1);
    assert_eq!(actual[0].signer, signer_of(0xcc));
    assert_eq!(chain.log.count("eth_sendUserOperation"), 0);
}

#[tokio::test]
async fn actual_signature_needs_the_threshold() {
    let mut chain = FakeChain::new();
    chain.public.threshold = U256::from(3);

    let proposal = sign(&chain, &multisig_account(0xaa), MultisigUserOperationContext::propose())
        .await
        .unwrap();
    let proposed = split(&chain, &proposal);

    let err = sign(
        &chain,
        &multisig_account(0xbb),
        MultisigUserOperationContext::co_sign(
            UserOpSignatureType::Actual,
            proposed.signatures,
            proposal.signature().clone(),
        ),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        EngineError::MultisigThresholdNotMetError {
            collected: 2,
            threshold: 3
        }
    ));
}

#[tokio::test]
async fn zero_threshold_falls_back_to_the_cached_one() {
    let chain = FakeChain::new();

    let proposal = sign(&chain, &multisig_account(0xaa), MultisigUserOperationContext::propose())
        .await
        .unwrap();
    let proposed = split(&chain, &proposal);

    // cached threshold is 2
    let executed = sign(
        &chain,
        &multisig_account(0xbb),
        MultisigUserOperationContext::co_sign(
            UserOpSignatureType::Actual,
            proposed.signatures,
            proposal.signature().clone(),
        ),
    )
    .await
    .unwrap();
    assert_eq!(executed.signature().len(), 96 + 2 * 65);
}

#[tokio::test]
async fn rejects_incomplete_contexts() {
    let chain = FakeChain::new();
    let account = multisig_account(0xaa);

    let actual_without_signatures = MultisigUserOperationContext {
        user_op_signature_type: UserOpSignatureType::Actual,
        signatures: None,
        aggregated_signature: None,
    };
    assert!(matches!(
        sign(&chain, &account, actual_without_signatures).await,
        Err(EngineError::InvalidContextSignatureError { .. })
    ));

    let signatures_without_aggregate = MultisigUserOperationContext {
        user_op_signature_type: UserOpSignatureType::UpperLimit,
        signatures: Some(Vec::new()),
        aggregated_signature: None,
    };
    assert!(matches!(
        sign(&chain, &account, signatures_without_aggregate).await,
        Err(EngineError::InvalidContextSignatureError { .. })
    ));
}

#[tokio::test]
async fn plain_accounts_cannot_multisign() {
    let chain = FakeChain::new();
    let err = sign(&chain, &account(), MultisigUserOperationContext::propose())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MultisigAccountExpectedError));
}

#[tokio::test]
async fn malformed_aggregated_signature_is_rejected() {
    let chain = FakeChain::new();
    let err = sign(
        &chain,
        &multisig_account(0xbb),
        MultisigUserOperationContext::co_sign(
            UserOpSignatureType::UpperLimit,
            Vec::new(),
            Bytes::from_static(&[0u8; 10]),
        ),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidAggregatedSignatureError { .. }
    ));
}
