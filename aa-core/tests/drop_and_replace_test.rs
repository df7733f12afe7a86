use fixtures::*;

use alloy::primitives::{Bytes, U256, address};
use opkit_aa_core::{
    account_factory::DefaultAccountFactory,
    smart_account::SimpleSmartAccount,
    userop::{
        UserOpBuilder, UserOperationOverrides, UserOperationRequest, bump_fee, drop_and_replace,
    },
};
use opkit_aa_types::VersionedUserOp;
use opkit_core::transaction::{Call, UserOperationCallData};
use serde_json::json;

fn call() -> UserOperationCallData {
    UserOperationCallData::Batch(vec![
        Call {
            target: address!("0x000000000000000000000000000000000000beef"),
            data: Bytes::from_static(&[0xaa]),
            value: U256::ZERO,
        },
        Call {
            target: address!("0x000000000000000000000000000000000000cafe"),
            data: Bytes::new(),
            value: U256::from(1),
        },
    ])
}

async fn original(chain: &FakeChain, account: &TestAccount) -> VersionedUserOp {
    UserOpBuilder::standard(chain, json!({}))
        .send(&UserOperationRequest::new(account, call()))
        .await
        .unwrap()
        .user_operation
}

#[tokio::test]
async fn replacement_bumps_fees_at_the_same_nonce() {
    setup_tracing();
    let chain = FakeChain::new();
    let account = account();
    let stuck = original(&chain, &account).await;

    let builder = UserOpBuilder::standard(&chain, json!({}));
    let replaced = drop_and_replace(
        &builder,
        &account,
        &stuck,
        &UserOperationOverrides::default(),
        None,
    )
    .await
    .unwrap();
    let replacement = replaced.user_operation;

    assert_eq!(replacement.sender(), stuck.sender());
    assert_eq!(replacement.nonce(), stuck.nonce());
    assert_eq!(
        replacement.to_struct().unwrap().call_data,
        stuck.to_struct().unwrap().call_data
    );
    assert!(replacement.max_fee_per_gas() > stuck.max_fee_per_gas());
    assert!(replacement.max_priority_fee_per_gas() > stuck.max_priority_fee_per_gas());
    assert_eq!(
        replacement.max_fee_per_gas(),
        bump_fee(stuck.max_fee_per_gas()).unwrap()
    );
    assert_ne!(replaced.hash, stuck.hash(chain.entrypoint.address, CHAIN_ID).unwrap());

    assert_eq!(chain.sent().len(), 2);
    // the replacement reuses the nonce instead of asking the EntryPoint again
    assert_eq!(chain.public.nonce_keys.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn replacement_follows_a_rising_market() {
    let chain = FakeChain::new();
    let account = account();
    let stuck = original(&chain, &account).await;

    let mut busier = FakeChain::new();
    busier.public.base_fee = U256::from(BASE_FEE * 5);
    busier.public.priority_fee = Some(U256::from(PRIORITY_FEE * 3));
    let builder = UserOpBuilder::standard(&busier, json!({}));
    let replacement = drop_and_replace(
        &builder,
        &account,
        &stuck,
        &UserOperationOverrides::default(),
        None,
    )
    .await
    .unwrap()
    .user_operation;

    assert_eq!(
        replacement.max_priority_fee_per_gas(),
        U256::from(PRIORITY_FEE * 3)
    );
    assert_eq!(
        replacement.max_fee_per_gas(),
        U256::from(BASE_FEE * 5 + PRIORITY_FEE * 3)
    );
    assert_eq!(replacement.nonce(), stuck.nonce());
    assert_eq!(busier.sent().len(), 1);
}

#[tokio::test]
async fn replacement_keeps_init_code_of_undeployed_accounts() {
    let chain = FakeChain::new();
    let account =
        SimpleSmartAccount::counterfactual(&DefaultAccountFactory::v0_7(), owner(0xbb), Bytes::new())
            .await
            .unwrap();
    let stuck = original(&chain, &account).await;

    let builder = UserOpBuilder::standard(&chain, json!({}));
    let replacement = drop_and_replace(
        &builder,
        &account,
        &stuck,
        &UserOperationOverrides::default(),
        None,
    )
    .await
    .unwrap()
    .user_operation;

    let stuck = stuck.to_struct().unwrap();
    let replacement = replacement.to_struct().unwrap();
    assert!(stuck.factory.is_some());
    assert_eq!(replacement.factory, stuck.factory);
    assert_eq!(replacement.factory_data, stuck.factory_data);
}
