use fixtures::*;

use alloy::{
    primitives::{Address, Bytes, U256, address},
    sol_types::SolCall,
};
use opkit_aa_core::{
    account_factory::{
        AccountFactory, DefaultAccountFactory, SmartAccountFactory, createAccountCall,
        get_account_factory,
    },
    smart_account::SimpleSmartAccount,
    userop::{UserOpBuilder, UserOperationRequest},
};
use opkit_core::transaction::{Call, UserOperationCallData};
use serde_json::json;

const CUSTOM_FACTORY: Address = address!("0x000000000000000000000000000000000000f00d");
const CUSTOM_IMPLEMENTATION: Address = address!("0x0000000000000000000000000000000000001e1e");

fn ping() -> UserOperationCallData {
    UserOperationCallData::Single(Call {
        target: address!("0x000000000000000000000000000000000000beef"),
        data: Bytes::new(),
        value: U256::ZERO,
    })
}

#[tokio::test]
async fn unknown_factory_is_asked_on_chain() {
    setup_tracing();
    let chain = FakeChain::new();
    let signer = owner(0xcc);
    let owner_address = signer.address();
    let salt = Bytes::from_static(b"salt");

    let factory = get_account_factory(&chain.public, CUSTOM_FACTORY, None);
    assert!(matches!(factory, SmartAccountFactory::Onchain(_)));

    let account = SimpleSmartAccount::counterfactual(&factory, signer, salt.clone())
        .await
        .unwrap();
    assert_eq!(
        *chain.public.address_queries.lock().unwrap(),
        vec![(CUSTOM_FACTORY, owner_address, salt.clone())]
    );

    let op = UserOpBuilder::standard(&chain, json!({}))
        .build(&UserOperationRequest::new(&account, ping()))
        .await
        .unwrap()
        .to_struct()
        .unwrap();

    assert_eq!(op.sender, ONCHAIN_PREDICTED_ACCOUNT);
    assert_eq!(op.factory, Some(CUSTOM_FACTORY));
    let deploy = createAccountCall::abi_decode(&op.factory_data.unwrap()).unwrap();
    assert_eq!(deploy.admin, owner_address);
    assert_eq!(deploy.salt, salt);
}

#[tokio::test]
async fn known_factories_predict_offline() {
    let chain = FakeChain::new();
    let v0_7 = DefaultAccountFactory::v0_7();

    let factory = get_account_factory(&chain.public, v0_7.factory_address, None);
    assert!(matches!(factory, SmartAccountFactory::Default(f) if f == v0_7));

    let predicted = factory
        .predict_address(&owner(0xcc).address(), &Bytes::new())
        .await
        .unwrap();
    assert_eq!(
        predicted,
        v0_7.predict_address_sync(&owner(0xcc).address(), &Bytes::new())
    );
    assert!(chain.public.address_queries.lock().unwrap().is_empty());
    assert_eq!(chain.log.count("eth_call"), 0);
}

#[tokio::test]
async fn known_implementation_predicts_offline_for_any_factory() {
    let chain = FakeChain::new();

    let factory = get_account_factory(&chain.public, CUSTOM_FACTORY, Some(CUSTOM_IMPLEMENTATION));
    assert_eq!(factory.factory_address(), CUSTOM_FACTORY);

    let predicted = factory
        .predict_address(&owner(0xcc).address(), &Bytes::new())
        .await
        .unwrap();
    assert_eq!(
        predicted,
        DefaultAccountFactory::with_addresses(CUSTOM_FACTORY, CUSTOM_IMPLEMENTATION)
            .predict_address_sync(&owner(0xcc).address(), &Bytes::new())
    );
    assert_ne!(predicted, ONCHAIN_PREDICTED_ACCOUNT);
    assert_eq!(chain.log.count("eth_call"), 0);
}
