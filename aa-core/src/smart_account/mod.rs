use alloy::{
    hex,
    primitives::{Address, B256, Bytes, U256},
    sol,
    sol_types::SolCall,
};
use opkit_aa_types::NonceKey;
use opkit_core::{
    chain::Chain,
    error::EngineError,
    rpc_clients::{PublicRpc, get_entrypoint_nonce},
    signer::SmartAccountSigner,
    transaction::{Call, UserOperationCallData},
};

use crate::{account_factory::AccountFactory, multisig::MultisigDetails};

sol! {
    function execute(address _target, uint256 _value, bytes _calldata);
}

sol! {
    function executeBatch(address[] _target, uint256[] _value, bytes[] _calldata);
}

/// Signature with the shape of a real one, used during gas estimation
pub const DUMMY_SIGNATURE: [u8; 65] = hex!(
    "0xfffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

pub trait SmartAccount: Send + Sync {
    type Signer: SmartAccountSigner;

    fn address(&self) -> Address;

    fn signer(&self) -> &Self::Signer;

    /// Factory and factory calldata deploying this account
    fn factory(&self) -> Option<(Address, Bytes)>;

    /// Encode a call to the account
    fn encode_execute(&self, call: &Call) -> Bytes;

    /// Encode a batch call to the account
    fn encode_batch_execute(&self, calls: &[Call]) -> Bytes;

    fn encode_call_data(&self, call_data: &UserOperationCallData) -> Bytes {
        match call_data {
            UserOperationCallData::Raw { raw } => raw.clone(),
            UserOperationCallData::Single(call) => self.encode_execute(call),
            UserOperationCallData::Batch(calls) => self.encode_batch_execute(calls),
        }
    }

    fn is_deployed(&self, chain: &impl Chain) -> impl Future<Output = Result<bool, EngineError>> + Send {
        async move {
            let code = chain.public_client().get_code(self.address()).await?;
            Ok(!code.is_empty())
        }
    }

    /// Factory and factory calldata, or `None` once the account is deployed
    fn get_init_code(
        &self,
        chain: &impl Chain,
    ) -> impl Future<Output = Result<Option<(Address, Bytes)>, EngineError>> + Send {
        async move {
            let Some(factory) = self.factory() else {
                return Ok(None);
            };
            if self.is_deployed(chain).await? {
                return Ok(None);
            }
            Ok(Some(factory))
        }
    }

    /// The EntryPoint nonce for `key`
    fn get_nonce(
        &self,
        chain: &impl Chain,
        key: NonceKey,
    ) -> impl Future<Output = Result<U256, EngineError>> + Send {
        async move {
            get_entrypoint_nonce(
                chain.public_client(),
                chain.entrypoint().address,
                self.address(),
                key.as_u256(),
            )
            .await
        }
    }

    fn dummy_signature(&self) -> Bytes {
        Bytes::from(DUMMY_SIGNATURE)
    }

    /// EIP-191 signature over the UserOperation hash
    fn sign_user_operation_hash(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Bytes, EngineError>> + Send {
        async move { self.signer().sign_message(hash.as_slice()).await }
    }

    /// Set for accounts owned through the multisig plugin
    fn multisig(&self) -> Option<MultisigDetails> {
        None
    }
}

/// A single-owner account with `execute` and `executeBatch`
#[derive(Debug, Clone)]
pub struct SimpleSmartAccount<S> {
    address: Address,
    signer: S,
    factory: Option<(Address, Bytes)>,
    multisig: Option<MultisigDetails>,
}

impl<S: SmartAccountSigner> SimpleSmartAccount<S> {
    /// An account that is already deployed at `address`
    pub fn new(address: Address, signer: S) -> Self {
        Self {
            address,
            signer,
            factory: None,
            multisig: None,
        }
    }

    /// The account `factory` deploys for the signer and `salt_data`, deployed with the first
    /// UserOperation if it does not exist yet.
    pub async fn counterfactual(
        factory: &impl AccountFactory,
        signer: S,
        salt_data: Bytes,
    ) -> Result<Self, EngineError> {
        let owner = signer.address();
        let address = factory.predict_address(&owner, &salt_data).await?;
        let init_calldata = factory.init_calldata(owner, salt_data);

        tracing::debug!(%address, factory = %factory.factory_address(), "predicted account address");

        Ok(Self {
            address,
            signer,
            factory: Some((factory.factory_address(), init_calldata)),
            multisig: None,
        })
    }

    pub fn with_multisig(mut self, details: MultisigDetails) -> Self {
        self.multisig = Some(details);
        self
    }
}

impl<S: SmartAccountSigner> SmartAccount for SimpleSmartAccount<S> {
    type Signer = S;

    fn address(&self) -> Address {
        self.address
    }

    fn signer(&self) -> &S {
        &self.signer
    }

    fn factory(&self) -> Option<(Address, Bytes)> {
        self.factory.clone()
    }

    fn encode_execute(&self, call: &Call) -> Bytes {
        executeCall {
            _target: call.target,
            _value: call.value,
            _calldata: call.data.clone(),
        }
        .abi_encode()
        .into()
    }

    fn encode_batch_execute(&self, calls: &[Call]) -> Bytes {
        executeBatchCall {
            _target: calls.iter().map(|call| call.target).collect(),
            _value: calls.iter().map(|call| call.value).collect(),
            _calldata: calls.iter().map(|call| call.data.clone()).collect(),
        }
        .abi_encode()
        .into()
    }

    fn multisig(&self) -> Option<MultisigDetails> {
        self.multisig
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{address, b256},
        signers::local::PrivateKeySigner,
    };

    use super::*;
    use crate::account_factory::DefaultAccountFactory;

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::from_bytes(&b256!(
            "0x00000000000000000000000000000000000000000000000000000000000000aa"
        ))
        .unwrap()
    }

    #[test]
    fn encodes_single_and_batch_calls() {
        let account = SimpleSmartAccount::new(Address::ZERO, signer());
        let call = Call {
            target: address!("0x1111111111111111111111111111111111111111"),
            data: Bytes::from_static(&[0xab]),
            value: U256::from(5),
        };

        let single = account.encode_call_data(&UserOperationCallData::Single(call.clone()));
        assert_eq!(single[..4], executeCall::SELECTOR);
        let decoded = executeCall::abi_decode(&single).unwrap();
        assert_eq!(decoded._value, U256::from(5));

        let batch = account.encode_call_data(&UserOperationCallData::Batch(vec![call.clone(), call]));
        let decoded = executeBatchCall::abi_decode(&batch).unwrap();
        assert_eq!(decoded._target.len(), 2);

        let raw = Bytes::from_static(&[1, 2, 3]);
        assert_eq!(
            account.encode_call_data(&UserOperationCallData::Raw { raw: raw.clone() }),
            raw
        );
    }

    #[tokio::test]
    async fn counterfactual_accounts_carry_factory_data() {
        let factory = DefaultAccountFactory::v0_7();
        let owner = signer();
        let expected = factory.predict_address_sync(&owner.address(), &Bytes::new());

        let account = SimpleSmartAccount::counterfactual(&factory, owner, Bytes::new())
            .await
            .unwrap();
        assert_eq!(account.address(), expected);

        let (factory_address, factory_data) = account.factory().unwrap();
        assert_eq!(factory_address, factory.factory_address);
        assert_eq!(
            factory_data,
            factory.init_calldata(account.signer().address(), Bytes::new())
        );
        assert!(account.multisig().is_none());
    }
}
