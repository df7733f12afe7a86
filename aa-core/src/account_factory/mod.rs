use alloy::{
    primitives::{Address, Bytes},
    sol,
    sol_types::SolCall,
};
use opkit_core::{
    error::{ContractErrorToEngineError, EngineError},
    rpc_clients::PublicRpc,
};

mod default;
mod utils;

pub use default::DefaultAccountFactory;

sol! {
    function createAccount(address admin, bytes salt) returns (address);
    function getAddress(address _adminSigner, bytes _data) view returns (address);
}

/// A contract that deploys smart accounts at deterministic addresses
pub trait AccountFactory: Send + Sync {
    fn factory_address(&self) -> Address;

    fn predict_address(
        &self,
        owner: &Address,
        salt_data: &Bytes,
    ) -> impl Future<Output = Result<Address, EngineError>> + Send;

    /// `factoryData` deploying the account of `owner`
    fn init_calldata(&self, owner: Address, salt_data: Bytes) -> Bytes {
        createAccountCall {
            admin: owner,
            salt: salt_data,
        }
        .abi_encode()
        .into()
    }
}

/// A factory with an unknown implementation, asked for addresses through `eth_call`
pub struct OnchainAccountFactory<'a, P: PublicRpc> {
    pub public: &'a P,
    pub factory_address: Address,
}

impl<P: PublicRpc> AccountFactory for OnchainAccountFactory<'_, P> {
    fn factory_address(&self) -> Address {
        self.factory_address
    }

    async fn predict_address(&self, owner: &Address, salt_data: &Bytes) -> Result<Address, EngineError> {
        let call = getAddressCall {
            _adminSigner: *owner,
            _data: salt_data.clone(),
        };
        let output = self
            .public
            .call(self.factory_address, call.abi_encode().into())
            .await?;
        getAddressCall::abi_decode_returns(&output)
            .map_err(|e| e.to_engine_error(self.public.chain_id(), Some(self.factory_address)))
    }
}

/// Either factory kind, picked from the factory address
pub enum SmartAccountFactory<'a, P: PublicRpc> {
    Default(DefaultAccountFactory),
    Onchain(OnchainAccountFactory<'a, P>),
}

impl<P: PublicRpc> AccountFactory for SmartAccountFactory<'_, P> {
    fn factory_address(&self) -> Address {
        match self {
            Self::Default(factory) => factory.factory_address,
            Self::Onchain(factory) => factory.factory_address,
        }
    }

    async fn predict_address(&self, owner: &Address, salt_data: &Bytes) -> Result<Address, EngineError> {
        match self {
            Self::Default(factory) => factory.predict_address(owner, salt_data).await,
            Self::Onchain(factory) => factory.predict_address(owner, salt_data).await,
        }
    }
}

/// Known factories and factories with a known implementation predict offline; any other
/// factory is asked on chain.
pub fn get_account_factory<P: PublicRpc>(
    public: &P,
    factory_address: Address,
    implementation_address: Option<Address>,
) -> SmartAccountFactory<'_, P> {
    let v0_6 = DefaultAccountFactory::v0_6();
    let v0_7 = DefaultAccountFactory::v0_7();

    if factory_address == v0_6.factory_address {
        SmartAccountFactory::Default(v0_6)
    } else if factory_address == v0_7.factory_address {
        SmartAccountFactory::Default(v0_7)
    } else if let Some(implementation) = implementation_address {
        SmartAccountFactory::Default(DefaultAccountFactory::with_addresses(
            factory_address,
            implementation,
        ))
    } else {
        SmartAccountFactory::Onchain(OnchainAccountFactory {
            public,
            factory_address,
        })
    }
}
